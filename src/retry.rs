//! Retry policy with exponential backoff.
//!
//! [`RetryPolicy`] wraps an arbitrary fallible action. The first attempt runs
//! immediately; after each failure the policy waits `base_delay × 2^(n-1)`
//! before attempt `n + 1`, up to `max_retries` retries. When every attempt
//! fails, the error of the last attempt is returned unchanged so callers can
//! still match on it.
//!
//! Every error is treated as retryable. Only wrap operations that are safe to
//! repeat (topic create/delete, lock acquisition); producer or consumer
//! acquisition must not be wrapped.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use kzconnect::retry::RetryPolicy;
//!
//! async fn example() -> Result<(), std::io::Error> {
//!     let policy = RetryPolicy::new(3, Duration::from_millis(100));
//!     policy
//!         .run(|| async {
//!             // your fallible operation
//!             Ok::<_, std::io::Error>(())
//!         })
//!         .await
//! }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder, Retryable};

use crate::config::RetryConfig;
use crate::constants::RETRY_BACKOFF_FACTOR;
use crate::metrics::RETRY_ATTEMPTS;

/// Bounded exponential-backoff retry policy.
///
/// Immutable once built and cheap to clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    /// `max_retries` counts retries after the initial attempt, so an action is
    /// invoked at most `max_retries + 1` times.
    pub fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, config.base_delay)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    fn builder(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_factor(RETRY_BACKOFF_FACTOR)
            .without_max_delay()
            .with_max_times(self.max_retries)
    }

    /// Delays slept between consecutive attempts, in order.
    pub fn schedule(&self) -> ExponentialBackoff {
        self.builder().build()
    }

    /// Run `action` until it succeeds or the retry budget is spent.
    pub async fn run<F, Fut, T, E>(&self, action: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut retries = 0usize;
        let result = action
            .retry(self.builder())
            .notify(|err: &E, delay: Duration| {
                retries += 1;
                record_attempt(retries, delay, err);
            })
            .await;
        record_outcome(result.is_ok(), retries);
        result
    }

    /// Blocking variant of [`run`](Self::run).
    ///
    /// Sleeps the current thread between attempts; never call it from an
    /// async executor thread.
    pub fn run_blocking<F, T, E>(&self, mut action: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Display,
    {
        let mut delays = self.schedule();
        let mut retries = 0usize;
        loop {
            match action() {
                Ok(value) => {
                    record_outcome(true, retries);
                    return Ok(value);
                }
                Err(err) => match delays.next() {
                    Some(delay) => {
                        retries += 1;
                        record_attempt(retries, delay, &err);
                        std::thread::sleep(delay);
                    }
                    None => {
                        record_outcome(false, retries);
                        return Err(err);
                    }
                },
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

fn record_attempt(attempt: usize, delay: Duration, err: &dyn Display) {
    RETRY_ATTEMPTS
        .with_label_values(&["retry_policy", "attempt"])
        .inc();
    tracing::debug!(attempt, ?delay, error = %err, "Retrying after failure");
}

fn record_outcome(success: bool, retries: usize) {
    if success {
        RETRY_ATTEMPTS
            .with_label_values(&["retry_policy", "success"])
            .inc();
    } else {
        RETRY_ATTEMPTS
            .with_label_values(&["retry_policy", "exhausted"])
            .inc();
        tracing::warn!(retries, "Retry policy exhausted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn timeout_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout")
    }

    // ========================================================================
    // Schedule Tests
    // ========================================================================

    fn assert_close(actual: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        let tolerance = Duration::from_millis(1);
        assert!(
            actual + tolerance >= expected && actual <= expected + tolerance,
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn test_schedule_doubles_from_base_delay() {
        let policy = RetryPolicy::new(4, Duration::from_millis(10));
        let delays: Vec<Duration> = policy.schedule().collect();
        assert_eq!(delays.len(), 4);
        for (delay, expected) in delays.iter().zip([10u64, 20, 40, 80]) {
            assert_close(*delay, expected);
        }
    }

    #[test]
    fn test_schedule_empty_without_retries() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.schedule().count(), 0);
    }

    #[test]
    fn test_default_policy_matches_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), crate::constants::DEFAULT_MAX_RETRIES);
        assert_eq!(
            policy.base_delay(),
            Duration::from_millis(crate::constants::DEFAULT_RETRY_BASE_DELAY_MS)
        );
    }

    // ========================================================================
    // Retry Behavior Tests
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_incurs_no_delay() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let start = Instant::now();

        let result = policy
            .run(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_runs_retries_plus_one() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let start = Instant::now();

        let result: Result<(), std::io::Error> = policy
            .run(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(timeout_err())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        // 100 + 200 + 400
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(695));
        assert!(elapsed < Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gaps_follow_exponential_schedule() {
        let stamps = Mutex::new(Vec::new());
        let policy = RetryPolicy::new(3, Duration::from_millis(50));

        let _: Result<(), std::io::Error> = policy
            .run(|| async {
                stamps.lock().unwrap().push(Instant::now());
                Err(timeout_err())
            })
            .await;

        let stamps = stamps.into_inner().unwrap();
        let gaps: Vec<Duration> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps.len(), 3);
        for (gap, expected) in gaps.iter().zip([50u64, 100, 200]) {
            assert!(*gap + Duration::from_millis(1) >= Duration::from_millis(expected));
            assert!(*gap < Duration::from_millis(expected + 10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(10));

        let result = policy
            .run(|| async {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 { Err(timeout_err()) } else { Ok("done") }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_last_allowed_attempt() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(10));

        let result = policy
            .run(|| async {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 { Err(timeout_err()) } else { Ok(attempt) }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_returned_unchanged() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(1, Duration::from_millis(10));

        let result: Result<(), std::io::Error> = policy
            .run(|| async {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                if attempt == 0 {
                    Err(timeout_err())
                } else {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        "denied",
                    ))
                }
            })
            .await;

        assert_eq!(
            result.unwrap_err().kind(),
            std::io::ErrorKind::PermissionDenied
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_runs_once() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(0, Duration::from_millis(10));

        let result: Result<(), std::io::Error> = policy
            .run(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(timeout_err())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_reused_across_actions() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let first = AtomicU32::new(0);
        let second = AtomicU32::new(0);

        let _: Result<(), std::io::Error> = policy
            .run(|| async {
                first.fetch_add(1, Ordering::SeqCst);
                Err(timeout_err())
            })
            .await;
        let _: Result<(), std::io::Error> = policy
            .run(|| async {
                second.fetch_add(1, Ordering::SeqCst);
                Err(timeout_err())
            })
            .await;

        assert_eq!(first.load(Ordering::SeqCst), 3);
        assert_eq!(second.load(Ordering::SeqCst), 3);
    }

    // ========================================================================
    // Blocking Variant Tests
    // ========================================================================

    #[test]
    fn test_run_blocking_exhausts() {
        let mut attempts = 0;
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result: Result<(), std::io::Error> = policy.run_blocking(|| {
            attempts += 1;
            Err(timeout_err())
        });

        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_run_blocking_success_after_failure() {
        let mut attempts = 0;
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result = policy.run_blocking(|| {
            attempts += 1;
            if attempts < 2 { Err(timeout_err()) } else { Ok(attempts) }
        });

        assert_eq!(result.unwrap(), 2);
    }
}
