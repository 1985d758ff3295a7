//! Prometheus metrics for the connectors.
//!
//! Metrics cover:
//! - Retry attempts per policy (attempt, success, exhausted)
//! - Distributed lock operations and wait time
//! - Topic admin operations
//! - Coordination session state transitions
//!
//! All metrics are registered to a custom registry with the "kzconnect" prefix to avoid
//! name collisions with other libraries using the default Prometheus registry.
//! Registration errors are handled gracefully: if a metric fails to register,
//! the unregistered metric is returned instead of panicking.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for connector metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("kzconnect".to_string()), None).unwrap_or_else(|_| Registry::new())
});

/// Declare an IntGauge metric.
macro_rules! define_gauge {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntGauge> =
            Lazy::new(|| register_int_gauge_safe(&REGISTRY, $metric_name, $help));
    };
}

/// Declare an IntCounterVec metric with labels.
macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare a HistogramVec metric with labels and buckets.
macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// Retry metrics
// =============================================================================

define_counter_vec!(
    RETRY_ATTEMPTS,
    "retry_attempts_total",
    "Retry policy outcomes by policy name",
    ["policy", "outcome"]
);

// =============================================================================
// Lock metrics
// =============================================================================

define_counter_vec!(
    LOCK_OPERATIONS,
    "lock_operations_total",
    "Distributed lock operations by operation and outcome",
    ["operation", "outcome"]
);
define_histogram_vec!(
    LOCK_WAIT_SECONDS,
    "lock_wait_seconds",
    "Time spent acquiring a distributed lock",
    ["outcome"],
    [0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
);
define_gauge!(
    LOCKS_HELD,
    "locks_held",
    "Number of distributed locks currently held by this process"
);

// =============================================================================
// Broker metrics
// =============================================================================

define_counter_vec!(
    TOPIC_OPERATIONS,
    "topic_operations_total",
    "Topic admin operations by operation and status",
    ["operation", "status"]
);

// =============================================================================
// Session metrics
// =============================================================================

define_counter_vec!(
    SESSION_EVENTS,
    "session_events_total",
    "Coordination session state transitions",
    ["state"]
);

fn register_int_gauge_safe(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGauge metric, using unregistered fallback");
            gauge
        }
    }
}

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Force registration of every metric so they show up before first use.
pub fn init_metrics() {
    Lazy::force(&RETRY_ATTEMPTS);
    Lazy::force(&LOCK_OPERATIONS);
    Lazy::force(&LOCK_WAIT_SECONDS);
    Lazy::force(&LOCKS_HELD);
    Lazy::force(&TOPIC_OPERATIONS);
    Lazy::force(&SESSION_EVENTS);
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn record_lock(operation: &str, outcome: &str) {
    LOCK_OPERATIONS
        .with_label_values(&[operation, outcome])
        .inc();
}

pub fn record_lock_wait(outcome: &str, seconds: f64) {
    LOCK_WAIT_SECONDS
        .with_label_values(&[outcome])
        .observe(seconds);
}

pub fn record_topic_operation(operation: &str, status: &str) {
    TOPIC_OPERATIONS
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_session_event(state: &str) {
    SESSION_EVENTS.with_label_values(&[state]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_prefix() {
        init_metrics();
        record_lock("acquire", "success");
        record_topic_operation("create", "ok");

        let text = encode_metrics().unwrap();
        assert!(text.contains("kzconnect_lock_operations_total"));
        assert!(text.contains("kzconnect_topic_operations_total"));
    }

    #[test]
    fn test_recording_does_not_panic() {
        record_lock_wait("acquired", 0.25);
        record_session_event("connected");
        LOCKS_HELD.inc();
        LOCKS_HELD.dec();
    }
}
