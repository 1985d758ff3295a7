//! Configuration for the broker and coordination connectors.
//!
//! ```rust,no_run
//! use kzconnect::config::ConnectorConfig;
//!
//! let config = ConnectorConfig::from_env().expect("invalid environment");
//! if let Err(errors) = config.validate() {
//!     for e in errors {
//!         eprintln!("config: {e}");
//!     }
//! }
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default |
//! |----------|---------|
//! | `KAFKA_BROKERS` | `localhost:9092` |
//! | `KAFKA_CLIENT_ID` | `kzconnect` |
//! | `TOPIC_OPERATION_TIMEOUT_MS` | `10000` |
//! | `ZK_SERVERS` | `localhost:2181` |
//! | `ZK_SESSION_TIMEOUT_MS` | `10000` |
//! | `RETRY_MAX_RETRIES` | `3` |
//! | `RETRY_BASE_DELAY_MS` | `100` |

use std::time::Duration;

use crate::constants::{
    DEFAULT_KAFKA_BROKERS, DEFAULT_KAFKA_CLIENT_ID, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_TOPIC_OPERATION_TIMEOUT_MS, DEFAULT_ZK_SERVERS,
    DEFAULT_ZK_SESSION_TIMEOUT_MS,
};

/// Retry settings used to build a [`RetryPolicy`](crate::retry::RetryPolicy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: usize,
    /// Delay before the first retry; doubled for each later one.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
        }
    }
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Bootstrap addresses (`host:port`).
    pub brokers: Vec<String>,
    pub client_id: String,
    /// Timeout passed through to topic create/delete requests.
    pub topic_operation_timeout: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            brokers: split_list(DEFAULT_KAFKA_BROKERS),
            client_id: DEFAULT_KAFKA_CLIENT_ID.to_string(),
            topic_operation_timeout: Duration::from_millis(DEFAULT_TOPIC_OPERATION_TIMEOUT_MS),
        }
    }
}

/// Coordination ensemble settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationSettings {
    /// Ensemble addresses (`host:port`).
    pub servers: Vec<String>,
    pub session_timeout: Duration,
}

impl Default for CoordinationSettings {
    fn default() -> Self {
        Self {
            servers: split_list(DEFAULT_ZK_SERVERS),
            session_timeout: Duration::from_millis(DEFAULT_ZK_SESSION_TIMEOUT_MS),
        }
    }
}

/// Combined connector configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub broker: BrokerSettings,
    pub coordination: CoordinationSettings,
    pub retry: RetryConfig,
}

impl ConnectorConfig {
    /// Load configuration from environment variables, using defaults for
    /// anything unset.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let brokers = std::env::var("KAFKA_BROKERS")
            .map(|v| split_list(&v))
            .unwrap_or_else(|_| split_list(DEFAULT_KAFKA_BROKERS));
        let client_id =
            std::env::var("KAFKA_CLIENT_ID").unwrap_or_else(|_| DEFAULT_KAFKA_CLIENT_ID.to_string());
        let topic_operation_timeout_ms = env_u64(
            "TOPIC_OPERATION_TIMEOUT_MS",
            DEFAULT_TOPIC_OPERATION_TIMEOUT_MS,
        )?;

        let servers = std::env::var("ZK_SERVERS")
            .map(|v| split_list(&v))
            .unwrap_or_else(|_| split_list(DEFAULT_ZK_SERVERS));
        let session_timeout_ms = env_u64("ZK_SESSION_TIMEOUT_MS", DEFAULT_ZK_SESSION_TIMEOUT_MS)?;

        let max_retries = env_u64("RETRY_MAX_RETRIES", DEFAULT_MAX_RETRIES as u64)? as usize;
        let base_delay_ms = env_u64("RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS)?;

        Ok(Self {
            broker: BrokerSettings {
                brokers,
                client_id,
                topic_operation_timeout: Duration::from_millis(topic_operation_timeout_ms),
            },
            coordination: CoordinationSettings {
                servers,
                session_timeout: Duration::from_millis(session_timeout_ms),
            },
            retry: RetryConfig {
                max_retries,
                base_delay: Duration::from_millis(base_delay_ms),
            },
        })
    }

    /// Check the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.broker.brokers.is_empty() {
            errors.push("broker address list must not be empty".to_string());
        }
        if self.broker.client_id.trim().is_empty() {
            errors.push("client_id must not be empty".to_string());
        }
        if self.broker.topic_operation_timeout.is_zero() {
            errors.push("topic_operation_timeout must be greater than zero".to_string());
        }
        if self.coordination.servers.is_empty() {
            errors.push("coordination server list must not be empty".to_string());
        }
        if self.coordination.session_timeout.is_zero() {
            errors.push("session_timeout must be greater than zero".to_string());
        }
        if self.retry.max_retries == 0 {
            errors.push("retry max_retries must be positive".to_string());
        }
        if self.retry.base_delay.is_zero() {
            errors.push("retry base_delay must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl ConnectorConfig {
    /// [`validate`](Self::validate), folding the problems into one
    /// [`Error::Config`](crate::error::Error::Config).
    pub fn validated(self) -> crate::error::Result<Self> {
        match self.validate() {
            Ok(()) => Ok(self),
            Err(errors) => Err(crate::error::Error::Config(errors.join("; "))),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_u64(name: &str, default: u64) -> Result<u64, Box<dyn std::error::Error>> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|e| format!("{name} must be a non-negative integer: {e}").into()),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_trims_and_skips_empty() {
        assert_eq!(
            split_list(" a:1, b:2 ,,c:3 "),
            vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConnectorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = ConnectorConfig::default();
        config.broker.brokers.clear();
        config.coordination.session_timeout = Duration::ZERO;
        config.retry.max_retries = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.contains("broker address list")));
        assert!(errors.iter().any(|e| e.contains("session_timeout")));
        assert!(errors.iter().any(|e| e.contains("max_retries")));
    }

    #[test]
    fn test_validated_joins_errors() {
        let mut config = ConnectorConfig::default();
        config.retry.base_delay = Duration::ZERO;
        config.coordination.servers.clear();

        match config.validated() {
            Err(crate::error::Error::Config(message)) => {
                assert!(message.contains("base_delay"));
                assert!(message.contains("; "));
            }
            other => panic!("expected config error, got {other:?}"),
        }
        assert!(ConnectorConfig::default().validated().is_ok());
    }
}
