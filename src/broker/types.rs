//! Request and response types for the broker connector.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;

use crate::config::BrokerSettings;
use crate::error::{Error, KafkaCode, Result};

/// Client-wide settings passed to `dial`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub client_id: String,
    /// Upper bound for metadata and admin requests.
    pub request_timeout: Duration,
    /// Extra client properties, passed through untouched.
    pub properties: BTreeMap<String, String>,
}

impl BrokerConfig {
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self {
            client_id: settings.client_id.clone(),
            request_timeout: settings.topic_operation_timeout,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::from_settings(&BrokerSettings::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerConfig {
    /// How long `send` waits for delivery before failing.
    pub delivery_timeout: Option<Duration>,
    pub properties: BTreeMap<String, String>,
}

/// Where a consumer starts reading when it has no committed offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartOffset {
    #[default]
    Oldest,
    Newest,
    At(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub topic: String,
    pub partition: i32,
    pub group_id: Option<String>,
    pub start: StartOffset,
    pub properties: BTreeMap<String, String>,
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            group_id: None,
            start: StartOffset::default(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn starting_at(mut self, start: StartOffset) -> Self {
        self.start = start;
        self
    }
}

/// Topic to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub num_partitions: i32,
    pub replication_factor: i16,
    pub configs: BTreeMap<String, String>,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, num_partitions: i32, replication_factor: i16) -> Self {
        Self {
            name: name.into(),
            num_partitions,
            replication_factor,
            configs: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.insert(key.into(), value.into());
        self
    }
}

/// Per-topic result inside an admin response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicError {
    pub topic: String,
    pub code: KafkaCode,
    pub message: Option<String>,
}

impl TopicError {
    pub fn new(topic: impl Into<String>, code: KafkaCode) -> Self {
        Self {
            topic: topic.into(),
            code,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Per-topic outcomes of a create or delete request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicAdminResponse {
    pub topics: Vec<TopicError>,
}

impl TopicAdminResponse {
    pub fn new(topics: Vec<TopicError>) -> Self {
        Self { topics }
    }

    /// First entry carrying a real error code, as [`Error::Topic`].
    ///
    /// An empty response, or one with only `None` codes, is success.
    pub fn into_result(self) -> Result<()> {
        match self.topics.into_iter().find(|t| t.code.is_error()) {
            Some(failed) => Err(Error::topic(failed.topic, failed.code, failed.message)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterMetadata {
    pub controller_id: Option<i32>,
    pub brokers: Vec<BrokerMetadata>,
    pub topics: Vec<TopicMetadata>,
}

impl ClusterMetadata {
    pub fn topic(&self, name: &str) -> Option<&TopicMetadata> {
        self.topics.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMetadata {
    pub id: i32,
    pub host: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub error: KafkaCode,
    pub partitions: Vec<PartitionMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub id: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

/// Where a produced record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveredRecord {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_response_is_success() {
        assert_eq!(TopicAdminResponse::default().into_result(), Ok(()));
    }

    #[test]
    fn test_none_codes_are_success() {
        let response = TopicAdminResponse::new(vec![
            TopicError::new("a", KafkaCode::None),
            TopicError::new("b", KafkaCode::None),
        ]);
        assert_eq!(response.into_result(), Ok(()));
    }

    #[test]
    fn test_first_error_is_surfaced() {
        let response = TopicAdminResponse::new(vec![
            TopicError::new("ok", KafkaCode::None),
            TopicError::new("orders", KafkaCode::InvalidPartitions).with_message("must be > 0"),
            TopicError::new("later", KafkaCode::PolicyViolation),
        ]);

        let err = response.into_result().unwrap_err();
        assert_eq!(
            err,
            Error::Topic {
                topic: "orders".to_string(),
                code: KafkaCode::InvalidPartitions,
                message: Some("must be > 0".to_string()),
            }
        );
    }

    #[test]
    fn test_topic_spec_builder() {
        let spec = TopicSpec::new("events", 6, 3).with_config("cleanup.policy", "compact");
        assert_eq!(spec.num_partitions, 6);
        assert_eq!(spec.replication_factor, 3);
        assert_eq!(spec.configs.get("cleanup.policy").map(String::as_str), Some("compact"));
    }

    #[test]
    fn test_broker_config_from_settings() {
        let settings = BrokerSettings {
            client_id: "svc".to_string(),
            topic_operation_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        let config = BrokerConfig::from_settings(&settings);
        assert_eq!(config.client_id, "svc");
        assert_eq!(config.request_timeout, Duration::from_secs(3));
    }
}
