//! Message broker connector.
//!
//! [`BrokerConnector`] is the capability set the rest of an application needs
//! from the broker: dial, producer and consumer acquisition, metadata and
//! topic lifecycle. Admin calls surface the per-topic error code of the
//! broker's response as [`Error::Topic`] instead of swallowing it.
//!
//! # Available Connectors
//!
//! - `KafkaConnector`: librdkafka via `rdkafka` (feature `rdkafka`)
//! - `InMemoryBroker`: in-process broker for tests (feature `test-utilities`)
//!
//! Topic create and delete are idempotent and safe to wrap in a
//! [`RetryPolicy`]; [`ensure_topic`] and [`remove_topic`] do that and treat
//! "already exists" / "unknown topic" as success. Producer and consumer
//! acquisition should not be retried blindly.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, KafkaCode, Result};
use crate::metrics::record_topic_operation;
use crate::retry::RetryPolicy;

mod types;

#[cfg(feature = "rdkafka")]
pub mod kafka;
#[cfg(any(test, feature = "test-utilities"))]
pub mod memory;

#[cfg(feature = "rdkafka")]
pub use kafka::KafkaConnector;
#[cfg(any(test, feature = "test-utilities"))]
pub use memory::InMemoryBroker;
pub use types::{
    BrokerConfig, BrokerMetadata, ClusterMetadata, ConsumedMessage, ConsumerConfig,
    DeliveredRecord, PartitionMetadata, ProducerConfig, StartOffset, TopicAdminResponse,
    TopicError, TopicMetadata, TopicSpec,
};

/// Broker operations application code uses.
///
/// Every call made before [`dial`](Self::dial) or after [`close`](Self::close)
/// fails with [`Error::NotConnected`].
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connect to the cluster reachable through `addresses`.
    async fn dial(&self, addresses: &[String], config: &BrokerConfig) -> Result<()>;

    async fn producer(&self, config: &ProducerConfig) -> Result<Box<dyn ProducerHandle>>;

    /// Consumer reading a single partition.
    async fn consumer(&self, config: &ConsumerConfig) -> Result<Box<dyn ConsumerHandle>>;

    async fn metadata(&self) -> Result<ClusterMetadata>;

    async fn create_topic(&self, spec: &TopicSpec, timeout: Duration) -> Result<()>;

    async fn delete_topic(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Drop the connection. Idempotent.
    async fn close(&self);
}

#[async_trait]
pub trait ProducerHandle: Send + Sync {
    async fn send(&self, topic: &str, key: Option<&[u8]>, payload: &[u8])
    -> Result<DeliveredRecord>;
}

#[async_trait]
pub trait ConsumerHandle: Send + Sync {
    /// Next message, or `None` if nothing arrived within `timeout`.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedMessage>>;
}

/// Create `spec`, retrying under `policy`. An existing topic counts as
/// success.
pub async fn ensure_topic(
    connector: &dyn BrokerConnector,
    policy: &RetryPolicy,
    spec: &TopicSpec,
    timeout: Duration,
) -> Result<()> {
    let result = policy
        .run(move || async move {
            match connector.create_topic(spec, timeout).await {
                Err(e) if e.kafka_code() == Some(KafkaCode::TopicAlreadyExists) => {
                    debug!(topic = %spec.name, "Topic already exists");
                    Ok(())
                }
                other => other,
            }
        })
        .await;
    if result.is_ok() {
        info!(topic = %spec.name, partitions = spec.num_partitions, "Topic ensured");
    }
    result
}

/// Delete `name`, retrying under `policy`. A missing topic counts as success.
pub async fn remove_topic(
    connector: &dyn BrokerConnector,
    policy: &RetryPolicy,
    name: &str,
    timeout: Duration,
) -> Result<()> {
    policy
        .run(move || async move {
            match connector.delete_topic(name, timeout).await {
                Err(e) if e.kafka_code() == Some(KafkaCode::UnknownTopicOrPartition) => {
                    debug!(topic = name, "Topic already absent");
                    Ok(())
                }
                other => other,
            }
        })
        .await
}

/// Record a finished admin operation and pass its result through.
pub(crate) fn observe_admin(operation: &str, topic: &str, result: Result<()>) -> Result<()> {
    match &result {
        Ok(()) => record_topic_operation(operation, "ok"),
        Err(Error::Topic { code, .. }) => {
            debug!(operation, topic, ?code, "Topic operation rejected");
            record_topic_operation(operation, "topic_error");
        }
        Err(e) => {
            debug!(operation, topic, error = %e, "Topic operation failed");
            record_topic_operation(operation, "error");
        }
    }
    result
}
