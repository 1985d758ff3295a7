//! Kafka connector backed by librdkafka.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::Message;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication, TopicResult};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use tracing::info;

use super::{
    BrokerConfig, BrokerConnector, BrokerMetadata, ClusterMetadata, ConsumedMessage,
    ConsumerConfig, ConsumerHandle, DeliveredRecord, PartitionMetadata, ProducerConfig,
    ProducerHandle, StartOffset, TopicAdminResponse, TopicError, TopicMetadata, TopicSpec,
    observe_admin,
};
use crate::error::{Error, KafkaCode, Result};

#[derive(Clone)]
struct Connection {
    base: ClientConfig,
    admin: Arc<AdminClient<DefaultClientContext>>,
    /// Also used for metadata requests.
    producer: FutureProducer,
    request_timeout: Duration,
}

/// [`BrokerConnector`] over librdkafka clients.
#[derive(Default)]
pub struct KafkaConnector {
    connection: RwLock<Option<Connection>>,
}

impl KafkaConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn connection(&self) -> Result<Connection> {
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::NotConnected)
    }
}

fn broker_error(err: KafkaError) -> Error {
    Error::Broker(err.to_string())
}

fn kafka_code(code: RDKafkaErrorCode) -> KafkaCode {
    KafkaCode::from_code(code as i32 as i16)
}

fn client_config(addresses: &[String], config: &BrokerConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", addresses.join(","))
        .set("client.id", &config.client_id);
    for (key, value) in &config.properties {
        client.set(key, value);
    }
    client
}

/// Fold librdkafka's per-topic results into the connector's response type.
fn admin_response(results: Vec<TopicResult>) -> TopicAdminResponse {
    TopicAdminResponse::new(
        results
            .into_iter()
            .map(|result| match result {
                Ok(topic) => TopicError::new(topic, KafkaCode::None),
                Err((topic, code)) => {
                    TopicError::new(topic, kafka_code(code)).with_message(code.to_string())
                }
            })
            .collect(),
    )
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    async fn dial(&self, addresses: &[String], config: &BrokerConfig) -> Result<()> {
        if addresses.is_empty() {
            return Err(Error::Broker("no broker addresses".to_string()));
        }
        let base = client_config(addresses, config);
        let admin: AdminClient<DefaultClientContext> = base.create().map_err(broker_error)?;
        let producer: FutureProducer = base.create().map_err(broker_error)?;

        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Connection {
            base,
            admin: Arc::new(admin),
            producer,
            request_timeout: config.request_timeout,
        });
        info!(brokers = %addresses.join(","), client_id = %config.client_id, "Kafka connector dialed");
        Ok(())
    }

    async fn producer(&self, config: &ProducerConfig) -> Result<Box<dyn ProducerHandle>> {
        let connection = self.connection()?;
        let mut client = connection.base.clone();
        if let Some(timeout) = config.delivery_timeout {
            client.set("message.timeout.ms", timeout.as_millis().to_string());
        }
        for (key, value) in &config.properties {
            client.set(key, value);
        }
        let producer: FutureProducer = client.create().map_err(broker_error)?;
        Ok(Box::new(KafkaProducer {
            producer,
            queue_timeout: connection.request_timeout,
        }))
    }

    async fn consumer(&self, config: &ConsumerConfig) -> Result<Box<dyn ConsumerHandle>> {
        let connection = self.connection()?;
        let mut client = connection.base.clone();
        let group = config
            .group_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", config.topic, config.partition));
        client
            .set("group.id", group)
            .set("enable.auto.commit", "false");
        for (key, value) in &config.properties {
            client.set(key, value);
        }
        let consumer: StreamConsumer = client.create().map_err(broker_error)?;

        let offset = match config.start {
            StartOffset::Oldest => Offset::Beginning,
            StartOffset::Newest => Offset::End,
            StartOffset::At(offset) => Offset::Offset(offset),
        };
        let mut assignment = TopicPartitionList::new();
        assignment
            .add_partition_offset(&config.topic, config.partition, offset)
            .map_err(broker_error)?;
        consumer.assign(&assignment).map_err(broker_error)?;

        Ok(Box::new(KafkaConsumer { consumer }))
    }

    async fn metadata(&self) -> Result<ClusterMetadata> {
        let connection = self.connection()?;
        let timeout = connection.request_timeout;
        let producer = connection.producer.clone();

        // fetch_metadata blocks the calling thread.
        let metadata = tokio::task::spawn_blocking(move || {
            producer.client().fetch_metadata(None, timeout)
        })
        .await
        .map_err(|e| Error::Broker(e.to_string()))?
        .map_err(broker_error)?;

        Ok(ClusterMetadata {
            controller_id: None,
            brokers: metadata
                .brokers()
                .iter()
                .map(|b| BrokerMetadata {
                    id: b.id(),
                    host: b.host().to_string(),
                    port: b.port(),
                })
                .collect(),
            topics: metadata
                .topics()
                .iter()
                .map(|t| TopicMetadata {
                    name: t.name().to_string(),
                    error: t
                        .error()
                        .map(|e| kafka_code(RDKafkaErrorCode::from(e)))
                        .unwrap_or_default(),
                    partitions: t
                        .partitions()
                        .iter()
                        .map(|p| PartitionMetadata {
                            id: p.id(),
                            leader: p.leader(),
                            replicas: p.replicas().to_vec(),
                            isr: p.isr().to_vec(),
                        })
                        .collect(),
                })
                .collect(),
        })
    }

    async fn create_topic(&self, spec: &TopicSpec, timeout: Duration) -> Result<()> {
        let connection = self.connection()?;
        let mut topic = NewTopic::new(
            &spec.name,
            spec.num_partitions,
            TopicReplication::Fixed(i32::from(spec.replication_factor)),
        );
        for (key, value) in &spec.configs {
            topic = topic.set(key, value);
        }
        let options = AdminOptions::new().operation_timeout(Some(timeout));

        let result = connection
            .admin
            .create_topics(&[topic], &options)
            .await
            .map_err(broker_error)
            .and_then(|results| admin_response(results).into_result());
        observe_admin("create", &spec.name, result)
    }

    async fn delete_topic(&self, name: &str, timeout: Duration) -> Result<()> {
        let connection = self.connection()?;
        let options = AdminOptions::new().operation_timeout(Some(timeout));

        let result = connection
            .admin
            .delete_topics(&[name], &options)
            .await
            .map_err(broker_error)
            .and_then(|results| admin_response(results).into_result());
        observe_admin("delete", name, result)
    }

    async fn close(&self) {
        let previous = self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            info!("Kafka connector closed");
        }
    }
}

struct KafkaProducer {
    producer: FutureProducer,
    queue_timeout: Duration,
}

#[async_trait]
impl ProducerHandle for KafkaProducer {
    async fn send(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<DeliveredRecord> {
        let mut record = FutureRecord::<[u8], [u8]>::to(topic).payload(payload);
        if let Some(key) = key {
            record = record.key(key);
        }
        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
            .map_err(|(err, _)| broker_error(err))?;
        Ok(DeliveredRecord { partition, offset })
    }
}

struct KafkaConsumer {
    consumer: StreamConsumer,
}

#[async_trait]
impl ConsumerHandle for KafkaConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedMessage>> {
        let message = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(received) => received.map_err(broker_error)?,
        };
        Ok(Some(ConsumedMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(Bytes::copy_from_slice),
            payload: message
                .payload()
                .map(Bytes::copy_from_slice)
                .unwrap_or_default(),
        }))
    }
}
