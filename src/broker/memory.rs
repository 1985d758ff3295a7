//! In-memory broker for testing.
//!
//! Keeps topics and their partition logs in process. Admin calls go through
//! the same per-topic response handling as a real broker, and tests can queue
//! error codes for a topic with [`InMemoryBroker::inject_topic_error`].

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{
    BrokerConfig, BrokerConnector, BrokerMetadata, ClusterMetadata, ConsumedMessage,
    ConsumerConfig, ConsumerHandle, DeliveredRecord, PartitionMetadata, ProducerConfig,
    ProducerHandle, StartOffset, TopicAdminResponse, TopicError, TopicMetadata, TopicSpec,
    observe_admin,
};
use crate::error::{Error, KafkaCode, Result};

const BROKER_ID: i32 = 0;

#[derive(Debug, Clone)]
struct Record {
    key: Option<Bytes>,
    payload: Bytes,
}

#[derive(Debug)]
struct Topic {
    partitions: Vec<Vec<Record>>,
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    addresses: Vec<String>,
    topics: BTreeMap<String, Topic>,
    faults: HashMap<String, VecDeque<KafkaCode>>,
    admin_requests: usize,
}

impl State {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn take_fault(&mut self, topic: &str) -> Option<KafkaCode> {
        let queue = self.faults.get_mut(topic)?;
        let code = queue.pop_front();
        if queue.is_empty() {
            self.faults.remove(topic);
        }
        code
    }

    fn create(&mut self, spec: &TopicSpec) -> TopicError {
        let code = if let Some(code) = self.take_fault(&spec.name) {
            code
        } else if !valid_topic_name(&spec.name) {
            KafkaCode::InvalidTopicException
        } else if spec.num_partitions <= 0 {
            KafkaCode::InvalidPartitions
        } else if spec.replication_factor <= 0 {
            KafkaCode::InvalidReplicationFactor
        } else if self.topics.contains_key(&spec.name) {
            KafkaCode::TopicAlreadyExists
        } else {
            self.topics.insert(
                spec.name.clone(),
                Topic {
                    partitions: vec![Vec::new(); spec.num_partitions as usize],
                },
            );
            KafkaCode::None
        };
        TopicError::new(&spec.name, code)
    }

    fn delete(&mut self, name: &str) -> TopicError {
        let code = if let Some(code) = self.take_fault(name) {
            code
        } else if self.topics.remove(name).is_some() {
            KafkaCode::None
        } else {
            KafkaCode::UnknownTopicOrPartition
        };
        TopicError::new(name, code)
    }

    fn partition(&self, topic: &str, partition: i32) -> Result<&Vec<Record>> {
        self.topics
            .get(topic)
            .and_then(|t| usize::try_from(partition).ok().and_then(|p| t.partitions.get(p)))
            .ok_or_else(|| Error::topic(topic, KafkaCode::UnknownTopicOrPartition, None))
    }
}

fn valid_topic_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 249
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

struct Inner {
    state: Mutex<State>,
    appended: Notify,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared in-memory broker. Clones see the same topics.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                appended: Notify::new(),
            }),
        }
    }

    /// Answer the next admin request for `topic` with `code`. Calls queue up.
    pub fn inject_topic_error(&self, topic: impl Into<String>, code: KafkaCode) {
        self.inner
            .state()
            .faults
            .entry(topic.into())
            .or_default()
            .push_back(code);
    }

    /// Number of create and delete requests received.
    pub fn admin_requests(&self) -> usize {
        self.inner.state().admin_requests
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.inner.state().topics.keys().cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state().connected
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn dial(&self, addresses: &[String], config: &BrokerConfig) -> Result<()> {
        if addresses.is_empty() {
            return Err(Error::Broker("no broker addresses".to_string()));
        }
        let mut state = self.inner.state();
        state.connected = true;
        state.addresses = addresses.to_vec();
        tracing::debug!(client_id = %config.client_id, ?addresses, "In-memory broker dialed");
        Ok(())
    }

    async fn producer(&self, _config: &ProducerConfig) -> Result<Box<dyn ProducerHandle>> {
        self.inner.state().ensure_connected()?;
        Ok(Box::new(MemoryProducer {
            inner: self.inner.clone(),
            round_robin: AtomicUsize::new(0),
        }))
    }

    async fn consumer(&self, config: &ConsumerConfig) -> Result<Box<dyn ConsumerHandle>> {
        let state = self.inner.state();
        state.ensure_connected()?;
        let log_len = state.partition(&config.topic, config.partition)?.len() as i64;
        let next_offset = match config.start {
            StartOffset::Oldest => 0,
            StartOffset::Newest => log_len,
            StartOffset::At(offset) => offset.clamp(0, log_len),
        };
        Ok(Box::new(MemoryConsumer {
            inner: self.inner.clone(),
            topic: config.topic.clone(),
            partition: config.partition,
            next_offset,
        }))
    }

    async fn metadata(&self) -> Result<ClusterMetadata> {
        let state = self.inner.state();
        state.ensure_connected()?;

        let (host, port) = state
            .addresses
            .first()
            .and_then(|a| a.rsplit_once(':'))
            .map(|(h, p)| (h.to_string(), p.parse().unwrap_or(9092)))
            .unwrap_or_else(|| ("localhost".to_string(), 9092));

        let topics = state
            .topics
            .iter()
            .map(|(name, topic)| TopicMetadata {
                name: name.clone(),
                error: KafkaCode::None,
                partitions: (0..topic.partitions.len() as i32)
                    .map(|id| PartitionMetadata {
                        id,
                        leader: BROKER_ID,
                        replicas: vec![BROKER_ID],
                        isr: vec![BROKER_ID],
                    })
                    .collect(),
            })
            .collect();

        Ok(ClusterMetadata {
            controller_id: Some(BROKER_ID),
            brokers: vec![BrokerMetadata {
                id: BROKER_ID,
                host,
                port,
            }],
            topics,
        })
    }

    async fn create_topic(&self, spec: &TopicSpec, _timeout: Duration) -> Result<()> {
        let result = {
            let mut state = self.inner.state();
            state.ensure_connected()?;
            state.admin_requests += 1;
            TopicAdminResponse::new(vec![state.create(spec)]).into_result()
        };
        observe_admin("create", &spec.name, result)
    }

    async fn delete_topic(&self, name: &str, _timeout: Duration) -> Result<()> {
        let result = {
            let mut state = self.inner.state();
            state.ensure_connected()?;
            state.admin_requests += 1;
            TopicAdminResponse::new(vec![state.delete(name)]).into_result()
        };
        observe_admin("delete", name, result)
    }

    async fn close(&self) {
        self.inner.state().connected = false;
        self.inner.appended.notify_waiters();
    }
}

struct MemoryProducer {
    inner: Arc<Inner>,
    round_robin: AtomicUsize,
}

#[async_trait]
impl ProducerHandle for MemoryProducer {
    async fn send(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<DeliveredRecord> {
        let delivered = {
            let mut state = self.inner.state();
            state.ensure_connected()?;
            let entry = state
                .topics
                .get_mut(topic)
                .ok_or_else(|| Error::topic(topic, KafkaCode::UnknownTopicOrPartition, None))?;

            let count = entry.partitions.len();
            let index = match key {
                Some(key) => {
                    let mut hasher = DefaultHasher::new();
                    key.hash(&mut hasher);
                    (hasher.finish() % count as u64) as usize
                }
                None => self.round_robin.fetch_add(1, Ordering::Relaxed) % count,
            };
            let log = &mut entry.partitions[index];
            log.push(Record {
                key: key.map(Bytes::copy_from_slice),
                payload: Bytes::copy_from_slice(payload),
            });
            DeliveredRecord {
                partition: index as i32,
                offset: log.len() as i64 - 1,
            }
        };
        self.inner.appended.notify_waiters();
        Ok(delivered)
    }
}

struct MemoryConsumer {
    inner: Arc<Inner>,
    topic: String,
    partition: i32,
    next_offset: i64,
}

impl MemoryConsumer {
    fn next_record(&self) -> Result<Option<Record>> {
        let state = self.inner.state();
        state.ensure_connected()?;
        let log = state.partition(&self.topic, self.partition)?;
        Ok(usize::try_from(self.next_offset)
            .ok()
            .and_then(|i| log.get(i))
            .cloned())
    }
}

#[async_trait]
impl ConsumerHandle for MemoryConsumer {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ConsumedMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Registered before the check so an append in between still wakes us.
            let appended = self.inner.appended.notified();
            if let Some(record) = self.next_record()? {
                let offset = self.next_offset;
                self.next_offset += 1;
                return Ok(Some(ConsumedMessage {
                    topic: self.topic.clone(),
                    partition: self.partition,
                    offset,
                    key: record.key,
                    payload: record.payload,
                }));
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(None);
            }
        }
    }
}
