//! # kzconnect
//! Retrying connectors for a Kafka-style message broker and a ZooKeeper-style
//! coordination service, with distributed locking on top of the latter.
//!
//! The crate sits between application code and the native clients so callers
//! can manage topics, acquire producers and consumers, read and write
//! coordination paths and take distributed locks without depending on a
//! particular client library.
//!
//! # Pieces
//! - [`RetryPolicy`](retry::RetryPolicy): bounded exponential backoff around any
//!   fallible async (or blocking) action.
//! - [`BrokerConnector`](broker::BrokerConnector): dial, producer/consumer
//!   acquisition, metadata and topic create/delete. Per-topic error codes come
//!   back as [`Error::Topic`](error::Error::Topic).
//! - [`CoordinationConnector`](coordination::CoordinationConnector): session
//!   lifecycle, path CRUD and `lock`/`unlock` built on ephemeral sequential
//!   nodes.
//!
//! Native clients live behind cargo features: `rdkafka` for the broker and
//! `zookeeper` for the coordination service. The in-memory implementations
//! used by the test suite are available with `test-utilities`.
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use kzconnect::prelude::*;
//!
//! async fn nightly<C: CoordinationConnector>(zk: &C) -> kzconnect::error::Result<()> {
//!     let policy = RetryPolicy::new(3, Duration::from_millis(100));
//!     policy.run(|| zk.lock("/jobs/nightly")).await?;
//!     // exclusive work
//!     zk.unlock("/jobs/nightly").await
//! }
//! ```

#![forbid(unsafe_code)]

pub mod broker;
pub mod config;
pub mod constants;
pub mod coordination;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub mod prelude {
    //! Commonly used types and traits.
    pub use crate::broker::{
        BrokerConfig, BrokerConnector, ConsumerConfig, ConsumerHandle, ProducerConfig,
        ProducerHandle, TopicSpec, ensure_topic, remove_topic,
    };
    pub use crate::config::ConnectorConfig;
    pub use crate::coordination::{
        Acl, CoordinationConnector, CreateMode, SessionState, ZkConnector,
    };
    pub use crate::error::{Error, KafkaCode, Result, ZkCode};
    pub use crate::retry::RetryPolicy;

    pub use bytes;
}
