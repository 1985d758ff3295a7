//! Crate level errors.
//!
//! # Error Taxonomy
//!
//! - [`Error::NotConnected`]: an operation was attempted before `dial`/`connect`
//!   or after `close`.
//! - [`Error::NotLocked`]: `unlock` on a path this session does not hold.
//! - [`Error::Topic`], [`Error::Broker`], [`Error::Coordination`]: the upstream
//!   service reported a failure. The code and the resource name are kept so the
//!   caller can branch on them.
//! - [`Error::Config`]: invalid configuration.
//!
//! Retry exhaustion has no variant of its own: [`RetryPolicy`] hands back the
//! error of the final attempt unchanged.
//!
//! [`RetryPolicy`]: crate::retry::RetryPolicy

use std::result;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// The connector has no live session or broker connection.
    #[error("connection not initialized")]
    NotConnected,

    /// `unlock` was called for a lock this session does not hold.
    #[error("not locked: {path}")]
    NotLocked { path: String },

    /// A topic admin request came back with a per-topic error code.
    #[error("topic operation failed for {topic}: {code:?}{}", fmt_message(.message))]
    Topic {
        topic: String,
        code: KafkaCode,
        message: Option<String>,
    },

    /// Broker request failed before a per-topic result was available.
    #[error("broker error: {0}")]
    Broker(String),

    /// The coordination service rejected an operation on `path`.
    #[error("coordination error on {path}: {code:?}")]
    Coordination { code: ZkCode, path: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

fn fmt_message(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(" ({m})"),
        None => String::new(),
    }
}

impl Error {
    pub fn coordination(code: ZkCode, path: impl Into<String>) -> Self {
        Error::Coordination {
            code,
            path: path.into(),
        }
    }

    pub fn topic(topic: impl Into<String>, code: KafkaCode, message: Option<String>) -> Self {
        Error::Topic {
            topic: topic.into(),
            code,
            message,
        }
    }

    /// Coordination service code carried by this error, if any.
    pub fn coordination_code(&self) -> Option<ZkCode> {
        match self {
            Error::Coordination { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Broker code carried by this error, if any.
    pub fn kafka_code(&self) -> Option<KafkaCode> {
        match self {
            Error::Topic { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, Error::NotConnected)
    }

    /// True when the session behind this error is gone for good.
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self.coordination_code(),
            Some(ZkCode::SessionExpired | ZkCode::ConnectionClosed)
        )
    }
}

/// Error codes reported by the broker for topic admin requests.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, Default)]
pub enum KafkaCode {
    /// An unexpected server error
    Unknown = -1,
    #[default]
    None = 0,
    /// The topic or partition does not exist on this broker.
    UnknownTopicOrPartition = 3,
    /// There is no leader for the partition right now.
    LeaderNotAvailable = 5,
    /// The request exceeded the user-specified time limit.
    RequestTimedOut = 7,
    /// The broker is not alive.
    BrokerNotAvailable = 8,
    /// The server disconnected before a response was received.
    NetworkException = 13,
    /// The topic name is invalid.
    InvalidTopicException = 17,
    /// Not authorized to access the topic.
    TopicAuthorizationFailed = 29,
    /// Not authorized for cluster level operations.
    ClusterAuthorizationFailed = 31,
    /// Topic with this name already exists.
    TopicAlreadyExists = 36,
    /// Number of partitions is invalid.
    InvalidPartitions = 37,
    /// Replication factor is invalid.
    InvalidReplicationFactor = 38,
    /// Replica assignment is invalid.
    InvalidReplicaAssignment = 39,
    /// Configuration is invalid.
    InvalidConfig = 40,
    /// This is not the correct controller for this cluster.
    NotController = 41,
    /// The request is malformed or not supported by the broker.
    InvalidRequest = 42,
    /// The request violates a broker configured policy.
    PolicyViolation = 44,
    /// Topic deletion is disabled on the broker.
    TopicDeletionDisabled = 73,
}

impl KafkaCode {
    /// Map a raw wire code, falling back to [`KafkaCode::Unknown`].
    pub fn from_code(code: i16) -> Self {
        KafkaCode::from_i16(code).unwrap_or(KafkaCode::Unknown)
    }

    pub fn is_error(&self) -> bool {
        *self != KafkaCode::None
    }

    /// Codes the broker documents as retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            KafkaCode::LeaderNotAvailable
                | KafkaCode::RequestTimedOut
                | KafkaCode::BrokerNotAvailable
                | KafkaCode::NetworkException
                | KafkaCode::NotController
        )
    }
}

/// Error codes reported by the coordination service.
///
/// Values follow the ZooKeeper wire codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive)]
pub enum ZkCode {
    SystemError = -1,
    RuntimeInconsistency = -2,
    DataInconsistency = -3,
    ConnectionLoss = -4,
    MarshallingError = -5,
    Unimplemented = -6,
    OperationTimeout = -7,
    BadArguments = -8,
    NoNode = -101,
    NoAuth = -102,
    BadVersion = -103,
    NoChildrenForEphemerals = -108,
    NodeExists = -110,
    NotEmpty = -111,
    SessionExpired = -112,
    InvalidAcl = -114,
    AuthFailed = -115,
    /// The local session handle was closed.
    ConnectionClosed = -10000,
}

impl ZkCode {
    pub fn from_code(code: i32) -> Self {
        ZkCode::from_i32(code).unwrap_or(ZkCode::SystemError)
    }
}
