//! Centralized defaults and coordination constants.
//!
//! # Categories
//!
//! - **Retry Constants**: default backoff parameters
//! - **Broker Constants**: admin request defaults
//! - **Coordination Constants**: session and lock node layout

// =============================================================================
// Retry Constants
// =============================================================================

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Default delay before the first retry, in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Multiplier applied to the delay after each failed attempt.
pub const RETRY_BACKOFF_FACTOR: f32 = 2.0;

// =============================================================================
// Broker Constants
// =============================================================================

/// Default bootstrap address list.
pub const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";

/// Default client id presented to the broker.
pub const DEFAULT_KAFKA_CLIENT_ID: &str = "kzconnect";

/// Default timeout for topic create/delete requests, in milliseconds.
pub const DEFAULT_TOPIC_OPERATION_TIMEOUT_MS: u64 = 10_000;

// =============================================================================
// Coordination Constants
// =============================================================================

/// Default ensemble address list.
pub const DEFAULT_ZK_SERVERS: &str = "localhost:2181";

/// Default session timeout, in milliseconds.
pub const DEFAULT_ZK_SESSION_TIMEOUT_MS: u64 = 10_000;

/// Capacity of the per-session event channel handed to callers.
///
/// Events beyond this are dropped until the caller drains the channel.
pub const SESSION_EVENT_CHANNEL_CAPACITY: usize = 32;

/// Name of each lock contender node, before the sequence suffix.
pub const LOCK_NODE_NAME: &str = "lock-";

/// Prefix marking a node as created by a protected create.
///
/// A contender node is named `_c_<guid>-lock-<sequence>`.
pub const PROTECTED_PREFIX: &str = "_c_";

/// Width of the zero-padded sequence suffix appended by the service.
pub const SEQUENCE_WIDTH: usize = 10;

/// Attempts made to create a contender node when replies are lost.
pub const LOCK_CREATE_ATTEMPTS: usize = 3;

/// Version argument meaning "any version" for `set` and `delete`.
pub const ANY_VERSION: i32 = -1;
