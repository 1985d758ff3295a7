//! Coordination service connector and distributed locks.
//!
//! # Layers
//!
//! - [`CoordinationConnector`]: the capability set application code talks to
//!   (session lifecycle, path CRUD, `lock`/`unlock`).
//! - [`Ensemble`] / [`CoordinationClient`]: the seam over the native client.
//!   [`ZkConnector`] owns one session obtained from an ensemble and builds the
//!   lock protocol on top of the client primitives.
//!
//! # Available Ensembles
//!
//! - `ZooKeeperEnsemble`: ZooKeeper via `zookeeper-client` (feature `zookeeper`)
//! - `InMemoryEnsemble`: in-process tree for tests (feature `test-utilities`)
//!
//! # Lock ownership
//!
//! A lock is held through an ephemeral node tied to the session. If the
//! session expires the lock is released by the service without any call from
//! this process, so ownership is only meaningful while the session's event
//! stream last reported [`SessionState::Connected`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

mod connector;
pub mod lock;
mod node;
mod session;

#[cfg(any(test, feature = "test-utilities"))]
pub mod memory;
#[cfg(feature = "zookeeper")]
pub mod zookeeper;

pub use connector::ZkConnector;
pub use lock::DistributedLock;
#[cfg(any(test, feature = "test-utilities"))]
pub use memory::InMemoryEnsemble;
pub use node::{Acl, CreateMode, Perms, Stat};
pub use session::{EventStream, NodeWatch, SessionEvent, SessionState, WatchEvent};
#[cfg(feature = "zookeeper")]
pub use zookeeper::ZooKeeperEnsemble;

/// Session-level operations application code uses.
///
/// Every call made before [`connect`](Self::connect) or after
/// [`close`](Self::close) fails with [`Error::NotConnected`](crate::error::Error::NotConnected).
#[async_trait]
pub trait CoordinationConnector: Send + Sync {
    /// Open a session. The returned stream reports session state changes and
    /// must be drained by the caller.
    async fn connect(&self, servers: &[String], session_timeout: Duration) -> Result<EventStream>;

    /// Close the session and drop every lock handle it owned. Idempotent.
    async fn close(&self);

    /// Stat of `path`, or `None` if it does not exist.
    async fn exists(&self, path: &str) -> Result<Option<Stat>>;

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)>;

    /// Replace the data of `path` if its version is still `version` (`-1`
    /// matches any version).
    async fn set(&self, path: &str, data: &[u8], version: i32) -> Result<Stat>;

    /// Create `path`, returning the created path (which differs from `path`
    /// for sequential modes).
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode, acl: &[Acl])
    -> Result<String>;

    async fn delete(&self, path: &str, version: i32) -> Result<()>;

    async fn children(&self, path: &str) -> Result<(Vec<String>, Stat)>;

    /// Acquire the distributed lock on `path`, waiting as long as it takes.
    async fn lock(&self, path: &str) -> Result<()>;

    /// Release the lock on `path` held by this session.
    async fn unlock(&self, path: &str) -> Result<()>;
}

/// One live session against the coordination service.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    fn session_id(&self) -> i64;

    async fn exists(&self, path: &str) -> Result<Option<Stat>>;

    /// Like [`exists`](Self::exists), also arming a one-shot watch that fires
    /// when `path` is created, changed or deleted, or when the session ends.
    async fn exists_watch(&self, path: &str) -> Result<(Option<Stat>, NodeWatch)>;

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)>;

    async fn set(&self, path: &str, data: &[u8], version: i32) -> Result<Stat>;

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode, acl: &[Acl])
    -> Result<String>;

    async fn delete(&self, path: &str, version: i32) -> Result<()>;

    async fn children(&self, path: &str) -> Result<(Vec<String>, Stat)>;

    /// End the session. Ephemeral nodes are removed and pending watches fire.
    async fn close(&self);
}

/// Factory for sessions against an ensemble.
#[async_trait]
pub trait Ensemble: Send + Sync {
    async fn connect(
        &self,
        servers: &[String],
        session_timeout: Duration,
    ) -> Result<(Arc<dyn CoordinationClient>, EventStream)>;
}

/// Parent of a slash-delimited path; `None` for the root.
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Join a parent path and a child name.
pub(crate) fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
