//! Distributed lock over ephemeral sequential nodes.
//!
//! # Protocol
//!
//! 1. Create an ephemeral sequential contender node
//!    `<path>/_c_<guid>-lock-<seq>` with an open ACL, creating missing parent
//!    nodes as needed.
//! 2. List the children of `<path>`. If the own node has the lowest sequence
//!    number the lock is held.
//! 3. Otherwise watch the contender with the next-lower sequence number and
//!    wait for it to go away, then go back to step 2.
//!
//! Only the next-lower contender is watched, so a release wakes exactly one
//! waiter. The `_c_<guid>` prefix lets a handle find its own node after a
//! create whose reply was lost, instead of leaving an orphan contender behind.
//!
//! Unlocking deletes the contender node. Losing the session deletes it too,
//! which is how a crashed holder releases the lock. Dropping a `lock` future
//! before it acquires (a caller-side timeout, say) withdraws its contender.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::node::{Acl, CreateMode};
use super::session::{SessionState, WatchEvent};
use super::{CoordinationClient, child_path};
use crate::constants::{
    ANY_VERSION, LOCK_CREATE_ATTEMPTS, LOCK_NODE_NAME, PROTECTED_PREFIX, SEQUENCE_WIDTH,
};
use crate::error::{Error, Result, ZkCode};
use crate::metrics::{LOCKS_HELD, record_lock, record_lock_wait};

#[derive(Debug, Default)]
struct Slot {
    /// Full path of the contender node while the lock is held.
    node: Option<String>,
    /// Set once the owning session is closed.
    invalidated: bool,
}

/// Lock state for one path within one session.
///
/// A handle is either idle, acquiring or held. `acquiring` serialises
/// concurrent `lock` calls and is held for the whole wait; the held node
/// lives in a separate slot so `unlock` never waits on an acquisition.
pub struct DistributedLock {
    client: Arc<dyn CoordinationClient>,
    path: String,
    acl: Vec<Acl>,
    guid: String,
    acquiring: Mutex<()>,
    slot: StdMutex<Slot>,
}

impl DistributedLock {
    pub fn new(client: Arc<dyn CoordinationClient>, path: impl Into<String>, acl: Vec<Acl>) -> Self {
        Self {
            client,
            path: path.into(),
            acl,
            guid: uuid::Uuid::new_v4().simple().to_string(),
            acquiring: Mutex::new(()),
            slot: StdMutex::new(Slot::default()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Contender node currently held, if any.
    pub fn held_node(&self) -> Option<String> {
        self.slot().node.clone()
    }

    pub fn is_held(&self) -> bool {
        self.slot().node.is_some()
    }

    /// Acquire the lock, waiting for earlier contenders to release it.
    ///
    /// Returns immediately if this handle already holds the lock. The wait is
    /// unbounded; wrap the call in `tokio::time::timeout` to give up. A
    /// cancelled call withdraws its contender node so it does not block
    /// anyone queued behind it.
    pub async fn lock(&self) -> Result<()> {
        let _acquiring = self.acquiring.lock().await;
        if self.is_held() {
            debug!(path = %self.path, "Lock already held by this session");
            record_lock("acquire", "reentrant");
            return Ok(());
        }

        let started = Instant::now();
        self.withdraw_leftovers().await?;
        let own = self.create_contender().await?;
        let mut contender = Contender::new(self.client.clone(), own.clone());
        debug!(path = %self.path, node = %own, "Created lock contender");

        let outcome = self
            .wait_for_turn(&own)
            .await
            .and_then(|()| self.mark_held(&own));

        match outcome {
            Ok(()) => {
                contender.keep();
                let waited = started.elapsed();
                info!(path = %self.path, node = %own, ?waited, "Lock acquired");
                record_lock("acquire", "success");
                record_lock_wait("acquired", waited.as_secs_f64());
                Ok(())
            }
            Err(e) => {
                warn!(path = %self.path, node = %own, error = %e, "Lock acquisition failed");
                record_lock("acquire", "error");
                record_lock_wait("failed", started.elapsed().as_secs_f64());
                if !e.is_session_lost() {
                    // Don't leave a contender queued ahead of other sessions.
                    if let Err(cleanup) = self.client.delete(&own, ANY_VERSION).await {
                        debug!(node = %own, error = %cleanup, "Contender cleanup failed");
                    }
                }
                contender.keep();
                Err(e)
            }
        }
    }

    /// Release the lock.
    ///
    /// Fails with [`Error::NotLocked`] when this handle does not hold it,
    /// including while an acquisition is still waiting. If the contender
    /// node is already gone (session expired) the handle is reset and the
    /// `NoNode` error is returned.
    pub async fn unlock(&self) -> Result<()> {
        let Some(own) = self.slot().node.take() else {
            record_lock("release", "not_locked");
            return Err(Error::NotLocked {
                path: self.path.clone(),
            });
        };

        match self.client.delete(&own, ANY_VERSION).await {
            Ok(()) => {
                info!(path = %self.path, node = %own, "Lock released");
                record_lock("release", "success");
                LOCKS_HELD.dec();
                Ok(())
            }
            Err(e) if e.coordination_code() == Some(ZkCode::NoNode) => {
                warn!(path = %self.path, node = %own, "Lock node vanished before release");
                record_lock("release", "lost");
                LOCKS_HELD.dec();
                Err(e)
            }
            Err(e) => {
                record_lock("release", "error");
                let mut slot = self.slot();
                if slot.invalidated {
                    LOCKS_HELD.dec();
                } else {
                    slot.node = Some(own);
                }
                Err(e)
            }
        }
    }

    /// Forget any held node without talking to the service.
    ///
    /// Used when the owning session is closed; the service drops the node on
    /// its own. An acquisition still in flight will not mark the handle held
    /// afterwards.
    pub(crate) fn invalidate(&self) {
        let mut slot = self.slot();
        slot.invalidated = true;
        if slot.node.take().is_some() {
            LOCKS_HELD.dec();
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_held(&self, own: &str) -> Result<()> {
        let mut slot = self.slot();
        if slot.invalidated {
            return Err(Error::coordination(ZkCode::ConnectionClosed, self.path.clone()));
        }
        slot.node = Some(own.to_string());
        LOCKS_HELD.inc();
        Ok(())
    }

    /// Delete contender nodes of this handle left by an earlier acquisition
    /// that was cancelled before it could clean up.
    async fn withdraw_leftovers(&self) -> Result<()> {
        for node in self.own_contenders(&self.contender_prefix()).await? {
            debug!(path = %self.path, node = %node, "Withdrawing stale contender");
            match self.client.delete(&node, ANY_VERSION).await {
                Ok(()) => {}
                Err(e) if e.coordination_code() == Some(ZkCode::NoNode) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn contender_prefix(&self) -> String {
        format!("{PROTECTED_PREFIX}{}-{LOCK_NODE_NAME}", self.guid)
    }

    async fn create_contender(&self) -> Result<String> {
        let prefix = self.contender_prefix();
        let node_path = child_path(&self.path, &prefix);
        let mut last_err = Error::coordination(ZkCode::ConnectionLoss, node_path.clone());

        for attempt in 1..=LOCK_CREATE_ATTEMPTS {
            match self
                .client
                .create(&node_path, &[], CreateMode::EphemeralSequential, &self.acl)
                .await
            {
                Ok(created) => return Ok(created),
                Err(e) => match e.coordination_code() {
                    Some(ZkCode::NoNode) => {
                        self.create_parents().await?;
                        last_err = e;
                    }
                    Some(ZkCode::ConnectionLoss) => {
                        debug!(path = %self.path, attempt, "Contender create reply lost");
                        if let Some(found) = self.own_contenders(&prefix).await?.pop() {
                            return Ok(found);
                        }
                        last_err = e;
                    }
                    _ => return Err(e),
                },
            }
        }

        Err(last_err)
    }

    /// Contender nodes under the lock path carrying `prefix`.
    async fn own_contenders(&self, prefix: &str) -> Result<Vec<String>> {
        let children = match self.client.children(&self.path).await {
            Ok((children, _)) => children,
            Err(e) if e.coordination_code() == Some(ZkCode::NoNode) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(children
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .map(|name| child_path(&self.path, &name))
            .collect())
    }

    /// Create every missing ancestor of the lock path, and the path itself,
    /// as persistent nodes.
    async fn create_parents(&self) -> Result<()> {
        let mut current = String::new();
        for part in self.path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            if self.client.exists(&current).await?.is_some() {
                continue;
            }
            match self
                .client
                .create(&current, &[], CreateMode::Persistent, &self.acl)
                .await
            {
                Ok(_) => {}
                Err(e) if e.coordination_code() == Some(ZkCode::NodeExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn wait_for_turn(&self, own: &str) -> Result<()> {
        let own_name = own.rsplit('/').next().unwrap_or(own);
        let own_seq = parse_sequence(own_name)
            .ok_or_else(|| Error::coordination(ZkCode::BadArguments, own.to_string()))?;

        loop {
            let (children, _) = self.client.children(&self.path).await?;
            if !children.iter().any(|c| c == own_name) {
                return Err(Error::coordination(ZkCode::NoNode, own.to_string()));
            }

            let Some(predecessor) = next_lower(&children, own_seq) else {
                return Ok(());
            };

            let predecessor = child_path(&self.path, predecessor);
            let (stat, watch) = self.client.exists_watch(&predecessor).await?;
            if stat.is_none() {
                continue;
            }

            debug!(path = %self.path, waiting_on = %predecessor, "Waiting for lock");
            match watch.await {
                WatchEvent::Session(state) => {
                    let code = if state == SessionState::Expired {
                        ZkCode::SessionExpired
                    } else {
                        ZkCode::ConnectionClosed
                    };
                    return Err(Error::coordination(code, self.path.clone()));
                }
                _ => continue,
            }
        }
    }
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("path", &self.path)
            .field("guid", &self.guid)
            .finish()
    }
}

/// Contender node of an acquisition in progress.
///
/// Dropped without [`keep`](Self::keep), which is what happens when a caller's
/// timeout cancels `lock`, it deletes the node in the background.
struct Contender {
    client: Arc<dyn CoordinationClient>,
    node: Option<String>,
}

impl Contender {
    fn new(client: Arc<dyn CoordinationClient>, node: String) -> Self {
        Self {
            client,
            node: Some(node),
        }
    }

    fn keep(&mut self) {
        self.node = None;
    }
}

impl Drop for Contender {
    fn drop(&mut self) {
        let Some(node) = self.node.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(node = %node, "No runtime to withdraw abandoned lock contender");
            return;
        };
        record_lock("acquire", "cancelled");
        let client = self.client.clone();
        runtime.spawn(async move {
            match client.delete(&node, ANY_VERSION).await {
                Ok(()) => debug!(node = %node, "Withdrew abandoned lock contender"),
                Err(e) => debug!(node = %node, error = %e, "Abandoned contender cleanup failed"),
            }
        });
    }
}

/// Sequence suffix of a contender node name (`..-lock-0000000042` -> 42).
pub(crate) fn parse_sequence(name: &str) -> Option<i64> {
    let suffix = name.rsplit('-').next()?;
    if suffix.len() != SEQUENCE_WIDTH || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Name of the contender immediately ahead of `own_seq`, if any.
fn next_lower(children: &[String], own_seq: i64) -> Option<&str> {
    children
        .iter()
        .filter_map(|name| parse_sequence(name).map(|seq| (seq, name.as_str())))
        .filter(|(seq, _)| *seq < own_seq)
        .max_by_key(|(seq, _)| *seq)
        .map(|(_, name)| name)
}
