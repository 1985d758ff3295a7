//! Session-owning coordination connector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::lock::DistributedLock;
use super::node::{Acl, CreateMode, Stat};
use super::session::EventStream;
use super::{CoordinationClient, CoordinationConnector, Ensemble};
use crate::config::CoordinationSettings;
use crate::error::{Error, Result};

type LockMap = HashMap<String, Arc<DistributedLock>>;

struct Session {
    client: Arc<dyn CoordinationClient>,
    /// Lock handles by path. At most one handle per path per session.
    locks: Arc<Mutex<LockMap>>,
}

/// [`CoordinationConnector`] over one session from an [`Ensemble`].
///
/// Lock handles live as long as the session: `connect` on an already
/// connected instance closes the old session and forgets its locks.
pub struct ZkConnector<E> {
    ensemble: E,
    session: RwLock<Option<Session>>,
}

impl<E: Ensemble> ZkConnector<E> {
    pub fn new(ensemble: E) -> Self {
        Self {
            ensemble,
            session: RwLock::new(None),
        }
    }

    /// Connect using the servers and timeout from `settings`.
    pub async fn connect_with(&self, settings: &CoordinationSettings) -> Result<EventStream> {
        self.connect(&settings.servers, settings.session_timeout)
            .await
    }

    /// Id of the current session, if connected.
    pub async fn session_id(&self) -> Option<i64> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.client.session_id())
    }

    pub fn ensemble(&self) -> &E {
        &self.ensemble
    }

    async fn client(&self) -> Result<Arc<dyn CoordinationClient>> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or(Error::NotConnected)
    }

    async fn release_session(session: Session) {
        let mut locks = session.locks.lock().await;
        for handle in locks.values() {
            handle.invalidate();
        }
        locks.clear();
        drop(locks);
        session.client.close().await;
    }
}

#[async_trait]
impl<E: Ensemble> CoordinationConnector for ZkConnector<E> {
    async fn connect(&self, servers: &[String], session_timeout: Duration) -> Result<EventStream> {
        let (client, events) = self.ensemble.connect(servers, session_timeout).await?;
        let session_id = client.session_id();

        let previous = self.session.write().await.replace(Session {
            client,
            locks: Arc::new(Mutex::new(HashMap::new())),
        });
        if let Some(previous) = previous {
            debug!(
                session_id = previous.client.session_id(),
                "Closing previous coordination session"
            );
            Self::release_session(previous).await;
        }

        info!(session_id, servers = ?servers, "Coordination session opened");
        Ok(events)
    }

    async fn close(&self) {
        let Some(session) = self.session.write().await.take() else {
            return;
        };
        let session_id = session.client.session_id();
        Self::release_session(session).await;
        info!(session_id, "Coordination session closed");
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>> {
        self.client().await?.exists(path).await
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        self.client().await?.get(path).await
    }

    async fn set(&self, path: &str, data: &[u8], version: i32) -> Result<Stat> {
        self.client().await?.set(path, data, version).await
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        acl: &[Acl],
    ) -> Result<String> {
        self.client().await?.create(path, data, mode, acl).await
    }

    async fn delete(&self, path: &str, version: i32) -> Result<()> {
        self.client().await?.delete(path, version).await
    }

    async fn children(&self, path: &str) -> Result<(Vec<String>, Stat)> {
        self.client().await?.children(path).await
    }

    async fn lock(&self, path: &str) -> Result<()> {
        let handle = {
            let session = self.session.read().await;
            let session = session.as_ref().ok_or(Error::NotConnected)?;
            let mut locks = session.locks.lock().await;
            locks
                .entry(path.to_string())
                .or_insert_with(|| {
                    Arc::new(DistributedLock::new(
                        session.client.clone(),
                        path,
                        Acl::open_unsafe(),
                    ))
                })
                .clone()
        };
        handle.lock().await
    }

    async fn unlock(&self, path: &str) -> Result<()> {
        let handle = {
            let session = self.session.read().await;
            let session = session.as_ref().ok_or(Error::NotConnected)?;
            let locks = session.locks.lock().await;
            locks.get(path).cloned()
        };
        match handle {
            Some(handle) => handle.unlock().await,
            None => Err(Error::NotLocked {
                path: path.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::memory::InMemoryEnsemble;
    use crate::coordination::session::SessionState;
    use crate::error::ZkCode;

    fn servers() -> Vec<String> {
        vec!["mem:2181".to_string()]
    }

    async fn connected() -> (ZkConnector<InMemoryEnsemble>, EventStream) {
        let connector = ZkConnector::new(InMemoryEnsemble::new());
        let events = connector
            .connect(&servers(), Duration::from_secs(10))
            .await
            .unwrap();
        (connector, events)
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    #[tokio::test]
    async fn test_operations_before_connect_fail() {
        let connector = ZkConnector::new(InMemoryEnsemble::new());

        assert_eq!(connector.exists("/").await, Err(Error::NotConnected));
        assert_eq!(connector.lock("/x").await, Err(Error::NotConnected));
        assert_eq!(connector.unlock("/x").await, Err(Error::NotConnected));
        assert_eq!(connector.session_id().await, None);
    }

    #[tokio::test]
    async fn test_connect_reports_connected() {
        let (connector, mut events) = connected().await;

        assert_eq!(events.recv().await.unwrap().state, SessionState::Connecting);
        let event = events.recv().await.unwrap();
        assert_eq!(event.state, SessionState::Connected);
        assert_eq!(connector.session_id().await, Some(event.session_id));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_disconnects() {
        let (connector, _events) = connected().await;
        connector.close().await;
        connector.close().await;

        assert_eq!(connector.get("/").await, Err(Error::NotConnected));
        assert_eq!(connector.ensemble().live_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_session() {
        let (connector, _events) = connected().await;
        let first = connector.session_id().await;
        connector.lock("/x").await.unwrap();

        let _events = connector
            .connect(&servers(), Duration::from_secs(10))
            .await
            .unwrap();

        assert_ne!(connector.session_id().await, first);
        assert_eq!(connector.ensemble().live_sessions().await, 1);
        assert!(matches!(
            connector.unlock("/x").await,
            Err(Error::NotLocked { .. })
        ));
    }

    // =========================================================================
    // Pass-through operations
    // =========================================================================

    #[tokio::test]
    async fn test_crud_pass_through() {
        let (connector, _events) = connected().await;
        let acl = Acl::open_unsafe();

        connector
            .create("/app", b"one", CreateMode::Persistent, &acl)
            .await
            .unwrap();
        let (data, stat) = connector.get("/app").await.unwrap();
        assert_eq!(data, b"one");

        connector.set("/app", b"two", stat.version).await.unwrap();
        assert_eq!(connector.get("/app").await.unwrap().0, b"two");

        let (children, _) = connector.children("/").await.unwrap();
        assert!(children.contains(&"app".to_string()));

        connector.delete("/app", -1).await.unwrap();
        assert_eq!(connector.exists("/app").await, Ok(None));
    }

    // =========================================================================
    // Locks
    // =========================================================================

    #[tokio::test]
    async fn test_lock_unlock_cycle() {
        let (connector, _events) = connected().await;

        connector.lock("/jobs/nightly").await.unwrap();
        connector.lock("/jobs/nightly").await.unwrap();
        connector.unlock("/jobs/nightly").await.unwrap();

        assert!(matches!(
            connector.unlock("/jobs/nightly").await,
            Err(Error::NotLocked { .. })
        ));
        let (children, _) = connector.children("/jobs/nightly").await.unwrap();
        assert!(children.is_empty());
    }

    #[tokio::test]
    async fn test_unlock_unknown_path() {
        let (connector, _events) = connected().await;
        assert_eq!(
            connector.unlock("/never").await,
            Err(Error::NotLocked {
                path: "/never".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_unlock_after_expiry_reports_session_loss() {
        let (connector, _events) = connected().await;
        connector.lock("/x").await.unwrap();

        let session_id = connector.session_id().await.unwrap();
        connector.ensemble().expire_session(session_id).await;

        let err = connector.unlock("/x").await.unwrap_err();
        assert_eq!(err.coordination_code(), Some(ZkCode::SessionExpired));
    }
}
