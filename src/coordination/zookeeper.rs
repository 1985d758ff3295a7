//! ZooKeeper ensemble backed by the async `zookeeper-client` crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use zookeeper_client as zk;

use super::node::{Acl, CreateMode, Perms, Stat};
use super::session::{EventStream, NodeWatch, SessionEvent, SessionState, WatchEvent, emit};
use super::{CoordinationClient, Ensemble};
use crate::constants::{ANY_VERSION, SESSION_EVENT_CHANNEL_CAPACITY};
use crate::error::{Error, Result, ZkCode};

/// Connects sessions to a real ZooKeeper ensemble.
#[derive(Debug, Clone, Default)]
pub struct ZooKeeperEnsemble;

impl ZooKeeperEnsemble {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Ensemble for ZooKeeperEnsemble {
    async fn connect(
        &self,
        servers: &[String],
        session_timeout: Duration,
    ) -> Result<(Arc<dyn CoordinationClient>, EventStream)> {
        if servers.is_empty() {
            return Err(Error::coordination(ZkCode::BadArguments, ""));
        }
        let cluster = servers.join(",");

        let (tx, rx) = mpsc::channel(SESSION_EVENT_CHANNEL_CAPACITY);
        emit(
            &tx,
            SessionEvent {
                session_id: 0,
                state: SessionState::Connecting,
            },
        );

        let client = zk::Client::connector()
            .session_timeout(session_timeout)
            .connect(&cluster)
            .await
            .map_err(|e| map_error(e, ""))?;
        let session_id = client.session_id().0;
        emit(
            &tx,
            SessionEvent {
                session_id,
                state: SessionState::Connected,
            },
        );

        let mut watcher = client.state_watcher();
        tokio::spawn(async move {
            loop {
                let state = map_state(watcher.changed().await);
                emit(&tx, SessionEvent { session_id, state });
                if state.is_terminal() {
                    break;
                }
            }
            debug!(session_id, "ZooKeeper state watcher finished");
        });

        let client = ZooKeeperClient {
            session_id,
            client: Mutex::new(Some(client)),
        };
        Ok((Arc::new(client), rx))
    }
}

/// One ZooKeeper session.
pub struct ZooKeeperClient {
    session_id: i64,
    client: Mutex<Option<zk::Client>>,
}

impl ZooKeeperClient {
    fn client(&self) -> Result<zk::Client> {
        let guard = self.client.lock().unwrap_or_else(|p| p.into_inner());
        guard
            .clone()
            .ok_or_else(|| Error::coordination(ZkCode::ConnectionClosed, ""))
    }
}

#[async_trait]
impl CoordinationClient for ZooKeeperClient {
    fn session_id(&self) -> i64 {
        self.session_id
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>> {
        let stat = self
            .client()?
            .check_stat(path)
            .await
            .map_err(|e| map_error(e, path))?;
        Ok(stat.map(|s| convert_stat(&s)))
    }

    async fn exists_watch(&self, path: &str) -> Result<(Option<Stat>, NodeWatch)> {
        let (stat, watcher) = self
            .client()?
            .check_and_watch_stat(path)
            .await
            .map_err(|e| map_error(e, path))?;
        let watch: NodeWatch = Box::pin(async move { map_watch(watcher.changed().await) });
        Ok((stat.map(|s| convert_stat(&s)), watch))
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        let (data, stat) = self
            .client()?
            .get_data(path)
            .await
            .map_err(|e| map_error(e, path))?;
        Ok((data, convert_stat(&stat)))
    }

    async fn set(&self, path: &str, data: &[u8], version: i32) -> Result<Stat> {
        let stat = self
            .client()?
            .set_data(path, data, expected_version(version))
            .await
            .map_err(|e| map_error(e, path))?;
        Ok(convert_stat(&stat))
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        acl: &[Acl],
    ) -> Result<String> {
        let options = convert_mode(mode).with_acls(convert_acls(acl));
        let (_, sequence) = self
            .client()?
            .create(path, data, &options)
            .await
            .map_err(|e| map_error(e, path))?;
        if mode.is_sequential() {
            Ok(format!("{path}{sequence}"))
        } else {
            Ok(path.to_string())
        }
    }

    async fn delete(&self, path: &str, version: i32) -> Result<()> {
        self.client()?
            .delete(path, expected_version(version))
            .await
            .map_err(|e| map_error(e, path))
    }

    async fn children(&self, path: &str) -> Result<(Vec<String>, Stat)> {
        let (children, stat) = self
            .client()?
            .get_children(path)
            .await
            .map_err(|e| map_error(e, path))?;
        Ok((children, convert_stat(&stat)))
    }

    async fn close(&self) {
        // Dropping the last handle closes the session.
        let client = self
            .client
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        drop(client);
    }
}

fn expected_version(version: i32) -> Option<i32> {
    (version != ANY_VERSION).then_some(version)
}

fn convert_mode(mode: CreateMode) -> zk::CreateMode {
    match mode {
        CreateMode::Persistent => zk::CreateMode::Persistent,
        CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
        CreateMode::PersistentSequential => zk::CreateMode::PersistentSequential,
        CreateMode::EphemeralSequential => zk::CreateMode::EphemeralSequential,
    }
}

/// The client only accepts its predefined ACL sets; pick the closest one.
fn convert_acls(acl: &[Acl]) -> zk::Acls<'static> {
    let world_all = acl.iter().all(|a| a.is_world() && a.perms == Perms::ALL);
    let world_read = acl.iter().all(|a| a.is_world() && a.perms == Perms::READ);
    if acl.is_empty() || world_all {
        zk::Acls::anyone_all()
    } else if world_read {
        zk::Acls::anyone_read()
    } else {
        zk::Acls::creator_all()
    }
}

fn convert_stat(stat: &zk::Stat) -> Stat {
    Stat {
        czxid: stat.czxid,
        mzxid: stat.mzxid,
        ctime: stat.ctime,
        mtime: stat.mtime,
        version: stat.version,
        cversion: stat.cversion,
        aversion: stat.aversion,
        ephemeral_owner: stat.ephemeral_owner,
        data_length: stat.data_length,
        num_children: stat.num_children,
        pzxid: stat.pzxid,
    }
}

fn map_state(state: zk::SessionState) -> SessionState {
    match state {
        zk::SessionState::SyncConnected | zk::SessionState::ConnectedReadOnly => {
            SessionState::Connected
        }
        zk::SessionState::Disconnected => SessionState::Disconnected,
        zk::SessionState::Expired => SessionState::Expired,
        zk::SessionState::AuthFailed => SessionState::AuthFailed,
        zk::SessionState::Closed => SessionState::Closed,
    }
}

fn map_watch(event: zk::WatchedEvent) -> WatchEvent {
    match event.event_type {
        zk::EventType::NodeCreated => WatchEvent::NodeCreated,
        zk::EventType::NodeDeleted => WatchEvent::NodeDeleted,
        zk::EventType::NodeDataChanged => WatchEvent::NodeDataChanged,
        zk::EventType::NodeChildrenChanged => WatchEvent::NodeChildrenChanged,
        _ => WatchEvent::Session(map_state(event.session_state)),
    }
}

fn map_error(err: zk::Error, path: &str) -> Error {
    let code = match err {
        zk::Error::NoNode => ZkCode::NoNode,
        zk::Error::NodeExists => ZkCode::NodeExists,
        zk::Error::BadVersion => ZkCode::BadVersion,
        zk::Error::NotEmpty => ZkCode::NotEmpty,
        zk::Error::NoChildrenForEphemerals => ZkCode::NoChildrenForEphemerals,
        zk::Error::SessionExpired => ZkCode::SessionExpired,
        zk::Error::ConnectionLoss => ZkCode::ConnectionLoss,
        zk::Error::ClientClosed => ZkCode::ConnectionClosed,
        zk::Error::NoAuth => ZkCode::NoAuth,
        zk::Error::InvalidAcl => ZkCode::InvalidAcl,
        zk::Error::BadArguments(_) => ZkCode::BadArguments,
        zk::Error::OperationTimeout => ZkCode::OperationTimeout,
        other => {
            debug!(error = %other, path, "Unmapped ZooKeeper error");
            ZkCode::SystemError
        }
    };
    Error::coordination(code, path)
}
