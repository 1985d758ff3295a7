//! In-memory coordination ensemble for testing.
//!
//! Implements the parts of the service the connectors rely on: a node tree
//! with versions, ephemeral and sequential nodes, one-shot exists watches and
//! sessions that can be closed or expired on demand.
//!
//! Every session connected through the same [`InMemoryEnsemble`] (or a clone
//! of it) sees the same tree.
//!
//! ```toml
//! [dev-dependencies]
//! kzconnect = { path = ".", features = ["test-utilities"] }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};

use super::node::{Acl, CreateMode, Stat};
use super::session::{EventStream, NodeWatch, SessionEvent, SessionState, WatchEvent, emit};
use super::{CoordinationClient, Ensemble, parent_path};
use crate::constants::{ANY_VERSION, SEQUENCE_WIDTH, SESSION_EVENT_CHANNEL_CAPACITY};
use crate::error::{Error, Result, ZkCode};

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    stat: Stat,
    /// Next sequence number handed to a sequential child.
    next_sequence: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Alive,
    Ended(SessionState),
}

#[derive(Debug)]
struct SessionEntry {
    status: SessionStatus,
    events: mpsc::Sender<SessionEvent>,
}

struct Watch {
    session_id: i64,
    notify: oneshot::Sender<WatchEvent>,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    zxid: i64,
    next_session_id: i64,
    sessions: HashMap<i64, SessionEntry>,
    watches: HashMap<String, Vec<Watch>>,
    lose_next_create_reply: bool,
    fail_next: Option<ZkCode>,
}

impl Tree {
    fn new() -> Self {
        let mut tree = Tree {
            next_session_id: 1,
            ..Default::default()
        };
        tree.nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                stat: Stat::default(),
                next_sequence: 0,
            },
        );
        tree
    }

    fn check_session(&mut self, session_id: i64) -> Result<()> {
        match self.sessions.get(&session_id).map(|s| s.status) {
            Some(SessionStatus::Alive) => {}
            Some(SessionStatus::Ended(SessionState::Expired)) => {
                return Err(Error::coordination(ZkCode::SessionExpired, ""));
            }
            _ => return Err(Error::coordination(ZkCode::ConnectionClosed, "")),
        }
        if let Some(code) = self.fail_next.take() {
            return Err(Error::coordination(code, ""));
        }
        Ok(())
    }

    fn fire(&mut self, path: &str, event: WatchEvent) {
        if let Some(watches) = self.watches.remove(path) {
            for watch in watches {
                let _ = watch.notify.send(event);
            }
        }
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.zxid
    }

    fn node(&self, path: &str) -> Result<&Node> {
        self.nodes
            .get(path)
            .ok_or_else(|| Error::coordination(ZkCode::NoNode, path))
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{path}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter_map(|(p, _)| {
                let rest = &p[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn create(
        &mut self,
        session_id: i64,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String> {
        validate_path(path, mode.is_sequential())?;
        let parent = parent_path(path).ok_or_else(|| Error::coordination(ZkCode::NodeExists, path))?;
        let parent_node = self.node(parent)?;
        if parent_node.stat.is_ephemeral() {
            return Err(Error::coordination(ZkCode::NoChildrenForEphemerals, path));
        }

        let created = if mode.is_sequential() {
            let seq = parent_node.next_sequence;
            format!("{path}{seq:0width$}", width = SEQUENCE_WIDTH)
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&created) {
            return Err(Error::coordination(ZkCode::NodeExists, created));
        }

        let zxid = self.next_zxid();
        let now = now_millis();
        let parent_node = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| Error::coordination(ZkCode::NoNode, parent))?;
        if mode.is_sequential() {
            parent_node.next_sequence += 1;
        }
        parent_node.stat.cversion += 1;
        parent_node.stat.num_children += 1;
        parent_node.stat.pzxid = zxid;

        self.nodes.insert(
            created.clone(),
            Node {
                data: data.to_vec(),
                stat: Stat {
                    czxid: zxid,
                    mzxid: zxid,
                    ctime: now,
                    mtime: now,
                    ephemeral_owner: if mode.is_ephemeral() { session_id } else { 0 },
                    data_length: data.len() as i32,
                    pzxid: zxid,
                    ..Default::default()
                },
                next_sequence: 0,
            },
        );
        self.fire(&created, WatchEvent::NodeCreated);
        Ok(created)
    }

    fn delete(&mut self, path: &str, version: i32) -> Result<()> {
        let node = self.node(path)?;
        if version != ANY_VERSION && version != node.stat.version {
            return Err(Error::coordination(ZkCode::BadVersion, path));
        }
        if node.stat.num_children > 0 {
            return Err(Error::coordination(ZkCode::NotEmpty, path));
        }
        self.remove(path);
        Ok(())
    }

    fn remove(&mut self, path: &str) {
        if self.nodes.remove(path).is_none() {
            return;
        }
        let zxid = self.next_zxid();
        if let Some(parent) = parent_path(path).and_then(|p| self.nodes.get_mut(p)) {
            parent.stat.cversion += 1;
            parent.stat.num_children -= 1;
            parent.stat.pzxid = zxid;
        }
        self.fire(path, WatchEvent::NodeDeleted);
    }

    fn set(&mut self, path: &str, data: &[u8], version: i32) -> Result<Stat> {
        let current = self.node(path)?.stat.version;
        if version != ANY_VERSION && version != current {
            return Err(Error::coordination(ZkCode::BadVersion, path));
        }
        let zxid = self.next_zxid();
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::coordination(ZkCode::NoNode, path))?;
        node.data = data.to_vec();
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.mtime = now_millis();
        node.stat.data_length = data.len() as i32;
        let stat = node.stat;
        self.fire(path, WatchEvent::NodeDataChanged);
        Ok(stat)
    }

    fn end_session(&mut self, session_id: i64, state: SessionState) {
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return;
        };
        if entry.status != SessionStatus::Alive {
            return;
        }
        entry.status = SessionStatus::Ended(state);
        let events = entry.events.clone();

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.stat.ephemeral_owner == session_id)
            .map(|(p, _)| p.clone())
            .collect();
        for path in owned {
            self.remove(&path);
        }

        for watches in self.watches.values_mut() {
            let (ours, rest): (Vec<Watch>, Vec<Watch>) =
                watches.drain(..).partition(|w| w.session_id == session_id);
            *watches = rest;
            for watch in ours {
                let _ = watch.notify.send(WatchEvent::Session(state));
            }
        }
        self.watches.retain(|_, w| !w.is_empty());

        emit(&events, SessionEvent { session_id, state });
        tracing::debug!(session_id, state = state.as_label(), "In-memory session ended");
    }
}

fn validate_path(path: &str, sequential: bool) -> Result<()> {
    let invalid = !path.starts_with('/')
        || path.contains("//")
        || (path.len() > 1 && path.ends_with('/') && !sequential);
    if invalid {
        return Err(Error::coordination(ZkCode::BadArguments, path));
    }
    Ok(())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Shared in-memory ensemble. Clones share the same tree.
#[derive(Clone)]
pub struct InMemoryEnsemble {
    tree: Arc<Mutex<Tree>>,
}

impl Default for InMemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEnsemble {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(Mutex::new(Tree::new())),
        }
    }

    /// Expire a session as the service would after a partition or crash.
    pub async fn expire_session(&self, session_id: i64) {
        self.tree
            .lock()
            .await
            .end_session(session_id, SessionState::Expired);
    }

    /// Report a transient disconnect on a session without ending it.
    pub async fn disconnect_session(&self, session_id: i64) {
        let tree = self.tree.lock().await;
        if let Some(entry) = tree.sessions.get(&session_id) {
            emit(
                &entry.events,
                SessionEvent {
                    session_id,
                    state: SessionState::Disconnected,
                },
            );
        }
    }

    /// Apply the next create but answer it with `ConnectionLoss`.
    pub async fn lose_next_create_reply(&self) {
        self.tree.lock().await.lose_next_create_reply = true;
    }

    /// Fail the next operation on any session with `code`.
    pub async fn fail_next(&self, code: ZkCode) {
        self.tree.lock().await.fail_next = Some(code);
    }

    /// Number of sessions that have not ended.
    pub async fn live_sessions(&self) -> usize {
        self.tree
            .lock()
            .await
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Alive)
            .count()
    }

    /// Whether `path` currently exists, regardless of sessions.
    pub async fn node_exists(&self, path: &str) -> bool {
        self.tree.lock().await.nodes.contains_key(path)
    }

    /// Watches registered on `path` and not yet fired.
    pub async fn pending_watches(&self, path: &str) -> usize {
        self.tree.lock().await.watches.get(path).map_or(0, Vec::len)
    }
}

#[async_trait]
impl Ensemble for InMemoryEnsemble {
    async fn connect(
        &self,
        servers: &[String],
        _session_timeout: Duration,
    ) -> Result<(Arc<dyn CoordinationClient>, EventStream)> {
        if servers.is_empty() {
            return Err(Error::coordination(ZkCode::BadArguments, ""));
        }

        let (tx, rx) = mpsc::channel(SESSION_EVENT_CHANNEL_CAPACITY);
        let mut tree = self.tree.lock().await;
        let session_id = tree.next_session_id;
        tree.next_session_id += 1;

        emit(
            &tx,
            SessionEvent {
                session_id,
                state: SessionState::Connecting,
            },
        );
        emit(
            &tx,
            SessionEvent {
                session_id,
                state: SessionState::Connected,
            },
        );
        tree.sessions.insert(
            session_id,
            SessionEntry {
                status: SessionStatus::Alive,
                events: tx,
            },
        );

        let client = MemoryClient {
            session_id,
            tree: self.tree.clone(),
        };
        Ok((Arc::new(client), rx))
    }
}

/// Session handle on an [`InMemoryEnsemble`].
pub struct MemoryClient {
    session_id: i64,
    tree: Arc<Mutex<Tree>>,
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    fn session_id(&self) -> i64 {
        self.session_id
    }

    async fn exists(&self, path: &str) -> Result<Option<Stat>> {
        let mut tree = self.tree.lock().await;
        tree.check_session(self.session_id)?;
        Ok(tree.nodes.get(path).map(|n| n.stat))
    }

    async fn exists_watch(&self, path: &str) -> Result<(Option<Stat>, NodeWatch)> {
        let mut tree = self.tree.lock().await;
        tree.check_session(self.session_id)?;
        let stat = tree.nodes.get(path).map(|n| n.stat);

        let (tx, rx) = oneshot::channel();
        let watches = tree.watches.entry(path.to_string()).or_default();
        // Waiters that gave up dropped their receiver.
        watches.retain(|w| !w.notify.is_closed());
        watches.push(Watch {
            session_id: self.session_id,
            notify: tx,
        });
        let watch: NodeWatch = Box::pin(async move {
            rx.await
                .unwrap_or(WatchEvent::Session(SessionState::Closed))
        });
        Ok((stat, watch))
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        let mut tree = self.tree.lock().await;
        tree.check_session(self.session_id)?;
        let node = tree.node(path)?;
        Ok((node.data.clone(), node.stat))
    }

    async fn set(&self, path: &str, data: &[u8], version: i32) -> Result<Stat> {
        let mut tree = self.tree.lock().await;
        tree.check_session(self.session_id)?;
        tree.set(path, data, version)
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        _acl: &[Acl],
    ) -> Result<String> {
        let mut tree = self.tree.lock().await;
        tree.check_session(self.session_id)?;
        let created = tree.create(self.session_id, path, data, mode)?;
        if std::mem::take(&mut tree.lose_next_create_reply) {
            return Err(Error::coordination(ZkCode::ConnectionLoss, path));
        }
        Ok(created)
    }

    async fn delete(&self, path: &str, version: i32) -> Result<()> {
        let mut tree = self.tree.lock().await;
        tree.check_session(self.session_id)?;
        tree.delete(path, version)
    }

    async fn children(&self, path: &str) -> Result<(Vec<String>, Stat)> {
        let mut tree = self.tree.lock().await;
        tree.check_session(self.session_id)?;
        let stat = tree.node(path)?.stat;
        Ok((tree.children_of(path), stat))
    }

    async fn close(&self) {
        self.tree
            .lock()
            .await
            .end_session(self.session_id, SessionState::Closed);
    }
}
