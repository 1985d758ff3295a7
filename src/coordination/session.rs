//! Session state events and node watches.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::metrics::record_session_event;

/// State of a coordination session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Connected,
    /// Connection to the ensemble dropped; the session may still recover.
    Disconnected,
    /// The ensemble expired the session. Ephemeral nodes and locks are gone.
    Expired,
    /// The session was closed locally.
    Closed,
    AuthFailed,
}

impl SessionState {
    /// True once the session can never be used again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Expired | SessionState::Closed | SessionState::AuthFailed
        )
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Expired => "expired",
            SessionState::Closed => "closed",
            SessionState::AuthFailed => "auth_failed",
        }
    }
}

/// Session state change delivered on the stream returned by `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: i64,
    pub state: SessionState,
}

/// Receiving end of a session's events. Callers must keep draining it.
pub type EventStream = mpsc::Receiver<SessionEvent>;

/// What woke a node watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
    /// The owning session ended before the node changed.
    Session(SessionState),
}

/// One-shot notification for a single path.
pub type NodeWatch = Pin<Box<dyn Future<Output = WatchEvent> + Send>>;

/// Deliver `event` without blocking the session.
///
/// A caller that stopped draining its stream loses the event.
pub(crate) fn emit(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    record_session_event(event.state.as_label());
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            tracing::warn!(
                session_id = event.session_id,
                state = event.state.as_label(),
                "Session event dropped, event stream is not being drained"
            );
        }
        Err(TrySendError::Closed(_)) => {}
    }
}
