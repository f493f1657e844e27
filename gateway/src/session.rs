//! Per-agent WebSocket session state and the session map. Grounded on
//! `examples/original_source/internal/websocket/agent_websocket.go`'s
//! `AgentConn`/`ConnectedVPS`, reworked onto `axum::extract::ws` and an
//! async `RwLock` + per-session `Mutex` write-path rather than Go's
//! `sync.RWMutex` + per-connection `sync.Mutex`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::{Mutex, RwLock};

use crate::pending::PendingRegistry;

pub const READ_LIMIT_BYTES: usize = 1024 * 1024;
pub const WRITE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);
pub const PONG_WAIT: std::time::Duration = std::time::Duration::from_secs(70);
pub const PING_PERIOD: std::time::Duration = std::time::Duration::from_secs(30);

/// A live session for one enrolled agent identity.
pub struct AgentSession {
    pub identity: String,
    pub common_name: String,
    /// Serializes writes to the socket; reads never contend with this.
    pub writer: Mutex<SplitSink<WebSocket, Message>>,
    pub last_seen: Mutex<Instant>,
    pub last_counter: Mutex<u64>,
}

impl AgentSession {
    pub async fn send_text(&self, payload: String) -> Result<(), axum::Error> {
        let mut writer = self.writer.lock().await;
        tokio::time::timeout(WRITE_TIMEOUT, writer.send(Message::Text(payload)))
            .await
            .map_err(|_| axum::Error::new(std::io::Error::new(std::io::ErrorKind::TimedOut, "write deadline exceeded")))?
    }

    pub async fn touch(&self) {
        *self.last_seen.lock().await = Instant::now();
    }
}

/// Per-identity session map. Exactly one active session per identity is
/// kept; a new connection for the same identity replaces the old one and
/// fails its pending tasks with `superseded`.
#[derive(Default)]
pub struct SessionMap {
    sessions: RwLock<HashMap<String, Arc<AgentSession>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, identity: &str) -> Option<Arc<AgentSession>> {
        self.sessions.read().await.get(identity).cloned()
    }

    /// Snapshot of every currently live session, used by server shutdown
    /// to retire all of them and fail their pending tasks.
    pub async fn all(&self) -> Vec<Arc<AgentSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Inserts `session`, returning the previous session for the same
    /// identity (if any) so the caller can close it and fail its pending
    /// tasks outside the lock.
    pub async fn insert_replacing(&self, session: Arc<AgentSession>) -> Option<Arc<AgentSession>> {
        self.sessions.write().await.insert(session.identity.clone(), session)
    }

    /// Removes `identity` only if the currently stored session is
    /// `expected` (pointer equality via `Arc::ptr_eq`), so a session that
    /// already replaced itself does not get removed by the old reader
    /// loop's cleanup.
    pub async fn remove_if_current(&self, identity: &str, expected: &Arc<AgentSession>) {
        let mut sessions = self.sessions.write().await;
        if let Some(current) = sessions.get(identity) {
            if Arc::ptr_eq(current, expected) {
                sessions.remove(identity);
            }
        }
    }
}

/// Closes `session` and fails every pending task it owned, used both on
/// supersede and on read-loop teardown.
pub async fn retire_session(
    session_map: &SessionMap,
    pending: &PendingRegistry,
    session: &Arc<AgentSession>,
    reason: &str,
) {
    session_map.remove_if_current(&session.identity, session).await;
    {
        let mut writer = session.writer.lock().await;
        let _ = writer.close().await;
    }
    pending.fail_for_owner(&session.identity, reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_limits_are_as_documented() {
        assert_eq!(READ_LIMIT_BYTES, 1024 * 1024);
        assert_eq!(PING_PERIOD.as_secs(), 30);
        assert_eq!(PONG_WAIT.as_secs(), 70);
        assert_eq!(WRITE_TIMEOUT.as_secs(), 15);
    }
}
