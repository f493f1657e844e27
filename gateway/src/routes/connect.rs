//! `GET /connect` : the mTLS session upgrade. Grounded on
//! `examples/original_source/internal/websocket/agent_websocket.go`'s
//! `HandleAgentWebSocket`/`handleAgentReadLoop`/`handleAgentPingLoop`,
//! reworked onto `axum::extract::ws` with the session split into a
//! `SplitSink`/`SplitStream` pair so the read loop and ping loop run as
//! independent tasks sharing one `AgentSession`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Extension;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use common::model::Frame;

use crate::heartbeat;
use crate::session::{retire_session, AgentSession, PING_PERIOD, PONG_WAIT, READ_LIMIT_BYTES};
use crate::state::SharedState;
use crate::tls_accept::VerifiedClient;

pub async fn connect(
    State(state): State<SharedState>,
    Extension(verified): Extension<VerifiedClient>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let common_name = match verified.common_name.clone() {
        Some(cn) => cn,
        None => return (StatusCode::UNAUTHORIZED, "client certificate required").into_response(),
    };

    let record = match state.keystore.get(&common_name) {
        Some(record) => record,
        None => return (StatusCode::UNAUTHORIZED, "agent not enrolled").into_response(),
    };

    if record.certificate_fingerprint_sha256 != verified.fingerprint_sha256 {
        warn!(common_name = %common_name, "certificate fingerprint mismatch");
        return (StatusCode::UNAUTHORIZED, "certificate fingerprint mismatch").into_response();
    }

    ws.max_message_size(READ_LIMIT_BYTES)
        .on_upgrade(move |socket| handle_session(socket, state, common_name, record.identity_token))
}

async fn handle_session(socket: WebSocket, state: SharedState, common_name: String, identity: String) {
    let (sink, mut stream) = socket.split();

    let session = Arc::new(AgentSession {
        identity: identity.clone(),
        common_name,
        writer: Mutex::new(sink),
        last_seen: Mutex::new(Instant::now()),
        last_counter: Mutex::new(0),
    });

    if let Some(previous) = state.sessions.insert_replacing(session.clone()).await {
        info!(identity = %identity, "replacing existing session");
        retire_session(&state.sessions, &state.pending, &previous, "superseded").await;
    }
    info!(identity = %identity, "agent connected");

    let ping_task = {
        let session = session.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_PERIOD);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let mut writer = session.writer.lock().await;
                if writer.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
        })
    };

    let Some(record) = state.keystore.get(&session.common_name) else {
        ping_task.abort();
        retire_session(&state.sessions, &state.pending, &session, "agent not enrolled").await;
        return;
    };

    let disconnect_reason = loop {
        // Read deadline = pongWait (70s); any received frame refreshes it,
        // matching the gateway's own keepalive pings expecting a pong back
        // within that window.
        match tokio::time::timeout(PONG_WAIT, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                session.touch().await;
                if let Some(reason) =
                    handle_text_frame(&state, &session, &record.signature_secret, &text).await
                {
                    break reason;
                }
            }
            Ok(Some(Ok(Message::Pong(_)))) => {
                session.touch().await;
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break "connection closed".to_string(),
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => break format!("read error: {e}"),
            Err(_elapsed) => break "pong timeout".to_string(),
        }
    };

    ping_task.abort();
    warn!(identity = %session.identity, reason = %disconnect_reason, "agent session ended");
    retire_session(&state.sessions, &state.pending, &session, &disconnect_reason).await;
}

/// Dispatches one inbound text frame by `type`. Returns `Some(reason)` when
/// the frame is bad enough to close the session outright — a heartbeat
/// verification failure is never treated as a recoverable protocol error,
/// since the only legitimate producer of a valid signature holds the
/// session's signature secret.
async fn handle_text_frame(
    state: &SharedState,
    session: &Arc<AgentSession>,
    signature_secret: &[u8],
    text: &str,
) -> Option<String> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(identity = %session.identity, error = %e, "malformed frame, ignoring");
            return None;
        }
    };

    match frame {
        Frame::Heartbeat(hb) => {
            let last_counter = *session.last_counter.lock().await;
            match heartbeat::verify(&hb, signature_secret, last_counter) {
                Ok(new_counter) => {
                    *session.last_counter.lock().await = new_counter;
                    None
                }
                Err(e) => Some(format!("heartbeat verification failed: {e}")),
            }
        }
        Frame::TaskResult(result) => {
            if !state.pending.resolve(&result.task_id, result.clone()) {
                warn!(task_id = %result.task_id, "received task_result for unknown task_id");
            }
            None
        }
        Frame::Task(_) => {
            warn!(identity = %session.identity, "agent sent a task frame, ignoring");
            None
        }
    }
}
