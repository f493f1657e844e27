//! Task dispatcher. Grounded on
//! `examples/original_source/internal/websocket/task.go`'s
//! `SendSignedTaskAndWait`, generalized onto the async session map and
//! the oneshot-backed pending registry.

use std::time::Duration;

use common::crypto::hmac_sha256_base64;
use common::model::{task_canonical_string, Frame, TaskRequest};
use common::time::now_rfc3339_nano;

use crate::error::DispatchError;
use crate::keystore::Keystore;
use crate::pending::{PendingRegistry, WaitOutcome};
use crate::session::SessionMap;

pub struct Dispatcher<'a> {
    pub keystore: &'a Keystore,
    pub sessions: &'a SessionMap,
    pub pending: &'a PendingRegistry,
}

impl<'a> Dispatcher<'a> {
    pub fn new(keystore: &'a Keystore, sessions: &'a SessionMap, pending: &'a PendingRegistry) -> Self {
        Self {
            keystore,
            sessions,
            pending,
        }
    }

    pub async fn dispatch(
        &self,
        agent_id: &str,
        task: &str,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<common::model::TaskResult, DispatchError> {
        let common_name = Keystore::common_name_for(agent_id);
        let record = self
            .keystore
            .get(&common_name)
            .ok_or_else(|| DispatchError::UnknownAgent(agent_id.to_string()))?;

        let task_id = uuid::Uuid::new_v4().to_string();
        let nonce = uuid::Uuid::new_v4().to_string();
        let timestamp = now_rfc3339_nano();

        let canonical = task_canonical_string(task, &args, &nonce, &timestamp);
        let signature = hmac_sha256_base64(&record.signature_secret, &canonical);

        let request = TaskRequest {
            task_id: task_id.clone(),
            task: task.to_string(),
            args,
            timestamp,
            nonce,
            signature,
        };
        let frame = serde_json::to_string(&Frame::Task(request)).expect("task frame always serializes");

        // Register before sending: a result racing ahead of registration
        // is impossible once this line has run.
        let rx = self.pending.register(task_id.clone(), record.identity_token.clone());

        let session = match self.sessions.get(&record.identity_token).await {
            Some(session) => session,
            None => {
                self.pending.unregister(&task_id);
                return Err(DispatchError::NoSession);
            }
        };

        if let Err(e) = session.send_text(frame).await {
            self.pending.unregister(&task_id);
            return Err(DispatchError::SendFailed(e.to_string()));
        }

        match self.pending.wait(&task_id, rx, timeout).await {
            WaitOutcome::Result(result) => Ok(result),
            WaitOutcome::Timeout => Err(DispatchError::Timeout),
            WaitOutcome::NeverRegistered => Err(DispatchError::ConnectionClosed(
                "pending slot closed without a result".to_string(),
            )),
        }
    }
}
