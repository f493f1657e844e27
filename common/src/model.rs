//! Wire types for the `/connect` message stream and the canonical signing
//! strings. Field names and JSON shapes mirror
//! `examples/original_source/internal/websocket/task.go` and
//! `examples/original_source/utils/heartbeat.go`.

use serde::{Deserialize, Serialize};

/// Protocol/signature schema version for heartbeats. Fixed as a string
/// everywhere (client and server agree), rather than left ambiguous between
/// a string and a number.
pub const HEARTBEAT_VERSION: &str = "1";

/// Canonical string for a heartbeat:
/// `version | agent_id | counter | nonce | timestamp`
pub fn heartbeat_canonical_string(
    version: &str,
    agent_id: &str,
    counter: u64,
    nonce: &str,
    timestamp: &str,
) -> String {
    format!("{version}|{agent_id}|{counter}|{nonce}|{timestamp}")
}

/// Canonical string for a task request:
/// `v1 | task | space-joined-args | nonce | timestamp`
pub fn task_canonical_string(task: &str, args: &[String], nonce: &str, timestamp: &str) -> String {
    format!("v1|{task}|{}|{nonce}|{timestamp}", args.join(" "))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "heartbeat")]
    Heartbeat(Heartbeat),
    #[serde(rename = "task")]
    Task(TaskRequest),
    #[serde(rename = "task_result")]
    TaskResult(TaskResult),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub version: String,
    pub agent_id: String,
    pub counter: u64,
    pub nonce: String,
    pub timestamp: String,
    pub signature: String,
}

impl Heartbeat {
    pub fn canonical_string(&self) -> String {
        heartbeat_canonical_string(
            &self.version,
            &self.agent_id,
            self.counter,
            &self.nonce,
            &self.timestamp,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    pub task: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

impl TaskRequest {
    pub fn canonical_string(&self) -> String {
        task_canonical_string(&self.task, &self.args, &self.nonce, &self.timestamp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub task: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_sec: i64,
    pub chroot_used: bool,
    pub cgroup_used: bool,
    pub signature_ok: bool,
    pub script_sha256: String,
}

impl TaskResult {
    /// Synthesizes a failure result for a task that never got a real
    /// response — disconnect, supersede, timeout, or shutdown.
    pub fn synthetic_failure(task_id: &str, reason: &str) -> Self {
        let now = crate::time::now_rfc3339_nano();
        Self {
            task_id: task_id.to_string(),
            task: String::new(),
            exit_code: -1,
            stdout: String::new(),
            stderr: reason.to_string(),
            started_at: now.clone(),
            finished_at: now,
            duration_sec: 0,
            chroot_used: false,
            cgroup_used: false,
            signature_ok: false,
            script_sha256: String::new(),
        }
    }
}

/// Body of `POST /enable`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnableRequest {
    pub user_id: String,
    pub vps_id: String,
}

/// Body of `POST /enroll`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollRequest {
    pub install_token: String,
    pub agent_id: String,
}

/// Decrypted plaintext of the `/enroll` response. Uses explicit field names
/// rather than the ambiguous `Cert`/`cert` naming some reference material
/// uses: `client_certificate_pem` is the per-agent cert, `ca_certificate_pem`
/// is the gateway's CA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollPayload {
    pub identity_token: String,
    pub signature_secret: String,
    pub client_certificate_pem: String,
    pub client_private_key_pem: String,
    pub fingerprint_sha256: String,
    pub ca_certificate_pem: String,
}

/// Body of the ambient `POST /dispatch` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub agent_id: String,
    pub task: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_dispatch_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_strings_are_deterministic() {
        let a = heartbeat_canonical_string("1", "agent-1", 7, "nonceA", "2026-01-01T00:00:00Z");
        let b = heartbeat_canonical_string("1", "agent-1", 7, "nonceA", "2026-01-01T00:00:00Z");
        assert_eq!(a, b);
        assert_eq!(a, "1|agent-1|7|nonceA|2026-01-01T00:00:00Z");
    }

    #[test]
    fn task_canonical_string_joins_args_with_space() {
        let s = task_canonical_string(
            "install_wordpress",
            &["--domain".to_string(), "example.com".to_string()],
            "nonceB",
            "2026-01-01T00:00:00Z",
        );
        assert_eq!(
            s,
            "v1|install_wordpress|--domain example.com|nonceB|2026-01-01T00:00:00Z"
        );
    }

    #[test]
    fn frame_roundtrips_through_json() {
        let hb = Heartbeat {
            version: HEARTBEAT_VERSION.to_string(),
            agent_id: "agent-1".to_string(),
            counter: 1,
            nonce: "abc".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            signature: "sig".to_string(),
        };
        let frame = Frame::Heartbeat(hb);
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"heartbeat\""));
        let back: Frame = serde_json::from_str(&json).unwrap();
        matches!(back, Frame::Heartbeat(_));
    }
}
