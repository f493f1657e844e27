//! Per-component error kinds for the agent side, mirroring the gateway's
//! `error.rs` in shape (one `thiserror` enum per subsystem) even though
//! nothing here crosses an HTTP boundary — these surface through `tracing`
//! and through `TaskResult`/audit lines instead of an `IntoResponse` impl.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("http request to {0} failed: {1}")]
    Http(String, String),
    #[error("enrollment rejected by gateway: {0}")]
    Rejected(String),
    #[error("failed to decrypt enrollment payload: {0}")]
    Decrypt(#[from] common::CoreError),
    #[error("failed to parse enrollment payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to persist credentials: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("failed to read credential file {0}: {1}")]
    Io(String, std::io::Error),
    #[error("invalid hex in {0}: {1}")]
    Hex(String, hex::FromHexError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to load client identity: {0}")]
    Credentials(#[from] CredentialsError),
    #[error("tls configuration error: {0}")]
    Tls(String),
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("write timed out")]
    WriteTimeout,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("signature outside allowed clock skew or malformed: {0}")]
    BadTimestamp(#[from] common::CoreError),
    #[error("task signature does not verify")]
    BadSignature,
    #[error("task {0} is not in the script manifest")]
    NotAllowlisted(String),
    #[error("script hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: String, got: String },
    #[error("failed to read script for hashing: {0}")]
    ScriptIo(#[from] std::io::Error),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl RunnerError {
    /// The short reject tag, matching §4.8 step 9's named reasons
    /// (`bad_signature`, `not_allowlisted`, `sha256_mismatch`), used as the
    /// audit log's `reason` field. Kept distinct from the human-readable
    /// `Display` impl above since the audit format is a stable
    /// machine-readable contract.
    pub fn tag(&self) -> &'static str {
        match self {
            RunnerError::BadTimestamp(_) => "bad_timestamp",
            RunnerError::BadSignature => "bad_signature",
            RunnerError::NotAllowlisted(_) => "not_allowlisted",
            RunnerError::HashMismatch { .. } => "sha256_mismatch",
            RunnerError::ScriptIo(_) => "script_read_failed",
            RunnerError::Sandbox(_) => "sandbox_failed",
        }
    }

    /// Whether the signature itself was valid, for `TaskResult.signature_ok`
    /// — only a `BadTimestamp`/`BadSignature` rejection means the signature
    /// did not check out; every later-stage rejection implies it did.
    pub fn signature_ok(&self) -> bool {
        !matches!(self, RunnerError::BadTimestamp(_) | RunnerError::BadSignature)
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandboxed execution is only supported on unix targets")]
    UnsupportedPlatform,
    #[error("failed to prepare sandbox rootfs: {0}")]
    RootfsPrep(String),
    #[error("failed to resolve an unprivileged user (need 'ultaai' or 'nobody')")]
    NoUnprivilegedUser,
    #[error("failed to spawn sandboxed process: {0}")]
    Spawn(std::io::Error),
    #[error("failed to wait for sandboxed process: {0}")]
    Wait(std::io::Error),
}
