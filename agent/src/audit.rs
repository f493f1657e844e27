//! Task audit log: one JSON line per accepted or rejected task
//! (§6 `/var/log/ultaai/audit.log`).
//!
//! Grounded on `examples/original_source/internal/runner/sandbox.go`'s
//! `writeAudit` (plain append-only `fmt.Sprintf` JSON lines) for the shape
//! and location of the log, and on
//! `examples/iMAGRAY-Shelldone/shelldone-agentd/src/continuum.rs`'s
//! `ContinuumEvent::compute_hash` for the one enrichment it keeps: a
//! `sha256` self-hash of the line's fields, useful for a log-shipper to
//! detect truncation. Unlike `ContinuumEvent` this is not a hash chain —
//! there is no `parent_hash` — so it stays a one-line addition rather than
//! a verifiable journal, which the spec's Non-goals (no durable task
//! queue) argue against building.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize)]
pub struct AuditLine {
    pub at: String,
    pub task_id: String,
    pub task: String,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub signature_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    pub sha256: String,
}

impl AuditLine {
    fn with_self_hash(mut self) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(self.at.as_bytes());
        hasher.update(self.task_id.as_bytes());
        hasher.update(self.task.as_bytes());
        hasher.update(self.event.as_bytes());
        if let Some(reason) = &self.reason {
            hasher.update(reason.as_bytes());
        }
        if let Some(exit_code) = self.exit_code {
            hasher.update(exit_code.to_le_bytes());
        }
        hasher.update([self.signature_ok as u8]);
        if let Some(hash) = &self.script_sha256 {
            hasher.update(hash.as_bytes());
        }
        if let Some(stdout) = &self.stdout {
            hasher.update(stdout.as_bytes());
        }
        if let Some(stderr) = &self.stderr {
            hasher.update(stderr.as_bytes());
        }
        self.sha256 = hex::encode(hasher.finalize());
        self
    }

    pub fn rejected(at: String, task_id: &str, task: &str, reason: &str) -> Self {
        Self {
            at,
            task_id: task_id.to_string(),
            task: task.to_string(),
            event: "reject",
            reason: Some(reason.to_string()),
            exit_code: None,
            signature_ok: reason != "bad_signature" && reason != "bad_timestamp",
            script_sha256: None,
            duration_sec: None,
            stdout: None,
            stderr: None,
            sha256: String::new(),
        }
        .with_self_hash()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn accepted(
        at: String,
        task_id: &str,
        task: &str,
        exit_code: i32,
        script_sha256: &str,
        duration_sec: i64,
        stdout: &str,
        stderr: &str,
    ) -> Self {
        Self {
            at,
            task_id: task_id.to_string(),
            task: task.to_string(),
            event: "accept",
            reason: None,
            exit_code: Some(exit_code),
            signature_ok: true,
            script_sha256: Some(script_sha256.to_string()),
            duration_sec: Some(duration_sec),
            stdout: Some(stdout.to_string()),
            stderr: Some(stderr.to_string()),
            sha256: String::new(),
        }
        .with_self_hash()
    }
}

/// Appends `line` to `path`, creating the parent directory if needed.
/// Failure to write an audit line is logged but never fails the task
/// itself — the spec treats the audit log as ambient observability, not
/// part of the execution contract.
pub fn append(path: &Path, line: &AuditLine) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(error = %e, "failed to create audit log directory");
            return;
        }
    }
    let serialized = match serde_json::to_string(line) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize audit line");
            return;
        }
    };
    let file = OpenOptions::new().create(true).append(true).open(path);
    match file {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{serialized}") {
                tracing::warn!(error = %e, "failed to append audit line");
            }
        }
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "failed to open audit log"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn self_hash_is_deterministic() {
        let a = AuditLine::rejected("t".into(), "id1", "check_uptime", "not_allowlisted");
        let b = AuditLine::rejected("t".into(), "id1", "check_uptime", "not_allowlisted");
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.sha256.len(), 64);
    }

    #[test]
    fn appends_a_line_per_call() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/audit.log");
        append(&path, &AuditLine::rejected("t".into(), "id1", "x", "bad_signature"));
        append(&path, &AuditLine::accepted("t".into(), "id1", "x", 0, "abc123", 1, "ok", ""));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().next().unwrap().contains("\"event\":\"reject\""));
    }
}
