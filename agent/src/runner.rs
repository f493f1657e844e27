//! Task runner (steps 1-2, 8-9): signature validation,
//! allow-list + integrity check, then handoff to the sandbox, followed by
//! result assembly and audit logging.
//!
//! Grounded on `examples/original_source/internal/runner/sandbox.go`'s
//! `ExecuteSignedTask` and `signature.go`'s `ValidateTaskSignature`,
//! reworked onto `common::model::TaskRequest`/`TaskResult` and
//! `common::crypto`/`common::time` instead of the Go reference's
//! package-local HMAC/timestamp helpers, and onto the typed
//! `RunnerError`/`SandboxError` enums instead of Go's `errors.New` strings.

use std::sync::Arc;

use common::crypto::verify_hmac_sha256_base64;
use common::model::{task_canonical_string, TaskRequest, TaskResult};
use common::time::{assert_within_skew, now_rfc3339_nano};

use crate::audit::{self, AuditLine};
use crate::error::RunnerError;
use crate::manifest::{sha256_file, Manifest};
use crate::sandbox;

pub struct TaskRunner {
    manifest: Arc<Manifest>,
    audit_log_path: std::path::PathBuf,
}

impl TaskRunner {
    pub fn new(manifest: Arc<Manifest>, audit_log_path: std::path::PathBuf) -> Self {
        Self {
            manifest,
            audit_log_path,
        }
    }

    /// Validates and executes `request`, always returning a `TaskResult` —
    /// rejections are reported as a negative-exit-code result rather than
    /// propagated as an error, matching "Execution failure...
    /// reported as a normal task_result with nonzero exit_code".
    pub async fn run(&self, request: &TaskRequest, signature_secret: &[u8]) -> TaskResult {
        match self.run_inner(request, signature_secret).await {
            Ok(result) => result,
            Err(e) => {
                let now = now_rfc3339_nano();
                audit::append(
                    &self.audit_log_path,
                    &AuditLine::rejected(now.clone(), &request.task_id, &request.task, e.tag()),
                );
                rejection_result(request, &now, e.signature_ok(), e.tag())
            }
        }
    }

    async fn run_inner(&self, request: &TaskRequest, signature_secret: &[u8]) -> Result<TaskResult, RunnerError> {
        let started_at = now_rfc3339_nano();

        validate_signature(request, signature_secret)?;

        let entry = self
            .manifest
            .lookup(&request.task)
            .ok_or_else(|| RunnerError::NotAllowlisted(request.task.clone()))?;

        let actual_hash = sha256_file(&entry.path)?;
        if actual_hash.to_lowercase() != entry.sha256.to_lowercase() {
            return Err(RunnerError::HashMismatch {
                expected: entry.sha256.clone(),
                got: actual_hash,
            });
        }

        let outcome = sandbox::execute(&request.task_id, &entry.path, &request.args).await?;

        let finished_at = now_rfc3339_nano();
        let duration_sec = seconds_between(&started_at, &finished_at);

        audit::append(
            &self.audit_log_path,
            &AuditLine::accepted(
                finished_at.clone(),
                &request.task_id,
                &request.task,
                outcome.exit_code,
                &actual_hash,
                duration_sec,
                &outcome.stdout,
                &outcome.stderr,
            ),
        );

        Ok(TaskResult {
            task_id: request.task_id.clone(),
            task: request.task.clone(),
            exit_code: outcome.exit_code,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            started_at,
            finished_at,
            duration_sec,
            chroot_used: outcome.chroot_used,
            cgroup_used: outcome.cgroup_used,
            signature_ok: true,
            script_sha256: actual_hash,
        })
    }
}

fn validate_signature(request: &TaskRequest, signature_secret: &[u8]) -> Result<(), RunnerError> {
    assert_within_skew(&request.timestamp)?;
    let canonical = task_canonical_string(&request.task, &request.args, &request.nonce, &request.timestamp);
    if !verify_hmac_sha256_base64(signature_secret, &canonical, &request.signature) {
        return Err(RunnerError::BadSignature);
    }
    Ok(())
}

fn rejection_result(request: &TaskRequest, at: &str, signature_ok: bool, reason: &str) -> TaskResult {
    TaskResult {
        task_id: request.task_id.clone(),
        task: request.task.clone(),
        exit_code: -1,
        stdout: String::new(),
        stderr: reason.to_string(),
        started_at: at.to_string(),
        finished_at: at.to_string(),
        duration_sec: 0,
        chroot_used: false,
        cgroup_used: false,
        signature_ok,
        script_sha256: String::new(),
    }
}

fn seconds_between(start_rfc3339: &str, end_rfc3339: &str) -> i64 {
    match (common::time::parse_rfc3339(start_rfc3339), common::time::parse_rfc3339(end_rfc3339)) {
        (Ok(start), Ok(end)) => (end - start).num_seconds().max(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::crypto::hmac_sha256_base64;
    use tempfile::TempDir;

    fn signed_request(secret: &[u8], task: &str, args: Vec<String>) -> TaskRequest {
        let nonce = "nonce-1".to_string();
        let timestamp = now_rfc3339_nano();
        let canonical = task_canonical_string(task, &args, &nonce, &timestamp);
        let signature = hmac_sha256_base64(secret, &canonical);
        TaskRequest {
            task_id: "task-1".to_string(),
            task: task.to_string(),
            args,
            timestamp,
            nonce,
            signature,
        }
    }

    #[tokio::test]
    async fn rejects_unknown_task_before_touching_the_sandbox() {
        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("manifest.json");
        std::fs::write(&manifest_path, r#"{"scripts":[]}"#).unwrap();
        let manifest = Arc::new(Manifest::load(&manifest_path).unwrap());
        let runner = TaskRunner::new(manifest, dir.path().join("audit.log"));

        let secret = b"0123456789abcdef0123456789abcdef";
        let request = signed_request(secret, "no_such_task", vec![]);
        let result = runner.run(&request, secret).await;

        assert_eq!(result.exit_code, -1);
        assert!(result.signature_ok);
        assert_eq!(result.stderr, "not_allowlisted");
    }

    #[tokio::test]
    async fn rejects_bad_signature_without_reading_the_manifest() {
        let dir = TempDir::new().unwrap();
        let manifest_path = dir.path().join("manifest.json");
        std::fs::write(&manifest_path, r#"{"scripts":[]}"#).unwrap();
        let manifest = Arc::new(Manifest::load(&manifest_path).unwrap());
        let runner = TaskRunner::new(manifest, dir.path().join("audit.log"));

        let secret = b"0123456789abcdef0123456789abcdef";
        let mut request = signed_request(secret, "no_such_task", vec![]);
        request.signature = "not-a-real-signature".to_string();
        let result = runner.run(&request, secret).await;

        assert_eq!(result.exit_code, -1);
        assert!(!result.signature_ok);
        assert_eq!(result.stderr, "bad_signature");
    }

    #[tokio::test]
    async fn rejects_hash_mismatch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("task.sh"), b"#!/bin/bash\necho hi\n").unwrap();
        let manifest_json = serde_json::json!({
            "scripts": [{"name": "greet", "path": "task.sh", "sha256": "0".repeat(64)}]
        });
        let manifest_path = dir.path().join("manifest.json");
        std::fs::write(&manifest_path, manifest_json.to_string()).unwrap();
        let manifest = Arc::new(Manifest::load(&manifest_path).unwrap());
        let runner = TaskRunner::new(manifest, dir.path().join("audit.log"));

        let secret = b"0123456789abcdef0123456789abcdef";
        let request = signed_request(secret, "greet", vec![]);
        let result = runner.run(&request, secret).await;

        assert_eq!(result.exit_code, -1);
        assert!(result.signature_ok);
        assert_eq!(result.stderr, "sha256_mismatch");
    }
}
