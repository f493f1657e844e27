//! Pending-task registry : correlates a dispatcher-generated
//! task ID with the caller waiting on its result. Grounded on
//! `examples/original_source/internal/websocket/pending.go`, reworked onto
//! a `tokio::sync::oneshot` single-shot handoff instead of a buffered
//! channel plus manual drain-then-close.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::time::timeout as tokio_timeout;

use common::model::TaskResult;

struct PendingEntry {
    sender: oneshot::Sender<TaskResult>,
    owner_identity: String,
    #[allow(dead_code)]
    created_at: Instant,
}

#[derive(Default)]
pub struct PendingRegistry {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

pub enum WaitOutcome {
    Result(TaskResult),
    Timeout,
    /// The entry vanished from under the waiter (resolved, then raced);
    /// should not normally happen since `wait` is only called by the
    /// same caller that just registered the slot.
    NeverRegistered,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `task_id`, owned by `owner_identity`, and returns the
    /// receiving half of the single-shot handoff slot.
    pub fn register(&self, task_id: String, owner_identity: String) -> oneshot::Receiver<TaskResult> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().expect("pending registry poisoned").insert(
            task_id,
            PendingEntry {
                sender: tx,
                owner_identity,
                created_at: Instant::now(),
            },
        );
        rx
    }

    fn remove(&self, task_id: &str) -> Option<PendingEntry> {
        self.entries.lock().expect("pending registry poisoned").remove(task_id)
    }

    /// Delivers `result` to the waiter for `task_id`, if one is still
    /// registered. Returns `false` for an unsolicited or duplicate result,
    /// which the caller logs and discards.
    pub fn resolve(&self, task_id: &str, result: TaskResult) -> bool {
        match self.remove(task_id) {
            Some(entry) => {
                // The receiver may already have been dropped (waiter gave
                // up); a failed send is not an error here.
                let _ = entry.sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Removes the entry without resolving it. Idempotent: a second call
    /// for the same id is a no-op.
    pub fn unregister(&self, task_id: &str) {
        let _ = self.remove(task_id);
    }

    /// Blocks on `rx` up to `timeout`. On timeout, unregisters the entry
    /// so a late result is discarded as unsolicited rather than racing a
    /// second delivery.
    pub async fn wait(
        &self,
        task_id: &str,
        rx: oneshot::Receiver<TaskResult>,
        timeout: Duration,
    ) -> WaitOutcome {
        match tokio_timeout(timeout, rx).await {
            Ok(Ok(result)) => WaitOutcome::Result(result),
            Ok(Err(_)) => {
                // Sender dropped without sending: treat as "never resolved".
                self.unregister(task_id);
                WaitOutcome::NeverRegistered
            }
            Err(_elapsed) => {
                self.unregister(task_id);
                WaitOutcome::Timeout
            }
        }
    }

    /// Fails every pending entry owned by `owner_identity` with a
    /// synthetic result, used on disconnect or session replacement.
    pub fn fail_for_owner(&self, owner_identity: &str, reason: &str) {
        let mut entries = self.entries.lock().expect("pending registry poisoned");
        let matching: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.owner_identity == owner_identity)
            .map(|(id, _)| id.clone())
            .collect();
        for task_id in matching {
            if let Some(entry) = entries.remove(&task_id) {
                let result = TaskResult::synthetic_failure(&task_id, reason);
                let _ = entry.sender.send(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_before_timeout() {
        let registry = PendingRegistry::new();
        let rx = registry.register("t1".into(), "Agent_v1".into());
        let result = TaskResult::synthetic_failure("t1", "ok for test");
        assert!(registry.resolve("t1", result.clone()));

        match registry.wait("t1", rx, Duration::from_secs(1)).await {
            WaitOutcome::Result(r) => assert_eq!(r.task_id, "t1"),
            _ => panic!("expected a result"),
        }
    }

    #[tokio::test]
    async fn times_out_and_unregisters() {
        let registry = PendingRegistry::new();
        let rx = registry.register("t2".into(), "Agent_v1".into());
        match registry.wait("t2", rx, Duration::from_millis(10)).await {
            WaitOutcome::Timeout => {}
            _ => panic!("expected timeout"),
        }
        assert!(!registry.resolve("t2", TaskResult::synthetic_failure("t2", "late")));
    }

    #[tokio::test]
    async fn unsolicited_resolve_is_a_no_op() {
        let registry = PendingRegistry::new();
        assert!(!registry.resolve("never-registered", TaskResult::synthetic_failure("x", "y")));
    }

    #[tokio::test]
    async fn fail_for_owner_resolves_only_matching_entries() {
        let registry = PendingRegistry::new();
        let rx_a = registry.register("a".into(), "Agent_a".into());
        let rx_b = registry.register("b".into(), "Agent_b".into());

        registry.fail_for_owner("Agent_a", "agent disconnected or connection lost: read error");

        let a = rx_a.await.expect("resolved");
        assert_eq!(a.exit_code, -1);
        assert!(a.stderr.contains("disconnected"));

        assert!(registry.resolve("b", TaskResult::synthetic_failure("b", "still pending")));
        let b = rx_b.await.expect("resolved");
        assert_eq!(b.task_id, "b");
    }
}
