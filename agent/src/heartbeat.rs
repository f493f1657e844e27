//! Builds and signs the agent's own heartbeat frames.
//!
//! Grounded on `examples/original_source/utils/heartbeat.go`'s
//! `PrepareHeartbeatMessage`: atomic monotonic counter, 16-byte random
//! nonce, RFC3339-nano timestamp, canonical-string HMAC signature. The
//! counter lives on [`HeartbeatWriter`] rather than a package-level
//! `atomic.Uint64` so tests can construct independent counters.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use rand::RngCore;

use common::crypto::hmac_sha256_base64;
use common::model::{Heartbeat, HEARTBEAT_VERSION};
use common::time::now_rfc3339_nano;

/// Process-local, never persisted: reconnects reuse the current value
/// ("strictly increasing within process").
pub struct HeartbeatWriter {
    agent_id: String,
    counter: AtomicU64,
}

impl HeartbeatWriter {
    pub fn new(agent_id: String) -> Self {
        Self {
            agent_id,
            counter: AtomicU64::new(0),
        }
    }

    /// Builds the next signed heartbeat in sequence.
    pub fn next(&self, signature_secret: &[u8]) -> Heartbeat {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;

        let mut nonce_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = BASE64_STANDARD.encode(nonce_bytes);

        let timestamp = now_rfc3339_nano();

        let mut heartbeat = Heartbeat {
            version: HEARTBEAT_VERSION.to_string(),
            agent_id: self.agent_id.clone(),
            counter,
            nonce,
            timestamp,
            signature: String::new(),
        };
        heartbeat.signature = hmac_sha256_base64(signature_secret, &heartbeat.canonical_string());
        heartbeat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::crypto::verify_hmac_sha256_base64;

    #[test]
    fn counter_strictly_increases_across_calls() {
        let writer = HeartbeatWriter::new("agent-1".to_string());
        let secret = b"0123456789abcdef0123456789abcdef";
        let first = writer.next(secret);
        let second = writer.next(secret);
        assert_eq!(first.counter, 1);
        assert_eq!(second.counter, 2);
        assert_ne!(first.nonce, second.nonce);
    }

    #[test]
    fn produces_a_verifiable_signature() {
        let writer = HeartbeatWriter::new("agent-1".to_string());
        let secret = b"0123456789abcdef0123456789abcdef";
        let hb = writer.next(secret);
        assert!(verify_hmac_sha256_base64(secret, &hb.canonical_string(), &hb.signature));
    }
}
