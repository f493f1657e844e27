//! Server-side heartbeat verification. Grounded on
//! `examples/original_source/internal/websocket/agent_websocket.go`'s
//! `verifyHeartbeat`, with the counter/skew/signature checks split out
//! from socket handling so they can be unit tested directly.

use common::crypto::verify_hmac_sha256_base64;
use common::model::Heartbeat;
use common::time::assert_within_skew;

#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    #[error("heartbeat timestamp invalid or outside allowed skew: {0}")]
    BadTimestamp(#[from] common::CoreError),
    #[error("heartbeat signature does not verify")]
    BadSignature,
    #[error("heartbeat counter {got} is not strictly greater than last accepted {last}")]
    StaleCounter { got: u64, last: u64 },
}

/// Verifies `heartbeat` against `signature_secret` and `last_counter`
/// (the session's last accepted counter, or 0 before any heartbeat has
/// been accepted). Returns the new counter to store on success.
pub fn verify(heartbeat: &Heartbeat, signature_secret: &[u8], last_counter: u64) -> Result<u64, HeartbeatError> {
    assert_within_skew(&heartbeat.timestamp)?;

    let canonical = heartbeat.canonical_string();
    if !verify_hmac_sha256_base64(signature_secret, &canonical, &heartbeat.signature) {
        return Err(HeartbeatError::BadSignature);
    }

    if heartbeat.counter <= last_counter {
        return Err(HeartbeatError::StaleCounter {
            got: heartbeat.counter,
            last: last_counter,
        });
    }

    Ok(heartbeat.counter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::crypto::hmac_sha256_base64;
    use common::model::HEARTBEAT_VERSION;
    use common::time::now_rfc3339_nano;

    fn signed_heartbeat(secret: &[u8], counter: u64, timestamp: &str) -> Heartbeat {
        let mut hb = Heartbeat {
            version: HEARTBEAT_VERSION.to_string(),
            agent_id: "agent-1".to_string(),
            counter,
            nonce: "nonce-a".to_string(),
            timestamp: timestamp.to_string(),
            signature: String::new(),
        };
        hb.signature = hmac_sha256_base64(secret, &hb.canonical_string());
        hb
    }

    #[test]
    fn accepts_a_valid_fresh_heartbeat() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let hb = signed_heartbeat(secret, 5, &now_rfc3339_nano());
        assert_eq!(verify(&hb, secret, 4).unwrap(), 5);
    }

    #[test]
    fn rejects_a_replayed_counter() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let hb = signed_heartbeat(secret, 5, &now_rfc3339_nano());
        let err = verify(&hb, secret, 5).unwrap_err();
        assert!(matches!(err, HeartbeatError::StaleCounter { .. }));
    }

    #[test]
    fn rejects_a_tampered_signature() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let mut hb = signed_heartbeat(secret, 5, &now_rfc3339_nano());
        hb.counter = 6;
        let err = verify(&hb, secret, 4).unwrap_err();
        assert!(matches!(err, HeartbeatError::BadSignature));
    }

    #[test]
    fn rejects_a_skewed_timestamp() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let stale = (chrono::Utc::now() - chrono::Duration::minutes(10)).to_rfc3339();
        let hb = signed_heartbeat(secret, 5, &stale);
        let err = verify(&hb, secret, 4).unwrap_err();
        assert!(matches!(err, HeartbeatError::BadTimestamp(_)));
    }
}
