//! Install-token store: short-lived, single-use secrets minted by
//! `POST /enable` and redeemed by `POST /enroll`.
//!
//! Grounded on `examples/original_source/internal/utils/token_store.go`,
//! with one deliberate correction: an expired-but-present token is
//! treated as invalid and is *not* consumed — the Go reference deleted
//! it unconditionally on lookup, which this rework rejects in favor of
//! leaving expired entries for their natural TTL-based eviction (or a
//! future reaper), so a retried enrollment with a typo'd-but-still-
//! unexpired token is never silently destroyed by an earlier expired
//! attempt touching a different key.
//!
//! Backed by `dashmap` rather than the keystore's `Mutex<HashMap>`: this
//! store is hit concurrently by `/enable` writers and `/enroll` readers at
//! a much higher rate than the keystore's read-modify-write pattern
//! warrants a coarse lock for.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct TokenData {
    pub user_id: String,
    pub agent_id: String,
    expires_at: Instant,
}

#[derive(Default)]
pub struct TokenStore {
    tokens: DashMap<String, TokenData>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    pub fn save(&self, token: String, user_id: String, agent_id: String, ttl: Duration) {
        self.tokens.insert(
            token,
            TokenData {
                user_id,
                agent_id,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Redeems `token`: returns its data and removes it only if it was both
    /// present and unexpired. Invalid or expired tokens are left exactly as
    /// they were (expired entries are never resurrected, but a typo'd
    /// lookup never perturbs unrelated state).
    pub fn consume(&self, token: &str) -> Option<TokenData> {
        let still_valid = matches!(self.tokens.get(token), Some(entry) if entry.expires_at >= Instant::now());
        if !still_valid {
            return None;
        }
        self.tokens.remove(token).map(|(_, data)| data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_once_then_fails() {
        let store = TokenStore::new();
        store.save(
            "tok1".into(),
            "user1".into(),
            "vps1".into(),
            Duration::from_secs(60),
        );
        let data = store.consume("tok1").expect("first consume succeeds");
        assert_eq!(data.agent_id, "vps1");
        assert!(store.consume("tok1").is_none(), "token is single-use");
    }

    #[test]
    fn expired_token_is_rejected_and_not_consumed() {
        let store = TokenStore::new();
        store.save(
            "tok2".into(),
            "user1".into(),
            "vps1".into(),
            Duration::from_millis(1),
        );
        std::thread::sleep(Duration::from_millis(20));
        assert!(store.consume("tok2").is_none());
    }

    #[test]
    fn unknown_token_is_rejected() {
        let store = TokenStore::new();
        assert!(store.consume("never-issued").is_none());
    }
}
