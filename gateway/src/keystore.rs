//! In-memory agent keystore: maps an agent's certificate common name to the
//! credentials issued for it at enrollment. Grounded on
//! `examples/original_source/internal/utils/keys.go` (`agentKeysStore`).

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct AgentKeyRecord {
    pub identity_token: String,
    pub signature_secret: Vec<u8>,
    pub certificate_fingerprint_sha256: String,
}

#[derive(Default)]
pub struct Keystore {
    by_common_name: Mutex<HashMap<String, AgentKeyRecord>>,
}

impl Keystore {
    pub fn new() -> Self {
        Self {
            by_common_name: Mutex::new(HashMap::new()),
        }
    }

    pub fn common_name_for(agent_id: &str) -> String {
        format!("Agent_{agent_id}")
    }

    pub fn save(&self, common_name: String, record: AgentKeyRecord) {
        self.by_common_name
            .lock()
            .expect("keystore poisoned")
            .insert(common_name, record);
    }

    pub fn get(&self, common_name: &str) -> Option<AgentKeyRecord> {
        self.by_common_name
            .lock()
            .expect("keystore poisoned")
            .get(common_name)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_record() {
        let ks = Keystore::new();
        let cn = Keystore::common_name_for("vps-1");
        ks.save(
            cn.clone(),
            AgentKeyRecord {
                identity_token: "idtok".into(),
                signature_secret: vec![1, 2, 3],
                certificate_fingerprint_sha256: "deadbeef".into(),
            },
        );
        let got = ks.get(&cn).expect("record present");
        assert_eq!(got.identity_token, "idtok");
    }

    #[test]
    fn missing_common_name_returns_none() {
        let ks = Keystore::new();
        assert!(ks.get("Agent_unknown").is_none());
    }
}
