//! Agent configuration: CLI flags layered over environment variables
//! (§6), plus the credential-directory layout persisted by
//! `enroll` and read back by `session_client`/`runner`.
//!
//! Grounded on `examples/original_source/internal/agent/ws.go` (`configDir`,
//! `agentIDPath`) and `internal/runner/sandbox.go` (`sandboxRoot`,
//! `auditLogPath`, `cgroupRoot`).

use std::path::{Path, PathBuf};

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "ultaai on-host agent", long_about = None)]
pub struct Cli {
    /// Base URL for the one-shot HTTP enrollment call (`POST /enroll`).
    #[arg(long, env = "BASE_URL", default_value = "https://localhost:8443")]
    pub base_url: String,

    /// Base URL for the persistent mTLS session (`GET /connect`), normally
    /// the same host as `base_url` on the `wss://` scheme.
    #[arg(long, env = "WS_BASE_URL", default_value = "wss://localhost:8443")]
    pub ws_base_url: String,

    /// Directory holding the persisted client cert/key, CA bundle,
    /// identity token and signature secret.
    #[arg(long, env = "CONFIG_DIR", default_value = "./test-vm-agent")]
    pub config_dir: PathBuf,

    /// Directory holding `ca.crt`, the trust root for the gateway's
    /// session-terminating certificate.
    #[arg(long, env = "CA_DIR", default_value = "./crts")]
    pub ca_dir: PathBuf,

    /// Path to the script allow-list shipped alongside the agent binary.
    #[arg(long, env = "MANIFEST_PATH", default_value = "./scripts/manifest.json")]
    pub manifest_path: PathBuf,

    /// One-time install token minted by `POST /enable`, required only for
    /// the first run before credentials exist on disk.
    #[arg(long, env = "INSTALL_TOKEN")]
    pub install_token: Option<String>,

    /// Agent identifier used both for enrollment and heartbeats, if not
    /// already resolvable from `AGENT_ID` or `/etc/ultaai-agent-id`.
    #[arg(long, env = "AGENT_ID")]
    pub agent_id: Option<String>,

    /// Hex-encoded 32-byte AES-256-GCM key shared out of band with the
    /// gateway, used to open the sealed `/enroll` response. Only needed
    /// for the first run; ignored once credentials already exist on disk.
    #[arg(long, env = "SIGNING_SECRET")]
    pub enc_key_hex: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub base_url: String,
    pub ws_base_url: String,
    pub config_dir: PathBuf,
    pub ca_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub install_token: Option<String>,
    pub agent_id: String,
    pub enc_key_hex: Option<String>,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Self {
        let agent_id = cli.agent_id.unwrap_or_else(agent_id_from_environment);
        Self {
            base_url: cli.base_url,
            ws_base_url: cli.ws_base_url,
            config_dir: cli.config_dir,
            ca_dir: cli.ca_dir,
            manifest_path: cli.manifest_path,
            install_token: cli.install_token,
            agent_id,
            enc_key_hex: cli.enc_key_hex,
        }
    }

    /// Decodes `enc_key_hex` into the 32-byte AES-256-GCM key `enroll`
    /// needs, failing with a message pointing at the same env var the
    /// gateway documents (`SIGNING_SECRET`) for the shared secret.
    pub fn enc_key(&self) -> anyhow::Result<[u8; 32]> {
        let hex_str = self
            .enc_key_hex
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing AES-GCM key: pass --enc-key-hex or set SIGNING_SECRET (32 bytes, hex)"))?;
        let bytes = hex::decode(hex_str.trim())?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| anyhow::anyhow!("SIGNING_SECRET must decode to 32 bytes, got {}", v.len()))
    }

    pub fn client_cert_path(&self) -> PathBuf {
        self.config_dir.join("client.crt")
    }

    pub fn client_key_path(&self) -> PathBuf {
        self.config_dir.join("client.key")
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.ca_dir.join("ca.crt")
    }

    pub fn identity_token_path(&self) -> PathBuf {
        self.config_dir.join("agent_identity_token")
    }

    pub fn signature_secret_path(&self) -> PathBuf {
        self.config_dir.join("signature_secret")
    }

    pub fn fingerprint_path(&self) -> PathBuf {
        self.config_dir.join("fingerprint_sha256")
    }

    pub fn server_fingerprint_path(&self) -> PathBuf {
        self.config_dir.join("server_fingerprint_sha256")
    }

    pub fn is_enrolled(&self) -> bool {
        self.client_cert_path().exists() && self.signature_secret_path().exists()
    }
}

const AGENT_ID_FILE: &str = "/etc/ultaai-agent-id";

/// `AGENT_ID` env var, falling back to `/etc/ultaai-agent-id`, falling back
/// to `"unknown"`.
pub fn agent_id_from_environment() -> String {
    agent_id_from_file(Path::new(AGENT_ID_FILE))
}

/// Same fallback chain as [`agent_id_from_environment`] but reading the id
/// file from an arbitrary path, for tests.
pub fn agent_id_from_file(path: &Path) -> String {
    if let Ok(v) = std::env::var("AGENT_ID") {
        let v = v.trim();
        if !v.is_empty() {
            return v.to_string();
        }
    }
    if let Ok(contents) = std::fs::read_to_string(path) {
        let id = contents.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn falls_back_to_id_file_then_unknown() {
        std::env::remove_var("AGENT_ID");
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agent-id");
        assert_eq!(agent_id_from_file(&path), "unknown");

        std::fs::write(&path, "agent-42\n").unwrap();
        assert_eq!(agent_id_from_file(&path), "agent-42");
    }
}
