//! Gateway configuration: CLI flags (via `clap`) layered over environment
//! variables, matching the `Cli` struct pattern and environment variable
//! surface used across this codebase's other binaries.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "ultaai control-plane gateway", long_about = None)]
pub struct Cli {
    /// Listen address for the enrollment + session HTTP/WS endpoints.
    #[arg(long, env = "PORT", default_value = "0.0.0.0:8443")]
    pub listen: SocketAddr,

    /// Directory holding `ca.crt` and `ca.key` used to issue agent certs
    /// and to terminate mTLS on `/connect`.
    #[arg(long, env = "CA_DIR", default_value = "./certs")]
    pub ca_dir: PathBuf,

    /// Hex-encoded 32-byte AES-256-GCM key shared out of band with the
    /// agent installer, used to seal the `/enroll` response payload.
    #[arg(long, env = "SIGNING_SECRET")]
    pub enc_key_hex: Option<String>,

    /// Directory for the process-local state the gateway keeps (currently
    /// unused beyond a marker file; the keystore/session map/pending
    /// registry stay in-memory and process-local).
    #[arg(long, env = "STATE_DIR", default_value = "./state")]
    pub state_dir: PathBuf,

    /// Base URL embedded in the install snippet returned by `/enable`
    /// (the `BASE_URL` environment variable).
    #[arg(long, env = "BASE_URL", default_value = "https://localhost:8443")]
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub ca_dir: PathBuf,
    pub enc_key: [u8; 32],
    pub state_dir: PathBuf,
    pub public_base_url: String,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let enc_key_hex = cli.enc_key_hex.ok_or_else(|| {
            anyhow::anyhow!("missing AES-GCM key: pass --enc-key-hex or set SIGNING_SECRET (32 bytes, hex)")
        })?;
        let bytes = hex::decode(enc_key_hex.trim())?;
        let enc_key: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| anyhow::anyhow!("SIGNING_SECRET must decode to 32 bytes, got {}", v.len()))?;
        Ok(Self {
            listen: cli.listen,
            ca_dir: cli.ca_dir,
            enc_key,
            state_dir: cli.state_dir,
            public_base_url: cli.base_url,
        })
    }
}
