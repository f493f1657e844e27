//! Reads back the credential bundle `enroll` persisted to disk, for the
//! session client to mount the client cert/key and for the runner to load
//! the signature secret.
//!
//! Grounded on `examples/original_source/internal/runner/signature.go`'s
//! `readSignatureSecret` (trims the file; `enroll` already stripped
//! whitespace once on write, but a hand-edited file should still round
//! trip) and `internal/agent/ws.go`'s use of `configDir + "/signature_secret"`.
//! The secret is persisted hex-encoded (matching the gateway's
//! `EnrollPayload.signature_secret`, §8 scenario 1's "64 hex chars") and
//! decoded back to the raw 32 bytes here, since every HMAC call expects
//! the raw key, not its hex text.

use std::fs;

use crate::config::Settings;
use crate::error::CredentialsError;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_cert_pem: String,
    pub client_key_pem: String,
    pub ca_cert_pem: String,
    pub identity_token: String,
    pub signature_secret: Vec<u8>,
    pub expected_server_fingerprint: Option<String>,
}

pub fn load(settings: &Settings) -> Result<Credentials, CredentialsError> {
    let client_cert_pem = read_to_string(&settings.client_cert_path())?;
    let client_key_pem = read_to_string(&settings.client_key_path())?;
    let ca_cert_pem = read_to_string(&settings.ca_cert_path())?;
    let identity_token = read_to_string(&settings.identity_token_path())?.trim().to_string();

    let signature_secret_path = settings.signature_secret_path();
    let signature_secret_hex = read_to_string(&signature_secret_path)?;
    let signature_secret = hex::decode(signature_secret_hex.trim())
        .map_err(|e| CredentialsError::Hex(signature_secret_path.display().to_string(), e))?;

    // Optional: the installer may not have provisioned a pinned server
    // fingerprint, in which case the session client skips that check
    // ("if one was provisioned").
    let expected_server_fingerprint = fs::read_to_string(settings.server_fingerprint_path())
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(Credentials {
        client_cert_pem,
        client_key_pem,
        ca_cert_pem,
        identity_token,
        signature_secret,
        expected_server_fingerprint,
    })
}

fn read_to_string(path: &std::path::Path) -> Result<String, CredentialsError> {
    fs::read_to_string(path).map_err(|e| CredentialsError::Io(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cli;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn loads_a_full_credential_bundle() {
        let config_dir = TempDir::new().unwrap();
        let ca_dir = TempDir::new().unwrap();
        std::fs::write(config_dir.path().join("client.crt"), "cert-pem").unwrap();
        std::fs::write(config_dir.path().join("client.key"), "key-pem").unwrap();
        std::fs::write(ca_dir.path().join("ca.crt"), "ca-pem").unwrap();
        std::fs::write(config_dir.path().join("agent_identity_token"), "tok-123\n").unwrap();
        std::fs::write(
            config_dir.path().join("signature_secret"),
            "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcd\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "ultaai-agent",
            "--config-dir",
            config_dir.path().to_str().unwrap(),
            "--ca-dir",
            ca_dir.path().to_str().unwrap(),
        ]);
        let settings = Settings::from_cli(cli);

        let creds = load(&settings).unwrap();
        assert_eq!(creds.identity_token, "tok-123");
        assert_eq!(creds.signature_secret.len(), 32);
        assert!(creds.expected_server_fingerprint.is_none());
    }

    #[test]
    fn missing_cert_file_is_an_error() {
        let config_dir = TempDir::new().unwrap();
        let ca_dir = TempDir::new().unwrap();
        let cli = Cli::parse_from([
            "ultaai-agent",
            "--config-dir",
            config_dir.path().to_str().unwrap(),
            "--ca-dir",
            ca_dir.path().to_str().unwrap(),
        ]);
        let settings = Settings::from_cli(cli);
        assert!(load(&settings).is_err());
    }
}
