//! One-shot enrollment: redeems the install token for a client
//! certificate, identity token, and signature secret, then persists them
//! to the credential directory (§4.7).
//!
//! Grounded on `examples/original_source/internal/agent/agent.go`'s
//! `RegisterAgent`, generalized onto the gateway's actual `/enroll`
//! response shape (`common::model::EnrollPayload`) instead of the Go
//! reference's loosely-typed `map[string]string`, and onto
//! `common::crypto::aes_gcm_open` instead of a hand-rolled AES-GCM call.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use common::crypto::{aes_gcm_open, sha256_hex};
use common::model::{EnrollPayload, EnrollRequest};

use crate::config::Settings;
use crate::error::EnrollError;

/// Redeems `install_token` against `settings.base_url` and writes the
/// returned credential bundle under `settings.config_dir`/`ca_dir`.
/// Returns the fingerprint the gateway assigned, purely for logging.
pub async fn enroll(settings: &Settings, enc_key: &[u8], install_token: &str) -> Result<String, EnrollError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("reqwest client builds with default TLS backend");

    let url = format!("{}/enroll", settings.base_url.trim_end_matches('/'));
    let body = EnrollRequest {
        install_token: install_token.to_string(),
        agent_id: settings.agent_id.clone(),
    };

    let response = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| EnrollError::Http(url.clone(), e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(EnrollError::Rejected(format!("{status}: {text}")));
    }

    let sealed = response.bytes().await.map_err(|e| EnrollError::Http(url, e.to_string()))?;
    let plaintext = aes_gcm_open(enc_key, &sealed)?;
    let payload: EnrollPayload = serde_json::from_slice(&plaintext)?;

    persist(settings, &payload)?;

    Ok(payload.fingerprint_sha256)
}

fn persist(settings: &Settings, payload: &EnrollPayload) -> Result<(), EnrollError> {
    fs::create_dir_all(&settings.config_dir)?;
    fs::create_dir_all(&settings.ca_dir)?;

    write_file(&settings.ca_cert_path(), payload.ca_certificate_pem.as_bytes(), 0o644)?;
    write_file(&settings.client_cert_path(), payload.client_certificate_pem.as_bytes(), 0o644)?;
    write_file(&settings.client_key_path(), payload.client_private_key_pem.as_bytes(), 0o600)?;
    write_file(&settings.identity_token_path(), payload.identity_token.as_bytes(), 0o644)?;
    // The secret arrives hex-encoded from the gateway; persisted as-is so
    // `credentials::load` can decode it back to the raw HMAC key.
    write_file(
        &settings.signature_secret_path(),
        payload.signature_secret.trim().as_bytes(),
        0o600,
    )?;
    write_file(&settings.fingerprint_path(), payload.fingerprint_sha256.as_bytes(), 0o644)?;

    Ok(())
}

fn write_file(path: &std::path::Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    fs::write(path, contents)?;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

/// Sanity check used right after enrollment and at startup: the persisted
/// client certificate's fingerprint should equal the fingerprint the
/// gateway returned, catching a corrupted write early.
pub fn verify_persisted_fingerprint(settings: &Settings) -> std::io::Result<bool> {
    let cert_pem = fs::read_to_string(settings.client_cert_path())?;
    let recorded = fs::read_to_string(settings.fingerprint_path())?;
    let der = pem_to_der(&cert_pem);
    Ok(sha256_hex(&der) == recorded.trim())
}

fn pem_to_der(pem: &str) -> Vec<u8> {
    let mut reader = pem.as_bytes();
    rustls_pemfile::certs(&mut reader)
        .next()
        .and_then(|r| r.ok())
        .map(|der| der.to_vec())
        .unwrap_or_default()
}
