//! `POST /enroll`. Grounded on
//! `examples/original_source/internal/api/cert.go`'s `ProceedCerts` plus
//! the enclosing enrollment handler, with the AES-GCM key sourced from
//! `--enc-key-hex`/`SIGNING_SECRET` rather than hardcoded.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::RngCore;

use common::model::{EnrollPayload, EnrollRequest};

use crate::error::EnrollError;
use crate::keystore::{AgentKeyRecord, Keystore};
use crate::state::SharedState;

pub async fn enroll(
    State(state): State<SharedState>,
    Json(body): Json<EnrollRequest>,
) -> Result<Response, EnrollError> {
    let _redeemed = state
        .token_store
        .consume(&body.install_token)
        .ok_or(EnrollError::Unauthorized)?;

    let issued = state.issuer.issue_client_certificate(&body.agent_id)?;

    let identity_token = random_hex_32();
    let signature_secret_hex = random_hex_32();
    let signature_secret = hex::decode(&signature_secret_hex)
        .map_err(|e| EnrollError::Internal(format!("signature secret encode: {e}")))?;

    let common_name = Keystore::common_name_for(&body.agent_id);
    state.keystore.save(
        common_name,
        AgentKeyRecord {
            identity_token: identity_token.clone(),
            signature_secret,
            certificate_fingerprint_sha256: issued.fingerprint_sha256.clone(),
        },
    );

    let payload = EnrollPayload {
        identity_token,
        signature_secret: signature_secret_hex,
        client_certificate_pem: issued.certificate_pem,
        client_private_key_pem: issued.private_key_pem,
        fingerprint_sha256: issued.fingerprint_sha256,
        ca_certificate_pem: state.issuer.ca_certificate_pem(),
    };

    let plaintext =
        serde_json::to_vec(&payload).map_err(|e| EnrollError::Internal(format!("payload encode: {e}")))?;

    let sealed = common::crypto::aes_gcm_seal(&state.settings.enc_key, &plaintext)
        .map_err(|e| EnrollError::Internal(format!("seal enrollment payload: {e}")))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        sealed,
    )
        .into_response())
}

fn random_hex_32() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
