//! `POST /enable` : mints a short-lived, single-use install
//! token for an operator's agent. Grounded on
//! `examples/original_source/internal/api` enable handler (token minting
//! plus shell-snippet templating).

use std::time::Duration;

use axum::extract::State;
use axum::Json;
use rand::RngCore;
use serde_json::json;

use common::model::EnableRequest;

use crate::state::SharedState;

const INSTALL_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

pub async fn enable(
    State(state): State<SharedState>,
    Json(body): Json<EnableRequest>,
) -> Json<serde_json::Value> {
    let mut token_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut token_bytes);
    let token = hex::encode(token_bytes);

    state
        .token_store
        .save(token.clone(), body.user_id, body.vps_id, INSTALL_TOKEN_TTL);

    let snippet = format!(
        "curl -fsSL {}/install.sh | INSTALL_TOKEN={} BASE_URL={} sh -\n",
        state.settings.public_base_url, token, state.settings.public_base_url
    );

    Json(json!({ "install_token": token, "shell_snippet": snippet }))
}
