//! Gateway application state: the process-wide mutable stores tied
//! together behind shared `Arc<...>` handles passed into axum via
//! `State`, generalized from the same `AppState` shape used for the
//! underlying service's TLS/MCP adapters.

use std::sync::Arc;

use crate::config::Settings;
use crate::issuer::CertificateIssuer;
use crate::keystore::Keystore;
use crate::pending::PendingRegistry;
use crate::session::SessionMap;
use crate::token_store::TokenStore;

pub struct AppState {
    pub settings: Settings,
    pub issuer: CertificateIssuer,
    pub keystore: Keystore,
    pub token_store: TokenStore,
    pub sessions: SessionMap,
    pub pending: PendingRegistry,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(settings: Settings, issuer: CertificateIssuer) -> SharedState {
        Arc::new(Self {
            settings,
            issuer,
            keystore: Keystore::new(),
            token_store: TokenStore::new(),
            sessions: SessionMap::new(),
            pending: PendingRegistry::new(),
        })
    }
}
