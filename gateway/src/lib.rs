pub mod config;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod issuer;
pub mod keystore;
pub mod pending;
pub mod routes;
pub mod session;
pub mod state;
pub mod tls_accept;
pub mod token_store;

use std::fs;
use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use rustls_pemfile::Item;

use config::Settings;
use issuer::CertificateIssuer;
use state::{AppState, SharedState};

/// Builds the axum router over a fully constructed [`SharedState`]. Split
/// out from [`run`] so integration tests can mount it on a plain TCP
/// listener without standing up mTLS.
pub fn app(state: SharedState) -> Router {
    Router::new()
        .route("/enable", post(routes::enable::enable))
        .route("/enroll", post(routes::enroll::enroll))
        .route("/connect", get(routes::connect::connect))
        .route("/dispatch", post(routes::dispatch::dispatch))
        .with_state(state)
}

/// Loads the gateway's own server certificate/key (distinct from the CA
/// used to issue agent certs) and the CA bundle trusted for client auth,
/// builds the mTLS-terminating acceptor, and serves `app` forever.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let listen: SocketAddr = settings.listen;
    let ca_dir = settings.ca_dir.clone();

    let issuer = CertificateIssuer::load(&ca_dir)?;
    let state: SharedState = AppState::new(settings, issuer);

    let server_cert_chain = load_cert_chain(&ca_dir.join("ca.crt"))?;
    let server_key = load_private_key(&ca_dir.join("ca.key"))?;
    let client_ca = load_cert_chain(&ca_dir.join("ca.crt"))?;

    let tls_config = tls_accept::build_rustls_server_config(server_cert_chain, server_key, &client_ca)?;
    let acceptor = tls_accept::MtlsAcceptor::new(tls_config);

    tracing::info!(%listen, "starting ultaai gateway");

    let handle = axum_server::Handle::new();
    tokio::spawn(shutdown_on_ctrl_c(state.clone(), handle.clone()));

    axum_server::bind(listen)
        .acceptor(acceptor)
        .handle(handle)
        .serve(app(state).into_make_service())
        .await?;

    Ok(())
}

/// On `ctrl_c`, retires every live session (closing its socket and failing
/// its pending tasks with the `shutdown` synthetic result, per §5's "on
/// shutdown, all sessions are closed and all pending waiters receive the
/// shutdown synthetic result") before telling axum-server to stop
/// accepting new connections.
async fn shutdown_on_ctrl_c(state: SharedState, handle: axum_server::Handle) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::info!("shutdown signal received, retiring all sessions");
    for session in state.sessions.all().await {
        session::retire_session(&state.sessions, &state.pending, &session, "shutdown").await;
    }
    handle.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
}

fn load_cert_chain(path: &std::path::Path) -> anyhow::Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let pem = fs::read(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice()).collect::<Result<Vec<_>, _>>()?;
    Ok(certs)
}

fn load_private_key(path: &std::path::Path) -> anyhow::Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let pem = fs::read(path)?;
    let mut reader = pem.as_slice();
    loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(Item::Pkcs1Key(key)) => return Ok(key.into()),
            Some(Item::Pkcs8Key(key)) => return Ok(key.into()),
            Some(Item::Sec1Key(key)) => return Ok(key.into()),
            Some(_) => continue,
            None => anyhow::bail!("no private key found in {}", path.display()),
        }
    }
}
