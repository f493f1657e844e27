//! On-host agent library: enrollment, mTLS session client, and the
//! sandboxed task runner (§4.7, §4.8).

pub mod audit;
pub mod config;
pub mod credentials;
pub mod enroll;
pub mod error;
pub mod heartbeat;
pub mod manifest;
pub mod runner;
pub mod sandbox;
pub mod session_client;

use std::sync::Arc;

use config::Settings;

/// Enrolls if no credentials are on disk yet, then runs the session
/// client until `ctrl_c` is received. Mirrors the gateway's `run` in
/// shape: configuration is fully resolved by the caller, this function
/// just wires the pieces together and blocks.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    if !settings.is_enrolled() {
        let install_token = settings
            .install_token
            .clone()
            .ok_or_else(|| anyhow::anyhow!("not enrolled and no --install-token / INSTALL_TOKEN provided"))?;
        let enc_key = settings.enc_key()?;
        let fingerprint = enroll::enroll(&settings, &enc_key, &install_token).await?;
        tracing::info!(%fingerprint, "enrolled successfully");
    }

    if !enroll::verify_persisted_fingerprint(&settings)? {
        anyhow::bail!("persisted client certificate does not match its recorded fingerprint; re-enroll required");
    }

    let credentials = credentials::load(&settings)?;
    let manifest = Arc::new(manifest::Manifest::load(&settings.manifest_path)?);
    let audit_log_path = std::path::PathBuf::from(sandbox::AUDIT_LOG_PATH);
    let runner = Arc::new(runner::TaskRunner::new(manifest, audit_log_path));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    session_client::run(settings, credentials, runner, shutdown_rx).await
}
