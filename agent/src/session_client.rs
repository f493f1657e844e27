//! Agent session client: the `DIALING`/`CONNECTED`/`BACKOFF`
//! state machine that maintains the long-lived mTLS session to
//! `GET /connect`, writes signed heartbeats, keeps the connection alive
//! with pings, and hands inbound task requests to the [`TaskRunner`].
//!
//! Grounded on `examples/original_source/internal/agent/ws.go`'s
//! `ConnectAndMaintain` for the reconnect/backoff/heartbeat/ping shape,
//! reworked onto `tokio-tungstenite` + `tokio-rustls` (the client-side
//! analogue of `gateway::tls_accept`'s server acceptor) instead of
//! `gorilla/websocket` + `crypto/tls`, and onto a
//! `rustls::client::danger::ServerCertVerifier` wrapper for the pinned
//! server-fingerprint check the Go reference does via
//! `tls.Config.VerifyPeerCertificate`.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};

use common::crypto::sha256_hex;
use common::model::Frame;

use crate::config::Settings;
use crate::credentials::Credentials;
use crate::error::SessionError;
use crate::heartbeat::HeartbeatWriter;
use crate::runner::TaskRunner;

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);
const HEARTBEAT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Not the gateway's own 70 s `pongWait` (`gateway::session::PONG_WAIT`) —
/// that is the deadline the gateway enforces on pings it sends to the
/// agent. This is the deadline the agent assumes for pongs to pings *it*
/// sends, fixed at 60 s so the agent's keepalive period lands on the
/// stated "`pongWait·9/10` (≈54 s)" rather than drifting to 63 s if the
/// two were conflated.
const AGENT_PONG_WAIT: Duration = Duration::from_secs(60);
const PING_PERIOD: Duration = Duration::from_secs((AGENT_PONG_WAIT.as_secs() * 9) / 10);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Runs the reconnect state machine until `shutdown` is signaled. Models
/// the three named states as a `loop` rather than an explicit enum, since
/// the transitions are strictly sequential and never branch on anything
/// but connect success/failure.
pub async fn run(
    settings: Settings,
    credentials: Credentials,
    runner: Arc<TaskRunner>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    ensure_crypto_provider_installed();

    let heartbeat_writer = Arc::new(HeartbeatWriter::new(settings.agent_id.clone()));
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        match dial(&settings, &credentials).await {
            Ok(stream) => {
                backoff = INITIAL_BACKOFF;
                tracing::info!(agent_id = %settings.agent_id, "mTLS session established");
                if let Err(e) = drive_connected(stream, &credentials, &heartbeat_writer, &runner, &mut shutdown).await {
                    tracing::warn!(error = %e, "session ended, will reconnect");
                }
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "dial failed, backing off");
            }
        }

        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
        let sleep_for = std::cmp::min(backoff, MAX_BACKOFF) + jitter;
        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
        backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
    }
}

/// `DIALING`: builds a client TLS config from the agent's cert/key and the
/// CA pool, plus a custom verifier pinning the server's leaf fingerprint
/// when one was provisioned, then dials `/connect`.
async fn dial(settings: &Settings, credentials: &Credentials) -> Result<WsStream, SessionError> {
    let client_certs =
        pem_to_der_chain(&credentials.client_cert_pem).map_err(|e| SessionError::Tls(format!("client cert: {e}")))?;
    let client_key =
        pem_to_private_key(&credentials.client_key_pem).map_err(|e| SessionError::Tls(format!("client key: {e}")))?;

    let mut roots = RootCertStore::empty();
    for der in pem_to_der_chain(&credentials.ca_cert_pem).map_err(|e| SessionError::Tls(format!("ca cert: {e}")))? {
        roots.add(der).map_err(|e| SessionError::Tls(format!("adding CA to root store: {e}")))?;
    }

    let inner_verifier = WebPkiServerVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| SessionError::Tls(format!("building base verifier: {e}")))?;
    let verifier = Arc::new(PinnedFingerprintVerifier {
        inner: inner_verifier,
        expected_fingerprint: credentials.expected_server_fingerprint.clone(),
    });

    let config = rustls::ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(client_certs, client_key)
        .map_err(|e| SessionError::Tls(format!("client auth cert: {e}")))?;

    let url = format!("{}/connect", settings.ws_base_url.trim_end_matches('/'));
    let (stream, _response) =
        tokio_tungstenite::connect_async_tls_with_config(&url, None, false, Some(Connector::Rustls(Arc::new(config))))
            .await
            .map_err(|e| SessionError::Dial(e.to_string()))?;

    Ok(stream)
}

/// `CONNECTED`: runs the heartbeat writer, keepalive pinger, and inbound
/// task dispatcher concurrently until any of them errors or `shutdown`
/// fires.
async fn drive_connected(
    stream: WsStream,
    credentials: &Credentials,
    heartbeat_writer: &Arc<HeartbeatWriter>,
    runner: &Arc<TaskRunner>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SessionError> {
    let (sink, stream) = stream.split();
    let sink: Arc<Mutex<SplitSink<WsStream, Message>>> = Arc::new(Mutex::new(sink));

    let heartbeat_task = {
        let sink = sink.clone();
        let heartbeat_writer = heartbeat_writer.clone();
        let signature_secret = credentials.signature_secret.clone();
        tokio::spawn(async move { heartbeat_loop(sink, heartbeat_writer, signature_secret).await })
    };

    let ping_task = {
        let sink = sink.clone();
        tokio::spawn(async move { ping_loop(sink).await })
    };

    let inbound_result = inbound_loop(stream, sink.clone(), credentials, runner, shutdown).await;

    heartbeat_task.abort();
    ping_task.abort();
    let _ = sink.lock().await.close().await;

    inbound_result
}

async fn heartbeat_loop(sink: Arc<Mutex<SplitSink<WsStream, Message>>>, writer: Arc<HeartbeatWriter>, signature_secret: Vec<u8>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
    loop {
        ticker.tick().await;
        let heartbeat = writer.next(&signature_secret);
        let frame = match serde_json::to_string(&Frame::Heartbeat(heartbeat)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize heartbeat");
                continue;
            }
        };
        let mut sink = sink.lock().await;
        let sent = tokio::time::timeout(HEARTBEAT_WRITE_TIMEOUT, sink.send(Message::Text(frame))).await;
        match sent {
            Ok(Ok(())) => {}
            _ => {
                tracing::warn!("heartbeat write failed or timed out");
                return;
            }
        }
    }
}

async fn ping_loop(sink: Arc<Mutex<SplitSink<WsStream, Message>>>) {
    let mut ticker = tokio::time::interval(PING_PERIOD);
    loop {
        ticker.tick().await;
        let mut sink = sink.lock().await;
        if sink.send(Message::Ping(Vec::new())).await.is_err() {
            tracing::warn!("keepalive ping failed");
            return;
        }
    }
}

async fn inbound_loop(
    mut stream: SplitStream<WsStream>,
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
    credentials: &Credentials,
    runner: &Arc<TaskRunner>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), SessionError> {
    loop {
        tokio::select! {
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(frame) = parse_frame(&text) {
                            handle_frame(frame, &sink, credentials, runner).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(SessionError::Dial("connection closed by peer".into())),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(SessionError::WebSocket(e)),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

fn parse_frame(text: &str) -> Option<Frame> {
    match serde_json::from_str(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(error = %e, "malformed frame from gateway, ignoring");
            None
        }
    }
}

async fn handle_frame(frame: Frame, sink: &Arc<Mutex<SplitSink<WsStream, Message>>>, credentials: &Credentials, runner: &Arc<TaskRunner>) {
    let Frame::Task(request) = frame else {
        return;
    };

    let runner = runner.clone();
    let sink = sink.clone();
    let signature_secret = credentials.signature_secret.clone();
    tokio::spawn(async move {
        let result = runner.run(&request, &signature_secret).await;
        let frame = match serde_json::to_string(&Frame::TaskResult(result)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize task result");
                return;
            }
        };
        let mut sink = sink.lock().await;
        if let Err(e) = sink.send(Message::Text(frame)).await {
            tracing::warn!(error = %e, "failed to send task result");
        }
    });
}

/// Wraps the default WebPKI verifier and additionally requires the peer
/// leaf certificate's SHA-256 to equal the pinned server fingerprint, when
/// one was provisioned (§9's callback-style peer verification guidance).
#[derive(Debug)]
struct PinnedFingerprintVerifier {
    inner: Arc<WebPkiServerVerifier>,
    expected_fingerprint: Option<String>,
}

impl ServerCertVerifier for PinnedFingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)?;

        if let Some(expected) = &self.expected_fingerprint {
            let actual = sha256_hex(end_entity.as_ref());
            if &actual != expected {
                return Err(rustls::Error::General(format!(
                    "server certificate fingerprint mismatch: expected {expected}, got {actual}"
                )));
            }
        }

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

static TLS_PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();

/// Installs `ring` as the process-wide default `rustls` crypto provider
/// exactly once, matching `shelldone-agentd`'s
/// `adapters/mcp/tls.rs::TLS_PROVIDER_INSTALLED` pattern — repeated
/// reconnect attempts must not try (and fail) to install it again.
fn ensure_crypto_provider_installed() {
    if TLS_PROVIDER_INSTALLED.get().is_none() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let _ = TLS_PROVIDER_INSTALLED.set(());
    }
}

fn pem_to_der_chain(pem: &str) -> Result<Vec<CertificateDer<'static>>, String> {
    let mut reader = pem.as_bytes();
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())
}

fn pem_to_private_key(pem: &str) -> Result<PrivateKeyDer<'static>, String> {
    let mut reader = pem.as_bytes();
    loop {
        match rustls_pemfile::read_one(&mut reader).map_err(|e| e.to_string())? {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(key.into()),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(key.into()),
            Some(_) => continue,
            None => return Err("no private key found in PEM".to_string()),
        }
    }
}
