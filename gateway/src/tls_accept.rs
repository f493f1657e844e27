//! mTLS termination for the session server (`/connect`).
//!
//! `axum` itself has no hook for client certificates; the fix used here
//! is a thin wrapper around [`axum_server::tls_rustls::RustlsAcceptor`]
//! that, once the handshake completes, pulls the leaf certificate back
//! out of the `rustls::ServerConnection`, hashes it, and hands the
//! fingerprint to the request as an extension so route handlers never
//! touch TLS internals directly.

use std::io;
use std::sync::Arc;

use axum_server::accept::Accept;
use axum_server::tls_rustls::RustlsAcceptor;
use futures_util::future::BoxFuture;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tower::layer::Layer;
use tower_http::add_extension::{AddExtension, AddExtensionLayer};

use common::crypto::sha256_hex;

/// The verified client identity pulled off the mTLS handshake, carried as
/// a request extension for handlers (`dispatch`/`connect`) that need to
/// confirm the cert fingerprint matches what was issued for the claimed
/// agent id.
#[derive(Debug, Clone)]
pub struct VerifiedClient {
    pub common_name: Option<String>,
    pub fingerprint_sha256: String,
}

pub fn build_rustls_server_config(
    cert_chain: Vec<rustls::pki_types::CertificateDer<'static>>,
    private_key: rustls::pki_types::PrivateKeyDer<'static>,
    client_ca: &[rustls::pki_types::CertificateDer<'static>],
) -> io::Result<ServerConfig> {
    let mut roots = RootCertStore::empty();
    for ca in client_ca {
        roots
            .add(ca.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    }
    let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    // The session server requires TLS >= 1.3 (spec 4.3); pinning the
    // accepted protocol version set here rather than negotiating down.
    ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13])
        .with_client_cert_verifier(verifier)
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Wraps [`RustlsAcceptor`], extracting the peer certificate fingerprint
/// after each handshake and exposing it to axum as a `VerifiedClient`
/// request extension.
#[derive(Clone)]
pub struct MtlsAcceptor {
    inner: RustlsAcceptor,
}

impl MtlsAcceptor {
    pub fn new(config: ServerConfig) -> Self {
        let rustls_config = axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(config));
        Self {
            inner: RustlsAcceptor::new(rustls_config),
        }
    }
}

impl<I, S> Accept<I, S> for MtlsAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = AddExtension<S, VerifiedClient>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let acceptor = self.inner.clone();
        Box::pin(async move {
            let (tls_stream, service) = acceptor.accept(stream, service).await?;

            let (_, connection) = tls_stream.get_ref();
            let leaf_der = connection
                .peer_certificates()
                .and_then(|certs| certs.first())
                .ok_or_else(|| io::Error::new(io::ErrorKind::PermissionDenied, "no client certificate presented"))?;

            let fingerprint_sha256 = sha256_hex(leaf_der.as_ref());
            let common_name = extract_common_name(leaf_der.as_ref());

            let verified = VerifiedClient {
                common_name,
                fingerprint_sha256,
            };
            let service = AddExtensionLayer::new(verified).layer(service);

            Ok((tls_stream, service))
        })
    }
}

fn extract_common_name(der: &[u8]) -> Option<String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    cert.subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned)
}
