//! End-to-end coverage of the enroll round trip, exercised over the plain
//! HTTP router (`ultaai_gateway::app`) rather than the mTLS listener.

use std::net::SocketAddr;
use std::path::PathBuf;

use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;

use ultaai_gateway::config::Settings;
use ultaai_gateway::issuer::CertificateIssuer;
use ultaai_gateway::state::AppState;

const TEST_ENC_KEY: [u8; 32] = *b"0123456789abcdef0123456789abcde";

fn write_test_ca(dir: &std::path::Path) {
    let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
    let pkcs8_der = private_key.to_pkcs8_der().unwrap();
    let ca_key_pair = KeyPair::try_from(pkcs8_der.as_bytes()).unwrap();

    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "ultaai test CA");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    let ca_cert = params.self_signed(&ca_key_pair).unwrap();

    std::fs::write(dir.join("ca.crt"), ca_cert.pem()).unwrap();
    std::fs::write(dir.join("ca.key"), ca_key_pair.serialize_pem()).unwrap();
}

async fn spawn_app() -> (SocketAddr, TempDir) {
    let temp = TempDir::new().unwrap();
    write_test_ca(temp.path());

    let settings = Settings {
        listen: "127.0.0.1:0".parse().unwrap(),
        ca_dir: temp.path().to_path_buf(),
        enc_key: TEST_ENC_KEY,
        state_dir: PathBuf::from("/tmp"),
        public_base_url: "https://gateway.test".to_string(),
    };

    let issuer = CertificateIssuer::load(&settings.ca_dir).unwrap();
    let state = AppState::new(settings, issuer);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, ultaai_gateway::app(state)).await.unwrap();
    });
    (addr, temp)
}

#[tokio::test]
async fn enroll_round_trip_then_token_reuse_is_unauthorized() {
    let (addr, _temp) = spawn_app().await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let enable_resp: Value = client
        .post(format!("{base}/enable"))
        .json(&serde_json::json!({ "user_id": "u1", "vps_id": "v1" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let token = enable_resp["install_token"].as_str().unwrap().to_string();

    let enroll_resp = client
        .post(format!("{base}/enroll"))
        .json(&serde_json::json!({ "install_token": token, "agent_id": "v1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(enroll_resp.status(), 200);

    let sealed = enroll_resp.bytes().await.unwrap();
    let plaintext = common::crypto::aes_gcm_open(&TEST_ENC_KEY, &sealed).unwrap();
    let payload: common::model::EnrollPayload = serde_json::from_slice(&plaintext).unwrap();

    assert!(!payload.identity_token.is_empty());
    assert_eq!(payload.signature_secret.len(), 64);
    assert!(payload.client_certificate_pem.starts_with("-----BEGIN CERTIFICATE-----"));

    let cert_der = pem_to_der(&payload.client_certificate_pem);
    assert_eq!(payload.fingerprint_sha256, common::crypto::sha256_hex(&cert_der));

    let second_enroll = client
        .post(format!("{base}/enroll"))
        .json(&serde_json::json!({ "install_token": token, "agent_id": "v1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(second_enroll.status(), 401);
}

fn pem_to_der(pem: &str) -> Vec<u8> {
    let mut reader = pem.as_bytes();
    rustls_pemfile::certs(&mut reader)
        .next()
        .expect("at least one certificate")
        .expect("valid pem")
        .to_vec()
}
