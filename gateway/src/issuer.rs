//! Agent certificate issuance: loads the gateway's CA material and mints a
//! client certificate per enrollment. Grounded on
//! `examples/original_source/internal/api/cert.go` (`loadCA`,
//! `generateClientCert`), reworked onto `rcgen` for certificate
//! construction rather than hand-rolling ASN.1.
//!
//! `rcgen` itself cannot mint RSA keys (ECDSA/Ed25519 only), so RSA
//! keypairs are generated with the `rsa` crate and round-tripped through
//! PKCS#8 DER into `rcgen::KeyPair` — the CA key is loaded the same way,
//! with a PKCS#8-then-PKCS#1 fallback matching the Go reference.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rand::rngs::OsRng;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SerialNumber,
};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::RsaPrivateKey;

use crate::error::IssuerError;

const RSA_KEY_BITS: usize = 2048;
const VALIDITY_DAYS: i64 = 365;

pub struct IssuedCertificate {
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub fingerprint_sha256: String,
}

pub struct CertificateIssuer {
    ca_cert: Certificate,
    ca_key_pair: KeyPair,
}

impl CertificateIssuer {
    /// Loads `ca.crt`/`ca.key` from `ca_dir`, the same layout as the Go
    /// reference's `loadCA(path, path)`.
    pub fn load(ca_dir: &Path) -> Result<Self, IssuerError> {
        let cert_pem = std::fs::read_to_string(ca_dir.join("ca.crt"))?;
        let key_pem = std::fs::read_to_string(ca_dir.join("ca.key"))?;

        let ca_key_pair = load_rsa_keypair_pem(&key_pem).map_err(|e| IssuerError::CaParse(format!("ca.key: {e}")))?;

        let params = CertificateParams::from_ca_cert_pem(&cert_pem)
            .map_err(|e| IssuerError::CaParse(format!("ca.crt: {e}")))?;
        let ca_cert = params
            .self_signed(&ca_key_pair)
            .map_err(|e| IssuerError::CaParse(format!("ca.crt self-sign check: {e}")))?;

        Ok(Self { ca_cert, ca_key_pair })
    }

    /// Issues a client-auth certificate for `Agent_<agent_id>`, signed by
    /// the loaded CA. Returns nothing and persists nothing on failure.
    pub fn issue_client_certificate(&self, agent_id: &str) -> Result<IssuedCertificate, IssuerError> {
        let client_key_pair =
            generate_rsa_keypair().map_err(|e| IssuerError::Generation(format!("client keygen: {e}")))?;

        let common_name = format!("Agent_{agent_id}");
        let mut params =
            CertificateParams::new(Vec::<String>::new()).map_err(|e| IssuerError::Generation(e.to_string()))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name.clone());
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.serial_number = Some(SerialNumber::from(nanos_since_epoch()));

        let not_before = time::OffsetDateTime::now_utc();
        params.not_before = not_before;
        params.not_after = not_before + time::Duration::days(VALIDITY_DAYS);

        let client_cert = params
            .signed_by(&client_key_pair, &self.ca_cert, &self.ca_key_pair)
            .map_err(|e| IssuerError::Generation(format!("sign client cert for {common_name}: {e}")))?;

        let certificate_pem = client_cert.pem();
        let private_key_pem = client_key_pair.serialize_pem();
        let fingerprint_sha256 = common::crypto::sha256_hex(client_cert.der());

        Ok(IssuedCertificate {
            certificate_pem,
            private_key_pem,
            fingerprint_sha256,
        })
    }

    pub fn ca_certificate_pem(&self) -> String {
        self.ca_cert.pem()
    }
}

fn nanos_since_epoch() -> Vec<u8> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_nanos();
    nanos.to_be_bytes().to_vec()
}

fn generate_rsa_keypair() -> Result<KeyPair, String> {
    let private_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(|e| format!("rsa keygen: {e}"))?;
    let pkcs8_der = private_key.to_pkcs8_der().map_err(|e| format!("pkcs8 encode: {e}"))?;
    KeyPair::try_from(pkcs8_der.as_bytes()).map_err(|e| format!("rcgen keypair from der: {e}"))
}

fn load_rsa_keypair_pem(pem: &str) -> Result<KeyPair, String> {
    if let Ok(kp) = KeyPair::from_pem(pem) {
        return Ok(kp);
    }
    // PKCS#1 "RSA PRIVATE KEY" fallback, matching the Go reference's
    // ParsePKCS8PrivateKey-then-ParsePKCS1PrivateKey behavior.
    let private_key = RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| format!("pkcs1 fallback: {e}"))?;
    let pkcs8_der = private_key
        .to_pkcs8_der()
        .map_err(|e| format!("pkcs1-to-pkcs8 re-encode: {e}"))?;
    KeyPair::try_from(pkcs8_der.as_bytes()).map_err(|e| format!("rcgen keypair from der: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::CertificateParams as CaParams;

    fn write_self_signed_ca(dir: &Path) {
        let ca_key_pair = generate_rsa_keypair().expect("ca keygen");
        let mut params = CaParams::new(Vec::<String>::new()).expect("ca params");
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "ultaai test CA");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let ca_cert = params.self_signed(&ca_key_pair).expect("self sign ca");

        std::fs::write(dir.join("ca.crt"), ca_cert.pem()).unwrap();
        std::fs::write(dir.join("ca.key"), ca_key_pair.serialize_pem()).unwrap();
    }

    #[test]
    fn issues_a_client_certificate_signed_by_the_loaded_ca() {
        let dir = tempfile::tempdir().unwrap();
        write_self_signed_ca(dir.path());

        let issuer = CertificateIssuer::load(dir.path()).expect("load ca");
        let issued = issuer.issue_client_certificate("vps-42").expect("issue cert");

        assert!(issued.certificate_pem.contains("BEGIN CERTIFICATE"));
        assert!(issued.private_key_pem.contains("PRIVATE KEY"));
        assert_eq!(issued.fingerprint_sha256.len(), 64);
    }

    #[test]
    fn missing_ca_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CertificateIssuer::load(dir.path()).unwrap_err();
        assert!(matches!(err, IssuerError::CaIo(_)));
    }
}
