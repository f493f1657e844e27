//! HMAC-SHA256 signing, AES-256-GCM sealing, and certificate fingerprinting.
//!
//! SHA-256 DER fingerprinting via the `sha2` crate, and HMAC/AES-GCM
//! semantics ported from the original install-token and certificate
//! signing utilities.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::CoreError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_SECRET_LEN: usize = 32;
pub const AES_KEY_LEN: usize = 32;

/// Computes base64(HMAC-SHA256(secret, msg)).
pub fn hmac_sha256_base64(secret: &[u8], msg: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(msg.as_bytes());
    BASE64_STANDARD.encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a base64-encoded HMAC-SHA256 signature.
pub fn verify_hmac_sha256_base64(secret: &[u8], msg: &str, signature_b64: &str) -> bool {
    let provided = match BASE64_STANDARD.decode(signature_b64) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(msg.as_bytes());
    let expected = mac.finalize().into_bytes();
    // `subtle`'s ConstantTimeEq needs equal-length slices; an attacker-chosen
    // signature of the wrong length is simply not a match, no need to pad.
    if expected.len() != provided.len() {
        return false;
    }
    expected.as_slice().ct_eq(&provided).into()
}

/// Lowercase hex SHA-256 over arbitrary bytes (used for DER certificate
/// fingerprints and script-file integrity hashes alike).
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Seals `plaintext` under `key` (must be 32 bytes) with a fresh random
/// 12-byte nonce prepended to the ciphertext, matching the Go reference's
/// `encryptAESGCM`.
pub fn aes_gcm_seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CoreError> {
    if key.len() != AES_KEY_LEN {
        return Err(CoreError::BadKeyLength(key.len()));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CoreError::Aead(e.to_string()))?;
    let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Opens a blob produced by [`aes_gcm_seal`]: the first 12 bytes are the
/// nonce, the rest is ciphertext+tag.
pub fn aes_gcm_open(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CoreError> {
    if key.len() != AES_KEY_LEN {
        return Err(CoreError::BadKeyLength(key.len()));
    }
    const NONCE_LEN: usize = 12;
    if sealed.len() < NONCE_LEN {
        return Err(CoreError::Aead("ciphertext shorter than nonce".into()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| CoreError::Aead(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_round_trips() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let msg = "v1|check_uptime||nonce123|2026-01-01T00:00:00Z";
        let sig = hmac_sha256_base64(secret, msg);
        assert!(verify_hmac_sha256_base64(secret, msg, &sig));
    }

    #[test]
    fn hmac_rejects_tampered_message() {
        let secret = b"0123456789abcdef0123456789abcdef";
        let sig = hmac_sha256_base64(secret, "original");
        assert!(!verify_hmac_sha256_base64(secret, "tampered", &sig));
    }

    #[test]
    fn aes_gcm_round_trip_for_arbitrary_plaintexts() {
        let key = b"0123456789abcdef0123456789abcdef";
        for plaintext in [&b""[..], b"short", b"a somewhat longer plaintext payload"] {
            let sealed = aes_gcm_seal(key, plaintext).unwrap();
            let opened = aes_gcm_open(key, &sealed).unwrap();
            assert_eq!(opened, plaintext);
        }
    }

    #[test]
    fn aes_gcm_rejects_wrong_key() {
        let key_a = b"0123456789abcdef0123456789abcdef";
        let key_b = b"ffffffffffffffffffffffffffffffff";
        let sealed = aes_gcm_seal(key_a, b"secret payload").unwrap();
        assert!(aes_gcm_open(key_b, &sealed).is_err());
    }

    #[test]
    fn sha256_hex_is_deterministic() {
        let a = sha256_hex(b"hello world");
        let b = sha256_hex(b"hello world");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
