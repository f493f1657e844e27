use thiserror::Error;

/// Errors shared across crypto primitives and wire parsing. Component-level
/// errors (issuer, dispatcher, sandbox,...) wrap or convert into this where
/// they cross a shared boundary; most live in their own crate-local enums.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("timestamp outside allowed clock skew")]
    ClockSkew,

    #[error("malformed timestamp: {0}")]
    BadTimestamp(String),

    #[error("AES-GCM failure: {0}")]
    Aead(String),

    #[error("key must be exactly 32 bytes, got {0}")]
    BadKeyLength(usize),
}
