use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Per-component error kinds, one enum per gateway subsystem.
#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("failed to read CA material: {0}")]
    CaIo(#[from] std::io::Error),
    #[error("failed to parse CA certificate or key: {0}")]
    CaParse(String),
    #[error("certificate generation failed: {0}")]
    Generation(String),
}

#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("install token invalid or expired")]
    Unauthorized,
    #[error(transparent)]
    Issuer(#[from] IssuerError),
    #[error("enrollment failed: {0}")]
    Internal(String),
}

impl IntoResponse for EnrollError {
    fn into_response(self) -> Response {
        let status = match &self {
            EnrollError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
    #[error("agent has no active session")]
    NoSession,
    #[error("failed to send task frame: {0}")]
    SendFailed(String),
    #[error("timed out waiting for task result")]
    Timeout,
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::UnknownAgent(_) => StatusCode::NOT_FOUND,
            DispatchError::NoSession => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::SendFailed(_) | DispatchError::ConnectionClosed(_) => StatusCode::BAD_GATEWAY,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
