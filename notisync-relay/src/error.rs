//! Relay error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use notisync_core::SyncError;

/// Relay server error types mapped to HTTP status codes.
#[derive(Debug)]
pub enum RelayError {
    Storage(String),
    NotFound(String),
    BadRequest(String),
    Timeout(String),
    Internal(String),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "Storage error: {}", e),
            Self::NotFound(e) => write!(f, "Not found: {}", e),
            Self::BadRequest(e) => write!(f, "Bad request: {}", e),
            Self::Timeout(e) => write!(f, "Timeout: {}", e),
            Self::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for RelayError {}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Self::NotFound(e) => (StatusCode::NOT_FOUND, e.clone()),
            Self::BadRequest(e) => (StatusCode::BAD_REQUEST, e.clone()),
            Self::Timeout(e) => (StatusCode::GATEWAY_TIMEOUT, e.clone()),
            Self::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<SyncError> for RelayError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::InvalidRequest(_) | SyncError::IdentityMismatch { .. } => {
                Self::BadRequest(e.to_string())
            }
            SyncError::NotFound(what) => Self::NotFound(what),
            SyncError::Timeout(_) => Self::Timeout(e.to_string()),
            SyncError::Storage(_) => Self::Storage(e.to_string()),
            SyncError::Serialization(_) | SyncError::Io(_) => Self::Internal(e.to_string()),
        }
    }
}
