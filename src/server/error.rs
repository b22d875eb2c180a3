//! API error taxonomy and HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::relay::RelayError;
use crate::store::StoreError;

/// Errors surfaced by the HTTP API.
///
/// User-facing bodies are generic except where the message is explicitly
/// safe to show: upstream provider errors pass through so the user can
/// diagnose model or quota problems.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No authenticated session.
    #[error("unauthorized")]
    Unauthorized,

    /// Conversation absent or owned by another user; deliberately
    /// indistinguishable.
    #[error("conversation not found")]
    NotFound,

    /// Malformed or invalid request input.
    #[error("{0}")]
    BadRequest(String),

    /// The caller has no upstream API key configured.
    #[error("API key not configured")]
    ApiKeyMissing,

    /// Stored key material failed to decrypt; internal, not attributable to
    /// user input.
    #[error("failed to decrypt stored API key")]
    Decryption,

    /// The upstream provider answered with a non-success status.
    #[error("upstream error {status}: {body}")]
    Upstream {
        /// Upstream HTTP status.
        status: u16,
        /// Upstream response body.
        body: String,
    },

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::ApiKeyMissing => StatusCode::BAD_REQUEST,
            Self::Decryption | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message placed in the response body.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthorized => "Unauthorized".to_string(),
            Self::NotFound => "Conversation not found".to_string(),
            Self::BadRequest(message) => message.clone(),
            Self::ApiKeyMissing => "API key not configured".to_string(),
            Self::Upstream { status, body } => {
                format!("Upstream error ({status}): {body}")
            }
            Self::Decryption | Self::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        } else {
            tracing::debug!("request rejected: {self}");
        }

        let body = Json(serde_json::json!({ "error": self.public_message() }));
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConversationNotFound => Self::NotFound,
            StoreError::EmptyTitle => Self::BadRequest("Title must not be empty".to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Decryption => Self::Decryption,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Upstream { status, body } => Self::Upstream { status, body },
            RelayError::Http(e) => Self::Upstream {
                status: StatusCode::BAD_GATEWAY.as_u16(),
                body: format!("Failed to reach upstream provider: {e}"),
            },
            other => Self::Internal(other.to_string()),
        }
    }
}
