//! API error type for kproc-server
//!
//! Internal components return `kproc_common::Error`; this adapter maps every
//! error kind onto its HTTP status at the facade boundary. The JSON error
//! body (including `request_id`) is assembled by the request-context
//! middleware, which picks up the [`ErrorPayload`] response extension set
//! here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error payload handed from `IntoResponse` to the request-context
/// middleware for final body shaping
#[derive(Debug, Clone)]
pub struct ErrorPayload {
    pub message: String,
    /// Source-error detail, only exposed when debug mode is on
    pub exception: Option<String>,
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed inputs, unmet stage preconditions (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Unknown file, artifact, or model (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate upload (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upload exceeds the configured size limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Extension not in the allowed set (415)
    #[error("Unsupported media type: {0}")]
    UnsupportedMedia(String),

    /// Heavy stage requested with no GPU available (503)
    #[error("GPU required but unavailable")]
    GpuRequired,

    /// Processor raised during stage execution (500)
    #[error("Processing failed: {0}")]
    Processor(String),

    /// Filesystem I/O failure (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Any other unhandled fault (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::GpuRequired => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Processor(_) | ApiError::Storage(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Client-facing message; internal detail stays out of non-debug bodies
    fn public_message(&self) -> String {
        match self {
            ApiError::GpuRequired => "GPU required but unavailable".to_string(),
            ApiError::Storage(_) => "Storage failure".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string_message(),
        }
    }

    fn to_string_message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::UnsupportedMedia(msg)
            | ApiError::Processor(msg)
            | ApiError::Storage(msg)
            | ApiError::Internal(msg) => msg.clone(),
            ApiError::GpuRequired => "GPU required but unavailable".to_string(),
        }
    }
}

impl From<kproc_common::Error> for ApiError {
    fn from(err: kproc_common::Error) -> Self {
        use kproc_common::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) | Error::Precondition(msg) => ApiError::BadRequest(msg),
            Error::GpuRequired => ApiError::GpuRequired,
            Error::Processor(msg) => ApiError::Processor(msg),
            Error::Storage { path, source } => {
                ApiError::Storage(format!("{}: {}", path, source))
            }
            Error::Io(err) => ApiError::Storage(err.to_string()),
            Error::Serde(err) => ApiError::Internal(err.to_string()),
            Error::Config(msg) | Error::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let payload = ErrorPayload {
            message: self.public_message(),
            exception: Some(self.to_string_message()),
        };

        // Minimal body as a fallback; the request-context middleware
        // replaces it with the full schema carrying request_id.
        let mut response = (
            status,
            Json(json!({
                "error": payload.message,
                "code": status.as_u16(),
            })),
        )
            .into_response();
        response.extensions_mut().insert(payload);
        response
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
