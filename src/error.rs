//! Relay error types with HTTP status code mapping.
//!
//! [`RelayError`] is the central error type for the relay. Each variant
//! maps to a specific HTTP status code and structured JSON error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1002,
///     "message": "unauthorized: signature verification failed"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`RelayError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Relay error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category   | HTTP Status                     |
/// |-----------|------------|---------------------------------|
/// | 1000–1999 | Validation | 400 / 401 / 405                 |
/// | 2000–2999 | Transport  | 500 Internal Server Error       |
/// | 4000–4999 | Connect    | 503 Service Unavailable         |
///
/// Inventory failures stay [`crate::inventory::InventoryError`]s: they are
/// logged and counted per item and never turn into a response.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The HTTP method is not accepted by the endpoint.
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The request body could not be read or decoded.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Signature or shared-secret check failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A subscriber connection failed to read, write, or serialize.
    #[error("transport error: {0}")]
    Transport(String),

    /// The relay client could not establish its session.
    #[error("connect error: {0}")]
    Connect(String),
}

impl RelayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::BadRequest(_) => 1001,
            Self::Unauthorized(_) => 1002,
            Self::MethodNotAllowed(_) => 1003,
            Self::Transport(_) => 2001,
            Self::Connect(_) => 4002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Connect(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
