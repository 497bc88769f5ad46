//! HTTP error handling
//!
//! Maps application errors to status codes and a JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use queuedeck_core::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Error with HTTP status code
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

/// Convert core errors to HTTP errors; server-side failures get a generic message
impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::QueueNotConfigured(name) => {
                Self::not_found(format!("Queue not configured: {}", name))
            }
            AppError::RegistryClosed => Self::new(StatusCode::GONE, "Registry is closed"),
            AppError::Validation(msg) => Self::bad_request(msg),
            AppError::Domain(e) => Self::bad_request(e.to_string()),
            AppError::NotFound(msg) => Self::not_found(format!("Not found: {}", msg)),
            AppError::InvalidState(msg) => Self::new(StatusCode::CONFLICT, msg),
            other => {
                tracing::error!(error = %other, "Request failed");
                Self::internal("Internal server error")
            }
        }
    }
}
