//! Error types and handling
//!
//! Every failure that reaches a client is converted to the same JSON
//! envelope: `{"error": {"message", "code", "statusCode"}}`. Middleware
//! stages never write partial responses; they return a typed error and the
//! outermost layer serializes it here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing, malformed, or invalid credential (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Credential past its expiry (401)
    #[error("Authentication token has expired")]
    TokenExpired,

    /// Account suspended (401, distinct code so clients can explain)
    #[error("Account is suspended")]
    Suspended,

    /// Valid principal but insufficient permission (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request budget exhausted for the current window (429)
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: i64 },

    /// Malformed request body or params (422)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Wire-level error envelope
#[derive(Serialize, Debug)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

/// Body of the error envelope
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Human-readable error message
    pub message: String,
    /// Stable code for programmatic handling
    pub code: String,
    /// HTTP status, duplicated in the body for proxied clients
    pub status_code: u16,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>, code: impl Into<String>, status: StatusCode) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                code: code.into(),
                status_code: status.as_u16(),
            },
        }
    }
}

impl AppError {
    /// The status and stable code this error maps to
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::TokenExpired => (StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
            AppError::Suspended => (StatusCode::UNAUTHORIZED, "ACCOUNT_SUSPENDED"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::RateLimited { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED")
            }
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Log server errors; client errors are the caller's problem
        if status.is_server_error() {
            error!(error = %self, code = code, "Request error");
        }

        let body = ErrorEnvelope::new(self.to_string(), code, status);

        match self {
            AppError::RateLimited { retry_after_secs } => (
                status,
                [("Retry-After", retry_after_secs.max(0).to_string())],
                Json(body),
            )
                .into_response(),
            _ => (status, Json(body)).into_response(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
