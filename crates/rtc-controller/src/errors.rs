//! RTC Controller error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Upstream and database details are logged server-side; clients get a
//! generic message for those.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::CommonError;
use serde::Serialize;
use thiserror::Error;

/// RTC Controller error type.
///
/// Maps to HTTP status codes:
/// - Database, Internal: 500 Internal Server Error
/// - NotFound: 404 Not Found
/// - InvalidArgument: 400 Bad Request
/// - Mismatch: 409 Conflict
/// - Upstream: 502 Bad Gateway
///
/// A stop on an already-stopped task is not an error; it returns the task.
#[derive(Debug, Error)]
pub enum RtcError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced task belongs to a different room.
    #[error("Mismatch: {0}")]
    Mismatch(String),

    /// Provider control-plane, credential issuer or storage failure.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Internal server error")]
    Internal,
}

impl RtcError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            RtcError::Database(_) | RtcError::Internal => 500,
            RtcError::NotFound(_) => 404,
            RtcError::InvalidArgument(_) => 400,
            RtcError::Mismatch(_) => 409,
            RtcError::Upstream(_) => 502,
        }
    }

    /// Short bounded label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RtcError::Database(_) => "database",
            RtcError::NotFound(_) => "not_found",
            RtcError::InvalidArgument(_) => "invalid_argument",
            RtcError::Mismatch(_) => "mismatch",
            RtcError::Upstream(_) => "upstream",
            RtcError::Internal => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RtcError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            RtcError::Database(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "rtc.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            RtcError::NotFound(resource) => (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone()),
            RtcError::InvalidArgument(reason) => {
                (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT", reason.clone())
            }
            RtcError::Mismatch(reason) => (StatusCode::CONFLICT, "MISMATCH", reason.clone()),
            RtcError::Upstream(reason) => {
                tracing::warn!(target: "rtc.upstream", reason = %reason, "Upstream call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_FAILURE",
                    "Remote service call failed".to_string(),
                )
            }
            RtcError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Convert sqlx errors to RtcError
impl From<sqlx::Error> for RtcError {
    fn from(err: sqlx::Error) -> Self {
        RtcError::Database(err.to_string())
    }
}

impl From<CommonError> for RtcError {
    fn from(err: CommonError) -> Self {
        RtcError::InvalidArgument(err.to_string())
    }
}
