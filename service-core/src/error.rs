use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Error taxonomy shared by every operation of the billing engine.
///
/// All variants are returned to the immediate caller. Only
/// `ConcurrentModification` is retryable (see [`crate::retry`]).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Invalid state: {0}")]
    InvalidState(anyhow::Error),

    #[error("Over-allocation: {0}")]
    OverAllocation(anyhow::Error),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(anyhow::Error),

    #[error("Invariant violation: {0}")]
    InvariantViolation(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<String>,
        }

        let (status, error_message, details) = match self {
            AppError::ValidationError(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation error".to_string(),
                Some(err.to_string()),
            ),
            AppError::NotFound(err) => (StatusCode::NOT_FOUND, err.to_string(), None),
            AppError::InvalidState(err) => (StatusCode::CONFLICT, err.to_string(), None),
            AppError::OverAllocation(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Over-allocation".to_string(),
                Some(err.to_string()),
            ),
            AppError::ConcurrentModification(err) => (
                StatusCode::CONFLICT,
                "Concurrent modification, retry the operation".to_string(),
                Some(err.to_string()),
            ),
            AppError::InvariantViolation(err) => {
                // Always a bug. Log the full detail, report generically so
                // internal identifiers do not leak to clients.
                tracing::error!(error = %err, "invariant violation");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal inconsistency detected".to_string(),
                    None,
                )
            }
            AppError::DatabaseError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Database error".to_string(),
                Some(err.to_string()),
            ),
            AppError::ConfigError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Configuration error".to_string(),
                Some(err.to_string()),
            ),
            AppError::InternalError(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(err.to_string()),
            ),
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                details,
            }),
        )
            .into_response()
    }
}
