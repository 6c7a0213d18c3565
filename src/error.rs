// =============================================================================
// Error taxonomy — typed service errors mapped onto HTTP statuses
// =============================================================================
//
// Services return `AppError`; request handlers bubble it up with `?` and the
// IntoResponse impl renders `{"error": "..."}` with the matching status.
// Background components (hubs, scheduler) never propagate these upward —
// they log and retry or evict.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed request or field-constraint violation.
    #[error("{0}")]
    BadInput(String),

    #[error("{0}")]
    NotFound(String),

    /// Operation forbidden in the entity's current state.
    #[error("{0}")]
    InvalidState(String),

    /// Would drive available_deposit below zero.
    #[error("insufficient available deposit: have {available:.2}, need {required:.2}")]
    BalanceUnderflow { available: f64, required: f64 },

    #[error("{0}")]
    AuthRequired(String),

    #[error("{0}")]
    PermissionDenied(String),

    /// Market price not obtainable.
    #[error("{0}")]
    UpstreamUnavailable(String),

    /// Database deadlock, network reset, and similar retryable faults.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadInput(_) | Self::InvalidState(_) | Self::BalanceUnderflow { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::AuthRequired(_) => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal details stay in the log, not the response body.
        let message = match &self {
            Self::Database(e) => {
                tracing::error!(error = %e, "database error surfaced to request");
                "internal error".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "internal error surfaced to request");
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(
            AppError::BadInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::InvalidState("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::BalanceUnderflow {
                available: 1.0,
                required: 2.0
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::AuthRequired("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::PermissionDenied("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::UpstreamUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn underflow_message_carries_amounts() {
        let e = AppError::BalanceUnderflow {
            available: 99.99,
            required: 100.0,
        };
        let msg = e.to_string();
        assert!(msg.contains("99.99"));
        assert!(msg.contains("100.00"));
    }
}
