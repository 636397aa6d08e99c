use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::gateway::GatewayError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Insufficient balance")]
    InsufficientFunds,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A settlement with this reference was already recorded. Idempotent
    /// paths treat this as "already applied", not as a hard failure.
    #[error("Duplicate reference: {0}")]
    DuplicateReference(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) | AppError::InsufficientFunds => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::InvalidState(_) | AppError::DuplicateReference(_) => StatusCode::CONFLICT,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Map a sqlx error to `DuplicateReference` when it is a unique-key
    /// violation on the given reference. Every idempotent settlement path
    /// funnels through this.
    pub fn from_unique_violation(err: sqlx::Error, reference: &str) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return AppError::DuplicateReference(reference.to_string());
            }
        }
        AppError::Database(err)
    }

    pub fn is_duplicate_reference(&self) -> bool {
        matches!(self, AppError::DuplicateReference(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation("missing delivery address".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_insufficient_funds_status_code() {
        assert_eq!(AppError::InsufficientFunds.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_status_code() {
        let error = AppError::NotFound("order".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unauthorized_status_code() {
        let error = AppError::Unauthorized("not the order vendor".to_string());
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_invalid_state_status_code() {
        let error = AppError::InvalidState("withdrawal already processed".to_string());
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_database_error_status_code() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_duplicate_reference_detection() {
        let error = AppError::DuplicateReference("order_abc".to_string());
        assert!(error.is_duplicate_reference());
        assert!(!AppError::InsufficientFunds.is_duplicate_reference());
    }

    #[test]
    fn test_non_unique_violation_passes_through() {
        let error = AppError::from_unique_violation(sqlx::Error::RowNotFound, "ref");
        assert!(matches!(error, AppError::Database(_)));
    }

    #[tokio::test]
    async fn test_insufficient_funds_response() {
        let response = AppError::InsufficientFunds.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
