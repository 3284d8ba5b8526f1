//! Error handling for the pharmacy backend
//!
//! Every failure leaves the server as the same JSON envelope the success path
//! uses: `{success, code, message, log?, error?}`. Server-side failures are
//! also written to the error log and the envelope carries the log file name.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use shared::DomainError;
use thiserror::Error;

use crate::error_log;
use crate::response::ApiResponse;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Invalid user name or password")]
    InvalidCredentials,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("token expired, log in again")]
    TokenExpired,

    #[error("logged in from other device")]
    LoggedInElsewhere,

    #[error("unauthorized! not admin")]
    NotAdmin,

    // Request errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("{0} not found")]
    ReferenceNotFound(String),

    #[error("{0} exists")]
    DuplicateDocument(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    ProtectedUser(String),

    // Stock and document rules
    #[error("stock for {medicine} is not enough, need {needed}, have {available}")]
    InsufficientStock {
        medicine: String,
        needed: Decimal,
        available: Decimal,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("{0} was not persisted")]
    HeaderNotPersisted(String),

    // Side outputs
    #[error("error rendering pdf: {0}")]
    Render(String),

    #[error("error writing audit log: {0}")]
    AuditWrite(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a field validation failure
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// PostgreSQL unique violation (SQLSTATE 23505)
    pub fn is_unique_violation(&self) -> bool {
        match self {
            AppError::DatabaseError(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some("23505")
            }
            _ => false,
        }
    }

    /// HTTP status and stable machine code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::TokenExpired => (StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
            AppError::LoggedInElsewhere => (StatusCode::UNAUTHORIZED, "LOGGED_IN_ELSEWHERE"),
            AppError::NotAdmin => (StatusCode::UNAUTHORIZED, "NOT_ADMIN"),
            AppError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "INVALID_PAYLOAD"),
            AppError::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::ReferenceNotFound(_) => (StatusCode::BAD_REQUEST, "REFERENCE_NOT_FOUND"),
            AppError::DuplicateDocument(_) => (StatusCode::BAD_REQUEST, "DUPLICATE_DOCUMENT"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::ProtectedUser(_) => (StatusCode::BAD_REQUEST, "PROTECTED_USER"),
            AppError::InsufficientStock { .. } => (StatusCode::BAD_REQUEST, "INSUFFICIENT_STOCK"),
            AppError::Domain(e) if e.is_payload_error() => (StatusCode::BAD_REQUEST, e.code()),
            AppError::Domain(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.code()),
            AppError::HeaderNotPersisted(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "HEADER_NOT_PERSISTED")
            }
            AppError::Render(_) => (StatusCode::INTERNAL_SERVER_ERROR, "RENDER_ERROR"),
            AppError::AuditWrite(_) => (StatusCode::INTERNAL_SERVER_ERROR, "AUDIT_WRITE_ERROR"),
            AppError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            AppError::DatabaseError(_) if self.is_unique_violation() => {
                (StatusCode::BAD_REQUEST, "DUPLICATE_DOCUMENT")
            }
            AppError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            AppError::Internal(_) | AppError::InternalError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }

    /// Message shown to the client; storage internals stay in the logs
    fn client_message(&self) -> String {
        match self {
            AppError::DatabaseError(_) if self.is_unique_violation() => {
                "document number already exists".to_string()
            }
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalError(_) => "An internal server error occurred".to_string(),
            AppError::LoggedInElsewhere | AppError::TokenExpired => {
                format!("{}, renew your token", self)
            }
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Storage(e.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::InvalidPayload(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = self.client_message();

        let log = if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
            error_log::write(status, code, &self.to_string())
        } else {
            tracing::warn!("Request failed: {}", self);
            None
        };

        ApiResponse::<()>::failure(status, message, code, log).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_is_client_error() {
        let err = AppError::InsufficientStock {
            medicine: "AMOX500".to_string(),
            needed: Decimal::from(5),
            available: Decimal::from(4),
        };
        assert_eq!(err.status_and_code(), (StatusCode::BAD_REQUEST, "INSUFFICIENT_STOCK"));
    }

    #[test]
    fn test_reconciliation_errors_are_unprocessable() {
        let err = AppError::from(DomainError::ReceivedExceedsOrdered {
            medicine: "PCM".to_string(),
            received: Decimal::from(110),
            ordered: Decimal::from(100),
        });
        assert_eq!(
            err.status_and_code(),
            (StatusCode::UNPROCESSABLE_ENTITY, "RECEIVED_EXCEEDS_ORDERED")
        );

        let err = AppError::from(DomainError::UnknownUnitForMedicine {
            medicine: "PCM".to_string(),
        });
        assert_eq!(err.status_and_code().0, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_payload_domain_errors_are_bad_request() {
        let err = AppError::from(DomainError::InvalidQuantity("1/0".to_string()));
        assert_eq!(err.status_and_code(), (StatusCode::BAD_REQUEST, "INVALID_QUANTITY"));
    }

    #[test]
    fn test_token_errors_ask_for_renewal() {
        assert_eq!(AppError::LoggedInElsewhere.status_and_code().0, StatusCode::UNAUTHORIZED);
        assert!(AppError::TokenExpired.client_message().contains("renew your token"));
        assert_eq!(AppError::NotAdmin.status_and_code().0, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_render_error_is_server_error() {
        let err = AppError::Render("disk full".to_string());
        assert!(err.status_and_code().0.is_server_error());
    }
}
