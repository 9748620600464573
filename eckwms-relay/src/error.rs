//! Relay error types.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use eckwms_core::{ErrorBody, ErrorKind};
use thiserror::Error;

/// Relay server error types mapped to the wire taxonomy and HTTP status codes.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing API key")]
    MissingCredential,

    #[error("Invalid API key")]
    InvalidCredential,

    /// Store unavailable, busy or locked. Safe to retry.
    #[error("Store unavailable: {0}")]
    Transient(String),

    /// Write rejected by a store constraint, such as a scan for an instance
    /// that no longer exists. Retrying the same request fails the same way.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::MissingCredential | Self::InvalidCredential => ErrorKind::AuthenticationError,
            Self::Transient(_) => ErrorKind::TransientError,
            Self::Conflict(_) => ErrorKind::ConflictError,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::MissingCredential | Self::InvalidCredential => StatusCode::UNAUTHORIZED,
            Self::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to callers. Store and internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::Validation(e) | Self::Conflict(e) | Self::NotFound(e) => e.clone(),
            Self::MissingCredential => {
                "Missing API key: send X-Api-Key or Authorization: Bearer".to_string()
            }
            Self::InvalidCredential => "Invalid API key".to_string(),
            Self::Transient(_) => "Store temporarily unavailable, retry later".to_string(),
            Self::RateLimited => "Rate limited".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.kind(), self.public_message())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match &self {
            Self::Transient(detail) => tracing::warn!("Transient store error: {}", detail),
            Self::Internal(detail) => tracing::error!("Internal error: {}", detail),
            _ => {}
        }

        (self.status(), axum::Json(self.body())).into_response()
    }
}

impl From<rusqlite::Error> for RelayError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                tracing::warn!("Store constraint violated: {}", e);
                Self::Conflict("Request conflicts with stored data".to_string())
            }
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => Self::Internal(e.to_string()),
            _ => Self::Transient(e.to_string()),
        }
    }
}

impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_errors_are_distinguishable() {
        let missing = RelayError::MissingCredential.body();
        let invalid = RelayError::InvalidCredential.body();
        assert_eq!(missing.kind, ErrorKind::AuthenticationError);
        assert_eq!(invalid.kind, ErrorKind::AuthenticationError);
        assert_ne!(missing.message, invalid.message);
    }

    #[test]
    fn store_errors_are_transient_and_opaque() {
        let err = RelayError::from(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked at /var/lib/eckwms/relay.db".to_string()),
        ));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = err.body();
        assert_eq!(body.kind, ErrorKind::TransientError);
        assert!(!body.message.contains("/var/lib"));
    }

    #[test]
    fn constraint_violations_are_conflicts() {
        let err = RelayError::from(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY),
            Some("FOREIGN KEY constraint failed".to_string()),
        ));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        let body = err.body();
        assert_eq!(body.kind, ErrorKind::ConflictError);
        assert!(!body.message.contains("FOREIGN KEY"));
    }

    #[test]
    fn validation_message_is_kept() {
        let body = RelayError::Validation("payload is required".to_string()).body();
        assert_eq!(body.kind, ErrorKind::ValidationError);
        assert_eq!(body.message, "payload is required");
    }
}
