//! Error taxonomy shared by the relay and its clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error category carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request is structurally invalid. Fix it, do not retry.
    ValidationError,
    /// Credential missing or unknown.
    AuthenticationError,
    /// Store unavailable or busy. Safe to retry with backoff.
    TransientError,
    /// Request rejected by a store constraint. Not retryable.
    ConflictError,
    RateLimited,
    NotFound,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::AuthenticationError => "authentication_error",
            Self::TransientError => "transient_error",
            Self::ConflictError => "conflict_error",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::InternalError => "internal_error",
        }
    }

    /// Whether a request that failed with this kind may be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientError | Self::RateLimited)
    }

    /// Best-effort classification of an HTTP status without a structured body.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 413 | 422 => Self::ValidationError,
            401 | 403 => Self::AuthenticationError,
            404 => Self::NotFound,
            409 => Self::ConflictError,
            429 => Self::RateLimited,
            502..=504 => Self::TransientError,
            _ => Self::InternalError,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error shape that crosses the relay boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Errors seen by relay clients.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Relay rejected request ({status}, {}): {}", .body.kind, .body.message)]
    Api { status: u16, body: ErrorBody },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Transport failures and transient relay errors are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { body, .. } => body.kind.is_retryable(),
            Self::Transport(_) => true,
            Self::Decode(_) | Self::Config(_) => false,
        }
    }

    /// The wire error kind, when the relay returned one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Api { body, .. } => Some(body.kind),
            _ => None,
        }
    }
}
