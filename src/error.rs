//! Error types for mission dispatch.
//!
//! [`Error`] is the crate-wide error. Request-handling paths (submission,
//! status lookup, token issuance and renewal) surface it to their caller;
//! background loops log it and retry instead.

use crate::auth::codec::TokenError;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the coordinator, the worker pool and their adapters.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No mission is registered under the given identifier.
    #[error("mission not found: {0}")]
    NotFound(String),

    /// No credential was presented.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request was structurally invalid (empty payload, bad body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The message channel could not accept or deliver messages.
    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Network failure talking to a collaborator.
    #[error("transport error: {0}")]
    Transport(String),

    /// An undecodable order, status update or response body.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Encoding failures and other internal faults.
    #[error("internal error: {0}")]
    Internal(String),

    /// The presented token failed verification, or a token could not be
    /// signed.
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl Error {
    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an unauthorized error.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// Create an invalid-request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a queue-unavailable error.
    pub fn queue_unavailable(msg: impl Into<String>) -> Self {
        Self::QueueUnavailable(msg.into())
    }

    /// Returns `true` for failures caused by the caller's credential.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            Self::Token(err) => !matches!(err, TokenError::Signing(_)),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Malformed(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}
