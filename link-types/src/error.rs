//! Error types for objlink wire handling.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur encoding or decoding frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Invalid operation code discriminator
    #[error("invalid op code: {0}")]
    InvalidOpCode(u8),

    /// Invalid protocol version
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),
}

/// Error category reported by the background service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The service could not reach a remote
    Connection,
    /// Missing, invalid or conflicting application token
    Auth,
    /// Disallowed by ownership, mutability or visibility rules
    Permission,
    /// Unknown address or registration
    NotFound,
    /// Operation does not fit the object's current state
    InvalidState,
    /// The request could not be understood
    Malformed,
    /// Anything else
    Internal,
}

/// An error reported by the service in a response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ServiceError {
    /// Category
    pub code: ErrorCode,
    /// Human-readable detail
    pub message: String,
}

impl ServiceError {
    /// Create a service error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = WireError::InvalidOpCode(99);
        assert_eq!(err.to_string(), "invalid op code: 99");
    }

    #[test]
    fn service_error_display() {
        let err = ServiceError::new(ErrorCode::Auth, "token refused");
        assert_eq!(err.to_string(), "Auth: token refused");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WireError>();
        assert_send_sync::<ServiceError>();
    }
}
