//! Error types for objlink-client.
//!
//! Every public operation returns [`LinkError`]. Lower-layer errors
//! (transport, wire codec, stage machine, service replies) convert into
//! it so `?` can be used throughout.

use std::time::Duration;
use thiserror::Error;

use objlink_core::{CallbackListError, StageError};
use objlink_types::{ErrorCode, ServiceError, WireError};

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Link errors.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Transport unreachable or dropped mid-request.
    #[error("connection error: {0}")]
    Connection(String),

    /// Missing or invalid application token, or a token conflict.
    #[error("auth error: {0}")]
    Auth(String),

    /// Operation disallowed by ownership, mutability or visibility.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Unknown address, api_id or callback.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation attempted in a stage that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Request rejected locally as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Blocking call timed out; the request may still complete.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Called from the wrong execution context.
    #[error("wrong execution context: {0}")]
    WrongContext(&'static str),

    /// Unexpected or undecodable frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl LinkError {
    /// Check if this error came from the connection.
    pub fn is_connection(&self) -> bool {
        matches!(self, LinkError::Connection(_))
    }
}

impl From<TransportError> for LinkError {
    fn from(e: TransportError) -> Self {
        LinkError::Connection(e.to_string())
    }
}

impl From<WireError> for LinkError {
    fn from(e: WireError) -> Self {
        LinkError::Protocol(e.to_string())
    }
}

impl From<StageError> for LinkError {
    fn from(e: StageError) -> Self {
        LinkError::InvalidState(e.to_string())
    }
}

impl From<CallbackListError> for LinkError {
    fn from(e: CallbackListError) -> Self {
        LinkError::NotFound(e.to_string())
    }
}

impl From<ServiceError> for LinkError {
    fn from(e: ServiceError) -> Self {
        let message = e.message;
        match e.code {
            ErrorCode::Connection => LinkError::Connection(message),
            ErrorCode::Auth => LinkError::Auth(message),
            ErrorCode::Permission => LinkError::Permission(message),
            ErrorCode::NotFound => LinkError::NotFound(message),
            ErrorCode::InvalidState => LinkError::InvalidState(message),
            ErrorCode::Malformed => LinkError::InvalidRequest(message),
            ErrorCode::Internal => LinkError::Protocol(message),
        }
    }
}
