//! Transport abstraction for objlink.
//!
//! This module provides a pluggable transport layer that abstracts
//! the IPC channel to the local service (WebSocket, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and message-oriented:
//! - `connect()` establishes the channel
//! - `send()` transmits one encoded envelope
//! - `recv()` receives one encoded envelope
//! - `close()` gracefully terminates
//!
//! `send` and `recv` take `&self` and may run concurrently: the link's
//! reader task sits in `recv` while requests are sent.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.connect("ws://127.0.0.1:7772").await?;
//! transport.send(&envelope_bytes).await?;
//! let frame = transport.recv().await?;
//! ```

mod mock;
mod websocket;

pub use mock::MockTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// Transport trait for exchanging frames with the local service.
///
/// Implementations handle the underlying channel (WebSocket, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the service at the given endpoint.
    async fn connect(&self, endpoint: &str) -> Result<(), TransportError>;

    /// Send one frame.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive one frame.
    ///
    /// Waits until a frame is available or the connection closes.
    async fn recv(&self) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
