//! Transport abstraction for the relay connection.
//!
//! The sync engine only needs an ordered, message-oriented duplex channel:
//! one text frame out (`SYNC:<lastID>`), binary frames both ways after that.
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` establishes a connection to a `ws://` or `wss://` URL
//! - `send_text()` / `send_binary()` transmit one frame
//! - `recv()` waits for the next inbound frame
//! - `close()` terminates and wakes a pending `recv()`
//!
//! # Example
//!
//! ```ignore
//! let transport = WebSocketTransport::new(Duration::from_secs(10));
//! transport.connect("wss://relay.example:8080/ws").await?;
//! transport.send_text("SYNC:0").await?;
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

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// One WebSocket data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Binary frame. Inbound these are `id ‖ ciphertext`.
    Binary(Vec<u8>),
    /// Text frame. Only the opening sync command uses these.
    Text(String),
}

/// Transport trait for the relay's frame protocol.
///
/// Implementations must allow `send_*` and `recv()` to run concurrently
/// from different tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the given URL, replacing any previous connection.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send one text frame.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Send one binary frame.
    async fn send_binary(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Receive the next frame.
    ///
    /// Blocks until a frame arrives, the peer closes, or `close()` is called.
    async fn recv(&self) -> Result<Frame, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection.
    async fn close(&self) -> Result<(), TransportError>;
}
