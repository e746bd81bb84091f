//! Message-framed bidirectional connections behind one capability interface.
//!
//! Every connection the relay holds, whether accepted from a local client or
//! dialed to the root, is a [`Transport`]: read a typed [`Frame`], write a
//! frame, write a [`PreparedMessage`] shared by many recipients, close.
//! Writes are serialized per connection and a writer that cannot take the
//! write lock in time gets [`TransportError::WriteConflict`].

pub mod axum_ws;
pub mod memory;
pub mod tungstenite_ws;
pub mod ws;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::{MemoryPeer, MemoryTransport};
pub use ws::{WsCodec, WsTransport};

/// A single websocket frame as seen by the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 data frame.
    Text(String),
    /// Binary data frame.
    Binary(Bytes),
    /// Ping control frame.
    Ping(Bytes),
    /// Pong control frame.
    Pong(Bytes),
    /// Close control frame.
    Close,
    /// Anything the relay does not understand (raw frames, reserved opcodes).
    Unknown,
}

/// A payload serialized once and written to many connections.
///
/// Cloning shares the underlying buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedMessage {
    payload: Bytes,
}

impl PreparedMessage {
    /// Prepare `payload` for delivery as a binary frame.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// The shared payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The frame written to every recipient.
    pub fn frame(&self) -> Frame {
        Frame::Binary(self.payload.clone())
    }
}

/// Transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is closed (locally or by the peer).
    #[error("connection closed")]
    Closed,
    /// The per-connection write lock was not acquired in time. Retryable.
    #[error("write lock not acquired within {0:?}")]
    WriteConflict(Duration),
    /// The underlying websocket failed.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

impl TransportError {
    /// Whether the failed write may be retried on the same connection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteConflict(_))
    }
}

/// A bidirectional message-framed connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wait for the next frame. Returns [`TransportError::Closed`] once the
    /// transport is closed, including while a read is pending.
    async fn read_frame(&self) -> Result<Frame, TransportError>;

    /// Write one frame under the connection's write lock.
    async fn write_frame(&self, frame: Frame) -> Result<(), TransportError>;

    /// Write a prepared message under the connection's write lock.
    async fn write_prepared(&self, message: &PreparedMessage) -> Result<(), TransportError> {
        self.write_frame(message.frame()).await
    }

    /// Close the connection. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;
}
