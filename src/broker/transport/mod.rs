//! Frame Transport
//!
//! The seam between a [`Session`](super::Session) and the wire. A session owns
//! one [`FrameSink`] (driven by its write loop) and one [`FrameStream`]
//! (driven by its read loop).
//!
//! - The axum WebSocket halves implement both traits (see `crate::websocket`)
//! - [`memory`] provides an in-process transport with a controllable peer

pub mod memory;

use async_trait::async_trait;

pub use super::error::TransportError;

/// Close frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// A single WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseFrame>),
}

impl Frame {
    /// Size of the frame's application payload in bytes
    pub fn payload_len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) | Frame::Ping(data) | Frame::Pong(data) => data.len(),
            Frame::Close(close) => close.as_ref().map(|c| c.reason.len()).unwrap_or(0),
        }
    }
}

/// Write half of a connection
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one frame
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Flush and close the underlying connection
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Receive the next frame
    ///
    /// Returns `None` once the connection has ended.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;
}
