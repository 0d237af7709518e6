//! Broker error types
//!
//! Errors raised by the transport seam, sessions, hubs and the broker itself.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by a frame transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is already closed
    #[error("Connection closed")]
    Closed,

    /// The underlying WebSocket reported an error
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Errors that can occur on a single session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Outbound queue was full, the message was dropped
    #[error("Outbound queue full on session {session_id}, dropped message {envelope_id}")]
    QueueFull { session_id: Uuid, envelope_id: Uuid },

    /// Outbound queue is closed, the session is shutting down
    #[error("Outbound queue closed")]
    QueueClosed,

    /// Read or write on the transport failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// No frame (data or pong) arrived within the pong wait
    #[error("Read timed out after {0:?}")]
    ReadTimeout(Duration),

    /// A frame could not be written within the write wait
    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// Inbound frame exceeded the configured limit
    #[error("Message too big: {size} bytes (limit {limit})")]
    MessageTooBig { size: usize, limit: usize },
}

/// Errors returned by a hub
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The hub is closing or closed
    #[error("Hub for app {0} is closed")]
    Closed(String),
}

/// Errors returned by the broker's public operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The connect request is missing an identifier
    #[error("Invalid connect request: appId={app_id:?}, userId={user_id:?}")]
    InvalidRequest { app_id: String, user_id: String },

    /// The hub for the application is closing, closed, or the broker is shutting down
    #[error("Hub for app {0} is closed")]
    HubClosed(String),
}

impl From<HubError> for BrokerError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Closed(app_id) => BrokerError::HubClosed(app_id),
        }
    }
}

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
