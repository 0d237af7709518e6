//! # relayhub
//!
//! WebSocket publish/subscribe session broker. Sessions are grouped into one
//! hub per application and indexed by user; messages can be pushed to every
//! user of an application, to a list of users, or through a per-session
//! filter.
//!
//! ## Features
//!
//! - **Per-application hubs**: each hub is a single task that owns its registry
//! - **Backpressure**: bounded outbound queue per session, full queues drop
//!   instead of blocking
//! - **Keepalive**: periodic pings, read deadline extended by every frame
//! - **Graceful shutdown**: every transport is closed before `shutdown` returns
//!
//! ## Modules
//!
//! - [`broker`]: Broker, hubs, sessions and envelopes
//! - [`websocket`]: axum WebSocket endpoint
//! - [`api`]: REST API server with Axum
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relayhub::broker::{Broker, BrokerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Arc::new(
//!         Broker::builder(BrokerConfig::default())
//!             .on_message(|session, payload| {
//!                 println!("{} says {}", session.user_id(), String::from_utf8_lossy(payload));
//!             })
//!             .build(),
//!     );
//!
//!     // Sessions join through `broker.handle_connect(..)`, normally via the
//!     // `/ws` endpoint. Push to everyone connected as "alice" in app "chat":
//!     broker
//!         .push_message("chat", vec!["alice".to_string()], "hello", None)
//!         .await?;
//!
//!     // Graceful shutdown
//!     broker.shutdown().await;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod broker;
pub mod config;
pub mod websocket;

// Re-export top-level types for convenience
pub use broker::{
    filter, Broker, BrokerBuilder, BrokerConfig, BrokerError, BrokerResult, ConnectRequest,
    Envelope, Filter, Hub, HubState, HubStats, MessageKind, Session, SessionError, Value,
};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use websocket::websocket_handler;

pub use config::{
    Config, ConfigError, DefaultConfig, LoggingConfig, ServerConfig, SessionConfig,
};
