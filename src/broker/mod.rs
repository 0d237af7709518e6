//! Session broker
//!
//! Keeps track of live WebSocket sessions grouped by application and user,
//! and fans messages out to them.
//!
//! ## Architecture
//!
//! ```text
//! Broker ──► Hub (one per appId, single task owns the registry)
//!              │
//!              └─► Session ──► outbound queue ──► write loop ──► FrameSink
//!                     ▲
//!                     └──────── read loop ◄── FrameStream
//! ```
//!
//! The transport is abstracted behind [`FrameSink`] and [`FrameStream`]; the
//! WebSocket adapter lives in [`crate::websocket`] and an in-memory one in
//! [`transport::memory`].

pub mod close_code;
mod engine;
mod envelope;
mod error;
mod handlers;
mod hub;
mod request;
mod session;
pub mod transport;
mod value;

pub use engine::{Broker, BrokerBuilder, BrokerConfig};
pub use envelope::{filter, Envelope, Filter, MessageKind};
pub use error::{BrokerError, BrokerResult, HubError, SessionError, TransportError};
pub use handlers::{CloseHandler, ErrorHandler, Handlers, MessageHandler, SessionHandler};
pub use hub::{Hub, HubState, HubStats};
pub use request::{ConnectRequest, APP_ID_PARAM, USER_ID_PARAM};
pub use session::Session;
pub use transport::{CloseFrame, Frame, FrameSink, FrameStream};
pub use value::Value;
