//! Envelope
//!
//! The unit of outbound traffic. An envelope is built once, never mutated, and
//! shared by every session it is fanned out to (payload, targets and filter
//! are reference counted, so cloning is cheap).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::close_code;
use super::session::Session;
use super::transport::{CloseFrame, Frame};

/// Per-recipient predicate; a session receives the envelope only if it returns true
pub type Filter = Arc<dyn Fn(&Session) -> bool + Send + Sync>;

/// Wrap a closure as a [`Filter`]
pub fn filter<F>(f: F) -> Filter
where
    F: Fn(&Session) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Kind of frame an envelope is written as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Binary,
    Close,
    Ping,
}

/// An outbound message plus its routing metadata
#[derive(Clone)]
pub struct Envelope {
    id: Uuid,
    kind: MessageKind,
    payload: Arc<[u8]>,
    target_users: Arc<[String]>,
    filter: Option<Filter>,
}

impl Envelope {
    /// Create an envelope addressed to every user of the hub
    pub fn new(kind: MessageKind, payload: impl Into<Vec<u8>>) -> Self {
        let payload: Vec<u8> = payload.into();
        Self {
            id: Uuid::new_v4(),
            kind,
            payload: Arc::from(payload),
            target_users: Arc::from(Vec::new()),
            filter: None,
        }
    }

    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Text, payload)
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Binary, payload)
    }

    /// A close request, sent as a normal-closure frame with an empty reason
    pub fn close() -> Self {
        Self::new(MessageKind::Close, Vec::new())
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(MessageKind::Ping, payload)
    }

    /// Restrict delivery to the given users (an empty list means everyone)
    pub fn to_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let users: Vec<String> = users.into_iter().map(Into::into).collect();
        self.target_users = Arc::from(users);
        self
    }

    /// Attach a per-recipient filter
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn target_users(&self) -> &[String] {
        &self.target_users
    }

    /// True when the envelope is addressed to every user
    pub fn is_broadcast(&self) -> bool {
        self.target_users.is_empty()
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Whether `session` passes the filter (always true without one)
    pub fn accepts(&self, session: &Session) -> bool {
        self.filter.as_ref().map_or(true, |f| f(session))
    }

    /// The frame this envelope is written as
    pub(crate) fn to_frame(&self) -> Frame {
        match self.kind {
            MessageKind::Text => Frame::Text(String::from_utf8_lossy(&self.payload).into_owned()),
            MessageKind::Binary => Frame::Binary(self.payload.to_vec()),
            MessageKind::Ping => Frame::Ping(self.payload.to_vec()),
            MessageKind::Close => Frame::Close(Some(CloseFrame::new(
                close_code::NORMAL_CLOSURE,
                String::from_utf8_lossy(&self.payload),
            ))),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("payload_len", &self.payload.len())
            .field("target_users", &self.target_users)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}
