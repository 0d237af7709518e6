//! Host application callbacks
//!
//! Every slot is optional. Callbacks run on the session's own tasks, so a slow
//! callback only stalls the session that invoked it.

use std::sync::Arc;

use super::error::SessionError;
use super::session::Session;

/// Called for every text or binary frame received from a peer
pub type MessageHandler = Arc<dyn Fn(&Arc<Session>, &[u8]) + Send + Sync>;
/// Called once per transport failure, and for every dropped message
pub type ErrorHandler = Arc<dyn Fn(&Session, &SessionError) + Send + Sync>;
/// Called when a peer sends a close frame, with its code and reason
pub type CloseHandler = Arc<dyn Fn(&Session, u16, &str) + Send + Sync>;
/// Called on connect and on disconnect
pub type SessionHandler = Arc<dyn Fn(&Arc<Session>) + Send + Sync>;

/// The broker's callback slots
#[derive(Clone, Default)]
pub struct Handlers {
    pub(crate) message: Option<MessageHandler>,
    pub(crate) error: Option<ErrorHandler>,
    pub(crate) close: Option<CloseHandler>,
    pub(crate) connect: Option<SessionHandler>,
    pub(crate) disconnect: Option<SessionHandler>,
}

impl Handlers {
    pub(crate) fn message(&self, session: &Arc<Session>, payload: &[u8]) {
        if let Some(handler) = &self.message {
            handler(session, payload);
        }
    }

    pub(crate) fn error(&self, session: &Session, err: &SessionError) {
        if let Some(handler) = &self.error {
            handler(session, err);
        }
    }

    pub(crate) fn close(&self, session: &Session, code: u16, reason: &str) {
        if let Some(handler) = &self.close {
            handler(session, code, reason);
        }
    }

    pub(crate) fn connect(&self, session: &Arc<Session>) {
        if let Some(handler) = &self.connect {
            handler(session);
        }
    }

    pub(crate) fn disconnect(&self, session: &Arc<Session>) {
        if let Some(handler) = &self.disconnect {
            handler(session);
        }
    }
}
