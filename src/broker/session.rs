//! Session
//!
//! One live connection to one peer. A session runs two loops:
//!
//! - the **read loop** hands inbound text/binary frames to the message
//!   callback and fails the connection when nothing (not even a pong) arrives
//!   within `pong_wait`
//! - the **write loop** drains the bounded outbound queue onto the wire and
//!   sends a ping every `ping_period` while idle
//!
//! Enqueueing never blocks: a full queue drops the message and reports it
//! through the error callback.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use uuid::Uuid;

use super::close_code;
use super::engine::BrokerConfig;
use super::envelope::{Envelope, MessageKind};
use super::error::SessionError;
use super::handlers::Handlers;
use super::request::ConnectRequest;
use super::transport::{CloseFrame, Frame, FrameSink, FrameStream};
use super::value::Value;

/// A connected peer
pub struct Session {
    id: Uuid,
    app_id: String,
    user_id: String,
    connected_at: DateTime<Utc>,
    /// `None` once the queue has been closed
    outbound: Mutex<Option<mpsc::Sender<Envelope>>>,
    keys: Mutex<HashMap<String, Value>>,
    params: HashMap<String, String>,
    exited: watch::Sender<bool>,
    config: Arc<BrokerConfig>,
    handlers: Arc<Handlers>,
}

impl Session {
    /// Create a session and the receiving end of its outbound queue
    pub(crate) fn new(
        request: ConnectRequest,
        config: Arc<BrokerConfig>,
        handlers: Arc<Handlers>,
    ) -> (Arc<Self>, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(config.message_buffer_size.max(1));
        let (exited, _) = watch::channel(false);

        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            app_id: request.app_id,
            user_id: request.user_id,
            connected_at: Utc::now(),
            outbound: Mutex::new(Some(tx)),
            keys: Mutex::new(HashMap::new()),
            params: request.params,
            exited,
            config,
            handlers,
        });

        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    // ---------------------------------------------------
    //                 outbound queue
    // ---------------------------------------------------

    /// Queue a text message
    pub fn write(&self, payload: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        self.write_envelope(Envelope::text(payload))
    }

    /// Queue a binary message
    pub fn write_binary(&self, payload: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        self.write_envelope(Envelope::binary(payload))
    }

    /// Queue a ping frame
    pub fn ping(&self, payload: impl Into<Vec<u8>>) -> Result<(), SessionError> {
        self.write_envelope(Envelope::ping(payload))
    }

    /// Ask the write loop to send a close frame and stop
    pub fn close(&self) -> Result<(), SessionError> {
        self.write_envelope(Envelope::close())
    }

    /// Try to enqueue an envelope without waiting
    ///
    /// A full queue drops the envelope, reports [`SessionError::QueueFull`] to
    /// the error callback and returns it.
    pub fn write_envelope(&self, envelope: Envelope) -> Result<(), SessionError> {
        let result = {
            let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
            match outbound.as_ref() {
                Some(sender) => sender.try_send(envelope),
                None => return Err(SessionError::QueueClosed),
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(envelope)) => {
                let err = SessionError::QueueFull {
                    session_id: self.id,
                    envelope_id: envelope.id(),
                };
                self.report(&err);
                Err(err)
            }
            Err(TrySendError::Closed(_)) => Err(SessionError::QueueClosed),
        }
    }

    /// Close the outbound queue; the write loop sends a close frame once it has
    /// drained what is already queued
    pub(crate) fn close_outbound(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// True once the write loop has terminated and closed the transport
    pub fn is_exited(&self) -> bool {
        *self.exited.borrow()
    }

    /// Wait for the write loop to terminate
    pub async fn wait_exited(&self) {
        let mut exited = self.exited.subscribe();
        let _ = exited.wait_for(|done| *done).await;
    }

    fn report(&self, err: &SessionError) {
        tracing::debug!(
            session_id = %self.id,
            app_id = %self.app_id,
            user_id = %self.user_id,
            error = %err,
            "Session error"
        );
        self.handlers.error(self, err);
    }

    // ---------------------------------------------------
    //                    pumps
    // ---------------------------------------------------

    /// Read frames until the peer closes, the transport fails or the pong wait expires
    pub(crate) async fn read_pump<R: FrameStream>(self: &Arc<Self>, mut stream: R) {
        let pong_wait = self.config.pong_wait;
        let limit = self.config.max_message_size;

        loop {
            // Every frame, pongs included, pushes the deadline out again.
            let frame = match timeout(pong_wait, stream.recv()).await {
                Err(_) => {
                    self.report(&SessionError::ReadTimeout(pong_wait));
                    break;
                }
                Ok(None) => {
                    tracing::debug!(session_id = %self.id, "Peer stream ended");
                    break;
                }
                Ok(Some(Err(e))) => {
                    self.report(&SessionError::Transport(e));
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let size = frame.payload_len();
            if size > limit {
                self.report(&SessionError::MessageTooBig { size, limit });
                break;
            }

            match frame {
                Frame::Text(text) => self.handlers.message(self, text.as_bytes()),
                Frame::Binary(data) => self.handlers.message(self, &data),
                Frame::Ping(_) | Frame::Pong(_) => {
                    tracing::trace!(session_id = %self.id, "Keepalive frame received");
                }
                Frame::Close(close) => {
                    let (code, reason) = close
                        .map(|c| (c.code, c.reason))
                        .unwrap_or((close_code::NO_STATUS_RECEIVED, String::new()));

                    tracing::debug!(
                        session_id = %self.id,
                        code,
                        code_name = close_code::describe(code),
                        reason = %reason,
                        "Peer requested close"
                    );
                    self.handlers.close(self, code, &reason);
                    break;
                }
            }
        }
    }

    /// Drain the outbound queue onto the wire, pinging while idle
    ///
    /// Always closes the sink and then signals exit, whatever ends the loop.
    /// A panic inside the loop still signals exit while unwinding.
    pub(crate) async fn write_pump<W: FrameSink>(
        self: Arc<Self>,
        sink: W,
        mut outbound: mpsc::Receiver<Envelope>,
    ) {
        // Declared before the sink so the sink is dropped first.
        let _exit = ExitSignal(&self.exited);
        let mut sink = sink;

        let period = self.config.ping_period;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                next = outbound.recv() => match next {
                    Some(envelope) => {
                        let kind = envelope.kind();
                        if let Err(err) = self.send_frame(&mut sink, envelope.to_frame()).await {
                            self.report(&err);
                            break;
                        }
                        if kind == MessageKind::Close {
                            tracing::debug!(session_id = %self.id, "Close frame sent");
                            break;
                        }
                    }
                    None => {
                        let frame = Frame::Close(Some(CloseFrame::new(close_code::GOING_AWAY, "")));
                        if let Err(err) = self.send_frame(&mut sink, frame).await {
                            tracing::debug!(
                                session_id = %self.id,
                                error = %err,
                                "Close frame not delivered"
                            );
                        }
                        break;
                    }
                },

                _ = keepalive.tick() => {
                    if let Err(err) = self.send_frame(&mut sink, Frame::Ping(Vec::new())).await {
                        self.report(&err);
                        break;
                    }
                }
            }
        }

        if let Err(err) = sink.close().await {
            tracing::debug!(session_id = %self.id, error = %err, "Transport close failed");
        }
    }

    async fn send_frame<W: FrameSink>(&self, sink: &mut W, frame: Frame) -> Result<(), SessionError> {
        let write_wait = self.config.write_wait;
        match timeout(write_wait, sink.send(frame)).await {
            Ok(result) => result.map_err(SessionError::Transport),
            Err(_) => Err(SessionError::WriteTimeout(write_wait)),
        }
    }

    // ---------------------------------------------------
    //                 key-value store
    // ---------------------------------------------------

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    /// Get a value that the caller guarantees was set
    ///
    /// # Panics
    ///
    /// Panics if `key` is absent.
    pub fn must_get(&self, key: &str) -> Value {
        match self.get(key) {
            Some(value) => value,
            None => panic!("session {}: must_get({key:?}) on a key that was never set", self.id),
        }
    }

    pub fn get_string(&self, key: &str) -> String {
        self.get(key)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn get_int(&self, key: &str) -> i32 {
        self.get(key).and_then(|v| v.as_int()).unwrap_or_default()
    }

    pub fn get_int64(&self, key: &str) -> i64 {
        self.get(key).and_then(|v| v.as_int64()).unwrap_or_default()
    }

    pub fn get_float(&self, key: &str) -> f64 {
        self.get(key).and_then(|v| v.as_float()).unwrap_or_default()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or_default()
    }

    // ---------------------------------------------------
    //                 request params
    // ---------------------------------------------------

    /// Parameter from the connect request, empty if absent
    pub fn get_param(&self, key: &str) -> &str {
        self.params.get(key).map(String::as_str).unwrap_or("")
    }

    /// Parameter parsed as `i32`, zero if absent or malformed
    pub fn get_param_int(&self, key: &str) -> i32 {
        self.get_param(key).parse().unwrap_or(0)
    }

    /// Parameter parsed as `i64`, zero if absent or malformed
    pub fn get_param_int64(&self, key: &str) -> i64 {
        self.get_param(key).parse().unwrap_or(0)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }
}

/// Marks the write loop as exited when dropped
struct ExitSignal<'a>(&'a watch::Sender<bool>);

impl Drop for ExitSignal<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("app_id", &self.app_id)
            .field("user_id", &self.user_id)
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
