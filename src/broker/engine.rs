//! Broker
//!
//! Top-level entry point. Owns one [`Hub`] per application id (created on
//! first use), the host application's callbacks and the session settings.
//!
//! A broker is an ordinary value: build one with [`Broker::builder`], share it
//! behind an `Arc`, and call [`Broker::shutdown`] once at the end of its life.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::envelope::{Envelope, Filter};
use super::error::{BrokerError, BrokerResult, SessionError};
use super::handlers::Handlers;
use super::hub::{Hub, HubStats};
use super::request::ConnectRequest;
use super::session::Session;
use super::transport::{FrameSink, FrameStream};

/// Session and hub settings
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Capacity of each session's outbound queue
    pub message_buffer_size: usize,
    /// Largest inbound frame payload accepted, in bytes
    pub max_message_size: usize,
    /// Time allowed to write one frame
    pub write_wait: Duration,
    /// Time allowed between two inbound frames (pongs included)
    pub pong_wait: Duration,
    /// Keepalive ping interval; must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// Capacity of each hub's command queue
    pub hub_queue_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            message_buffer_size: 256,
            max_message_size: 64 * 1024,
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            hub_queue_size: 256,
        }
    }
}

impl BrokerConfig {
    /// Shortest timer accepted for the keepalive and deadline settings
    pub const MIN_PERIOD: Duration = Duration::from_millis(1);

    /// Raise zero timers to [`BrokerConfig::MIN_PERIOD`]
    ///
    /// A zero ping period cannot drive an interval, and a zero deadline fails
    /// every read or write.
    pub fn normalized(mut self) -> Self {
        for (name, value) in [
            ("ping_period", &mut self.ping_period),
            ("pong_wait", &mut self.pong_wait),
            ("write_wait", &mut self.write_wait),
        ] {
            if *value < Self::MIN_PERIOD {
                tracing::warn!(setting = name, min = ?Self::MIN_PERIOD, "Zero timer raised to minimum");
                *value = Self::MIN_PERIOD;
            }
        }
        self
    }
}

/// Builder for a [`Broker`] and its callbacks
pub struct BrokerBuilder {
    config: BrokerConfig,
    handlers: Handlers,
}

impl BrokerBuilder {
    /// Called with the payload of every text or binary frame a peer sends
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Session>, &[u8]) + Send + Sync + 'static,
    {
        self.handlers.message = Some(Arc::new(f));
        self
    }

    /// Called for transport failures and dropped messages
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &SessionError) + Send + Sync + 'static,
    {
        self.handlers.error = Some(Arc::new(f));
        self
    }

    /// Called when a peer sends a close frame
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, u16, &str) + Send + Sync + 'static,
    {
        self.handlers.close = Some(Arc::new(f));
        self
    }

    /// Called before a new session is registered
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Session>) + Send + Sync + 'static,
    {
        self.handlers.connect = Some(Arc::new(f));
        self
    }

    /// Called after a session is unregistered and its write loop has exited
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Session>) + Send + Sync + 'static,
    {
        self.handlers.disconnect = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Broker {
        Broker {
            config: Arc::new(self.config.normalized()),
            handlers: Arc::new(self.handlers),
            hubs: RwLock::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }
}

/// Session broker
pub struct Broker {
    config: Arc<BrokerConfig>,
    handlers: Arc<Handlers>,
    /// Hubs by application id
    hubs: RwLock<HashMap<String, Arc<Hub>>>,
    shutting_down: AtomicBool,
}

impl Broker {
    pub fn builder(config: BrokerConfig) -> BrokerBuilder {
        BrokerBuilder {
            config,
            handlers: Handlers::default(),
        }
    }

    /// A broker without callbacks
    pub fn new(config: BrokerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Get the hub for `app_id`, starting it on first use
    ///
    /// Fails once shutdown has begun.
    pub async fn hub(&self, app_id: &str) -> BrokerResult<Arc<Hub>> {
        if let Some(hub) = self.hubs.read().await.get(app_id) {
            return Ok(Arc::clone(hub));
        }

        let mut hubs = self.hubs.write().await;
        // Another caller may have created it while we waited for the lock
        if let Some(hub) = hubs.get(app_id) {
            return Ok(Arc::clone(hub));
        }
        if self.is_shutting_down() {
            return Err(BrokerError::HubClosed(app_id.to_string()));
        }

        let hub = Hub::spawn(app_id, self.config.hub_queue_size);
        hubs.insert(app_id.to_string(), Arc::clone(&hub));
        tracing::info!(app_id = %app_id, hubs = hubs.len(), "Hub created");

        Ok(hub)
    }

    /// Get the hub for `app_id` only if it already exists
    pub async fn existing_hub(&self, app_id: &str) -> Option<Arc<Hub>> {
        self.hubs.read().await.get(app_id).cloned()
    }

    /// Check a connect request before upgrading
    ///
    /// Returns the hub the session will join. Rejections are logged; no
    /// callback fires for them.
    pub async fn admit(&self, request: &ConnectRequest) -> BrokerResult<Arc<Hub>> {
        if !request.is_valid() {
            tracing::warn!(
                app_id = %request.app_id,
                user_id = %request.user_id,
                "Rejecting connection: missing appId or userId"
            );
            return Err(BrokerError::InvalidRequest {
                app_id: request.app_id.clone(),
                user_id: request.user_id.clone(),
            });
        }

        let hub = self.hub(&request.app_id).await.inspect_err(|_| {
            tracing::warn!(
                app_id = %request.app_id,
                user_id = %request.user_id,
                "Rejecting connection: broker shutting down"
            );
        })?;

        if !hub.is_open() {
            tracing::warn!(
                app_id = %request.app_id,
                user_id = %request.user_id,
                "Rejecting connection: hub already closed"
            );
            return Err(BrokerError::HubClosed(request.app_id.clone()));
        }

        Ok(hub)
    }

    /// Serve one upgraded connection until it ends
    ///
    /// Registers a new session with its hub, runs the write loop on a spawned
    /// task and the read loop on the calling task. Returns after the session
    /// is unregistered, its write loop has exited and the disconnect callback
    /// has run.
    pub async fn handle_connect<W, R>(
        &self,
        request: ConnectRequest,
        sink: W,
        stream: R,
    ) -> BrokerResult<()>
    where
        W: FrameSink,
        R: FrameStream,
    {
        let hub = self.admit(&request).await?;

        let (session, outbound) =
            Session::new(request, Arc::clone(&self.config), Arc::clone(&self.handlers));

        tracing::info!(
            app_id = %session.app_id(),
            user_id = %session.user_id(),
            session_id = %session.id(),
            "Session connected"
        );
        self.handlers.connect(&session);

        if let Err(err) = hub.register(Arc::clone(&session)).await {
            tracing::warn!(
                app_id = %session.app_id(),
                session_id = %session.id(),
                error = %err,
                "Session registration failed"
            );
            let mut sink = sink;
            let _ = sink.close().await;
            self.handlers.disconnect(&session);
            return Err(err.into());
        }

        let writer = tokio::spawn(Arc::clone(&session).write_pump(sink, outbound));
        session.read_pump(stream).await;

        // A closing hub has already dropped the session from its registry
        if let Err(err) = hub.unregister(Arc::clone(&session)).await {
            tracing::debug!(session_id = %session.id(), error = %err, "Unregister skipped");
        }
        session.close_outbound();
        if let Err(err) = writer.await {
            tracing::error!(session_id = %session.id(), error = %err, "Write loop task failed");
        }

        self.handlers.disconnect(&session);
        tracing::info!(
            app_id = %session.app_id(),
            user_id = %session.user_id(),
            session_id = %session.id(),
            "Session disconnected"
        );

        Ok(())
    }

    /// Push a text message to users of an application
    ///
    /// An empty `user_ids` addresses every user. `filter`, when given, is
    /// evaluated per recipient session. Returns once the hub has accepted
    /// the message.
    pub async fn push_message(
        &self,
        app_id: &str,
        user_ids: Vec<String>,
        payload: impl Into<Vec<u8>>,
        filter: Option<Filter>,
    ) -> BrokerResult<()> {
        let mut envelope = Envelope::text(payload).to_users(user_ids);
        if let Some(filter) = filter {
            envelope = envelope.with_filter(filter);
        }
        self.push(app_id, envelope).await
    }

    /// Push an arbitrary envelope to an application's hub
    pub async fn push(&self, app_id: &str, envelope: Envelope) -> BrokerResult<()> {
        let hub = self.hub(app_id).await?;
        if !hub.is_open() {
            return Err(BrokerError::HubClosed(app_id.to_string()));
        }
        hub.broadcast(envelope).await?;
        Ok(())
    }

    /// Registry snapshots of every hub, sorted by application id
    pub async fn stats(&self) -> Vec<HubStats> {
        let hubs: Vec<Arc<Hub>> = self.hubs.read().await.values().cloned().collect();

        let mut stats = Vec::with_capacity(hubs.len());
        for hub in hubs {
            stats.push(hub.stats().await);
        }
        stats.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        stats
    }

    /// Close every hub in turn
    ///
    /// Returns once every session's write loop has closed its transport. No
    /// hub is created after this starts.
    pub async fn shutdown(&self) {
        let hubs: Vec<Arc<Hub>> = {
            let hubs = self.hubs.write().await;
            self.shutting_down.store(true, Ordering::Release);
            hubs.values().cloned().collect()
        };

        tracing::info!(hubs = hubs.len(), "Shutting down broker");
        for hub in hubs {
            hub.close().await;
        }
        tracing::info!("Broker shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::error::TransportError;
    use crate::broker::hub::HubState;
    use crate::broker::test_support::Recorder;
    use crate::broker::transport::memory::{self, Peer};
    use crate::broker::transport::Frame;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(1);

    fn recording_broker(recorder: &Recorder) -> Arc<Broker> {
        let errors = recorder.clone();
        let connects = recorder.clone();
        let disconnects = recorder.clone();
        let messages = recorder.clone();

        Arc::new(
            Broker::builder(BrokerConfig::default())
                .on_error(move |_, err| errors.record_error(err))
                .on_connect(move |s| connects.record_connect(s))
                .on_disconnect(move |s| disconnects.record_disconnect(s))
                .on_message(move |_, payload| messages.record_message(payload))
                .build(),
        )
    }

    fn connect(
        broker: &Arc<Broker>,
        request: ConnectRequest,
    ) -> (JoinHandle<BrokerResult<()>>, Peer) {
        let (sink, stream, peer) = memory::channel();
        let broker = Arc::clone(broker);
        let handle = tokio::spawn(async move { broker.handle_connect(request, sink, stream).await });
        (handle, peer)
    }

    async fn wait_for_sessions(broker: &Broker, app_id: &str, expected: usize) {
        for _ in 0..100 {
            if let Some(hub) = broker.existing_hub(app_id).await {
                if hub.stats().await.sessions == expected {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("hub {app_id} never reached {expected} sessions");
    }

    #[tokio::test]
    async fn test_hub_created_once() {
        let broker = Arc::new(Broker::new(BrokerConfig::default()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let broker = Arc::clone(&broker);
                tokio::spawn(async move { broker.hub("chat").await.unwrap() })
            })
            .collect();

        let mut hubs = Vec::new();
        for task in tasks {
            hubs.push(task.await.unwrap());
        }
        assert!(hubs.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(broker.stats().await.len(), 1);

        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejects_missing_identifiers() {
        let recorder = Recorder::default();
        let broker = recording_broker(&recorder);

        let (handle, mut peer) = connect(&broker, ConnectRequest::new("chat", ""));
        assert_eq!(
            handle.await.unwrap(),
            Err(BrokerError::InvalidRequest {
                app_id: "chat".to_string(),
                user_id: String::new(),
            })
        );

        // Nothing was created and no callback fired
        assert!(broker.existing_hub("chat").await.is_none());
        assert_eq!(recorder.connects(), 0);
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_session_lifecycle_and_push() {
        let recorder = Recorder::default();
        let broker = recording_broker(&recorder);

        let (handle, mut peer) = connect(
            &broker,
            ConnectRequest::new("chat", "alice").param("room", "lobby"),
        );
        wait_for_sessions(&broker, "chat", 1).await;
        assert_eq!(recorder.connects(), 1);

        broker
            .push_message("chat", vec!["alice".to_string()], "hi alice", None)
            .await
            .unwrap();
        assert_eq!(
            peer.recv_timeout(WAIT).await,
            Some(Frame::Text("hi alice".to_string()))
        );

        peer.send_text("hello broker");
        peer.send(Frame::Close(None));

        handle.await.unwrap().unwrap();
        assert_eq!(recorder.messages(), vec![b"hello broker".to_vec()]);
        assert_eq!(recorder.disconnects(), 1);
        assert_eq!(broker.existing_hub("chat").await.unwrap().stats().await.sessions, 0);

        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_push_with_filter() {
        let broker = Arc::new(Broker::new(BrokerConfig::default()));

        let (_h1, mut p1) = connect(&broker, ConnectRequest::new("chat", "a").param("room", "red"));
        let (_h2, mut p2) = connect(&broker, ConnectRequest::new("chat", "b").param("room", "blue"));
        wait_for_sessions(&broker, "chat", 2).await;

        let red_room = crate::broker::envelope::filter(|s| s.get_param("room") == "red");
        broker
            .push_message("chat", Vec::new(), "red only", Some(red_room))
            .await
            .unwrap();
        broker
            .push_message("chat", vec!["b".to_string()], "for b", None)
            .await
            .unwrap();

        assert_eq!(p1.recv_timeout(WAIT).await, Some(Frame::Text("red only".to_string())));
        assert_eq!(p2.recv_timeout(WAIT).await, Some(Frame::Text("for b".to_string())));

        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_read_error_unregisters_and_disconnects_once() {
        let recorder = Recorder::default();
        let broker = recording_broker(&recorder);

        let (handle, peer) = connect(&broker, ConnectRequest::new("chat", "alice"));
        wait_for_sessions(&broker, "chat", 1).await;

        let failure = TransportError::WebSocket("connection reset by peer".to_string());
        peer.fail(failure.clone());

        handle.await.unwrap().unwrap();

        assert_eq!(recorder.errors(), vec![SessionError::Transport(failure)]);
        assert_eq!(recorder.disconnects(), 1);
        assert_eq!(broker.existing_hub("chat").await.unwrap().stats().await.sessions, 0);

        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_push_on_closed_hub_fails() {
        let broker = Arc::new(Broker::new(BrokerConfig::default()));
        let (handle, mut peer) = connect(&broker, ConnectRequest::new("chat", "alice"));
        wait_for_sessions(&broker, "chat", 1).await;

        broker.existing_hub("chat").await.unwrap().close().await;
        handle.await.unwrap().unwrap();

        let result = broker
            .push_message("chat", Vec::new(), "too late", None)
            .await;
        assert_eq!(result, Err(BrokerError::HubClosed("chat".to_string())));

        // Only the close frame ever reached the peer
        assert!(matches!(peer.recv().await, Some(Frame::Close(_))));
        assert_eq!(peer.recv().await, None);

        // New connections to the closed hub are refused
        let (rejected, _peer) = connect(&broker, ConnectRequest::new("chat", "bob"));
        assert_eq!(
            rejected.await.unwrap(),
            Err(BrokerError::HubClosed("chat".to_string()))
        );
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_session() {
        let recorder = Recorder::default();
        let broker = recording_broker(&recorder);

        let mut handles = Vec::new();
        let mut peers = Vec::new();
        for (app_id, user_id) in [("chat", "a"), ("chat", "a"), ("chat", "b"), ("game", "c")] {
            let (handle, peer) = connect(&broker, ConnectRequest::new(app_id, user_id));
            handles.push(handle);
            peers.push(peer);
        }
        wait_for_sessions(&broker, "chat", 3).await;
        wait_for_sessions(&broker, "game", 1).await;

        broker.shutdown().await;

        // Every transport was closed before shutdown returned
        assert!(peers.iter().all(Peer::is_closed));
        for stats in broker.stats().await {
            assert_eq!(stats.state, HubState::Closed);
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(recorder.disconnects(), 4);

        // No new hubs after shutdown
        assert_eq!(
            broker.push_message("fresh", Vec::new(), "x", None).await,
            Err(BrokerError::HubClosed("fresh".to_string()))
        );
        assert!(broker.existing_hub("fresh").await.is_none());
    }

    #[tokio::test]
    async fn test_zero_timers_are_raised() {
        let broker = Arc::new(Broker::new(BrokerConfig {
            ping_period: Duration::ZERO,
            write_wait: Duration::ZERO,
            ..BrokerConfig::default()
        }));
        assert_eq!(broker.config().ping_period, BrokerConfig::MIN_PERIOD);
        assert_eq!(broker.config().write_wait, BrokerConfig::MIN_PERIOD);
        assert_eq!(broker.config().pong_wait, BrokerConfig::default().pong_wait);

        let (handle, mut peer) = connect(&broker, ConnectRequest::new("chat", "alice"));
        wait_for_sessions(&broker, "chat", 1).await;
        assert!(matches!(peer.recv_timeout(WAIT).await, Some(Frame::Ping(_))));

        tokio::time::timeout(WAIT, broker.shutdown())
            .await
            .expect("shutdown did not finish");
        handle.await.unwrap().unwrap();
    }
}
