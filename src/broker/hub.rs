//! Hub
//!
//! One hub per application. The hub is an actor: a single task owns the
//! registry (`userId → sessions`) and processes register, unregister,
//! broadcast and stats commands one at a time, so registry mutations and
//! fan-out are totally ordered without a lock around the map.
//!
//! Closing a hub closes every registered session and waits for each write loop
//! to finish before the hub reports itself closed.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use super::envelope::Envelope;
use super::error::HubError;
use super::session::Session;

/// Lifecycle of a hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum HubState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl HubState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HubState::Open,
            1 => HubState::Closing,
            _ => HubState::Closed,
        }
    }
}

/// Point-in-time view of a hub's registry
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub app_id: String,
    pub state: HubState,
    pub users: usize,
    pub sessions: usize,
    /// Session ids per user, in registration order
    pub sessions_by_user: BTreeMap<String, Vec<Uuid>>,
}

impl HubStats {
    fn empty(app_id: &str, state: HubState) -> Self {
        Self {
            app_id: app_id.to_string(),
            state,
            users: 0,
            sessions: 0,
            sessions_by_user: BTreeMap::new(),
        }
    }
}

enum Command {
    Register(Arc<Session>),
    Unregister(Arc<Session>),
    Broadcast(Envelope),
    Stats(oneshot::Sender<HubStats>),
}

/// Handle to a running hub
pub struct Hub {
    app_id: String,
    state: Arc<AtomicU8>,
    commands: mpsc::Sender<Command>,
    exit: mpsc::Sender<()>,
    done: watch::Receiver<bool>,
}

impl Hub {
    /// Start a hub's event loop and return its handle
    ///
    /// `queue_size` bounds the number of pending commands; senders wait for
    /// room rather than drop.
    pub fn spawn(app_id: impl Into<String>, queue_size: usize) -> Arc<Self> {
        let app_id = app_id.into();
        let state = Arc::new(AtomicU8::new(HubState::Open as u8));
        let (commands_tx, commands_rx) = mpsc::channel(queue_size.max(1));
        let (exit_tx, exit_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = watch::channel(false);

        let event_loop = HubLoop {
            app_id: app_id.clone(),
            state: Arc::clone(&state),
            registry: HashMap::new(),
            commands: commands_rx,
            exit: exit_rx,
            done: done_tx,
        };
        tokio::spawn(event_loop.run());

        Arc::new(Self {
            app_id,
            state,
            commands: commands_tx,
            exit: exit_tx,
            done: done_rx,
        })
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn state(&self) -> HubState {
        HubState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == HubState::Open
    }

    /// Add a session to the registry
    pub async fn register(&self, session: Arc<Session>) -> Result<(), HubError> {
        self.submit(Command::Register(session)).await
    }

    /// Remove exactly this session instance from the registry
    pub async fn unregister(&self, session: Arc<Session>) -> Result<(), HubError> {
        self.submit(Command::Unregister(session)).await
    }

    /// Fan an envelope out to its target sessions
    ///
    /// Returns once the hub has accepted the envelope, not once it is delivered.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.submit(Command::Broadcast(envelope)).await
    }

    /// Registry snapshot, taken on the event loop
    ///
    /// A hub that is no longer open reports an empty registry.
    pub async fn stats(&self) -> HubStats {
        let (tx, rx) = oneshot::channel();
        if self.submit(Command::Stats(tx)).await.is_err() {
            return HubStats::empty(&self.app_id, self.state());
        }
        match rx.await {
            Ok(stats) => stats,
            Err(_) => HubStats::empty(&self.app_id, self.state()),
        }
    }

    /// Close every session and stop the event loop
    ///
    /// Returns once all sessions' write loops have exited. Safe to call more
    /// than once, from any number of tasks.
    pub async fn close(&self) {
        // A full exit channel means a close is already pending.
        let _ = self.exit.try_send(());
        let mut done = self.done.clone();
        let _ = done.wait_for(|closed| *closed).await;
    }

    async fn submit(&self, command: Command) -> Result<(), HubError> {
        if !self.is_open() {
            return Err(HubError::Closed(self.app_id.clone()));
        }
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed(self.app_id.clone()))
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("app_id", &self.app_id)
            .field("state", &self.state())
            .finish()
    }
}

/// The event loop side of a hub; owns the registry
struct HubLoop {
    app_id: String,
    state: Arc<AtomicU8>,
    registry: HashMap<String, Vec<Arc<Session>>>,
    commands: mpsc::Receiver<Command>,
    exit: mpsc::Receiver<()>,
    done: watch::Sender<bool>,
}

impl HubLoop {
    async fn run(mut self) {
        tracing::info!(app_id = %self.app_id, "Hub started");

        loop {
            tokio::select! {
                biased;

                // Also fires when the handle is dropped
                _ = self.exit.recv() => {
                    self.shutdown().await;
                    break;
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
            }
        }

        self.done.send_replace(true);
    }

    fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == HubState::Open as u8
    }

    fn set_state(&self, state: HubState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn handle(&mut self, command: Command) {
        if !self.is_open() {
            return;
        }

        match command {
            Command::Register(session) => {
                tracing::debug!(
                    app_id = %self.app_id,
                    user_id = %session.user_id(),
                    session_id = %session.id(),
                    "Session registered"
                );
                self.registry
                    .entry(session.user_id().to_string())
                    .or_default()
                    .push(session);
            }
            Command::Unregister(session) => self.remove(&session),
            Command::Broadcast(envelope) => self.fan_out(&envelope),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn remove(&mut self, session: &Arc<Session>) {
        let Some(sessions) = self.registry.get_mut(session.user_id()) else {
            return;
        };

        if let Some(pos) = sessions.iter().position(|s| Arc::ptr_eq(s, session)) {
            sessions.remove(pos);
            tracing::debug!(
                app_id = %self.app_id,
                user_id = %session.user_id(),
                session_id = %session.id(),
                "Session unregistered"
            );
        }

        if sessions.is_empty() {
            self.registry.remove(session.user_id());
        }
    }

    fn fan_out(&self, envelope: &Envelope) {
        let mut delivered = 0usize;
        let mut dropped = 0usize;

        let mut deliver = |session: &Arc<Session>| {
            if !envelope.accepts(session) {
                return;
            }
            // Drops are reported to the error callback by the session itself
            match session.write_envelope(envelope.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => dropped += 1,
            }
        };

        if envelope.is_broadcast() {
            self.registry.values().flatten().for_each(&mut deliver);
        } else {
            for user_id in envelope.target_users() {
                if let Some(sessions) = self.registry.get(user_id) {
                    sessions.iter().for_each(&mut deliver);
                }
            }
        }

        tracing::trace!(
            app_id = %self.app_id,
            envelope_id = %envelope.id(),
            delivered,
            dropped,
            "Broadcast fanned out"
        );
    }

    fn stats(&self) -> HubStats {
        let sessions_by_user: BTreeMap<String, Vec<Uuid>> = self
            .registry
            .iter()
            .map(|(user_id, sessions)| (user_id.clone(), sessions.iter().map(|s| s.id()).collect()))
            .collect();

        HubStats {
            app_id: self.app_id.clone(),
            state: HubState::from_u8(self.state.load(Ordering::Acquire)),
            users: sessions_by_user.len(),
            sessions: sessions_by_user.values().map(Vec::len).sum(),
            sessions_by_user,
        }
    }

    /// Close every session one by one, waiting for each write loop to exit
    async fn shutdown(&mut self) {
        self.set_state(HubState::Closing);

        // Registrations accepted before the state flipped are still queued;
        // they are closed with the rest of the registry.
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Register(session) => self
                    .registry
                    .entry(session.user_id().to_string())
                    .or_default()
                    .push(session),
                Command::Stats(reply) => {
                    let _ = reply.send(HubStats::empty(&self.app_id, HubState::Closing));
                }
                Command::Unregister(_) | Command::Broadcast(_) => {}
            }
        }

        let count: usize = self.registry.values().map(Vec::len).sum();
        tracing::info!(app_id = %self.app_id, sessions = count, "Hub closing");

        for session in self.registry.values().flatten() {
            let _ = session.close();
            session.close_outbound();
            session.wait_exited().await;
        }

        self.registry.clear();
        self.set_state(HubState::Closed);

        tracing::info!(app_id = %self.app_id, "Hub closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::engine::BrokerConfig;
    use crate::broker::error::SessionError;
    use crate::broker::handlers::Handlers;
    use crate::broker::request::ConnectRequest;
    use crate::broker::test_support::{recording_handlers, spawn_session, Recorder};
    use crate::broker::transport::memory::{self, Peer};
    use crate::broker::transport::Frame;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(1);

    fn open(user_id: &str) -> (Arc<Session>, Peer) {
        let (session, peer, _stream) =
            spawn_session("chat", user_id, BrokerConfig::default(), Handlers::default());
        (session, peer)
    }

    async fn expect_text(peer: &mut Peer, expected: &str) {
        assert_eq!(
            peer.recv_timeout(WAIT).await,
            Some(Frame::Text(expected.to_string()))
        );
    }

    /// Proves `peer` did not receive anything before `marker`
    async fn expect_only_marker(hub: &Hub, user_id: &str, peer: &mut Peer, marker: &str) {
        hub.broadcast(Envelope::text(marker).to_users([user_id]))
            .await
            .unwrap();
        expect_text(peer, marker).await;
    }

    #[tokio::test]
    async fn test_register_unregister_sequence() {
        let hub = Hub::spawn("chat", 16);
        let (s1, _p1) = open("a");
        let (s2, _p2) = open("a");
        let (s3, _p3) = open("b");

        hub.register(Arc::clone(&s1)).await.unwrap();
        hub.register(Arc::clone(&s2)).await.unwrap();
        hub.register(Arc::clone(&s3)).await.unwrap();
        hub.unregister(Arc::clone(&s1)).await.unwrap();
        hub.unregister(Arc::clone(&s3)).await.unwrap();
        // Unknown and repeated removals are no-ops
        hub.unregister(Arc::clone(&s3)).await.unwrap();

        let stats = hub.stats().await;
        assert_eq!(stats.state, HubState::Open);
        assert_eq!(stats.users, 1);
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.sessions_by_user["a"], vec![s2.id()]);
        assert!(!stats.sessions_by_user.contains_key("b"));

        hub.close().await;
    }

    #[tokio::test]
    async fn test_unregister_matches_identity() {
        let hub = Hub::spawn("chat", 16);
        let (s1, _p1) = open("a");
        let (s2, _p2) = open("a");

        hub.register(Arc::clone(&s1)).await.unwrap();
        hub.register(Arc::clone(&s2)).await.unwrap();
        hub.unregister(Arc::clone(&s2)).await.unwrap();

        let stats = hub.stats().await;
        assert_eq!(stats.sessions_by_user["a"], vec![s1.id()]);

        hub.close().await;
    }

    #[tokio::test]
    async fn test_targeted_then_global_broadcast() {
        let hub = Hub::spawn("chat", 16);
        let (s1, mut p1) = open("a");
        let (s2, mut p2) = open("a");
        let (s3, mut p3) = open("b");

        for session in [&s1, &s2, &s3] {
            hub.register(Arc::clone(session)).await.unwrap();
        }

        hub.broadcast(Envelope::text("to a").to_users(["a"]))
            .await
            .unwrap();
        expect_text(&mut p1, "to a").await;
        expect_text(&mut p2, "to a").await;
        expect_only_marker(&hub, "b", &mut p3, "marker-1").await;

        hub.broadcast(Envelope::text("to all")).await.unwrap();
        expect_text(&mut p1, "to all").await;
        expect_text(&mut p2, "to all").await;
        expect_text(&mut p3, "to all").await;

        hub.unregister(Arc::clone(&s2)).await.unwrap();
        hub.broadcast(Envelope::text("a again").to_users(["a"]))
            .await
            .unwrap();
        expect_text(&mut p1, "a again").await;

        // s2 is still connected, only no longer registered
        s2.write("direct").unwrap();
        expect_text(&mut p2, "direct").await;

        hub.close().await;
    }

    #[tokio::test]
    async fn test_unknown_target_is_skipped() {
        let hub = Hub::spawn("chat", 16);
        let (s1, mut p1) = open("a");
        hub.register(Arc::clone(&s1)).await.unwrap();

        hub.broadcast(Envelope::text("hello").to_users(["ghost", "a"]))
            .await
            .unwrap();
        expect_text(&mut p1, "hello").await;

        hub.close().await;
    }

    #[tokio::test]
    async fn test_filter_applies_per_session() {
        let hub = Hub::spawn("chat", 16);
        let (s1, mut p1) = open("a");
        let (s2, mut p2) = open("a");
        let (s3, mut p3) = open("b");
        s1.set("role", "admin");
        s3.set("role", "admin");

        for session in [&s1, &s2, &s3] {
            hub.register(Arc::clone(session)).await.unwrap();
        }

        let admins_only = crate::broker::envelope::filter(|s| s.get_string("role") == "admin");

        hub.broadcast(Envelope::text("admins of a").to_users(["a"]).with_filter(Arc::clone(&admins_only)))
            .await
            .unwrap();
        expect_text(&mut p1, "admins of a").await;
        expect_only_marker(&hub, "a", &mut p2, "marker-a").await;
        expect_text(&mut p1, "marker-a").await;
        expect_only_marker(&hub, "b", &mut p3, "marker-b").await;

        hub.broadcast(Envelope::text("all admins").with_filter(admins_only))
            .await
            .unwrap();
        expect_text(&mut p1, "all admins").await;
        expect_text(&mut p3, "all admins").await;
        expect_only_marker(&hub, "a", &mut p2, "marker-a2").await;

        hub.close().await;
    }

    #[tokio::test]
    async fn test_close_waits_for_every_session() {
        let hub = Hub::spawn("chat", 16);
        let (s1, mut p1) = open("a");
        let (s2, mut p2) = open("b");
        hub.register(Arc::clone(&s1)).await.unwrap();
        hub.register(Arc::clone(&s2)).await.unwrap();

        hub.close().await;

        assert_eq!(hub.state(), HubState::Closed);
        assert!(s1.is_exited());
        assert!(s2.is_exited());
        assert!(p1.is_closed());
        assert!(p2.is_closed());
        assert!(matches!(p1.recv().await, Some(Frame::Close(_))));
        assert!(matches!(p2.recv().await, Some(Frame::Close(_))));

        // Idempotent
        hub.close().await;
    }

    #[tokio::test]
    async fn test_closed_hub_rejects_commands() {
        let hub = Hub::spawn("chat", 16);
        hub.close().await;

        let (s1, _p1) = open("a");
        assert_eq!(
            hub.register(Arc::clone(&s1)).await,
            Err(HubError::Closed("chat".to_string()))
        );
        assert_eq!(
            hub.broadcast(Envelope::text("late")).await,
            Err(HubError::Closed("chat".to_string()))
        );

        let stats = hub.stats().await;
        assert_eq!(stats.state, HubState::Closed);
        assert_eq!(stats.sessions, 0);
    }

    #[tokio::test]
    async fn test_concurrent_close_callers_all_wait() {
        let hub = Hub::spawn("chat", 16);
        let (s1, _p1) = open("a");
        hub.register(Arc::clone(&s1)).await.unwrap();

        let first = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.close().await })
        };
        let second = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move { hub.close().await })
        };

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(hub.state(), HubState::Closed);
        assert!(s1.is_exited());
    }

    #[tokio::test]
    async fn test_register_queued_before_close_is_closed() {
        let hub = Hub::spawn("chat", 16);
        let (s1, mut p1) = open("a");
        let (s2, mut p2) = open("b");

        // Both registrations are still queued when the exit request lands
        hub.register(Arc::clone(&s1)).await.unwrap();
        hub.register(Arc::clone(&s2)).await.unwrap();
        hub.close().await;

        assert_eq!(hub.state(), HubState::Closed);
        assert!(s1.is_exited());
        assert!(s2.is_exited());
        assert!(p1.is_closed());
        assert!(p2.is_closed());
        assert!(matches!(p1.recv().await, Some(Frame::Close(_))));
        assert!(matches!(p2.recv().await, Some(Frame::Close(_))));
    }

    #[tokio::test]
    async fn test_close_survives_panicking_error_callback() {
        let hub = Hub::spawn("chat", 16);
        let handlers = Handlers {
            error: Some(Arc::new(|_: &Session, err: &SessionError| {
                panic!("error callback failed on {err}")
            })),
            ..Handlers::default()
        };
        let (s1, p1, _stream) = spawn_session("chat", "a", BrokerConfig::default(), handlers);
        hub.register(Arc::clone(&s1)).await.unwrap();

        // The next write fails and the callback panics inside the write loop
        drop(p1);
        s1.write("lost").unwrap();

        tokio::time::timeout(WAIT, s1.wait_exited())
            .await
            .expect("write loop never signalled exit");
        tokio::time::timeout(WAIT, hub.close())
            .await
            .expect("hub close did not finish");
        assert_eq!(hub.state(), HubState::Closed);
    }

    #[tokio::test]
    async fn test_full_session_queue_does_not_stall_fan_out() {
        let hub = Hub::spawn("chat", 16);
        let recorder = Recorder::default();

        // Capacity one and nothing draining it yet
        let config = BrokerConfig {
            message_buffer_size: 1,
            ..BrokerConfig::default()
        };
        let (slow, slow_queue) = Session::new(
            ConnectRequest::new("chat", "slow"),
            Arc::new(config),
            Arc::new(recording_handlers(&recorder)),
        );
        let (fast, mut fast_peer) = open("fast");

        hub.register(Arc::clone(&slow)).await.unwrap();
        hub.register(Arc::clone(&fast)).await.unwrap();

        hub.broadcast(Envelope::text("first")).await.unwrap();
        hub.broadcast(Envelope::text("second")).await.unwrap();
        expect_text(&mut fast_peer, "first").await;
        expect_text(&mut fast_peer, "second").await;

        let stats = tokio::time::timeout(WAIT, hub.stats())
            .await
            .expect("hub stopped answering");
        assert_eq!(stats.sessions, 2);

        let errors = recorder.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            SessionError::QueueFull { session_id, .. } if session_id == slow.id()
        ));

        // Start draining so the hub can close the slow session too
        let (sink, _stream, mut slow_peer) = memory::channel();
        tokio::spawn(Arc::clone(&slow).write_pump(sink, slow_queue));
        expect_text(&mut slow_peer, "first").await;

        hub.close().await;
        assert!(slow.is_exited());
        assert!(fast.is_exited());
    }
}
