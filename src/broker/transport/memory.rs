//! In-memory transport
//!
//! A connection whose far end is a [`Peer`] handle in the same process. The
//! peer injects inbound frames (or transport errors) and observes every frame
//! the session writes. Closing the sink ends the stream, the same way closing
//! a socket ends both directions.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use super::{Frame, FrameSink, FrameStream, TransportError};

/// Create a connected sink/stream pair and the peer that drives it
pub fn channel() -> (MemorySink, MemoryStream, Peer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);

    let sink = MemorySink {
        outbound: outbound_tx,
        closed: closed_tx,
    };
    let stream = MemoryStream {
        inbound: inbound_rx,
        closed: closed_rx.clone(),
    };
    let peer = Peer {
        inbound: inbound_tx,
        outbound: outbound_rx,
        closed: closed_rx,
    };

    (sink, stream, peer)
}

/// Write half of an in-memory connection
pub struct MemorySink {
    outbound: mpsc::UnboundedSender<Frame>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if *self.closed.borrow() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.send_replace(true);
        Ok(())
    }
}

/// Read half of an in-memory connection
pub struct MemoryStream {
    inbound: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
    closed: watch::Receiver<bool>,
}

#[async_trait]
impl FrameStream for MemoryStream {
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        if *self.closed.borrow() {
            return None;
        }

        // A dropped sink counts as closed as well.
        tokio::select! {
            biased;
            item = self.inbound.recv() => item,
            _ = self.closed.wait_for(|closed| *closed) => None,
        }
    }
}

/// The remote end of an in-memory connection
pub struct Peer {
    inbound: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    closed: watch::Receiver<bool>,
}

impl Peer {
    /// Deliver a frame to the session's read loop
    ///
    /// Returns false if the read side is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.inbound.send(Ok(frame)).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Make the session's next read fail with `error`
    pub fn fail(&self, error: TransportError) -> bool {
        self.inbound.send(Err(error)).is_ok()
    }

    /// Next frame written by the session, `None` once the sink is gone and drained
    pub async fn recv(&mut self) -> Option<Frame> {
        self.outbound.recv().await
    }

    /// Like [`Peer::recv`] but gives up after `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Frame> {
        tokio::time::timeout(timeout, self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next frame already written, without waiting
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }

    /// Whether the session closed (or dropped) its sink
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.closed.has_changed().is_err()
    }

    /// Wait until the session closes its sink
    pub async fn closed(&mut self) {
        let _ = self.closed.wait_for(|closed| *closed).await;
    }
}
