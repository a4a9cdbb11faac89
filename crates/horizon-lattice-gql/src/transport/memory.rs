//! In-process transport.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{CloseReason, Transport, TransportEvent, TransportEvents, TransportState};
use crate::error::{Error, Result};
use crate::log::targets;

/// Create a connected [`MemoryTransport`] / [`MemoryPeer`] pair.
///
/// The transport starts in the connecting state; call [`MemoryPeer::open`]
/// to open it.
pub fn memory_transport() -> (MemoryTransport, TransportEvents, MemoryPeer) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let state = Arc::new(Mutex::new(TransportState::Connecting));

    let transport = MemoryTransport {
        state: state.clone(),
        sent: sent_tx,
    };
    let peer = MemoryPeer {
        state,
        events: events_tx,
        sent: sent_rx,
    };
    (transport, events_rx, peer)
}

/// Client half of an in-process transport.
#[derive(Debug)]
pub struct MemoryTransport {
    state: Arc<Mutex<TransportState>>,
    sent: mpsc::UnboundedSender<String>,
}

impl Transport for MemoryTransport {
    fn send(&self, text: String) -> Result<()> {
        if *self.state.lock() == TransportState::Closed {
            return Err(Error::NotConnected);
        }
        self.sent.send(text).map_err(|_| Error::NotConnected)
    }

    fn is_open(&self) -> bool {
        *self.state.lock() == TransportState::Open
    }
}

/// Server half of an in-process transport.
///
/// Frames the client sends before [`open`](Self::open) are still queued, the
/// way a socket library buffers writes during the handshake.
#[derive(Debug)]
pub struct MemoryPeer {
    state: Arc<Mutex<TransportState>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Open the transport.
    pub fn open(&self) {
        *self.state.lock() = TransportState::Open;
        self.emit(TransportEvent::Open);
    }

    /// Deliver a text frame to the client.
    pub fn send_text(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(text.into()));
    }

    /// Report a transport error.
    pub fn error(&self, message: impl Into<String>) {
        self.emit(TransportEvent::Error(message.into()));
    }

    /// Close the transport.
    pub fn close(&self, reason: Option<CloseReason>) {
        *self.state.lock() = TransportState::Closed;
        self.emit(TransportEvent::Close(reason));
    }

    /// Wait for the next frame the client sent.
    ///
    /// Returns `None` once the client side is dropped.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// Take the next frame the client sent, if one is queued.
    pub fn try_next_sent(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!(target: targets::TRANSPORT, "memory transport receiver dropped");
        }
    }
}
