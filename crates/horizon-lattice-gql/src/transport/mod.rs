//! Transports carrying protocol frames.
//!
//! A transport is split in two halves: a [`Transport`] handle used to send
//! text frames, and a [`TransportEvents`] receiver on which the transport
//! reports `open`, inbound messages, errors and close, in order.
//!
//! Two implementations are provided:
//!
//! - [`WebSocketTransport`]: a `tokio-tungstenite` socket driven by a
//!   background task.
//! - [`MemoryTransport`]: an in-process pipe paired with a [`MemoryPeer`] that
//!   plays the server, for tests and embedding.

mod close;
mod memory;
mod websocket;

use tokio::sync::mpsc;

pub use close::{CloseCode, CloseReason};
pub use memory::{MemoryPeer, MemoryTransport, memory_transport};
pub use websocket::{WebSocketConfig, WebSocketTransport};

use crate::error::Result;

/// The sending half of a transport.
pub trait Transport: Send + Sync + 'static {
    /// Queue a text frame.
    fn send(&self, text: String) -> Result<()>;

    /// Whether the transport has opened and not yet closed.
    fn is_open(&self) -> bool;
}

/// Lifecycle and inbound traffic of a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The transport failed. A `Close` usually follows.
    Error(String),
    /// The connection closed.
    Close(Option<CloseReason>),
}

/// Receiver for [`TransportEvent`]s.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Connection state of a transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Not yet open.
    #[default]
    Connecting,
    /// Open; frames can flow.
    Open,
    /// Closed for good.
    Closed,
}
