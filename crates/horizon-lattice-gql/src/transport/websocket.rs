//! WebSocket transport driven by a background task.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as TungsteniteCloseCode;

use super::{CloseCode, CloseReason, Transport, TransportEvent, TransportEvents, TransportState};
use crate::error::{Error, Result};
use crate::log::targets;
use crate::protocol::SUBPROTOCOL;

/// Configuration for a WebSocket transport.
#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    /// The WebSocket URL (ws:// or wss://).
    pub url: String,
    /// Custom headers to send during the handshake.
    pub headers: BTreeMap<String, String>,
    /// Subprotocol requested in `Sec-WebSocket-Protocol`.
    pub protocol: String,
}

impl WebSocketConfig {
    /// Create a configuration for `url` speaking `graphql-ws`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            protocol: SUBPROTOCOL.to_string(),
        }
    }

    /// Add a custom header for the WebSocket handshake.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add multiple headers.
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Override the requested subprotocol.
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Build the handshake request with the subprotocol and custom headers.
    pub(crate) fn build_request(&self) -> Result<Request> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let headers = request.headers_mut();
        headers.insert(
            http::header::SEC_WEBSOCKET_PROTOCOL,
            http::header::HeaderValue::try_from(self.protocol.as_str())?,
        );
        for (name, value) in &self.headers {
            let header_name = http::header::HeaderName::try_from(name.as_str())?;
            let header_value = http::header::HeaderValue::try_from(value.as_str())?;
            headers.insert(header_name, header_value);
        }

        Ok(request)
    }
}

/// Command sent to the socket task.
enum Command {
    SendText(String),
    Close(Option<CloseReason>),
}

/// A WebSocket transport.
///
/// The socket is owned by a spawned task that connects, forwards queued
/// frames and reports events. Frames sent before the handshake completes are
/// queued. There is no reconnection: once the socket closes the transport is
/// done, and `Error` (if any) is followed by exactly one `Close`.
///
/// Dropping the transport closes the socket normally.
pub struct WebSocketTransport {
    url: String,
    state: Arc<Mutex<TransportState>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl WebSocketTransport {
    /// Start connecting to the configured server.
    ///
    /// Must be called from within a Tokio runtime. Fails immediately if the
    /// URL or a header is invalid; connection failures are reported as
    /// events.
    pub fn connect(config: WebSocketConfig) -> Result<(Self, TransportEvents)> {
        let request = config.build_request()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(TransportState::Connecting));

        tokio::spawn(run(request, state.clone(), commands_rx, events_tx));

        let transport = Self {
            url: config.url,
            state,
            commands: commands_tx,
        };
        Ok((transport, events_rx))
    }

    /// Get the current connection state.
    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    /// Get the URL this transport connects to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Close the socket with an optional close reason.
    pub fn close(&self, reason: Option<CloseReason>) {
        let _ = self.commands.send(Command::Close(reason));
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, text: String) -> Result<()> {
        if self.state() == TransportState::Closed {
            return Err(Error::NotConnected);
        }
        self.commands
            .send(Command::SendText(text))
            .map_err(|_| Error::NotConnected)
    }

    fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close(Some(CloseReason::normal()));
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

async fn run(
    request: Request,
    state: Arc<Mutex<TransportState>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let emit = |event: TransportEvent| {
        let _ = events.send(event);
    };
    let finish = |reason: Option<CloseReason>| {
        *state.lock() = TransportState::Closed;
        let _ = events.send(TransportEvent::Close(reason));
    };

    let uri = request.uri().to_string();
    let stream = match tokio_tungstenite::connect_async(request).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::debug!(target: targets::TRANSPORT, %uri, error = %e, "handshake failed");
            emit(TransportEvent::Error(e.to_string()));
            finish(None);
            return;
        }
    };

    tracing::debug!(target: targets::TRANSPORT, %uri, "connected");
    *state.lock() = TransportState::Open;
    emit(TransportEvent::Open);

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(Command::SendText(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            emit(TransportEvent::Error(e.to_string()));
                            finish(None);
                            return;
                        }
                    }
                    Some(Command::Close(reason)) => {
                        let frame = reason.clone().map(|r| CloseFrame {
                            code: TungsteniteCloseCode::from(u16::from(r.code)),
                            reason: r.reason.unwrap_or_default().into(),
                        });
                        let _ = write.send(Message::Close(frame)).await;
                        finish(reason);
                        return;
                    }
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        finish(Some(CloseReason::normal()));
                        return;
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        emit(TransportEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| CloseReason {
                            code: CloseCode::from(u16::from(f.code)),
                            reason: Some(f.reason.as_str().to_string()).filter(|r| !r.is_empty()),
                        });
                        tracing::debug!(target: targets::TRANSPORT, ?reason, "server closed");
                        finish(reason);
                        return;
                    }
                    // Pings are answered by tungstenite; the protocol has no binary frames.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        emit(TransportEvent::Error(e.to_string()));
                        finish(Some(CloseReason::new(CloseCode::Abnormal)));
                        return;
                    }
                    None => {
                        finish(Some(CloseReason::new(CloseCode::Abnormal)));
                        return;
                    }
                }
            }
        }
    }
}
