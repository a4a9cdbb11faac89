//! The multiplexing GraphQL socket client.

use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use serde_json::{Map, Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::connection::{Connection, ConnectionState, Credentials};
use crate::dispatcher::{Dispatch, dispatch};
use crate::error::{Error, Result};
use crate::id::{IdGenerator, IdSource};
use crate::log::{LogSink, TracingLog, events, targets};
use crate::normalize::NormalizedError;
use crate::protocol::{ClientFrame, InitPayload, KEEP_ALIVE_FRAME, SUBPROTOCOL, ServerFrame};
use crate::registry::{Outcome, PendingOperation, Registries, Subscription};
use crate::request::GraphQLRequest;
use crate::transport::{
    CloseReason, Transport, TransportEvent, TransportEvents, WebSocketConfig, WebSocketTransport,
};

/// Builder for creating a [`GraphQLSocketClient`].
pub struct ClientBuilder {
    address: String,
    credentials: Credentials,
    handshake_headers: BTreeMap<String, String>,
    protocol: String,
    debug: bool,
    log: Arc<dyn LogSink>,
    ids: IdGenerator,
    request_timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Create a new builder for the given WebSocket address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: Credentials::default(),
            handshake_headers: BTreeMap::new(),
            protocol: SUBPROTOCOL.to_string(),
            debug: false,
            log: Arc::new(TracingLog),
            ids: IdGenerator::default(),
            request_timeout: None,
        }
    }

    /// Capture a backtrace when each operation is created and attach it to
    /// the operation's error.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the structured log sink. Defaults to [`TracingLog`].
    pub fn log(mut self, log: impl LogSink) -> Self {
        self.log = Arc::new(log);
        self
    }

    /// Set all credentials at once.
    ///
    /// With an admin secret or token the client authenticates as soon as the
    /// transport opens; otherwise call [`GraphQLSocketClient::connect`].
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Authenticate with an admin secret.
    pub fn admin_secret(mut self, secret: impl Into<String>) -> Self {
        self.credentials.admin_secret = Some(secret.into());
        self
    }

    /// Authenticate with a bearer token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.credentials.token = Some(token.into());
        self
    }

    /// Request a role.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.credentials.role = Some(role.into());
        self
    }

    /// Add an extra header to `connection_init`.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.headers.insert(name.into(), value.into());
        self
    }

    /// Add a header to the WebSocket handshake request.
    pub fn handshake_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.handshake_headers.insert(name.into(), value.into());
        self
    }

    /// Override the WebSocket subprotocol. Defaults to `graphql-ws`.
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Use a custom source of correlation ids.
    pub fn id_source(mut self, source: impl IdSource) -> Self {
        self.ids = IdGenerator::new(source);
        self
    }

    /// Fail one-shot operations that see no terminal frame within `timeout`.
    ///
    /// Off by default. Subscriptions never time out.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Open a WebSocket to the configured address and build the client.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<GraphQLSocketClient> {
        let config = WebSocketConfig::new(self.address.clone())
            .headers(self.handshake_headers.clone())
            .protocol(self.protocol.clone());
        let (transport, events) = WebSocketTransport::connect(config)?;
        Ok(self.build_with_transport(transport, events))
    }

    /// Build the client over an existing transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build_with_transport(
        self,
        transport: impl Transport,
        events: TransportEvents,
    ) -> GraphQLSocketClient {
        let inner = Arc::new(ClientInner {
            address: self.address,
            transport: Box::new(transport),
            registries: Mutex::new(Registries::new(self.ids)),
            connection: Connection::new(),
            log: self.log,
            debug: self.debug,
            request_timeout: self.request_timeout,
        });

        tokio::spawn(read_events(Arc::downgrade(&inner), events));

        if self.credentials.should_auto_connect() {
            let client = Arc::downgrade(&inner);
            let opened = inner.connection.watch();
            let credentials = self.credentials;
            tokio::spawn(async move {
                if Connection::wait_opened(opened).await.is_err() {
                    return;
                }
                if let Some(inner) = client.upgrade()
                    && let Err(e) = inner.send_init(&credentials)
                {
                    tracing::warn!(
                        target: targets::CLIENT,
                        error = %e,
                        "failed to send connection_init"
                    );
                }
            });
        }

        GraphQLSocketClient { inner }
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("address", &self.address)
            .field("credentials", &self.credentials)
            .field("protocol", &self.protocol)
            .field("debug", &self.debug)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

struct ClientInner {
    address: String,
    transport: Box<dyn Transport>,
    registries: Mutex<Registries>,
    connection: Connection,
    log: Arc<dyn LogSink>,
    debug: bool,
    request_timeout: Option<Duration>,
}

impl ClientInner {
    async fn connect(&self, credentials: &Credentials) -> Result<Value> {
        if !self.transport.is_open() {
            self.connection.opened().await?;
        }
        self.send_init(credentials)?;
        self.connection.ready().await
    }

    fn send_init(&self, credentials: &Credentials) -> Result<()> {
        let frame = ClientFrame::ConnectionInit {
            payload: InitPayload {
                headers: credentials.headers(),
            },
        };
        tracing::debug!(target: targets::CLIENT, ?credentials, "sending connection_init");
        self.transport.send(frame.encode()?)
    }

    /// Register a pending entry, plus the subscription if given.
    fn register(
        &self,
        name: Option<String>,
        subscription: Option<Subscription>,
    ) -> (String, oneshot::Receiver<Outcome>) {
        let trace = self.debug.then(|| Backtrace::force_capture().to_string());

        let mut registries = self.registries.lock();
        let id = registries.allocate_id();
        let (operation, receiver) = PendingOperation::new(id.clone(), name, trace);
        registries.pending.insert(id.clone(), operation);
        if let Some(subscription) = subscription {
            registries.subscriptions.insert(id.clone(), subscription);
        }
        (id, receiver)
    }

    /// Wait for readiness and send `start`.
    ///
    /// Returns `false` when a subscription was closed before it started; its
    /// pending entry is dropped and nothing is sent. The registered entries
    /// are also dropped if this future is dropped before `start` is sent.
    async fn start(&self, id: &str, payload: &RawValue, subscription: bool) -> Result<bool> {
        let mut guard = Unstarted {
            inner: self,
            id: Some(id),
        };
        let frame = ClientFrame::Start { id, payload }.encode()?;
        self.connection.ready().await?;

        {
            // `started` flips together with queueing `start`.
            let mut registries = self.registries.lock();
            if subscription {
                match registries.subscriptions.get_mut(id) {
                    Some(entry) => entry.started = true,
                    None => return Ok(false),
                }
            }
            let logged: Value = serde_json::from_str(payload.get()).unwrap_or(Value::Null);
            self.log.log(events::START, json!({ "id": id, "payload": logged }));
            self.transport.send(frame)?;
        }
        guard.disarm();
        Ok(true)
    }

    async fn settle(
        &self,
        id: &str,
        receiver: oneshot::Receiver<Outcome>,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>> {
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::debug!(target: targets::CLIENT, %id, ?limit, "operation timed out");
                    self.registries.lock().abandon(id);
                    return Err(Error::Timeout);
                }
            },
            None => receiver.await,
        };
        resolve(outcome)
    }

    /// Remove a subscription and send `stop`. No-op if already gone, and
    /// nothing is sent if its `start` was not.
    fn stop(&self, id: &str) {
        let removed = self.registries.lock().subscriptions.remove(id);
        if !removed.is_some_and(|subscription| subscription.started) {
            return;
        }
        self.log.log(events::STOP, json!({ "id": id }));
        let sent = ClientFrame::Stop { id }
            .encode()
            .and_then(|frame| self.transport.send(frame));
        if let Err(e) = sent {
            tracing::debug!(target: targets::CLIENT, %id, error = %e, "failed to send stop");
        }
    }

    fn handle_message(&self, text: String) {
        if text == KEEP_ALIVE_FRAME {
            return;
        }
        self.log.log(events::RAW, json!({ "frame": text }));

        let frame = match ServerFrame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(target: targets::CLIENT, error = %e, "discarding malformed frame");
                return;
            }
        };

        let next = dispatch(&mut self.registries.lock(), frame, text.len(), &*self.log);
        match next {
            Dispatch::Handled => {}
            Dispatch::Acknowledged(payload) => {
                tracing::debug!(target: targets::CLIENT, "connection acknowledged");
                self.connection.acknowledge(payload);
            }
            Dispatch::Fatal(err) => self.connection.fail(err),
            Dispatch::Deliver { callback, data } => callback(data),
        }
    }

    /// Fail every outstanding operation and the connection with one error.
    fn handle_fatal(&self, err: NormalizedError) {
        let err = Arc::new(err);
        tracing::debug!(target: targets::CLIENT, error = %err, "connection failed");
        self.registries.lock().fail_all(&err, &*self.log);
        self.connection.fail(err);
    }
}

/// Abandons an operation whose `start` frame was never sent.
struct Unstarted<'a> {
    inner: &'a ClientInner,
    id: Option<&'a str>,
}

impl Unstarted<'_> {
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for Unstarted<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.inner.registries.lock().abandon(id);
        }
    }
}

/// Consume transport events in arrival order.
async fn read_events(client: Weak<ClientInner>, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = client.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Open => inner.connection.mark_open(),
            TransportEvent::Message(text) => inner.handle_message(text),
            TransportEvent::Error(message) => {
                let mut details = Map::new();
                details.insert("error".into(), Value::String(message));
                inner.handle_fatal(NormalizedError::transport(
                    "WebSocket connection failed",
                    details,
                ));
            }
            TransportEvent::Close(reason) => inner.handle_fatal(closed(reason.as_ref())),
        }
    }
    if let Some(inner) = client.upgrade() {
        inner.handle_fatal(closed(None));
    }
}

fn closed(reason: Option<&CloseReason>) -> NormalizedError {
    let details = reason.map(CloseReason::to_details).unwrap_or_default();
    NormalizedError::transport("WebSocket connection closed", details)
}

fn resolve(
    outcome: std::result::Result<Outcome, oneshot::error::RecvError>,
) -> Result<Option<Value>> {
    match outcome {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(err)) => Err(Error::Operation(err)),
        Err(_) => Err(Error::Closed),
    }
}

/// A GraphQL client multiplexing operations over one socket.
///
/// Cloning is cheap; clones share the connection. Once the connection fails
/// every outstanding operation fails with the same error and the client
/// stays unusable: build a new one to reconnect. Subscriptions are not
/// re-established.
///
/// # Example
///
/// ```ignore
/// use horizon_lattice_gql::{GraphQLRequest, GraphQLSocketClient};
///
/// let client = GraphQLSocketClient::builder("wss://example.com/v1/graphql")
///     .token("eyJhbGciOi...")
///     .role("user")
///     .build()?;
///
/// // Execute a query
/// let request = GraphQLRequest::query("{ users { id name } }");
/// let data = client.execute(request).await?;
///
/// // Subscribe to events
/// let subscription = GraphQLRequest::subscription("subscription { events { id } }");
/// let handle = client.subscribe(subscription, |data| println!("{data}"))?;
/// handle.close();
/// ```
#[derive(Clone)]
pub struct GraphQLSocketClient {
    inner: Arc<ClientInner>,
}

impl GraphQLSocketClient {
    /// Create a new builder for configuring a client.
    pub fn builder(address: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(address)
    }

    /// Get the address this client connects to.
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Authenticate the connection.
    ///
    /// Waits for the transport to open, sends `connection_init` and resolves
    /// with the `connection_ack` payload. Every call observes the same
    /// outcome: the first acknowledgment or the connection's failure.
    pub async fn connect(&self, credentials: &Credentials) -> Result<Value> {
        self.inner.connect(credentials).await
    }

    /// Wait until the connection is acknowledged or has failed.
    pub async fn ready(&self) -> Result<Value> {
        self.inner.connection.ready().await
    }

    /// Execute a one-shot operation, resolving with its `data`.
    ///
    /// Resolves with `None` when the server completed the operation without
    /// sending data.
    pub async fn execute(&self, request: GraphQLRequest) -> Result<Option<Value>> {
        let payload = request.to_payload()?;
        self.execute_raw(payload, request.operation_name.as_deref()).await
    }

    /// Execute a one-shot operation and deserialize its `data`.
    pub async fn execute_as<T: DeserializeOwned>(&self, request: GraphQLRequest) -> Result<T> {
        let data = self.execute(request).await?;
        Ok(serde_json::from_value(data.unwrap_or(Value::Null))?)
    }

    /// Execute a one-shot operation from a pre-formatted `start` payload.
    pub async fn execute_raw(
        &self,
        payload: impl Into<String>,
        name: Option<&str>,
    ) -> Result<Option<Value>> {
        let payload = RawValue::from_string(payload.into())?;
        let inner = &self.inner;
        let (id, receiver) = inner.register(name.map(str::to_owned), None);
        inner.start(&id, &payload, false).await?;
        inner.settle(&id, receiver, inner.request_timeout).await
    }

    /// Open a subscription, invoking `callback` with the `data` of every
    /// streamed payload, in arrival order.
    ///
    /// The `start` frame is sent once the connection is ready. Errors never
    /// reach the callback; they settle the handle's outcome instead.
    /// Dropping the handle does not close the subscription.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, request: GraphQLRequest, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let payload = request.to_payload()?;
        self.subscribe_raw(callback, payload, request.operation_name.as_deref())
    }

    /// Open a subscription from a pre-formatted `start` payload.
    pub fn subscribe_raw<F>(
        &self,
        callback: F,
        payload: impl Into<String>,
        name: Option<&str>,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let payload = RawValue::from_string(payload.into())?;
        let subscription = Subscription::new(Arc::new(callback));
        let (id, receiver) = self
            .inner
            .register(name.map(str::to_owned), Some(subscription));

        let inner = self.inner.clone();
        let task_id = id.clone();
        let execution = tokio::spawn(async move {
            if !inner.start(&task_id, &payload, true).await? {
                return Ok(None);
            }
            // Only the outcome is awaited from here; do not keep the client alive.
            drop(inner);
            resolve(receiver.await)
        });

        Ok(SubscriptionHandle {
            closer: SubscriptionCloser {
                id,
                client: Arc::downgrade(&self.inner),
            },
            execution,
        })
    }

    /// Open a subscription delivered as a stream.
    ///
    /// The subscription is closed when the stream is dropped.
    pub fn subscribe_stream(&self, request: GraphQLRequest) -> Result<SubscriptionStream> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = self.subscribe(request, move |data| {
            let _ = sender.send(data);
        })?;
        Ok(SubscriptionStream {
            receiver,
            handle,
            outcome: None,
        })
    }

    /// Number of operations awaiting a terminal frame.
    pub fn pending_count(&self) -> usize {
        self.inner.registries.lock().pending.len()
    }

    /// Number of open subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.registries.lock().subscriptions.len()
    }
}

impl std::fmt::Debug for GraphQLSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQLSocketClient")
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// Closes a subscription. Cheap to clone.
#[derive(Clone, Debug)]
pub struct SubscriptionCloser {
    id: String,
    client: Weak<ClientInner>,
}

impl SubscriptionCloser {
    /// The subscription's correlation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remove the subscription and send `stop`.
    ///
    /// Safe to call more than once, after the client is dropped, or after
    /// the connection failed; only the first call on a live subscription
    /// sends anything.
    pub fn close(&self) {
        if let Some(inner) = self.client.upgrade() {
            inner.stop(&self.id);
        }
    }
}

/// An open subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    closer: SubscriptionCloser,
    execution: JoinHandle<Result<Option<Value>>>,
}

impl SubscriptionHandle {
    /// The subscription's correlation id.
    pub fn id(&self) -> &str {
        self.closer.id()
    }

    /// Close the subscription.
    pub fn close(&self) {
        self.closer.close();
    }

    /// A detached closer, e.g. for use from inside the callback.
    pub fn closer(&self) -> SubscriptionCloser {
        self.closer.clone()
    }

    /// Whether the outcome has settled.
    pub fn is_finished(&self) -> bool {
        self.execution.is_finished()
    }

    /// Wait for the subscription's terminal outcome.
    ///
    /// Resolves when the server completes the operation (with the last
    /// streamed `data`), reports an error for it, or the connection fails.
    pub async fn outcome(self) -> Result<Option<Value>> {
        match self.execution.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Closed),
        }
    }
}

/// A stream of subscription payloads.
///
/// Ends when the subscription settles (completed, failed, or the connection
/// dropped) or is closed.
#[derive(Debug)]
pub struct SubscriptionStream {
    receiver: mpsc::UnboundedReceiver<Value>,
    handle: SubscriptionHandle,
    outcome: Option<Result<Option<Value>>>,
}

impl SubscriptionStream {
    /// The subscription's correlation id.
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// Get the next payload's `data`.
    pub async fn next(&mut self) -> Option<Value> {
        if self.outcome.is_some() {
            return self.receiver.try_recv().ok();
        }
        tokio::select! {
            biased;
            data = self.receiver.recv() => data,
            joined = &mut self.handle.execution => {
                self.outcome = Some(joined.unwrap_or(Err(Error::Closed)));
                self.receiver.try_recv().ok()
            }
        }
    }

    /// The terminal outcome, once the stream has ended because it settled.
    pub fn outcome(&self) -> Option<&Result<Option<Value>>> {
        self.outcome.as_ref()
    }

    /// Stop the subscription.
    pub fn stop(&self) {
        self.handle.close();
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        self.handle.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_transport;

    #[test]
    fn test_closed_error_details() {
        let err = closed(Some(&CloseReason::with_reason(
            crate::transport::CloseCode::Policy,
            "bye",
        )));
        assert_eq!(err.message, "WebSocket connection closed");
        assert_eq!(err.extension("code"), Some(&json!(1008)));
        assert_eq!(err.kind, crate::normalize::ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_debug_mode_captures_trace() {
        let (transport, events, _peer) = memory_transport();
        let client = GraphQLSocketClient::builder("memory://")
            .debug(true)
            .build_with_transport(transport, events);

        let (id, _receiver) = client.inner.register(None, None);
        let registries = client.inner.registries.lock();
        assert!(registries.pending.get(&id).unwrap().trace.is_some());
    }

    #[test]
    fn test_builder_debug_hides_secrets() {
        let builder = GraphQLSocketClient::builder("memory://").admin_secret("s3cret");
        assert!(!format!("{builder:?}").contains("s3cret"));
    }
}
