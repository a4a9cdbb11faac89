//! Multiplexing GraphQL-over-WebSocket client for Horizon Lattice.
//!
//! One socket carries many concurrent operations, one-shot queries and
//! mutations as well as long-lived subscriptions, correlated by an id in
//! every frame. The client speaks the `graphql-ws` protocol
//! (subscriptions-transport-ws) as served by Hasura and Apollo.
//!
//! # Queries and Mutations
//!
//! ```ignore
//! use horizon_lattice_gql::{GraphQLRequest, GraphQLSocketClient};
//!
//! let client = GraphQLSocketClient::builder("wss://example.com/v1/graphql")
//!     .token("eyJhbGciOi...")
//!     .build()?;
//!
//! let request = GraphQLRequest::query("query($id: Int!) { user(id: $id) { name } }")
//!     .variable("id", 42)
//!     .operation_name("GetUser");
//!
//! // `data` of the response
//! let data = client.execute(request).await?;
//! ```
//!
//! # Subscriptions
//!
//! ```ignore
//! let request = GraphQLRequest::subscription("subscription { events { id } }");
//! let handle = client.subscribe(request, |data| println!("event: {data}"))?;
//!
//! // Later: remove the subscription and send `stop`
//! handle.close();
//! ```
//!
//! Or as a stream, closed when dropped:
//!
//! ```ignore
//! let mut events = client.subscribe_stream(request)?;
//! while let Some(data) = events.next().await {
//!     println!("event: {data}");
//! }
//! ```
//!
//! # Authentication
//!
//! With an admin secret or token the client sends `connection_init` as soon
//! as the socket opens. Otherwise call [`GraphQLSocketClient::connect`]:
//!
//! ```ignore
//! let ack = client
//!     .connect(&Credentials::new().token(token).role("user"))
//!     .await?;
//! ```
//!
//! Every operation waits until the connection is acknowledged.
//!
//! # Failure
//!
//! Errors reported for one operation fail only that operation. A
//! `connection_error` or a transport error/close fails every outstanding
//! operation with the same [`NormalizedError`] and leaves the client
//! unusable. There is no reconnection and subscriptions are not replayed;
//! build a new client instead.
//!
//! # Logging
//!
//! Operation events go to a [`LogSink`] ([`TracingLog`] by default);
//! internal diagnostics use `tracing` under the targets in
//! [`log::targets`].

mod client;
mod connection;
mod dispatcher;
mod error;
mod id;
pub mod log;
mod normalize;
mod prepare;
pub mod protocol;
mod registry;
mod request;
pub mod transport;

pub use client::{
    ClientBuilder, GraphQLSocketClient, SubscriptionCloser, SubscriptionHandle, SubscriptionStream,
};
pub use connection::{ConnectionState, Credentials};
pub use error::{Error, Result};
pub use id::{IdGenerator, IdSource, RandomIds};
pub use log::{LogSink, NoopLog, TracingLog};
pub use normalize::{ErrorKind, NormalizedError, normalize};
pub use prepare::{Extract, PreparedOperation};
pub use request::{GraphQLRequest, OperationType, format_payload};
pub use transport::{
    CloseCode, CloseReason, MemoryPeer, MemoryTransport, Transport, TransportEvent,
    TransportEvents, TransportState, WebSocketConfig, WebSocketTransport, memory_transport,
};
