//! Wire frames of the `graphql-ws` protocol (subscriptions-transport-ws).
//!
//! Every frame is a JSON text message with a `type` discriminator. Operation
//! frames carry the correlation `id` chosen by the client.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

/// WebSocket subprotocol negotiated during the handshake.
pub const SUBPROTOCOL: &str = "graphql-ws";

/// The keep-alive frame, matched literally before parsing.
pub const KEEP_ALIVE_FRAME: &str = r#"{"type":"ka"}"#;

/// Header carrying the admin secret in `connection_init`.
pub const ADMIN_SECRET_HEADER: &str = "x-hasura-admin-secret";

/// Header carrying the bearer token in `connection_init`.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Header selecting the role in `connection_init`.
pub const ROLE_HEADER: &str = "x-hasura-role";

/// Client -> Server frames.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame<'a> {
    /// Authenticate the connection.
    ConnectionInit { payload: InitPayload },
    /// Start an operation.
    Start { id: &'a str, payload: &'a RawValue },
    /// Stop a subscription.
    Stop { id: &'a str },
}

impl ClientFrame<'_> {
    /// Encode as a text frame.
    pub fn encode(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload of `connection_init`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitPayload {
    pub headers: BTreeMap<String, String>,
}

/// Server -> Client frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Connection acknowledged.
    ConnectionAck {
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Connection rejected; fatal for every operation.
    ConnectionError {
        #[serde(default)]
        payload: Option<Value>,
    },
    /// Operation result, either `{"data": ...}` or `{"errors": [...]}`.
    Data {
        #[serde(default)]
        id: String,
        #[serde(default)]
        payload: Value,
    },
    /// Operation error.
    Error {
        #[serde(default)]
        id: String,
        #[serde(default)]
        payload: Value,
    },
    /// Operation complete.
    Complete {
        #[serde(default)]
        id: String,
    },
    /// Keep-alive.
    #[serde(rename = "ka")]
    KeepAlive,
    /// Any other frame type.
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// Parse a text frame.
    pub fn decode(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Correlation id, for operation frames.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Data { id, .. } | Self::Error { id, .. } | Self::Complete { id } => Some(id),
            _ => None,
        }
    }

    /// Frame type as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionAck { .. } => "connection_ack",
            Self::ConnectionError { .. } => "connection_error",
            Self::Data { .. } => "data",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
            Self::KeepAlive => "ka",
            Self::Unknown => "unknown",
        }
    }
}
