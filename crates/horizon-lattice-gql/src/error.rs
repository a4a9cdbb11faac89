//! Error types for the GraphQL socket client.

use std::sync::Arc;

use crate::normalize::NormalizedError;

/// Errors surfaced by client operations.
///
/// Failures reported by the server, and fatal transport failures that are
/// broadcast to every outstanding operation, arrive as [`Error::Operation`].
/// A broadcast failure is the *same* [`NormalizedError`] instance for every
/// operation it terminated.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The operation failed with a normalized protocol or transport error.
    #[error("{0}")]
    Operation(Arc<NormalizedError>),

    /// Variables could not be serialized as a JSON object.
    #[error("invalid variables: {0}")]
    InvalidVariables(String),

    /// A query was run as a subscription, or the other way around.
    #[error("{0}")]
    OperationType(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// WebSocket handshake or I/O error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Invalid handshake header name or value.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The transport is not connected.
    #[error("not connected")]
    NotConnected,

    /// The opt-in request timeout elapsed before a terminal frame arrived.
    #[error("operation timed out")]
    Timeout,

    /// The client was dropped before the operation settled.
    #[error("client closed before the operation settled")]
    Closed,
}

impl Error {
    /// The normalized error behind an [`Error::Operation`], if any.
    pub fn normalized(&self) -> Option<&Arc<NormalizedError>> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<Arc<NormalizedError>> for Error {
    fn from(err: Arc<NormalizedError>) -> Self {
        Self::Operation(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

/// A specialized Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
