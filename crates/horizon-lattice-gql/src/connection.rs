//! Connection readiness and authentication.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::normalize::NormalizedError;
use crate::protocol::{ADMIN_SECRET_HEADER, AUTHORIZATION_HEADER, ROLE_HEADER};

/// Lifecycle of the single connection owned by a client.
#[derive(Clone, Debug, Default)]
pub enum ConnectionState {
    /// Waiting for the transport to open.
    #[default]
    Connecting,
    /// The transport is open; authentication has not been acknowledged.
    Open,
    /// `connection_ack` arrived with this payload.
    Ready(Value),
    /// The connection failed before or after acknowledgment.
    Failed(Arc<NormalizedError>),
}

impl ConnectionState {
    fn is_settled(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed(_))
    }
}

/// Readiness signal shared by every operation of a client.
///
/// `Ready` and `Failed` are terminal; once failed the connection never
/// becomes ready again.
#[derive(Debug)]
pub(crate) struct Connection {
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(ConnectionState::Connecting),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn mark_open(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, ConnectionState::Connecting) {
                *state = ConnectionState::Open;
                true
            } else {
                false
            }
        });
    }

    /// Settle readiness with the acknowledgment payload. Fires once.
    pub fn acknowledge(&self, payload: Value) {
        self.state.send_if_modified(|state| {
            if state.is_settled() {
                return false;
            }
            *state = ConnectionState::Ready(payload);
            true
        });
    }

    /// Fail the connection for good.
    ///
    /// An acknowledged connection also transitions to `Failed`, so later
    /// operations fail instead of waiting on a dead transport.
    pub fn fail(&self, err: Arc<NormalizedError>) {
        self.state.send_if_modified(|state| {
            if matches!(state, ConnectionState::Failed(_)) {
                return false;
            }
            *state = ConnectionState::Failed(err);
            true
        });
    }

    /// Wait until the connection is acknowledged or failed.
    pub async fn ready(&self) -> Result<Value> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(ConnectionState::is_settled)
            .await
            .map_err(|_| Error::Closed)?;
        match &*state {
            ConnectionState::Ready(payload) => Ok(payload.clone()),
            ConnectionState::Failed(err) => Err(Error::Operation(err.clone())),
            _ => Err(Error::Closed),
        }
    }

    /// Observe state changes without borrowing the connection.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Wait until the transport has opened.
    pub async fn opened(&self) -> Result<()> {
        Self::wait_opened(self.watch()).await
    }

    /// Wait on `rx` until the transport has opened.
    pub async fn wait_opened(mut rx: watch::Receiver<ConnectionState>) -> Result<()> {
        let state = rx
            .wait_for(|state| !matches!(state, ConnectionState::Connecting))
            .await
            .map_err(|_| Error::Closed)?;
        match &*state {
            ConnectionState::Failed(err) => Err(Error::Operation(err.clone())),
            _ => Ok(()),
        }
    }
}

/// Credentials sent in `connection_init`.
///
/// Deserializable so it can be loaded from configuration files:
///
/// ```ignore
/// let credentials: Credentials = serde_json::from_str(r#"{
///     "token": "eyJhbGciOi...",
///     "role": "user",
///     "headers": { "x-hasura-user-id": "42" }
/// }"#)?;
/// ```
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Admin secret; takes precedence over `token`.
    pub admin_secret: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
    /// Role, sent last so it overrides any same-named extra header.
    pub role: Option<String>,
    /// Extra headers.
    pub headers: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admin_secret(mut self, secret: impl Into<String>) -> Self {
        self.admin_secret = Some(secret.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Whether a client built with these credentials connects eagerly.
    pub fn should_auto_connect(&self) -> bool {
        self.admin_secret.is_some() || self.token.is_some()
    }

    /// Header set for `connection_init`.
    ///
    /// The admin secret header, or `Authorization: Bearer <token>` when a
    /// token is given, then the extra headers, then the role header.
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        if let Some(secret) = &self.admin_secret {
            headers.insert(ADMIN_SECRET_HEADER.to_string(), secret.clone());
        } else if let Some(token) = &self.token {
            headers.insert(AUTHORIZATION_HEADER.to_string(), format!("Bearer {token}"));
        }
        headers.extend(self.headers.clone());
        if let Some(role) = &self.role {
            headers.insert(ROLE_HEADER.to_string(), role.clone());
        }
        headers
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("admin_secret", &redact(&self.admin_secret))
            .field("token", &redact(&self.token))
            .field("role", &self.role)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::normalize::normalize;

    #[test]
    fn test_admin_secret_headers() {
        let headers = Credentials::new()
            .admin_secret("s3cret")
            .token("ignored")
            .header("x-extra", "1")
            .headers();

        assert_eq!(headers.get(ADMIN_SECRET_HEADER).map(String::as_str), Some("s3cret"));
        assert!(!headers.contains_key(AUTHORIZATION_HEADER));
        assert_eq!(headers.get("x-extra").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_token_headers() {
        let headers = Credentials::new().token("abc").headers();
        assert_eq!(
            headers.get(AUTHORIZATION_HEADER).map(String::as_str),
            Some("Bearer abc")
        );

        assert!(Credentials::new().headers().is_empty());
    }

    #[test]
    fn test_role_overrides_extras() {
        let headers = Credentials::new()
            .token("abc")
            .header(ROLE_HEADER, "admin")
            .role("user")
            .headers();
        assert_eq!(headers.get(ROLE_HEADER).map(String::as_str), Some("user"));
    }

    #[test]
    fn test_credentials_from_config() {
        let credentials: Credentials =
            serde_json::from_value(json!({"token": "abc", "role": "user"})).unwrap();
        assert!(credentials.should_auto_connect());
        assert_eq!(credentials.role.as_deref(), Some("user"));
        assert!(!Credentials::new().role("user").should_auto_connect());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", Credentials::new().admin_secret("s3cret").token("abc"));
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("abc"));
    }

    #[tokio::test]
    async fn test_ready_settles_once() {
        let connection = Connection::new();
        connection.mark_open();
        connection.acknowledge(json!({"first": true}));
        connection.acknowledge(json!({"second": true}));

        assert_eq!(connection.ready().await.unwrap(), json!({"first": true}));
        assert_eq!(connection.ready().await.unwrap(), json!({"first": true}));
    }

    #[tokio::test]
    async fn test_failure_is_terminal() {
        let connection = Connection::new();
        let err = Arc::new(normalize(&json!("closed")));
        connection.fail(err.clone());
        connection.mark_open();
        connection.acknowledge(Value::Null);

        let received = connection.ready().await.unwrap_err();
        assert!(Arc::ptr_eq(received.normalized().unwrap(), &err));
        assert!(connection.opened().await.is_err());
    }
}
