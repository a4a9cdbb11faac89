//! Structured operation logging.
//!
//! The client reports operation lifecycle events to a [`LogSink`]:
//!
//! | event             | fields                                              |
//! |-------------------|-----------------------------------------------------|
//! | `start`           | `id`, `payload`                                     |
//! | `raw`             | `frame` (every inbound frame except keep-alives)    |
//! | `query`           | `id`, `name`, `type`, `duration`, `size`, `payload` |
//! | `stop`            | `id`                                                |
//! | `missing-handler` | `id`, `type`                                        |
//!
//! The default sink, [`TracingLog`], forwards events to `tracing`. Install a
//! subscriber in your application to see them:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_lattice_gql=debug")
//!     .init();
//! ```

use serde_json::Value;

/// Target names for log filtering.
pub mod targets {
    /// Client, registries and frame dispatch.
    pub const CLIENT: &str = "horizon_lattice_gql::client";
    /// Operation lifecycle events emitted by [`TracingLog`](super::TracingLog).
    pub const OPERATION: &str = "horizon_lattice_gql::operation";
    /// WebSocket transport.
    pub const TRANSPORT: &str = "horizon_lattice_gql::transport";
}

/// Event names passed to [`LogSink::log`].
pub mod events {
    pub const START: &str = "start";
    pub const RAW: &str = "raw";
    pub const QUERY: &str = "query";
    pub const STOP: &str = "stop";
    pub const MISSING_HANDLER: &str = "missing-handler";
}

/// Receives structured operation events.
///
/// Sinks are invoked while the client's registries are locked and must not
/// call back into the client.
pub trait LogSink: Send + Sync + 'static {
    fn log(&self, event: &str, fields: Value);
}

impl<F> LogSink for F
where
    F: Fn(&str, Value) + Send + Sync + 'static,
{
    fn log(&self, event: &str, fields: Value) {
        self(event, fields)
    }
}

/// Forwards events to `tracing` under [`targets::OPERATION`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl LogSink for TracingLog {
    fn log(&self, event: &str, fields: Value) {
        match event {
            events::MISSING_HANDLER => {
                tracing::warn!(
                    target: targets::OPERATION,
                    event,
                    %fields,
                    "frame for unknown operation"
                )
            }
            events::RAW => tracing::trace!(target: targets::OPERATION, event, %fields),
            _ => tracing::debug!(target: targets::OPERATION, event, %fields),
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLog;

impl LogSink for NoopLog {
    fn log(&self, _event: &str, _fields: Value) {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |event: &str, fields: Value| seen.lock().push((event.to_string(), fields))
        };

        sink.log(events::STOP, json!({"id": "a1"}));
        NoopLog.log(events::STOP, json!({}));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "stop");
        assert_eq!(seen[0].1["id"], "a1");
    }
}
