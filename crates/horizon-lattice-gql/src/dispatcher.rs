//! Routing of inbound frames against the registries.
//!
//! [`dispatch`] is the single place inbound frames are consumed. It runs with
//! the registries locked and returns whatever must happen after the lock is
//! released: readiness changes and subscription deliveries.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::log::{LogSink, events, targets};
use crate::normalize::{NormalizedError, normalize};
use crate::protocol::ServerFrame;
use crate::registry::{Registries, SubscriptionCallback};

/// Follow-up work for the caller of [`dispatch`].
pub(crate) enum Dispatch {
    /// Nothing left to do.
    Handled,
    /// `connection_ack` arrived with this payload.
    Acknowledged(Value),
    /// `connection_error` arrived; every entry has already been failed.
    Fatal(Arc<NormalizedError>),
    /// Invoke a subscription callback.
    Deliver {
        callback: SubscriptionCallback,
        data: Value,
    },
}

/// Apply one inbound frame of `size` bytes to the registries.
pub(crate) fn dispatch(
    registries: &mut Registries,
    frame: ServerFrame,
    size: usize,
    log: &dyn LogSink,
) -> Dispatch {
    if let Some(id) = frame.id()
        && let Some(operation) = registries.pending.get_mut(id)
    {
        operation.size += size;
    }

    let kind = frame.kind();
    match frame {
        ServerFrame::ConnectionAck { payload } => {
            Dispatch::Acknowledged(payload.unwrap_or(Value::Null))
        }
        ServerFrame::ConnectionError { payload } => {
            let err = Arc::new(normalize(&payload.unwrap_or(Value::Null)));
            tracing::debug!(target: targets::CLIENT, error = %err, "connection rejected");
            registries.fail_all(&err, log);
            Dispatch::Fatal(err)
        }
        ServerFrame::Data { id, payload } if has_errors(&payload) => {
            fail_operation(registries, &id, &payload, kind, log);
            Dispatch::Handled
        }
        ServerFrame::Error { id, payload } => {
            fail_operation(registries, &id, &payload, kind, log);
            Dispatch::Handled
        }
        ServerFrame::Data { id, mut payload } => {
            if let Some(subscription) = registries.subscriptions.get(&id) {
                let callback = subscription.callback.clone();
                let data = payload.get_mut("data").map(Value::take).unwrap_or_default();
                if let Some(operation) = registries.pending.get_mut(&id) {
                    operation.payload = Some(payload);
                }
                Dispatch::Deliver { callback, data }
            } else if let Some(operation) = registries.pending.get_mut(&id) {
                operation.payload = Some(payload);
                Dispatch::Handled
            } else {
                missing_handler(log, &id, kind);
                Dispatch::Handled
            }
        }
        ServerFrame::Complete { id } => {
            if let Some(operation) = registries.pending.remove(&id) {
                operation.succeed(log);
            }
            Dispatch::Handled
        }
        ServerFrame::KeepAlive => Dispatch::Handled,
        ServerFrame::Unknown => {
            tracing::debug!(target: targets::CLIENT, "ignoring frame of unknown type");
            Dispatch::Handled
        }
    }
}

/// `errors: null` next to `data` is a success.
fn has_errors(payload: &Value) -> bool {
    !matches!(payload.get("errors"), None | Some(Value::Null))
}

fn fail_operation(
    registries: &mut Registries,
    id: &str,
    payload: &Value,
    kind: &str,
    log: &dyn LogSink,
) {
    let Some(operation) = registries.pending.remove(id) else {
        missing_handler(log, id, kind);
        return;
    };
    let mut err = normalize(payload);
    err.trace = operation.trace.clone();
    operation.fail(Arc::new(err), log);
}

fn missing_handler(log: &dyn LogSink, id: &str, kind: &str) {
    log.log(events::MISSING_HANDLER, json!({ "id": id, "type": kind }));
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::id::IdGenerator;
    use crate::log::NoopLog;
    use crate::registry::{PendingOperation, Subscription};

    fn frame(text: &str) -> ServerFrame {
        ServerFrame::decode(text).unwrap()
    }

    fn registries() -> Registries {
        Registries::new(IdGenerator::default())
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, Value)>>);

    impl LogSink for Recorder {
        fn log(&self, event: &str, fields: Value) {
            self.0.lock().push((event.to_string(), fields));
        }
    }

    #[test]
    fn test_data_then_complete_resolves_once() {
        let mut registries = registries();
        let (operation, mut rx) = PendingOperation::new("a1".into(), None, None);
        registries.pending.insert("a1".into(), operation);

        let data = r#"{"type":"data","id":"a1","payload":{"data":{"n":1}}}"#;
        dispatch(&mut registries, frame(data), data.len(), &NoopLog);
        assert!(rx.try_recv().is_err());
        assert_eq!(registries.pending.get("a1").unwrap().size, data.len());

        let complete = r#"{"type":"complete","id":"a1"}"#;
        dispatch(&mut registries, frame(complete), complete.len(), &NoopLog);
        assert_eq!(rx.try_recv().unwrap().unwrap(), Some(json!({"n": 1})));
        assert!(registries.pending.is_empty());

        // A repeated complete is a no-op.
        dispatch(&mut registries, frame(complete), complete.len(), &NoopLog);
    }

    #[test]
    fn test_null_errors_is_success() {
        let mut registries = registries();
        let (operation, mut rx) = PendingOperation::new("a1".into(), None, None);
        registries.pending.insert("a1".into(), operation);

        let data = r#"{"type":"data","id":"a1","payload":{"data":{"n":1},"errors":null}}"#;
        dispatch(&mut registries, frame(data), data.len(), &NoopLog);
        assert!(rx.try_recv().is_err());

        let complete = r#"{"type":"complete","id":"a1"}"#;
        dispatch(&mut registries, frame(complete), complete.len(), &NoopLog);
        assert_eq!(rx.try_recv().unwrap().unwrap(), Some(json!({"n": 1})));
    }

    #[test]
    fn test_data_with_errors_fails_operation() {
        let mut registries = registries();
        let (operation, mut rx) =
            PendingOperation::new("a1".into(), None, Some("trace".into()));
        registries.pending.insert("a1".into(), operation);

        let text = r#"{"type":"data","id":"a1","payload":{"errors":[{"message":"denied","extensions":{"code":"access-denied"}}]}}"#;
        dispatch(&mut registries, frame(text), text.len(), &NoopLog);

        let err = rx.try_recv().unwrap().unwrap_err();
        assert_eq!(err.message, "denied");
        assert_eq!(err.code(), Some("access-denied"));
        assert_eq!(err.trace.as_deref(), Some("trace"));
        assert!(registries.pending.is_empty());
    }

    #[test]
    fn test_error_frame_fails_operation() {
        let mut registries = registries();
        let (operation, mut rx) = PendingOperation::new("a1".into(), None, None);
        registries.pending.insert("a1".into(), operation);

        let text = r#"{"type":"error","id":"a1","payload":{"message":"bad query"}}"#;
        dispatch(&mut registries, frame(text), text.len(), &NoopLog);

        assert_eq!(rx.try_recv().unwrap().unwrap_err().message, "bad query");
    }

    #[test]
    fn test_subscription_data_is_delivered_in_order() {
        let mut registries = registries();
        let (operation, mut rx) = PendingOperation::new("b2".into(), None, None);
        registries.pending.insert("b2".into(), operation);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registries.subscriptions.insert(
            "b2".into(),
            Subscription::new(Arc::new(move |data: Value| sink.lock().push(data))),
        );

        for n in 1..=2 {
            let text = format!(r#"{{"type":"data","id":"b2","payload":{{"data":{n}}}}}"#);
            match dispatch(&mut registries, frame(&text), text.len(), &NoopLog) {
                Dispatch::Deliver { callback, data } => callback(data),
                _ => panic!("expected delivery"),
            }
        }

        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
        assert!(registries.subscriptions.contains("b2"));
        assert!(registries.pending.contains("b2"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_connection_error_fails_everything() {
        let mut registries = registries();
        let (operation, mut rx) = PendingOperation::new("a1".into(), None, None);
        registries.pending.insert("a1".into(), operation);
        registries.subscriptions.insert(
            "b2".into(),
            Subscription::new(Arc::new(|_: Value| {})),
        );

        let text = r#"{"type":"connection_error","payload":"invalid token"}"#;
        let Dispatch::Fatal(err) = dispatch(&mut registries, frame(text), text.len(), &NoopLog)
        else {
            panic!("expected fatal dispatch");
        };

        assert_eq!(err.message, "invalid token");
        assert!(Arc::ptr_eq(&rx.try_recv().unwrap().unwrap_err(), &err));
        assert!(registries.pending.is_empty());
        assert!(registries.subscriptions.is_empty());
    }

    #[test]
    fn test_unknown_ids_are_logged_anomalies() {
        let recorder = Recorder::default();
        let mut registries = registries();

        for text in [
            r#"{"type":"data","id":"zz","payload":{"data":{}}}"#,
            r#"{"type":"error","id":"zz","payload":{"message":"x"}}"#,
            r#"{"type":"complete","id":"zz"}"#,
        ] {
            dispatch(&mut registries, frame(text), text.len(), &recorder);
        }

        let logged = recorder.0.lock();
        assert_eq!(logged.len(), 2);
        assert!(logged.iter().all(|(event, _)| event == events::MISSING_HANDLER));
        assert_eq!(logged[0].1, json!({"id": "zz", "type": "data"}));
        assert_eq!(logged[1].1, json!({"id": "zz", "type": "error"}));
    }

    #[test]
    fn test_connection_ack_carries_payload() {
        let mut registries = registries();
        let text = r#"{"type":"connection_ack","payload":{"server":"ok"}}"#;
        let Dispatch::Acknowledged(payload) =
            dispatch(&mut registries, frame(text), text.len(), &NoopLog)
        else {
            panic!("expected acknowledgment");
        };
        assert_eq!(payload, json!({"server": "ok"}));
    }
}
