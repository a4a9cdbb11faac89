//! Pending-operation and subscription registries.
//!
//! [`Registries`] is the only mutable state shared between the operation
//! façade and the frame dispatcher. It lives behind one lock on the client and
//! is never held across an await point or while a subscription callback runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::id::IdGenerator;
use crate::log::{LogSink, events};
use crate::normalize::NormalizedError;

/// Terminal result delivered to the caller of an operation.
pub(crate) type Outcome = std::result::Result<Option<Value>, Arc<NormalizedError>>;

/// Callback invoked with the `data` of each streamed subscription payload.
pub type SubscriptionCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// A keyed map of in-flight entries.
pub(crate) struct Registry<T> {
    entries: HashMap<String, T>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: String, entry: T) {
        let previous = self.entries.insert(id, entry);
        debug_assert!(previous.is_none(), "correlation id registered twice");
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut T> {
        self.entries.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Remove every entry, yielding each exactly once.
    pub fn drain(&mut self) -> Vec<(String, T)> {
        self.entries.drain().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An in-flight operation awaiting its terminal frame.
pub(crate) struct PendingOperation {
    pub id: String,
    pub name: Option<String>,
    pub started: Instant,
    /// Bytes of every inbound frame addressed to this operation.
    pub size: usize,
    /// Last `data` payload, consumed by `complete`.
    pub payload: Option<Value>,
    pub trace: Option<String>,
    responder: oneshot::Sender<Outcome>,
}

impl PendingOperation {
    pub fn new(
        id: String,
        name: Option<String>,
        trace: Option<String>,
    ) -> (Self, oneshot::Receiver<Outcome>) {
        let (responder, receiver) = oneshot::channel();
        let operation = Self {
            id,
            name,
            started: Instant::now(),
            size: 0,
            payload: None,
            trace,
            responder,
        };
        (operation, receiver)
    }

    /// Resolve with the stashed payload's `data`.
    ///
    /// Consumes the operation, so each operation settles at most once.
    pub fn succeed(mut self, log: &dyn LogSink) {
        let payload = self.payload.take();
        self.report(log, "complete", payload.clone().unwrap_or(Value::Null));
        let data = payload.and_then(|mut payload| payload.get_mut("data").map(Value::take));
        let _ = self.responder.send(Ok(data));
    }

    /// Reject with a normalized error.
    pub fn fail(self, err: Arc<NormalizedError>, log: &dyn LogSink) {
        self.report(log, "error", err.to_value());
        let _ = self.responder.send(Err(err));
    }

    fn report(&self, log: &dyn LogSink, kind: &str, payload: Value) {
        log.log(
            events::QUERY,
            json!({
                "id": self.id,
                "name": self.name,
                "type": kind,
                "duration": self.started.elapsed().as_millis() as u64,
                "size": self.size,
                "payload": payload,
            }),
        );
    }
}

/// An active subscription.
pub(crate) struct Subscription {
    pub callback: SubscriptionCallback,
    /// Whether `start` was sent, so closing it needs a `stop`.
    pub started: bool,
}

impl Subscription {
    pub fn new(callback: SubscriptionCallback) -> Self {
        Self {
            callback,
            started: false,
        }
    }
}

/// Both registries plus the id generator keyed against them.
pub(crate) struct Registries {
    pub pending: Registry<PendingOperation>,
    pub subscriptions: Registry<Subscription>,
    ids: IdGenerator,
}

impl Registries {
    pub fn new(ids: IdGenerator) -> Self {
        Self {
            pending: Registry::new(),
            subscriptions: Registry::new(),
            ids,
        }
    }

    /// Allocate an id unused by either registry.
    pub fn allocate_id(&mut self) -> String {
        let pending = &self.pending;
        let subscriptions = &self.subscriptions;
        self.ids
            .next(|id| pending.contains(id) || subscriptions.contains(id))
    }

    /// Drop every subscription and fail every pending operation with `err`.
    ///
    /// Subscriptions are not replayed; the client is unusable afterwards.
    pub fn fail_all(&mut self, err: &Arc<NormalizedError>, log: &dyn LogSink) {
        if self.pending.is_empty() && self.subscriptions.is_empty() {
            return;
        }
        self.subscriptions.clear();
        for (_, operation) in self.pending.drain() {
            operation.fail(err.clone(), log);
        }
    }

    /// Forget an operation without settling it.
    pub fn abandon(&mut self, id: &str) {
        self.subscriptions.remove(id);
        self.pending.remove(id);
    }
}
