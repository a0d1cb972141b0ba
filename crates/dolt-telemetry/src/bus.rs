use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::events::TelemetryEvent;

/// Callback invoked synchronously for every emitted event.
pub type TelemetryHandler = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

/// Handle returned by [`TelemetryBus::subscribe`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct BusInner {
    handlers: RwLock<Vec<(SubscriptionId, TelemetryHandler)>>,
    next_id: AtomicU64,
    tx: broadcast::Sender<TelemetryEvent>,
}

/// Fan-out point for telemetry events. Cheap to clone; clones share
/// subscribers.
#[derive(Clone)]
pub struct TelemetryBus {
    inner: Arc<BusInner>,
}

impl TelemetryBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// `capacity` bounds the broadcast backlog for channel subscribers.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                tx,
            }),
        }
    }

    /// Register a handler. Keep the returned id to unsubscribe.
    pub fn subscribe(
        &self,
        handler: impl Fn(&TelemetryEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.inner.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    /// Async consumers receive events through a broadcast channel.
    /// Slow receivers observe `RecvError::Lagged` rather than blocking emitters.
    pub fn subscribe_channel(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.inner.tx.subscribe()
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().len()
    }

    pub fn emit(&self, event: TelemetryEvent) {
        debug!(
            event_type = event.event_type(),
            session_id = event.session_id.as_ref().map(|s| s.as_str()).unwrap_or(""),
            "telemetry event"
        );

        // Snapshot so handlers may subscribe/unsubscribe without deadlocking.
        let handlers: Vec<TelemetryHandler> = self
            .inner
            .handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(&event);
        }

        // No receivers is fine.
        let _ = self.inner.tx.send(event);
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TelemetryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

/// Test helper: collects every event emitted on a bus.
#[derive(Clone, Default)]
pub struct EventCollector {
    events: Arc<parking_lot::Mutex<Vec<TelemetryEvent>>>,
}

impl EventCollector {
    pub fn attach(bus: &TelemetryBus) -> Self {
        let collector = Self::default();
        let sink = collector.events.clone();
        let _ = bus.subscribe(move |evt| sink.lock().push(evt.clone()));
        collector
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
