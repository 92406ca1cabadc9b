use tokio::sync::broadcast;
use tracing::debug;

use wayfare_shared::models::events::EngineEvent;

/// In-process publisher for lifecycle events. SSE subscribers hang off the
/// broadcast channel; every publish also lands in the structured log.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Delivery to subscribers is best effort; an event with no listeners is
    /// still logged.
    pub fn publish(&self, event: EngineEvent) {
        debug!(kind = event.kind(), trip_id = ?event.trip_id(), "engine event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}
