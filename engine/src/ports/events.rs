//! EventEmitter port
//! Fire-and-forget notifications for state changes and remote communication

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::debug;

/// One emitted event. Delivery is best-effort; slow subscribers lose events.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: String,
    pub payload: HashMap<String, String>,
}

/// Fire-and-forget event sink consumed by the core.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, kind: &str, payload: HashMap<String, String>);
}

/// Emitter that drops everything.
#[derive(Default)]
pub struct NoopEmitter;

impl EventEmitter for NoopEmitter {
    fn emit(&self, _kind: &str, _payload: HashMap<String, String>) {}
}

/// In-process broadcast emitter. Adapters subscribe to forward events to
/// eventlisteners or remote callers.
pub struct BroadcastEmitter {
    tx: broadcast::Sender<Event>,
}

impl BroadcastEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEmitter {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventEmitter for BroadcastEmitter {
    fn emit(&self, kind: &str, payload: HashMap<String, String>) {
        let event = Event {
            kind: kind.to_string(),
            payload,
        };
        debug!(kind = %event.kind, "emitting event");
        // no subscribers is fine; emission is fire-and-forget
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscriber() {
        let emitter = BroadcastEmitter::new(8);
        let mut rx = emitter.subscribe();

        let mut payload = HashMap::new();
        payload.insert("processname".to_string(), "web".to_string());
        emitter.emit("PROCESS_STATE_RUNNING", payload);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "PROCESS_STATE_RUNNING");
        assert_eq!(event.payload.get("processname").unwrap(), "web");
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let emitter = BroadcastEmitter::new(8);
        emitter.emit("PROCESS_STATE_STOPPED", HashMap::new());
    }
}
