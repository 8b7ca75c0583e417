//! Console event bus.
//!
//! Workflow code publishes named events after every applied change so any
//! attached UI (terminal console, webview bridge) can re-render without
//! polling. Publishing never fails: events without subscribers are dropped.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct ConsoleEvent {
    pub name: &'static str,
    pub payload: Value,
    pub at: String,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConsoleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, name: &'static str, payload: impl Serialize) {
        let payload = serde_json::to_value(payload).unwrap_or(Value::Null);
        let event = ConsoleEvent {
            name,
            payload,
            at: chrono::Utc::now().to_rfc3339(),
        };
        if self.tx.send(event).is_err() {
            trace!(event = name, "no event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit("receiving_paused", serde_json::json!({ "session_id": "20260110093000" }));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "receiving_paused");
        assert_eq!(event.payload["session_id"], "20260110093000");
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.emit("receiving_reset", serde_json::json!({}));
    }
}
