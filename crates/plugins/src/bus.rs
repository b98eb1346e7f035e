//! In-process event bus for plugin-to-plugin and plugin-to-core
//! notifications. Distinct from the transport's event channel; the two are
//! not mirrored.
//!
//! Buffered broadcast: when the buffer overflows, the oldest emissions are
//! discarded before the newest. Subscribers choose one event type or the
//! wildcard.

use serde_json::Value;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct BusEvent {
    pub event_type: String,
    pub payload: Value,
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Non-blocking publish. Nobody listening is fine.
    pub fn emit(&self, event_type: impl Into<String>, payload: Value) {
        let event = BusEvent {
            event_type: event_type.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let _ = self.tx.send(event);
    }

    /// Subscribe to one event type, or to everything with `None`.
    pub fn subscribe(&self, event_type: Option<String>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: event_type,
        }
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<BusEvent>,
    filter: Option<String>,
}

impl Subscription {
    /// Next matching event. Lagging silently skips the discarded backlog;
    /// `None` means the bus itself is gone.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    let matches = self
                        .filter
                        .as_deref()
                        .map_or(true, |f| f == event.event_type);
                    if matches {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn typed_subscription_filters() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Some("ui.toast".into()));
        bus.emit("perf.sample", json!({"n": 1}));
        bus.emit("ui.toast", json!({"text": "saved"}));
        let event = sub.recv().await.unwrap();
        assert_eq!(event.event_type, "ui.toast");
        assert_eq!(event.payload["text"], "saved");
    }

    #[tokio::test]
    async fn wildcard_subscription_sees_everything() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);
        bus.emit("a", json!(1));
        bus.emit("b", json!(2));
        assert_eq!(sub.recv().await.unwrap().event_type, "a");
        assert_eq!(sub.recv().await.unwrap().event_type, "b");
    }

    #[tokio::test]
    async fn overflow_discards_oldest_first() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);
        for i in 0..(BUS_CAPACITY + 8) {
            bus.emit("tick", json!(i));
        }
        // The first events were discarded; the subscriber resumes at the
        // oldest retained emission and still reaches the newest.
        let first = sub.recv().await.unwrap();
        assert!(first.payload.as_u64().unwrap() >= 8);
        let mut last = first.payload.as_u64().unwrap();
        while let Ok(Some(e)) = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            sub.recv(),
        )
        .await
        {
            last = e.payload.as_u64().unwrap();
        }
        assert_eq!(last, (BUS_CAPACITY + 7) as u64);
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        bus.emit("nobody", json!(null));
    }
}
