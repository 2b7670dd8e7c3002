//! Event bus: fan-out to connected push clients.
//!
//! Broadcast policy: snapshot the subscriber list under the lock, release
//! it, fan out concurrently with a per-subscriber send deadline, then
//! batch-remove the subscribers that failed. A slow client can never
//! block delivery to the others.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Per-subscriber send deadline.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffered events per subscriber before its sends start timing out.
const SUBSCRIBER_CAPACITY: usize = 256;

/// Envelope delivered to push clients.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Event>,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a subscriber. The caller drains the receiver; dropping it
    /// makes the next broadcast clean the subscriber up.
    pub async fn subscribe(&self) -> (u64, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.lock().await.push(Subscriber { id, tx });
        tracing::info!("Push subscriber {id} connected");
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.inner.subscribers.lock().await;
        subscribers.retain(|s| s.id != id);
        tracing::info!("Push subscriber {id} disconnected ({} remain)", subscribers.len());
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().await.len()
    }

    /// Broadcast an event to all subscribers.
    pub async fn broadcast(&self, event_type: &str, data: serde_json::Value) {
        let event = Event {
            event_type: event_type.to_string(),
            data,
        };

        let snapshot: Vec<(u64, mpsc::Sender<Event>)> = {
            let subscribers = self.inner.subscribers.lock().await;
            subscribers.iter().map(|s| (s.id, s.tx.clone())).collect()
        };
        if snapshot.is_empty() {
            return;
        }

        let mut sends = JoinSet::new();
        for (id, tx) in snapshot {
            let event = event.clone();
            sends.spawn(async move {
                match timeout(SEND_TIMEOUT, tx.send(event)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(_)) => Some(id),
                    Err(_) => {
                        tracing::debug!("Send to subscriber {id} timed out");
                        Some(id)
                    }
                }
            });
        }

        let mut failed = Vec::new();
        while let Some(result) = sends.join_next().await {
            if let Ok(Some(id)) = result {
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.inner.subscribers.lock().await;
            subscribers.retain(|s| !failed.contains(&s.id));
            tracing::debug!("Removed {} dead subscriber(s)", failed.len());
        }
    }

    /// Toast-style error notification.
    pub async fn broadcast_error(&self, message: &str, details: Option<&str>) {
        let mut data = serde_json::json!({ "message": message });
        if let Some(details) = details {
            data["details"] = serde_json::Value::String(details.to_string());
        }
        self.broadcast("error", data).await;
    }

    /// Toast-style success notification.
    pub async fn broadcast_success(&self, message: &str, details: Option<&str>) {
        let mut data = serde_json::json!({ "message": message });
        if let Some(details) = details {
            data["details"] = serde_json::Value::String(details.to_string());
        }
        self.broadcast("success", data).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let bus = EventBus::new();
        let (_id1, mut rx1) = bus.subscribe().await;
        let (_id2, mut rx2) = bus.subscribe().await;

        bus.broadcast("health", serde_json::json!({"radio_connected": true}))
            .await;

        for rx in [&mut rx1, &mut rx2] {
            let event = rx.recv().await.expect("event");
            assert_eq!(event.event_type, "health");
            assert_eq!(event.data["radio_connected"], true);
        }
    }

    #[tokio::test]
    async fn test_dropped_subscriber_removed_on_broadcast() {
        let bus = EventBus::new();
        let (_id1, rx1) = bus.subscribe().await;
        let (_id2, mut rx2) = bus.subscribe().await;
        drop(rx1);

        bus.broadcast("contact", serde_json::json!({})).await;
        assert_eq!(bus.subscriber_count().await, 1);
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let (id, _rx) = bus.subscribe().await;
        bus.unsubscribe(id).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.broadcast("message", serde_json::json!({})).await;
    }

    #[tokio::test]
    async fn test_error_envelope_shape() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe().await;

        bus.broadcast_error("Reconnection failed", Some("port gone")).await;

        let event = rx.recv().await.expect("event");
        assert_eq!(event.event_type, "error");
        assert_eq!(event.data["message"], "Reconnection failed");
        assert_eq!(event.data["details"], "port gone");
    }

    #[tokio::test]
    async fn test_event_serializes_as_type_data_envelope() {
        let event = Event {
            event_type: "message_acked".to_string(),
            data: serde_json::json!({"message_id": 3}),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "message_acked");
        assert_eq!(json["data"]["message_id"], 3);
    }
}
