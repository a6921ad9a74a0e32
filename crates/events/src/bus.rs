//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out [`DomainEvent`]s (annotation saves, edit changes)
//! to any number of observers. Share it via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use roboqa_core::types::EpisodeIndex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

pub const EVENT_ANNOTATION_SAVED: &str = "annotation.saved";
pub const EVENT_ANNOTATION_DELETED: &str = "annotation.deleted";
pub const EVENT_ANOMALY_VERIFIED: &str = "anomaly.verified";
pub const EVENT_EDITS_SAVED: &str = "edits.saved";
pub const EVENT_EDITS_DELETED: &str = "edits.deleted";

// ---------------------------------------------------------------------------
// DomainEvent
// ---------------------------------------------------------------------------

/// Something that changed for one (dataset, episode) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Dot-separated event name, e.g. `"annotation.saved"`.
    pub event_type: String,
    pub dataset: String,
    pub episode_index: EpisodeIndex,
    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(event_type: impl Into<String>, dataset: impl Into<String>, episode_index: EpisodeIndex) -> Self {
        Self {
            event_type: event_type.into(),
            dataset: dataset.into(),
            episode_index,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use roboqa_events::bus::{DomainEvent, EventBus};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(DomainEvent::new("annotation.saved", "pick_place", 3));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    /// When the buffer is full the oldest events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if nobody listens.
    pub fn publish(&self, event: DomainEvent) {
        tracing::trace!(event_type = %event.event_type, episode_index = event.episode_index, "Publishing event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(
            DomainEvent::new(EVENT_ANNOTATION_SAVED, "ds", 7)
                .with_payload(serde_json::json!({"annotator_id": "alice"})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, "annotation.saved");
        assert_eq!(received.dataset, "ds");
        assert_eq!(received.episode_index, 7);
        assert_eq!(received.payload["annotator_id"], "alice");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(DomainEvent::new(EVENT_EDITS_SAVED, "ds", 1));

        assert_eq!(rx1.recv().await.unwrap().event_type, "edits.saved");
        assert_eq!(rx2.recv().await.unwrap().event_type, "edits.saved");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(DomainEvent::new(EVENT_EDITS_DELETED, "ds", 0));
    }
}
