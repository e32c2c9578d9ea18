//! Event bus for workflow observability
//!
//! Tokio broadcast channel. Publishing never fails a run: with no
//! subscribers the event is simply dropped.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::WorkflowEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: WorkflowEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn started(workflow_id: &str) -> WorkflowEvent {
        WorkflowEvent::LevelCompleted {
            workflow_id: workflow_id.into(),
            level: 0,
            node_ids: vec!["a".into()],
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(started("wf-1"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.workflow_id(), "wf-1");
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish(started("wf-1"));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
