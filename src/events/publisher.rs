use tokio::sync::broadcast;

use super::types::GenerationEvent;

/// Fan-out of generation lifecycle events to in-process subscribers
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<GenerationEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to current subscribers; having none is not an error
    pub fn publish(&self, event: GenerationEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, PromptType};
    use chrono::Utc;
    use uuid::Uuid;

    fn completed() -> GenerationEvent {
        GenerationEvent::Completed {
            entity_kind: EntityKind::PublishedStory,
            entity_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            prompt_type: PromptType::NovelSetup,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let publisher = EventPublisher::default();
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(completed());
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let publisher = EventPublisher::new(8);
        let mut rx = publisher.subscribe();
        let event = completed();
        publisher.publish(event.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
        assert_eq!(received.name(), "generation.completed");
    }
}
