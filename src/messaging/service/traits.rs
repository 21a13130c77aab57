//! # Messaging Service Traits
//!
//! Provider-agnostic contract for the task channel.
//!
//! [`MessagingService`] works on raw bytes so it stays object-safe and one
//! process-wide `Arc<dyn MessagingService>` can be handed to every component.
//! Typed send/receive live on [`MessagingServiceExt`].

use std::time::Duration;

use async_trait::async_trait;

use super::types::{MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle};
use crate::messaging::MessagingError;

/// Core messaging operations implemented by each broker provider
///
/// Every published message is durable: it survives a broker restart.
/// Delivery is at-least-once; a message that is neither acked nor nacked is
/// redelivered.
#[async_trait]
pub trait MessagingService: Send + Sync + 'static {
    /// Create a queue and its dead-letter queue if missing (idempotent)
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    async fn ensure_queues(&self, queue_names: &[String]) -> Result<(), MessagingError> {
        for queue_name in queue_names {
            self.ensure_queue(queue_name).await?;
        }
        Ok(())
    }

    /// Check expected queues exist without creating them
    async fn verify_queues(&self, queue_names: &[String]) -> Result<QueueHealthReport, MessagingError>;

    /// Publish a persistent message
    async fn send_raw(&self, queue_name: &str, payload: Vec<u8>) -> Result<MessageId, MessagingError>;

    /// Receive up to `max_messages`, hiding them from other consumers for
    /// `visibility_timeout` (where the provider supports it)
    async fn receive_raw(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<Vec<u8>>>, MessagingError>;

    /// Acknowledge successful processing (removes the message)
    async fn ack_message(&self, queue_name: &str, receipt_handle: &ReceiptHandle) -> Result<(), MessagingError>;

    /// Negative acknowledge
    ///
    /// `requeue = true` returns the message for redelivery. `requeue = false`
    /// routes it to the queue's dead-letter path.
    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError>;

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError>;

    async fn health_check(&self) -> Result<bool, MessagingError>;

    /// Provider name for logging/metrics
    fn provider_name(&self) -> &'static str;
}

/// Dead-letter queue that receives messages rejected from `queue_name`
pub fn dead_letter_queue_name(queue_name: &str) -> String {
    format!("{queue_name}_dlq")
}

/// Message serialization contract
pub trait QueueMessage: Send + Sync + Clone + 'static {
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError>
    where
        Self: Sized;
}

/// JSON for every serde type
impl<T> QueueMessage for T
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + Clone + 'static,
{
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(bytes).map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}

/// Typed helpers over any [`MessagingService`]
#[async_trait]
pub trait MessagingServiceExt: MessagingService {
    async fn send_message<T: QueueMessage>(&self, queue_name: &str, message: &T) -> Result<MessageId, MessagingError> {
        let payload = message.to_bytes()?;
        self.send_raw(queue_name, payload).await
    }

    /// Receive and decode; each entry is `Err` when its payload is malformed
    ///
    /// Decoding failures stay per-message so the caller can still ack the
    /// delivery that carried them.
    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<Result<T, MessagingError>>>, MessagingError> {
        let raw = self.receive_raw(queue_name, max_messages, visibility_timeout).await?;
        Ok(raw
            .into_iter()
            .map(|delivery| delivery.map(|bytes| T::from_bytes(&bytes)))
            .collect())
    }
}

impl<S: MessagingService + ?Sized> MessagingServiceExt for S {}
