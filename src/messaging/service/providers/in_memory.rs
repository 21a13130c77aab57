//! # In-Memory Messaging Service
//!
//! Thread-safe in-memory broker for tests and local development.
//!
//! - **Visibility timeout**: received messages are hidden until acked, nacked
//!   or the timeout lapses
//! - **Dead-lettering**: every queue gets a `{queue}_dlq` twin. A nack without
//!   requeue, or a message exceeding `max_deliveries`, moves there with a death
//!   record, the way a RabbitMQ dead-letter exchange would

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::messaging::service::traits::{dead_letter_queue_name, MessagingService};
use crate::messaging::service::types::{
    DeathRecord, DeliveryMetadata, MessageId, QueueHealthReport, QueueStats, QueuedMessage,
    ReceiptHandle,
};
use crate::messaging::MessagingError;

pub const DEATH_REASON_REJECTED: &str = "rejected";
pub const DEATH_REASON_DELIVERY_LIMIT: &str = "delivery_limit";

#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: u64,
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    /// None = visible now
    visible_at: Option<DateTime<Utc>>,
    receive_count: u32,
    death_reasons: Vec<DeathRecord>,
}

#[derive(Debug)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryQueuedMessage>,
    next_id: u64,
    total_sent: u64,
    total_acked: u64,
    total_nacked: u64,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            next_id: 1,
            total_sent: 0,
            total_acked: 0,
            total_nacked: 0,
        }
    }

    fn push(&mut self, payload: Vec<u8>, death_reasons: Vec<DeathRecord>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.total_sent += 1;
        self.messages.push_back(InMemoryQueuedMessage {
            id,
            payload,
            enqueued_at: Utc::now(),
            visible_at: None,
            receive_count: 0,
            death_reasons,
        });
        id
    }

    fn take(&mut self, id: u64) -> Option<InMemoryQueuedMessage> {
        let pos = self.messages.iter().position(|m| m.id == id)?;
        self.messages.remove(pos)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMessagingService {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
    /// Deliveries allowed before a message is dead-lettered; None = unlimited
    max_deliveries: Option<u32>,
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dead-letter messages once they have been delivered `max_deliveries` times
    pub fn with_max_deliveries(max_deliveries: u32) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            max_deliveries: Some(max_deliveries),
        }
    }

    /// Messages in a queue, visible or not (for testing)
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        self.queues
            .read()
            .await
            .get(queue_name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Make every hidden message visible again, as if its timeout lapsed (for testing)
    pub async fn expire_visibility(&self, queue_name: &str) {
        if let Some(queue) = self.queues.write().await.get_mut(queue_name) {
            for msg in queue.messages.iter_mut() {
                msg.visible_at = None;
            }
        }
    }

    fn dead_letter(
        queues: &mut HashMap<String, InMemoryQueue>,
        queue_name: &str,
        mut message: InMemoryQueuedMessage,
        reason: &str,
    ) {
        let previous = message
            .death_reasons
            .iter()
            .find(|d| d.reason == reason && d.queue == queue_name)
            .map(|d| d.count)
            .unwrap_or(0);
        message.death_reasons.retain(|d| !(d.reason == reason && d.queue == queue_name));
        message.death_reasons.insert(
            0,
            DeathRecord {
                reason: reason.to_string(),
                queue: queue_name.to_string(),
                count: previous + 1,
            },
        );

        let dlq_name = dead_letter_queue_name(queue_name);
        match queues.get_mut(&dlq_name) {
            Some(dlq) => {
                dlq.push(message.payload, message.death_reasons);
            }
            None => warn!(
                queue = %queue_name,
                reason = %reason,
                "No dead-letter queue configured; dropping message"
            ),
        }
    }
}

fn parse_handle(receipt_handle: &ReceiptHandle) -> Result<u64, MessagingError> {
    receipt_handle
        .as_u64()
        .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        queues.entry(queue_name.to_string()).or_insert_with(InMemoryQueue::new);
        queues
            .entry(dead_letter_queue_name(queue_name))
            .or_insert_with(InMemoryQueue::new);
        Ok(())
    }

    async fn verify_queues(&self, queue_names: &[String]) -> Result<QueueHealthReport, MessagingError> {
        let queues = self.queues.read().await;
        let mut report = QueueHealthReport::new();
        for name in queue_names {
            if queues.contains_key(name) {
                report.add_healthy(name);
            } else {
                report.add_missing(name);
            }
        }
        Ok(report)
    }

    async fn send_raw(&self, queue_name: &str, payload: Vec<u8>) -> Result<MessageId, MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        Ok(MessageId::from(queue.push(payload, Vec::new())))
    }

    async fn receive_raw(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<Vec<u8>>>, MessagingError> {
        let mut queues = self.queues.write().await;
        let now = Utc::now();
        let hidden_for = chrono::Duration::from_std(visibility_timeout)
            .map_err(|e| MessagingError::configuration("in_memory", e.to_string()))?;

        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let mut received = Vec::new();
        let mut exhausted = Vec::new();

        for msg in queue.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if msg.visible_at.is_some_and(|vt| vt > now) {
                continue;
            }
            if self.max_deliveries.is_some_and(|limit| msg.receive_count >= limit) {
                exhausted.push(msg.id);
                continue;
            }

            msg.visible_at = Some(now + hidden_for);
            msg.receive_count += 1;
            received.push(QueuedMessage::new(
                ReceiptHandle::from(msg.id),
                msg.payload.clone(),
                DeliveryMetadata::new(msg.receive_count, msg.enqueued_at)
                    .with_death_reasons(msg.death_reasons.clone()),
            ));
        }

        let dead: Vec<InMemoryQueuedMessage> = exhausted.into_iter().filter_map(|id| queue.take(id)).collect();
        for message in dead {
            Self::dead_letter(&mut queues, queue_name, message, DEATH_REASON_DELIVERY_LIMIT);
        }

        Ok(received)
    }

    async fn ack_message(&self, queue_name: &str, receipt_handle: &ReceiptHandle) -> Result<(), MessagingError> {
        let id = parse_handle(receipt_handle)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        queue
            .take(id)
            .ok_or_else(|| MessagingError::message_not_found(id.to_string()))?;
        queue.total_acked += 1;
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let id = parse_handle(receipt_handle)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        queue.total_nacked += 1;

        if requeue {
            let msg = queue
                .messages
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| MessagingError::message_not_found(id.to_string()))?;
            msg.visible_at = None;
            return Ok(());
        }

        let message = queue
            .take(id)
            .ok_or_else(|| MessagingError::message_not_found(id.to_string()))?;
        Self::dead_letter(&mut queues, queue_name, message, DEATH_REASON_REJECTED);
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();
        let in_flight = queue
            .messages
            .iter()
            .filter(|m| m.visible_at.is_some_and(|vt| vt > now))
            .count() as u64;

        Ok(QueueStats::new(queue_name, queue.messages.len() as u64)
            .with_in_flight_count(in_flight)
            .with_counters(queue.total_sent, queue.total_acked, queue.total_nacked))
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
