//! # Messaging Service Types
//!
//! Provider-agnostic delivery types.

use chrono::{DateTime, Utc};

/// Identifier assigned to a published message
///
/// - RabbitMQ: session-local publish counter
/// - InMemory: per-queue sequence number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Handle for acknowledging a received message
///
/// - RabbitMQ: delivery tag
/// - InMemory: message sequence number
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ReceiptHandle {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// One entry of the broker's death history for a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeathRecord {
    /// Why the message died (`rejected`, `expired`, `maxlen`, `delivery_limit`)
    pub reason: String,
    /// Queue the message died in
    pub queue: String,
    /// How many times it died there
    pub count: u64,
}

/// Broker-supplied delivery information
#[derive(Debug, Clone)]
pub struct DeliveryMetadata {
    /// Number of times this message has been delivered, including this one
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Most recent death first, as brokers report it
    pub death_reasons: Vec<DeathRecord>,
}

impl DeliveryMetadata {
    pub fn new(receive_count: u32, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            receive_count,
            enqueued_at,
            death_reasons: Vec::new(),
        }
    }

    pub fn with_death_reasons(mut self, death_reasons: Vec<DeathRecord>) -> Self {
        self.death_reasons = death_reasons;
        self
    }

    /// Reason of the most recent death, if the message was dead-lettered
    pub fn latest_death_reason(&self) -> Option<&str> {
        self.death_reasons
            .first()
            .map(|record| record.reason.as_str())
            .filter(|reason| !reason.is_empty())
    }
}

/// A message received from a queue with its metadata
#[derive(Debug, Clone)]
pub struct QueuedMessage<T> {
    pub receipt_handle: ReceiptHandle,
    pub message: T,
    pub metadata: DeliveryMetadata,
}

impl<T> QueuedMessage<T> {
    pub fn new(receipt_handle: ReceiptHandle, message: T, metadata: DeliveryMetadata) -> Self {
        Self {
            receipt_handle,
            message,
            metadata,
        }
    }

    /// Map the message to a different type
    pub fn map<U, F>(self, f: F) -> QueuedMessage<U>
    where
        F: FnOnce(T) -> U,
    {
        QueuedMessage {
            receipt_handle: self.receipt_handle,
            message: f(self.message),
            metadata: self.metadata,
        }
    }
}

/// Queue statistics for monitoring
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub queue_name: String,
    /// Messages in the queue (visible + in flight, where the provider knows)
    pub message_count: u64,
    pub in_flight_count: Option<u64>,
    pub total_sent: u64,
    pub total_acked: u64,
    pub total_nacked: u64,
}

impl QueueStats {
    pub fn new(queue_name: impl Into<String>, message_count: u64) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_count,
            in_flight_count: None,
            total_sent: 0,
            total_acked: 0,
            total_nacked: 0,
        }
    }

    pub fn with_in_flight_count(mut self, count: u64) -> Self {
        self.in_flight_count = Some(count);
        self
    }

    pub fn with_counters(mut self, sent: u64, acked: u64, nacked: u64) -> Self {
        self.total_sent = sent;
        self.total_acked = acked;
        self.total_nacked = nacked;
        self
    }
}

/// Result of verifying that expected queues exist
#[derive(Debug, Clone, Default)]
pub struct QueueHealthReport {
    pub healthy: Vec<String>,
    pub missing: Vec<String>,
    pub errors: Vec<(String, String)>,
}

impl QueueHealthReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_healthy(&self) -> bool {
        self.missing.is_empty() && self.errors.is_empty()
    }

    pub fn add_healthy(&mut self, queue_name: impl Into<String>) {
        self.healthy.push(queue_name.into());
    }

    pub fn add_missing(&mut self, queue_name: impl Into<String>) {
        self.missing.push(queue_name.into());
    }

    pub fn add_error(&mut self, queue_name: impl Into<String>, error: impl Into<String>) {
        self.errors.push((queue_name.into(), error.into()));
    }
}
