//! # Queue Consumer
//!
//! Polling consumer shared by the result processor and the dead-letter
//! recovery consumer.
//!
//! Each poll receives up to `batch_size` deliveries, hands them to the
//! [`DeliveryHandler`] concurrently, then settles every delivery according to
//! the returned [`MessageDisposition`]. Payloads that cannot be decoded are
//! acked and counted; they can never succeed on redelivery.
//!
//! With `max_deliveries` set, a `Retry` on the last allowed delivery is
//! settled as `DeadLetter`, so the cap holds on brokers that redeliver a
//! requeued message without counting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ConsumerConfig;
use crate::messaging::service::{DeliveryMetadata, MessagingService, MessagingServiceExt, QueueMessage, QueuedMessage};
use crate::messaging::MessagingError;
use crate::metrics;

/// How a handled delivery is settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    /// Processing finished (or the message is a harmless duplicate)
    Ack,
    /// Transient failure; redeliver
    Retry,
    /// Retrying is pointless; route to the dead-letter path
    DeadLetter,
}

#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    type Message: QueueMessage;

    async fn handle(&self, message: Self::Message, metadata: &DeliveryMetadata) -> MessageDisposition;
}

/// Runtime settings for one consumer loop
#[derive(Debug, Clone)]
pub struct QueueConsumerConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
    /// Deliveries after which a retry becomes a dead letter
    pub max_deliveries: Option<u32>,
}

impl QueueConsumerConfig {
    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = Some(max_deliveries);
        self
    }

    fn deliveries_exhausted(&self, receive_count: u32) -> bool {
        self.max_deliveries.is_some_and(|limit| receive_count >= limit)
    }
}

impl Default for QueueConsumerConfig {
    fn default() -> Self {
        Self::from(&ConsumerConfig::default())
    }
}

impl From<&ConsumerConfig> for QueueConsumerConfig {
    fn from(config: &ConsumerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            visibility_timeout: Duration::from_secs(config.visibility_timeout_seconds),
            max_deliveries: None,
        }
    }
}

/// Tally of one polled batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub acked: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub dropped: usize,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.acked + self.retried + self.dead_lettered + self.dropped
    }

    fn record(&mut self, disposition: MessageDisposition) {
        match disposition {
            MessageDisposition::Ack => self.acked += 1,
            MessageDisposition::Retry => self.retried += 1,
            MessageDisposition::DeadLetter => self.dead_lettered += 1,
        }
    }
}

pub struct QueueConsumer<H: DeliveryHandler> {
    messaging: Arc<dyn MessagingService>,
    queue_name: String,
    handler: Arc<H>,
    config: QueueConsumerConfig,
}

impl<H: DeliveryHandler> std::fmt::Debug for QueueConsumer<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("queue_name", &self.queue_name)
            .field("provider", &self.messaging.provider_name())
            .field("config", &self.config)
            .finish()
    }
}

impl<H: DeliveryHandler> QueueConsumer<H> {
    pub fn new(
        messaging: Arc<dyn MessagingService>,
        queue_name: impl Into<String>,
        handler: Arc<H>,
        config: QueueConsumerConfig,
    ) -> Self {
        Self {
            messaging,
            queue_name: queue_name.into(),
            handler,
            config,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Poll until the shutdown signal flips to `true`
    #[instrument(skip(self, shutdown), fields(queue = %self.queue_name))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), MessagingError> {
        info!(
            provider = self.messaging.provider_name(),
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting queue consumer"
        );

        while !*shutdown.borrow() {
            let idle = match self.process_batch().await {
                Ok(outcome) => outcome.total() == 0,
                Err(e) => {
                    error!(error = %e, "Error in consumer batch");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!("Queue consumer stopped");
        Ok(())
    }

    /// Receive one batch, handle it concurrently and settle every delivery
    pub async fn process_batch(&self) -> Result<BatchOutcome, MessagingError> {
        let deliveries = self
            .messaging
            .receive_messages::<H::Message>(&self.queue_name, self.config.batch_size, self.config.visibility_timeout)
            .await?;

        if deliveries.is_empty() {
            return Ok(BatchOutcome::default());
        }
        debug!(count = deliveries.len(), "Processing delivery batch");

        let settled = join_all(deliveries.into_iter().map(|delivery| self.handle_delivery(delivery))).await;

        let mut outcome = BatchOutcome::default();
        for result in settled {
            match result {
                Some(disposition) => outcome.record(disposition),
                None => outcome.dropped += 1,
            }
        }
        Ok(outcome)
    }

    /// Returns `None` when the payload was undecodable and dropped
    async fn handle_delivery(
        &self,
        delivery: QueuedMessage<Result<H::Message, MessagingError>>,
    ) -> Option<MessageDisposition> {
        let QueuedMessage {
            receipt_handle,
            message,
            metadata,
        } = delivery;

        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(receipt = %receipt_handle, error = %e, "Dropping undecodable message");
                metrics::record_message_dropped(&self.queue_name);
                self.settle(&receipt_handle, MessageDisposition::Ack).await;
                return None;
            }
        };

        let mut disposition = self.handler.handle(message, &metadata).await;
        if disposition == MessageDisposition::Retry && self.config.deliveries_exhausted(metadata.receive_count) {
            warn!(
                receipt = %receipt_handle,
                receive_count = metadata.receive_count,
                "Delivery limit reached; dead-lettering instead of retrying"
            );
            disposition = MessageDisposition::DeadLetter;
        }
        self.settle(&receipt_handle, disposition).await;
        Some(disposition)
    }

    async fn settle(&self, receipt_handle: &crate::messaging::service::ReceiptHandle, disposition: MessageDisposition) {
        let settled = match disposition {
            MessageDisposition::Ack => self.messaging.ack_message(&self.queue_name, receipt_handle).await,
            MessageDisposition::Retry => {
                self.messaging
                    .nack_message(&self.queue_name, receipt_handle, true)
                    .await
            }
            MessageDisposition::DeadLetter => {
                self.messaging
                    .nack_message(&self.queue_name, receipt_handle, false)
                    .await
            }
        };

        if let Err(e) = settled {
            // The broker redelivers unsettled messages; handlers are idempotent
            warn!(receipt = %receipt_handle, ?disposition, error = %e, "Failed to settle delivery");
        }
    }
}
