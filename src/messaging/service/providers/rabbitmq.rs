//! # RabbitMQ Messaging Service
//!
//! Production task channel over AMQP 0.9.1 using `lapin`.
//!
//! - **Quorum queues** with persistent (delivery mode 2) messages; the
//!   broker's `x-delivery-limit` dead-letters a message after
//!   `max_deliveries` deliveries, requeues included
//! - **Publisher confirms**: `send_raw` returns only once the broker has the message
//! - **Dead-letter exchanges**: each queue `q` routes rejected messages through
//!   `q_dlx` into `q_dlq`; the broker's `x-death` header becomes
//!   [`DeliveryMetadata::death_reasons`]
//! - **Prefetch** bounds unacked deliveries per channel
//!
//! RabbitMQ hides a delivered message until the channel acks, nacks or closes,
//! so the visibility timeout argument is not applied here.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::RabbitMqConfig;
use crate::messaging::service::traits::{dead_letter_queue_name, MessagingService};
use crate::messaging::service::types::{
    DeathRecord, DeliveryMetadata, MessageId, QueueHealthReport, QueueStats, QueuedMessage,
    ReceiptHandle,
};
use crate::messaging::MessagingError;

#[derive(Debug, Default)]
struct QueueStatistics {
    total_sent: AtomicU64,
    total_acked: AtomicU64,
    total_nacked: AtomicU64,
}

#[derive(Debug)]
pub struct RabbitMqMessagingService {
    connection: Connection,
    channel: Channel,
    config: RabbitMqConfig,
    created_queues: Arc<RwLock<HashSet<String>>>,
    queue_stats: DashMap<String, Arc<QueueStatistics>>,
    publish_counter: AtomicU64,
    max_deliveries: u32,
}

impl RabbitMqMessagingService {
    pub async fn connect(config: &RabbitMqConfig, max_deliveries: u32) -> Result<Self, MessagingError> {
        let connection = Connection::connect(
            &config.url,
            ConnectionProperties::default().with_connection_name("storyloom-orchestrator".into()),
        )
        .await
        .map_err(|e| MessagingError::connection(format!("RabbitMQ connection failed: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| MessagingError::connection(format!("RabbitMQ channel creation failed: {e}")))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::configuration("rabbitmq", format!("Failed to set QoS: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| MessagingError::configuration("rabbitmq", format!("Failed to enable confirms: {e}")))?;

        Ok(Self {
            connection,
            channel,
            config: config.clone(),
            created_queues: Arc::new(RwLock::new(HashSet::new())),
            queue_stats: DashMap::new(),
            publish_counter: AtomicU64::new(1),
            max_deliveries,
        })
    }

    pub fn prefetch_count(&self) -> u16 {
        self.config.prefetch_count
    }

    pub fn max_deliveries(&self) -> u32 {
        self.max_deliveries
    }

    fn stats_for(&self, queue_name: &str) -> Arc<QueueStatistics> {
        self.queue_stats
            .entry(queue_name.to_string())
            .or_insert_with(|| Arc::new(QueueStatistics::default()))
            .clone()
    }

    /// Declare `{queue}_dlx` and bind `{queue}_dlq` to it, routed by the queue name
    async fn setup_dlx(&self, queue_name: &str) -> Result<(), MessagingError> {
        let dlx_name = format!("{queue_name}_dlx");
        let dlq_name = dead_letter_queue_name(queue_name);

        self.channel
            .exchange_declare(
                &dlx_name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(&dlx_name, "declare_exchange", e.to_string()))?;

        self.channel
            .queue_declare(
                &dlq_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(&dlq_name, "declare", e.to_string()))?;

        self.channel
            .queue_bind(
                &dlq_name,
                &dlx_name,
                queue_name,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(&dlq_name, "bind", e.to_string()))?;

        Ok(())
    }

    fn delivery_tag(receipt_handle: &ReceiptHandle) -> Result<u64, MessagingError> {
        receipt_handle
            .as_u64()
            .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }
}

/// Declaration arguments for a work queue: quorum type, delivery limit and
/// dead-lettering into `{queue}_dlx`
pub(crate) fn queue_arguments(queue_name: &str, max_deliveries: u32) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert("x-queue-type".into(), AMQPValue::LongString("quorum".into()));
    args.insert(
        "x-delivery-limit".into(),
        AMQPValue::LongInt(i32::try_from(max_deliveries).unwrap_or(i32::MAX)),
    );
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(format!("{queue_name}_dlx").into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(queue_name.into()),
    );
    args
}

fn long_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}

fn integer(value: &AMQPValue) -> Option<u64> {
    match value {
        AMQPValue::LongLongInt(n) => u64::try_from(*n).ok(),
        AMQPValue::LongInt(n) => u64::try_from(*n).ok(),
        AMQPValue::LongUInt(n) => Some(u64::from(*n)),
        AMQPValue::ShortInt(n) => u64::try_from(*n).ok(),
        AMQPValue::ShortUInt(n) => Some(u64::from(*n)),
        _ => None,
    }
}

fn header<'a>(table: &'a FieldTable, key: &str) -> Option<&'a AMQPValue> {
    table
        .inner()
        .iter()
        .find(|(name, _)| name.as_str() == key)
        .map(|(_, value)| value)
}

/// Decode the broker's `x-death` header, most recent death first
pub(crate) fn death_records(headers: &FieldTable) -> Vec<DeathRecord> {
    let Some(AMQPValue::FieldArray(deaths)) = header(headers, "x-death") else {
        return Vec::new();
    };

    deaths
        .as_slice()
        .iter()
        .filter_map(|entry| match entry {
            AMQPValue::FieldTable(table) => Some(DeathRecord {
                reason: header(table, "reason").and_then(long_string).unwrap_or_default(),
                queue: header(table, "queue").and_then(long_string).unwrap_or_default(),
                count: header(table, "count").and_then(integer).unwrap_or(1),
            }),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl MessagingService for RabbitMqMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        if self.created_queues.read().await.contains(queue_name) {
            return Ok(());
        }

        self.setup_dlx(queue_name).await?;

        let args = queue_arguments(queue_name, self.max_deliveries);

        self.channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "declare", e.to_string()))?;

        self.created_queues.write().await.insert(queue_name.to_string());
        debug!(
            queue = %queue_name,
            max_deliveries = self.max_deliveries,
            "Declared quorum queue with dead-letter exchange"
        );
        Ok(())
    }

    async fn verify_queues(&self, queue_names: &[String]) -> Result<QueueHealthReport, MessagingError> {
        let mut report = QueueHealthReport::new();

        for queue_name in queue_names {
            match self
                .channel
                .queue_declare(
                    queue_name,
                    QueueDeclareOptions {
                        passive: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
            {
                Ok(_) => report.add_healthy(queue_name),
                Err(e) => {
                    let error_str = e.to_string();
                    if error_str.contains("NOT_FOUND") || error_str.contains("404") {
                        report.add_missing(queue_name);
                    } else {
                        report.add_error(queue_name, error_str);
                    }
                }
            }
        }

        Ok(report)
    }

    async fn send_raw(&self, queue_name: &str, payload: Vec<u8>) -> Result<MessageId, MessagingError> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                queue_name,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "publish", e.to_string()))?;

        let confirmation = confirm
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "publish_confirm", e.to_string()))?;
        if confirmation.is_nack() {
            return Err(MessagingError::queue_operation(
                queue_name,
                "publish_confirm",
                "broker rejected the message",
            ));
        }

        self.stats_for(queue_name).total_sent.fetch_add(1, Ordering::Relaxed);
        Ok(MessageId::from(self.publish_counter.fetch_add(1, Ordering::Relaxed)))
    }

    async fn receive_raw(
        &self,
        queue_name: &str,
        max_messages: usize,
        _visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<Vec<u8>>>, MessagingError> {
        let mut messages = Vec::with_capacity(max_messages);

        for _ in 0..max_messages {
            let fetched = self
                .channel
                .basic_get(queue_name, BasicGetOptions { no_ack: false })
                .await
                .map_err(|e| MessagingError::queue_operation(queue_name, "basic_get", e.to_string()))?;

            let Some(message) = fetched else {
                break;
            };
            let delivery = message.delivery;

            let headers = delivery.properties.headers().clone().unwrap_or_default();
            let receive_count = header(&headers, "x-delivery-count")
                .and_then(integer)
                .map(|n| n as u32 + 1)
                .unwrap_or(if delivery.redelivered { 2 } else { 1 });

            messages.push(QueuedMessage::new(
                ReceiptHandle::from(delivery.delivery_tag),
                delivery.data,
                DeliveryMetadata::new(receive_count, Utc::now()).with_death_reasons(death_records(&headers)),
            ));
        }

        Ok(messages)
    }

    async fn ack_message(&self, queue_name: &str, receipt_handle: &ReceiptHandle) -> Result<(), MessagingError> {
        let delivery_tag = Self::delivery_tag(receipt_handle)?;

        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "ack", e.to_string()))?;

        self.stats_for(queue_name).total_acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let delivery_tag = Self::delivery_tag(receipt_handle)?;

        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "nack", e.to_string()))?;

        self.stats_for(queue_name).total_nacked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let queue_state = self
            .channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "stats", e.to_string()))?;

        let ours = self.stats_for(queue_name);
        Ok(QueueStats::new(queue_name, u64::from(queue_state.message_count())).with_counters(
            ours.total_sent.load(Ordering::Relaxed),
            ours.total_acked.load(Ordering::Relaxed),
            ours.total_nacked.load(Ordering::Relaxed),
        ))
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        if self.connection.status().connected() {
            Ok(true)
        } else {
            Err(MessagingError::connection("RabbitMQ connection is not connected"))
        }
    }

    fn provider_name(&self) -> &'static str {
        "rabbitmq"
    }
}
