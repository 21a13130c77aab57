//! # Messaging Module
//!
//! Task channel between the orchestrator and generation workers: wire
//! messages, the provider-agnostic [`MessagingService`], and the polling
//! [`QueueConsumer`].

pub mod consumer;
pub mod errors;
pub mod message;
pub mod service;

pub use consumer::{BatchOutcome, DeliveryHandler, MessageDisposition, QueueConsumer, QueueConsumerConfig};
pub use errors::{MessagingError, MessagingResult};
pub use message::{GenerationResult, GenerationTask};
pub use service::{
    dead_letter_queue_name, DeathRecord, DeliveryMetadata, InMemoryMessagingService, MessagingService,
    MessagingServiceExt, QueueRouter, RabbitMqMessagingService,
};
