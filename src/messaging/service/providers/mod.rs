//! # Messaging Service Providers
//!
//! - [`RabbitMqMessagingService`] - RabbitMQ via the `lapin` crate
//! - [`InMemoryMessagingService`] - Thread-safe in-memory queues for testing

mod in_memory;
mod rabbitmq;

pub use in_memory::{InMemoryMessagingService, DEATH_REASON_DELIVERY_LIMIT, DEATH_REASON_REJECTED};
pub use rabbitmq::RabbitMqMessagingService;
