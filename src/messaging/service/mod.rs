//! # Messaging Service Abstraction Layer
//!
//! Provider-agnostic task channel.
//!
//! ```text
//! Arc<dyn MessagingService>     <- built once in bootstrap, passed explicitly
//!   ├── RabbitMqMessagingService
//!   └── InMemoryMessagingService
//!
//! QueueRouter                   <- queue name resolution
//! ```

pub mod providers;
mod router;
mod traits;
mod types;

pub use providers::{InMemoryMessagingService, RabbitMqMessagingService};
pub use router::QueueRouter;
pub use traits::{dead_letter_queue_name, MessagingService, MessagingServiceExt, QueueMessage};
pub use types::{
    DeathRecord, DeliveryMetadata, MessageId, QueueHealthReport, QueueStats, QueuedMessage,
    ReceiptHandle,
};
