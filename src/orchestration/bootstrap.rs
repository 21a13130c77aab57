//! # System Bootstrap
//!
//! Wires configuration into a running system: the entity store, the broker
//! connection, the queue topology and the services built on top of them.
//!
//! Production wiring connects to Postgres (running pending migrations) and
//! RabbitMQ. [`SystemContext::in_memory`] builds the same graph over the
//! in-memory store and broker for tests and local runs.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::{MessagingProvider, StoryloomConfig};
use crate::database::{EntityStore, InMemoryEntityStore, PgEntityStore};
use crate::error::OrchestrationResult;
use crate::events::EventPublisher;
use crate::messaging::service::QueueHealthReport;
use crate::messaging::{
    InMemoryMessagingService, MessagingService, QueueConsumer, QueueConsumerConfig, QueueRouter,
    RabbitMqMessagingService,
};

use super::dead_letter_consumer::{DeadLetterRecovery, ResultDeadLetterRecovery};
use super::game_state_service::GameStateService;
use super::generation_service::GenerationService;
use super::result_processor::ResultProcessor;
use super::task_publisher::TaskPublisher;

/// Shared handles every service is built from
#[derive(Clone)]
pub struct SystemContext {
    pub config: StoryloomConfig,
    pub store: Arc<dyn EntityStore>,
    pub messaging: Arc<dyn MessagingService>,
    pub router: QueueRouter,
    pub events: EventPublisher,
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("store", &self.store.backend_name())
            .field("messaging", &self.messaging.provider_name())
            .field("router", &self.router)
            .finish()
    }
}

/// Liveness of the store, the broker and the declared queues
#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub store: bool,
    pub messaging: bool,
    pub queues: QueueHealthReport,
}

impl SystemHealth {
    pub fn is_healthy(&self) -> bool {
        self.store && self.messaging && self.queues.is_healthy()
    }
}

impl SystemContext {
    /// Connect to the configured backends and declare the queue topology
    #[instrument(skip(config))]
    pub async fn from_config(config: StoryloomConfig) -> OrchestrationResult<Self> {
        info!("🚀 BOOTSTRAP: Starting storyloom orchestration system");

        let pg = PgEntityStore::connect(&config.database).await?;
        pg.run_migrations().await?;
        info!("💾 DATABASE: Migrations applied");
        let store: Arc<dyn EntityStore> = Arc::new(pg);

        let messaging: Arc<dyn MessagingService> = match config.messaging.provider {
            MessagingProvider::RabbitMq => Arc::new(
                RabbitMqMessagingService::connect(&config.messaging.rabbitmq, config.messaging.max_deliveries).await?,
            ),
            MessagingProvider::InMemory => {
                Arc::new(InMemoryMessagingService::with_max_deliveries(config.messaging.max_deliveries))
            }
        };

        Self::assemble(config, store, messaging).await
    }

    /// Same wiring over the in-memory store and broker
    pub async fn in_memory(config: StoryloomConfig) -> OrchestrationResult<Self> {
        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());
        let messaging: Arc<dyn MessagingService> =
            Arc::new(InMemoryMessagingService::with_max_deliveries(config.messaging.max_deliveries));
        Self::assemble(config, store, messaging).await
    }

    /// Wire caller-supplied backends, declaring every queue on `messaging`
    pub async fn assemble(
        config: StoryloomConfig,
        store: Arc<dyn EntityStore>,
        messaging: Arc<dyn MessagingService>,
    ) -> OrchestrationResult<Self> {
        let router = QueueRouter::from_config(&config.messaging.queues);
        messaging.ensure_queues(&router.all_queues()).await?;

        info!(
            store = store.backend_name(),
            messaging = messaging.provider_name(),
            queues = ?router.all_queues(),
            "✅ BOOTSTRAP: Backends ready"
        );

        Ok(Self {
            config,
            store,
            messaging,
            router,
            events: EventPublisher::default(),
        })
    }

    pub fn task_publisher(&self) -> TaskPublisher {
        TaskPublisher::new(
            self.store.clone(),
            self.messaging.clone(),
            self.router.clone(),
            self.events.clone(),
        )
        .with_batch_concurrency(self.config.orchestration.image_dispatch_concurrency)
    }

    pub fn generation_service(&self) -> GenerationService {
        GenerationService::new(
            self.store.clone(),
            self.task_publisher(),
            self.config.orchestration.generation_limit_per_owner,
        )
    }

    pub fn game_state_service(&self) -> GameStateService {
        GameStateService::new(self.store.clone(), self.task_publisher())
    }

    pub fn result_processor(&self) -> ResultProcessor {
        ResultProcessor::new(self.store.clone(), self.task_publisher(), self.events.clone())
    }

    pub fn dead_letter_recovery(&self) -> DeadLetterRecovery {
        DeadLetterRecovery::new(
            self.store.clone(),
            self.events.clone(),
            self.config.dead_letter.update_timeout(),
        )
    }

    fn consumer_config(&self) -> QueueConsumerConfig {
        QueueConsumerConfig::from(&self.config.consumer).with_max_deliveries(self.config.messaging.max_deliveries)
    }

    /// Consumer of worker results
    pub fn result_consumer(&self) -> QueueConsumer<ResultProcessor> {
        QueueConsumer::new(
            self.messaging.clone(),
            self.router.result_queue(),
            Arc::new(self.result_processor()),
            self.consumer_config(),
        )
    }

    /// Recovery consumer for results that exhausted their deliveries
    pub fn result_dead_letter_consumer(&self) -> QueueConsumer<ResultDeadLetterRecovery> {
        QueueConsumer::new(
            self.messaging.clone(),
            self.router.result_dead_letter_queue(),
            Arc::new(ResultDeadLetterRecovery::new(self.dead_letter_recovery())),
            self.consumer_config(),
        )
    }

    /// One recovery consumer per task dead-letter queue
    pub fn dead_letter_consumers(&self) -> Vec<QueueConsumer<DeadLetterRecovery>> {
        let recovery = Arc::new(self.dead_letter_recovery());
        self.router
            .dead_letter_queues()
            .into_iter()
            .map(|queue| {
                QueueConsumer::new(
                    self.messaging.clone(),
                    queue,
                    recovery.clone(),
                    self.consumer_config(),
                )
            })
            .collect()
    }

    pub async fn health_check(&self) -> OrchestrationResult<SystemHealth> {
        let store = self.store.health_check().await.unwrap_or(false);
        let messaging = self.messaging.health_check().await.unwrap_or(false);
        let queues = self.messaging.verify_queues(&self.router.all_queues()).await?;
        Ok(SystemHealth {
            store,
            messaging,
            queues,
        })
    }
}
