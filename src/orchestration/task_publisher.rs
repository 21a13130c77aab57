//! # Task Publisher
//!
//! Hands committed generation tasks to the broker.
//!
//! Tasks are recorded in the same unit of work as the entity they drive and
//! only published after that unit commits, so a worker can never observe a
//! task whose entity does not exist. A publish that fails after commit is not
//! retried: the entity moves to its error state with a dispatch-failure
//! reason, and the owner can retry it.
//!
//! Image tasks go out as a batch with bounded concurrency. They do not drive
//! any status, so a failed send is only logged.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::constants::DISPATCH_FAILURE;
use crate::database::{with_transaction, EntityStore, StoreError};
use crate::events::{EventPublisher, GenerationEvent};
use crate::logging::{log_error, log_generation_operation};
use crate::messaging::{GenerationTask, MessagingService, MessagingServiceExt, QueueRouter};
use crate::metrics;
use crate::models::GenerationTaskRecord;

use super::transitions::fail_entity;

#[derive(Clone)]
pub struct TaskPublisher {
    store: Arc<dyn EntityStore>,
    messaging: Arc<dyn MessagingService>,
    router: QueueRouter,
    events: EventPublisher,
    batch_concurrency: usize,
}

impl std::fmt::Debug for TaskPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPublisher")
            .field("store", &self.store.backend_name())
            .field("messaging", &self.messaging.provider_name())
            .field("router", &self.router)
            .field("batch_concurrency", &self.batch_concurrency)
            .finish()
    }
}

impl TaskPublisher {
    pub fn new(
        store: Arc<dyn EntityStore>,
        messaging: Arc<dyn MessagingService>,
        router: QueueRouter,
        events: EventPublisher,
    ) -> Self {
        Self {
            store,
            messaging,
            router,
            events,
            batch_concurrency: 8,
        }
    }

    /// Sends in flight at once for [`TaskPublisher::dispatch_batch`]
    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency.max(1);
        self
    }

    pub fn router(&self) -> &QueueRouter {
        &self.router
    }

    /// Publish a committed task; returns whether the broker accepted it
    #[instrument(skip(self, task), fields(task_id = %task.task_id, prompt_type = %task.prompt_type))]
    pub async fn dispatch(&self, task: &GenerationTaskRecord) -> bool {
        if self.send(task).await {
            true
        } else {
            self.mark_undispatched(task).await;
            false
        }
    }

    /// Publish committed tasks that drive no entity status; returns how many
    /// the broker accepted
    #[instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub async fn dispatch_batch(&self, tasks: &[GenerationTaskRecord]) -> usize {
        if tasks.is_empty() {
            return 0;
        }
        let sends: Vec<_> = tasks.iter().map(|task| self.send(task)).collect();
        let sent = stream::iter(sends)
            .buffer_unordered(self.batch_concurrency)
            .filter(|accepted| futures::future::ready(*accepted))
            .count()
            .await;

        if sent < tasks.len() {
            warn!(sent, failed = tasks.len() - sent, "Some batch tasks were not published");
        } else {
            info!(sent, "Batch tasks published");
        }
        sent
    }

    async fn send(&self, task: &GenerationTaskRecord) -> bool {
        let queue = self.router.task_queue(task.prompt_type);
        let message = GenerationTask::from(task);

        match self.messaging.send_message(queue, &message).await {
            Ok(message_id) => {
                metrics::record_task_published(task.prompt_type);
                log_generation_operation(
                    "task_published",
                    task.entity_kind,
                    task.entity_id,
                    Some(task.prompt_type),
                    Some(task.task_id),
                    "generating",
                    Some(message_id.as_str()),
                );
                true
            }
            Err(e) => {
                log_error("task_publisher", "dispatch", &e.to_string(), Some(queue));
                false
            }
        }
    }

    async fn mark_undispatched(&self, task: &GenerationTaskRecord) {
        let (kind, entity_id, task_id) = (task.entity_kind, task.entity_id, task.task_id);

        let applied = with_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let applied = fail_entity(&mut **uow, kind, entity_id, task_id, DISPATCH_FAILURE).await?;
                Ok::<_, StoreError>(applied)
            })
        })
        .await;

        match applied {
            Ok(true) => self.events.publish(GenerationEvent::Failed {
                entity_kind: kind,
                entity_id,
                task_id,
                prompt_type: task.prompt_type,
                reason: DISPATCH_FAILURE.to_string(),
                at: Utc::now(),
            }),
            Ok(false) => debug!(entity_id = %entity_id, "Entity already moved on; dispatch failure not recorded"),
            Err(e) => log_error(
                "task_publisher",
                "mark_undispatched",
                &e.to_string(),
                Some(&entity_id.to_string()),
            ),
        }
    }
}
