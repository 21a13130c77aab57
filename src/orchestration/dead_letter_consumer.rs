//! # Dead-Letter Recovery
//!
//! Consumes tasks and results the broker gave up on and moves their entities
//! to the error state, so the owner sees a failure instead of an entity
//! generating forever. Dead results are resolved to their entity through the
//! task ledger.
//!
//! The update is conditional on the dead task still being the entity's active
//! one. A task that was already completed, failed or superseded by a retry is
//! acknowledged without touching the entity. If the update itself cannot be
//! made, the message is rejected without requeue and the failure is logged at
//! error level for an operator; recovery never requeue-loops during an outage.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::constants::dead_letter_reason;
use crate::database::{with_transaction, EntityStore, StoreError};
use crate::events::{EventPublisher, GenerationEvent};
use crate::logging::log_error;
use crate::messaging::{DeliveryHandler, DeliveryMetadata, GenerationResult, GenerationTask, MessageDisposition};
use crate::metrics;
use crate::models::EntityKind;

use super::transitions::fail_entity;

#[derive(Clone)]
pub struct DeadLetterRecovery {
    store: Arc<dyn EntityStore>,
    events: EventPublisher,
    update_timeout: Duration,
}

impl std::fmt::Debug for DeadLetterRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterRecovery")
            .field("store", &self.store.backend_name())
            .field("update_timeout", &self.update_timeout)
            .finish()
    }
}

impl DeadLetterRecovery {
    pub fn new(store: Arc<dyn EntityStore>, events: EventPublisher, update_timeout: Duration) -> Self {
        Self {
            store,
            events,
            update_timeout,
        }
    }
}

/// What a dead-lettered message points at
#[derive(Debug, Clone, Copy)]
enum DeadLetterTarget {
    /// Task messages carry their entity
    Task {
        kind: EntityKind,
        entity_id: Uuid,
        task_id: Uuid,
    },
    /// Result messages carry only the task id; the ledger resolves the entity
    Result { task_id: Uuid },
}

enum Recovery {
    Failed { kind: EntityKind, entity_id: Uuid, task_id: Uuid },
    Inactive,
    UnknownTask,
}

impl DeadLetterRecovery {
    #[instrument(skip(self, metadata))]
    async fn recover(&self, target: DeadLetterTarget, metadata: &DeliveryMetadata) -> MessageDisposition {
        let reason = dead_letter_reason(metadata.latest_death_reason());
        let stored_reason = reason.clone();

        let update = with_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let (kind, entity_id, task_id) = match target {
                    DeadLetterTarget::Task {
                        kind,
                        entity_id,
                        task_id,
                    } => (kind, entity_id, task_id),
                    DeadLetterTarget::Result { task_id } => match uow.find_task(task_id).await? {
                        Some(task) => (task.entity_kind, task.entity_id, task_id),
                        None => return Ok::<_, StoreError>(Recovery::UnknownTask),
                    },
                };
                if fail_entity(&mut **uow, kind, entity_id, task_id, &stored_reason).await? {
                    Ok(Recovery::Failed {
                        kind,
                        entity_id,
                        task_id,
                    })
                } else {
                    Ok(Recovery::Inactive)
                }
            })
        });

        match tokio::time::timeout(self.update_timeout, update).await {
            Ok(Ok(Recovery::Failed {
                kind,
                entity_id,
                task_id,
            })) => {
                metrics::record_dead_letter_recovered();
                info!(
                    entity_kind = %kind,
                    entity_id = %entity_id,
                    reason = %reason,
                    "Dead-lettered message recovered; entity moved to error"
                );
                self.events.publish(GenerationEvent::DeadLettered {
                    entity_kind: kind,
                    entity_id,
                    task_id,
                    reason,
                    at: Utc::now(),
                });
                MessageDisposition::Ack
            }
            Ok(Ok(Recovery::Inactive)) => {
                debug!("Dead-lettered task no longer active; nothing to recover");
                MessageDisposition::Ack
            }
            Ok(Ok(Recovery::UnknownTask)) => {
                warn!("Dead-lettered result names an unknown task; dropping");
                MessageDisposition::Ack
            }
            Ok(Err(e)) => {
                metrics::record_dead_letter_failed();
                log_error("dead_letter_recovery", "fail_entity", &e.to_string(), None);
                MessageDisposition::DeadLetter
            }
            Err(_) => {
                metrics::record_dead_letter_failed();
                error!(
                    timeout_ms = self.update_timeout.as_millis() as u64,
                    "Dead-letter recovery timed out; operator attention required"
                );
                MessageDisposition::DeadLetter
            }
        }
    }
}

#[async_trait]
impl DeliveryHandler for DeadLetterRecovery {
    type Message = GenerationTask;

    async fn handle(&self, task: GenerationTask, metadata: &DeliveryMetadata) -> MessageDisposition {
        let target = DeadLetterTarget::Task {
            kind: task.prompt_type.entity_kind(),
            entity_id: task.entity_id,
            task_id: task.task_id,
        };
        self.recover(target, metadata).await
    }
}

/// Recovery for results that exhausted their deliveries
///
/// The entity stays generating under the result's task until something
/// fails it; this handler does so through the task ledger.
#[derive(Debug, Clone)]
pub struct ResultDeadLetterRecovery(DeadLetterRecovery);

impl ResultDeadLetterRecovery {
    pub fn new(recovery: DeadLetterRecovery) -> Self {
        Self(recovery)
    }
}

#[async_trait]
impl DeliveryHandler for ResultDeadLetterRecovery {
    type Message = GenerationResult;

    async fn handle(&self, result: GenerationResult, metadata: &DeliveryMetadata) -> MessageDisposition {
        self.0
            .recover(DeadLetterTarget::Result { task_id: result.task_id }, metadata)
            .await
    }
}
