//! Lifecycle events emitted after a committed, applied transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EntityKind, PromptType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// An entity reached its ready state (or a game state its next scene)
    Completed {
        entity_kind: EntityKind,
        entity_id: Uuid,
        task_id: Uuid,
        prompt_type: PromptType,
        at: DateTime<Utc>,
    },
    /// A worker reported failure, or the task could not be dispatched
    Failed {
        entity_kind: EntityKind,
        entity_id: Uuid,
        task_id: Uuid,
        prompt_type: PromptType,
        reason: String,
        at: DateTime<Utc>,
    },
    /// The broker gave up on the task and recovery moved the entity to error
    DeadLettered {
        entity_kind: EntityKind,
        entity_id: Uuid,
        task_id: Uuid,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl GenerationEvent {
    pub fn entity_id(&self) -> Uuid {
        match self {
            Self::Completed { entity_id, .. }
            | Self::Failed { entity_id, .. }
            | Self::DeadLettered { entity_id, .. } => *entity_id,
        }
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            Self::Completed { task_id, .. } | Self::Failed { task_id, .. } | Self::DeadLettered { task_id, .. } => {
                *task_id
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "generation.completed",
            Self::Failed { .. } => "generation.failed",
            Self::DeadLettered { .. } => "generation.dead_lettered",
        }
    }
}
