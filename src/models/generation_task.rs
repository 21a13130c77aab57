use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use super::{text_column, EntityKind, PromptType};

/// Ledger row for a dispatched generation task
/// Maps to `generation_tasks` table
///
/// Written in the same transaction as the entity transition that created the
/// task, so a result carrying only a task id can always be traced back to the
/// entity (and, for scenes, the state hash) it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTaskRecord {
    pub task_id: Uuid,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub owner_id: Uuid,
    pub prompt_type: PromptType,
    pub correlation_id: Uuid,
    /// Scene cache key the result will be stored under, if any
    pub state_hash: Option<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl GenerationTaskRecord {
    pub fn new(
        task_id: Uuid,
        entity_id: Uuid,
        owner_id: Uuid,
        prompt_type: PromptType,
        correlation_id: Uuid,
        payload: Value,
    ) -> Self {
        Self {
            task_id,
            entity_kind: prompt_type.entity_kind(),
            entity_id,
            owner_id,
            prompt_type,
            correlation_id,
            state_hash: None,
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn with_state_hash(mut self, hash: impl Into<String>) -> Self {
        self.state_hash = Some(hash.into());
        self
    }
}

impl<'r> FromRow<'r, PgRow> for GenerationTaskRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            task_id: row.try_get("task_id")?,
            entity_kind: text_column(row, "entity_kind")?,
            entity_id: row.try_get("entity_id")?,
            owner_id: row.try_get("owner_id")?,
            prompt_type: text_column(row, "prompt_type")?,
            correlation_id: row.try_get("correlation_id")?,
            state_hash: row.try_get("state_hash")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
