use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use super::{text_column, GenerationStatus};

/// A story draft produced by the narrator from free-form user prompts
/// Maps to `story_configs` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryConfig {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Every prompt the user has given for this draft, oldest first
    pub user_input: Vec<String>,
    /// Generated draft; present once the narrator has succeeded
    pub config: Option<Value>,
    pub language: String,
    pub status: GenerationStatus,
    pub error_details: Option<String>,
    pub active_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoryConfig {
    /// A fresh draft already in `Generating`, owned by `task_id`
    pub fn new_generating(owner_id: Uuid, prompt: String, language: String, task_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            user_input: vec![prompt],
            config: None,
            language,
            status: GenerationStatus::Generating,
            error_details: None,
            active_task_id: Some(task_id),
            created_at: now,
            updated_at: now,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for StoryConfig {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let Json(user_input): Json<Vec<String>> = row.try_get("user_input")?;
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            user_input,
            config: row.try_get("config")?,
            language: row.try_get("language")?,
            status: text_column(row, "status")?,
            error_details: row.try_get("error_details")?,
            active_task_id: row.try_get("active_task_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
