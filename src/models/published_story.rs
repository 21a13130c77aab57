use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use super::{optional_text_column, text_column, GenerationStage, GenerationStatus};
use crate::constants::{GAME_OVER_MAX_THRESHOLD, GAME_OVER_MIN_THRESHOLD};

/// A story published from a ready draft
/// Maps to `published_stories` table
///
/// Generation runs in two stages: the setup (stats, characters) and then the
/// opening scene, whose cache key is only known once the setup exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedStory {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub story_config_id: Uuid,
    /// Snapshot of the draft config at publish time
    pub config: Value,
    pub setup: Option<Value>,
    pub language: String,
    pub status: GenerationStatus,
    pub generation_stage: Option<GenerationStage>,
    /// First-scene hash; root of the story's state graph
    pub initial_state_hash: Option<String>,
    pub error_details: Option<String>,
    pub active_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublishedStory {
    pub fn new_generating(
        owner_id: Uuid,
        story_config_id: Uuid,
        config: Value,
        language: String,
        task_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            story_config_id,
            config,
            setup: None,
            language,
            status: GenerationStatus::Generating,
            generation_stage: Some(GenerationStage::Setup),
            initial_state_hash: None,
            error_details: None,
            active_task_id: Some(task_id),
            created_at: now,
            updated_at: now,
        }
    }

    /// Initial core stats declared by the setup
    ///
    /// Reads `setup.core_stats_definition.<stat>.initial`; stats without a
    /// numeric initial value start at zero.
    pub fn initial_core_stats(&self) -> BTreeMap<String, i64> {
        let Some(definitions) = self
            .setup
            .as_ref()
            .and_then(|setup| setup.get("core_stats_definition"))
            .and_then(Value::as_object)
        else {
            return BTreeMap::new();
        };

        definitions
            .iter()
            .map(|(name, definition)| {
                let initial = definition
                    .get("initial")
                    .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
                    .unwrap_or(0);
                (name.clone(), initial)
            })
            .collect()
    }

    /// First stat (by name) whose value meets its game-over condition
    ///
    /// A definition's `game_over.min` ends the game once the stat drops to
    /// the lower threshold; `game_over.max` once it reaches the upper one.
    pub fn game_over_stat(&self, core_stats: &BTreeMap<String, i64>) -> Option<String> {
        let definitions = self
            .setup
            .as_ref()
            .and_then(|setup| setup.get("core_stats_definition"))
            .and_then(Value::as_object)?;

        core_stats
            .iter()
            .find(|(name, value)| {
                let Some(condition) = definitions.get(name.as_str()).and_then(|d| d.get("game_over")) else {
                    return false;
                };
                let flag = |key: &str| condition.get(key).and_then(Value::as_bool).unwrap_or(false);
                (flag("min") && **value <= GAME_OVER_MIN_THRESHOLD) || (flag("max") && **value >= GAME_OVER_MAX_THRESHOLD)
            })
            .map(|(name, _)| name.clone())
    }
}

impl<'r> FromRow<'r, PgRow> for PublishedStory {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            story_config_id: row.try_get("story_config_id")?,
            config: row.try_get("config")?,
            setup: row.try_get("setup")?,
            language: row.try_get("language")?,
            status: text_column(row, "status")?,
            generation_stage: optional_text_column(row, "generation_stage")?,
            initial_state_hash: row.try_get("initial_state_hash")?,
            error_details: row.try_get("error_details")?,
            active_task_id: row.try_get("active_task_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
