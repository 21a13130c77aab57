use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{FromRow, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::hashing::{progress_state_hash, HashingError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    #[error("stat {stat} overflows when changed by {delta}")]
    StatOverflow { stat: String, delta: i64 },
    #[error("scene index overflow")]
    SceneIndexOverflow,
}

/// Mutable part of a player's position in a story
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub core_stats: BTreeMap<String, i64>,
    pub scene_index: u32,
    pub global_flags: Vec<String>,
    pub story_variables: Map<String, Value>,
}

/// Consequences of a player's choice, applied to a [`ProgressState`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneChoice {
    pub stat_changes: BTreeMap<String, i64>,
    pub set_flags: Vec<String>,
    pub clear_flags: Vec<String>,
    pub set_variables: Map<String, Value>,
    pub remove_variables: Vec<String>,
}

impl ProgressState {
    pub fn initial(core_stats: BTreeMap<String, i64>) -> Self {
        Self {
            core_stats,
            ..Self::default()
        }
    }

    pub fn state_hash(&self) -> Result<String, HashingError> {
        progress_state_hash(
            &self.core_stats,
            self.scene_index,
            &self.global_flags,
            &self.story_variables,
        )
    }

    /// State after `choice`, one scene further along.
    ///
    /// Flags behave as a set: duplicates collapse and the list is kept sorted.
    /// Stat changes that leave the `i64` range are rejected.
    pub fn apply(&self, choice: &SceneChoice) -> Result<Self, ProgressError> {
        let mut next = self.clone();

        for (stat, delta) in &choice.stat_changes {
            let entry = next.core_stats.entry(stat.clone()).or_insert(0);
            *entry = entry.checked_add(*delta).ok_or_else(|| ProgressError::StatOverflow {
                stat: stat.clone(),
                delta: *delta,
            })?;
        }

        next.global_flags.retain(|flag| !choice.clear_flags.contains(flag));
        next.global_flags.extend(choice.set_flags.iter().cloned());
        next.global_flags.sort();
        next.global_flags.dedup();

        for key in &choice.remove_variables {
            next.story_variables.remove(key);
        }
        for (key, value) in &choice.set_variables {
            next.story_variables.insert(key.clone(), value.clone());
        }

        next.scene_index = next.scene_index.checked_add(1).ok_or(ProgressError::SceneIndexOverflow)?;
        Ok(next)
    }
}

/// A node of a published story's state graph
/// Maps to `player_progress` table
///
/// Nodes are shared: every player reaching the same state lands on the same
/// row, unique by `(published_story_id, current_state_hash)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProgress {
    pub id: Uuid,
    /// Player who first reached this node
    pub owner_id: Uuid,
    pub published_story_id: Uuid,
    pub state: ProgressState,
    pub current_state_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlayerProgress {
    /// Root node of a story, keyed by the story's first-scene hash
    pub fn initial(
        owner_id: Uuid,
        published_story_id: Uuid,
        core_stats: BTreeMap<String, i64>,
        initial_state_hash: String,
    ) -> Self {
        Self::with_hash(
            owner_id,
            published_story_id,
            ProgressState::initial(core_stats),
            initial_state_hash,
        )
    }

    /// Node for an arbitrary state, keyed by its progress hash
    pub fn from_state(
        owner_id: Uuid,
        published_story_id: Uuid,
        state: ProgressState,
    ) -> Result<Self, HashingError> {
        let hash = state.state_hash()?;
        Ok(Self::with_hash(owner_id, published_story_id, state, hash))
    }

    fn with_hash(owner_id: Uuid, published_story_id: Uuid, state: ProgressState, hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            published_story_id,
            state,
            current_state_hash: hash,
            created_at: now,
            updated_at: now,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for PlayerProgress {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let Json(core_stats): Json<BTreeMap<String, i64>> = row.try_get("core_stats")?;
        let Json(global_flags): Json<Vec<String>> = row.try_get("global_flags")?;
        let Json(story_variables): Json<Map<String, Value>> = row.try_get("story_variables")?;
        let scene_index: i32 = row.try_get("scene_index")?;

        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            published_story_id: row.try_get("published_story_id")?,
            state: ProgressState {
                core_stats,
                scene_index: u32::try_from(scene_index).unwrap_or_default(),
                global_flags,
                story_variables,
            },
            current_state_hash: row.try_get("current_state_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
