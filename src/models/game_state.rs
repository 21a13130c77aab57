use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use super::{text_column, PlayerStatus};

/// A player's save slot for one published story
/// Maps to `player_game_states` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerGameState {
    pub id: Uuid,
    pub player_id: Uuid,
    pub published_story_id: Uuid,
    pub player_progress_id: Uuid,
    pub current_scene_id: Option<Uuid>,
    pub player_status: PlayerStatus,
    pub error_details: Option<String>,
    pub active_task_id: Option<Uuid>,
    /// Generated ending, once the slot is `Completed`
    pub ending_text: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl PlayerGameState {
    /// Slot positioned on an existing scene
    pub fn playing(player_id: Uuid, published_story_id: Uuid, progress_id: Uuid, scene_id: Uuid) -> Self {
        let mut state = Self::blank(player_id, published_story_id, progress_id);
        state.current_scene_id = Some(scene_id);
        state
    }

    /// Slot waiting on `task_id` to produce its scene
    pub fn awaiting_scene(
        player_id: Uuid,
        published_story_id: Uuid,
        progress_id: Uuid,
        task_id: Uuid,
    ) -> Self {
        let mut state = Self::blank(player_id, published_story_id, progress_id);
        state.player_status = PlayerStatus::GeneratingScene;
        state.active_task_id = Some(task_id);
        state
    }

    fn blank(player_id: Uuid, published_story_id: Uuid, progress_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            player_id,
            published_story_id,
            player_progress_id: progress_id,
            current_scene_id: None,
            player_status: PlayerStatus::Playing,
            error_details: None,
            active_task_id: None,
            ending_text: None,
            completed_at: None,
            started_at: now,
            last_activity_at: now,
        }
    }
}

impl<'r> FromRow<'r, PgRow> for PlayerGameState {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            player_id: row.try_get("player_id")?,
            published_story_id: row.try_get("published_story_id")?,
            player_progress_id: row.try_get("player_progress_id")?,
            current_scene_id: row.try_get("current_scene_id")?,
            player_status: text_column(row, "player_status")?,
            error_details: row.try_get("error_details")?,
            active_task_id: row.try_get("active_task_id")?,
            ending_text: row.try_get("ending_text")?,
            completed_at: row.try_get("completed_at")?,
            started_at: row.try_get("started_at")?,
            last_activity_at: row.try_get("last_activity_at")?,
        })
    }
}
