use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Generated scene content, content-addressed by state hash
/// Maps to `story_scenes` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StoryScene {
    pub id: Uuid,
    pub published_story_id: Uuid,
    pub state_hash: String,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

impl StoryScene {
    pub fn new(published_story_id: Uuid, state_hash: String, content: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            published_story_id,
            state_hash,
            content,
            created_at: Utc::now(),
        }
    }
}
