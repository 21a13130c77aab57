//! Request and response types of the orchestration service.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{
    EntityKind, GenerationStatus, PlayerGameState, PlayerStatus, PublishedStory, SceneChoice, StoryConfig,
    StoryScene,
};

/// What the caller wants generated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum GenerationIntent {
    /// Draft a story config from a free-form prompt
    Draft { prompt: String, language: String },
    /// Rework a ready (or failed) draft with an additional prompt
    ReviseDraft { story_config_id: Uuid, revision: String },
    /// Publish a ready draft as a playable story
    Publish { story_config_id: Uuid },
    /// Apply a choice to a game state and move to the resulting scene
    AdvanceScene { game_state_id: Uuid, choice: SceneChoice },
}

/// Typed reference to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    pub fn story_config(id: Uuid) -> Self {
        Self {
            kind: EntityKind::StoryConfig,
            id,
        }
    }

    pub fn published_story(id: Uuid) -> Self {
        Self {
            kind: EntityKind::PublishedStory,
            id,
        }
    }

    pub fn game_state(id: Uuid) -> Self {
        Self {
            kind: EntityKind::GameState,
            id,
        }
    }
}

/// Caller-facing view of an entity's generation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub kind: EntityKind,
    pub id: Uuid,
    pub status: GenerationStatus,
    pub error_details: Option<String>,
    /// Present only when `status` is ready
    pub artifact: Option<Value>,
}

impl EntitySnapshot {
    pub fn is_ready(&self) -> bool {
        self.status == GenerationStatus::Ready
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef {
            kind: self.kind,
            id: self.id,
        }
    }

    pub fn from_story_config(config: &StoryConfig) -> Self {
        Self {
            kind: EntityKind::StoryConfig,
            id: config.id,
            status: config.status,
            error_details: config.error_details.clone(),
            artifact: ready_only(config.status, config.config.clone()),
        }
    }

    pub fn from_published_story(story: &PublishedStory) -> Self {
        Self {
            kind: EntityKind::PublishedStory,
            id: story.id,
            status: story.status,
            error_details: story.error_details.clone(),
            artifact: ready_only(story.status, story.setup.clone()),
        }
    }

    /// `scene` is the game state's current scene, when it has one. A
    /// completed game exposes its ending instead.
    pub fn from_game_state(state: &PlayerGameState, scene: Option<&StoryScene>) -> Self {
        let status = state.player_status.as_generation_status();
        let artifact = match (state.player_status, &state.ending_text) {
            (PlayerStatus::Completed, Some(ending)) => Some(json!({ "ending_text": ending })),
            _ => scene.map(|s| s.content.clone()),
        };
        Self {
            kind: EntityKind::GameState,
            id: state.id,
            status,
            error_details: state.error_details.clone(),
            artifact: ready_only(status, artifact),
        }
    }
}

fn ready_only(status: GenerationStatus, artifact: Option<Value>) -> Option<Value> {
    if status == GenerationStatus::Ready {
        artifact
    } else {
        None
    }
}

/// Result of a generation request or retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub snapshot: EntitySnapshot,
    /// Task published for this call, if any
    pub task_id: Option<Uuid>,
    /// Served from stored content without publishing
    pub cache_hit: bool,
}

impl GenerationOutcome {
    pub fn published(snapshot: EntitySnapshot, task_id: Uuid) -> Self {
        Self {
            snapshot,
            task_id: Some(task_id),
            cache_hit: false,
        }
    }

    pub fn cached(snapshot: EntitySnapshot) -> Self {
        Self {
            snapshot,
            task_id: None,
            cache_hit: true,
        }
    }

    pub fn entity(&self) -> EntityRef {
        self.snapshot.entity()
    }
}
