//! # Entity Models
//!
//! Persistent entities driven by the generation pipeline. Each model maps to
//! one table (see `migrations/`) and decodes itself from a Postgres row; the
//! in-memory store keeps the same structs directly.

pub mod game_state;
pub mod generation_task;
pub mod image_reference;
pub mod progress;
pub mod published_story;
pub mod status;
pub mod story_config;
pub mod story_scene;

pub use game_state::PlayerGameState;
pub use generation_task::GenerationTaskRecord;
pub use image_reference::ImageReference;
pub use progress::{PlayerProgress, ProgressError, ProgressState, SceneChoice};
pub use published_story::PublishedStory;
pub use status::{EntityKind, GenerationStage, GenerationStatus, PlayerStatus, PromptType};
pub use story_config::StoryConfig;
pub use story_scene::StoryScene;

use sqlx::postgres::PgRow;
use sqlx::Row;

/// Decode a text column through the type's `FromStr`.
pub(crate) fn text_column<T>(row: &PgRow, column: &str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(|message: String| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    })
}

/// Nullable variant of [`text_column`].
pub(crate) fn optional_text_column<T>(row: &PgRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        value.parse().map_err(|message: String| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: message.into(),
        })
    })
    .transpose()
}
