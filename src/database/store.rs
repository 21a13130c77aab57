//! # Entity Store Traits
//!
//! Repository contracts for every entity the generation pipeline touches,
//! bound to a transaction scope.
//!
//! A [`UnitOfWork`] is one open transaction. Every repository method on it runs
//! inside that transaction; nothing is visible to other units until
//! [`UnitOfWork::commit`] succeeds. Dropping a unit without committing rolls
//! it back, which is what makes an early `?` return or a panic leave the store
//! untouched.
//!
//! Status transitions are conditional updates that return whether the row
//! actually changed. A `false` means another writer got there first (or the
//! task is no longer the entity's active one), and the caller must treat the
//! transition as not having happened.

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::errors::StoreResult;
use crate::models::{
    GenerationStage, GenerationTaskRecord, ImageReference, PlayerGameState, PlayerProgress, PlayerStatus,
    PublishedStory, StoryConfig, StoryScene,
};

#[async_trait]
pub trait StoryConfigRepository: Send {
    async fn insert_story_config(&mut self, config: &StoryConfig) -> StoreResult<()>;

    async fn find_story_config(&mut self, id: Uuid) -> StoreResult<Option<StoryConfig>>;

    async fn count_generating_story_configs(&mut self, owner_id: Uuid) -> StoreResult<i64>;

    /// `Error -> Generating` under a new task
    async fn restart_story_config(&mut self, id: Uuid, task_id: Uuid) -> StoreResult<bool>;

    /// `Ready | Error -> Generating` under a new task, appending `revision`
    /// to the draft's user input
    async fn revise_story_config(&mut self, id: Uuid, task_id: Uuid, revision: &str) -> StoreResult<bool>;

    /// `Generating -> Ready`, only for the active task
    async fn complete_story_config(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        config: &Value,
    ) -> StoreResult<bool>;

    /// `Generating -> Error`, only for the active task
    async fn fail_story_config(&mut self, id: Uuid, task_id: Uuid, reason: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait PublishedStoryRepository: Send {
    async fn insert_published_story(&mut self, story: &PublishedStory) -> StoreResult<()>;

    async fn find_published_story(&mut self, id: Uuid) -> StoreResult<Option<PublishedStory>>;

    async fn count_generating_published_stories(&mut self, owner_id: Uuid) -> StoreResult<i64>;

    /// `Error -> Generating` at `stage` under a new task
    async fn restart_published_story(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        stage: GenerationStage,
    ) -> StoreResult<bool>;

    /// Setup finished: store it and hand the story over to the first-scene task
    async fn advance_story_to_first_scene(
        &mut self,
        id: Uuid,
        from_task_id: Uuid,
        next_task_id: Uuid,
        setup: &Value,
        initial_state_hash: &str,
    ) -> StoreResult<bool>;

    /// `Generating -> Ready`, only for the active task
    ///
    /// `setup`/`initial_state_hash` are written when given (the first scene was
    /// already cached when the setup arrived) and left alone otherwise.
    async fn complete_published_story(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        setup: Option<&Value>,
        initial_state_hash: Option<&str>,
    ) -> StoreResult<bool>;

    async fn fail_published_story(&mut self, id: Uuid, task_id: Uuid, reason: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait ProgressRepository: Send {
    /// Create the node for `(published_story_id, current_state_hash)` if absent.
    ///
    /// Returns the id of the stored node, which is the existing one when the
    /// state was reached before.
    async fn upsert_progress(&mut self, progress: &PlayerProgress) -> StoreResult<Uuid>;

    async fn find_progress(&mut self, id: Uuid) -> StoreResult<Option<PlayerProgress>>;
}

#[async_trait]
pub trait SceneRepository: Send {
    async fn find_scene(&mut self, id: Uuid) -> StoreResult<Option<StoryScene>>;

    async fn find_scene_by_hash(
        &mut self,
        published_story_id: Uuid,
        state_hash: &str,
    ) -> StoreResult<Option<StoryScene>>;

    /// Insert unless a scene already exists for the same key; returns the stored scene
    async fn insert_scene_if_absent(&mut self, scene: &StoryScene) -> StoreResult<StoryScene>;
}

#[async_trait]
pub trait GameStateRepository: Send {
    async fn list_game_states(
        &mut self,
        player_id: Uuid,
        published_story_id: Uuid,
    ) -> StoreResult<Vec<PlayerGameState>>;

    async fn find_game_state(&mut self, id: Uuid) -> StoreResult<Option<PlayerGameState>>;

    /// Fails with `UniqueViolation` when the player already has a slot for the story
    async fn insert_game_state(&mut self, state: &PlayerGameState) -> StoreResult<()>;

    /// `Playing -> GeneratingScene` on a new progress node
    async fn begin_scene_generation(
        &mut self,
        id: Uuid,
        progress_id: Uuid,
        task_id: Uuid,
    ) -> StoreResult<bool>;

    /// `Playing -> Playing` on a new node whose scene is already cached
    async fn move_to_scene(&mut self, id: Uuid, progress_id: Uuid, scene_id: Uuid) -> StoreResult<bool>;

    /// `GeneratingScene -> Playing`, only for the active task
    async fn complete_scene_generation(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        scene_id: Uuid,
    ) -> StoreResult<bool>;

    /// `Playing -> GameOverPending` on the final progress node; the current
    /// scene is cleared
    async fn begin_game_over(&mut self, id: Uuid, progress_id: Uuid, task_id: Uuid) -> StoreResult<bool>;

    /// `GameOverPending -> Completed` with the ending, only for the active task
    async fn complete_game_over(&mut self, id: Uuid, task_id: Uuid, ending_text: &str) -> StoreResult<bool>;

    /// `GeneratingScene | GameOverPending -> Error`, only for the active task
    async fn fail_scene_generation(&mut self, id: Uuid, task_id: Uuid, reason: &str) -> StoreResult<bool>;

    /// `Error -> status` under a new task; `status` is `GeneratingScene` or
    /// `GameOverPending`, whichever stage failed
    async fn restart_scene_generation(&mut self, id: Uuid, task_id: Uuid, status: PlayerStatus) -> StoreResult<bool>;

    async fn delete_game_state(&mut self, id: Uuid, player_id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait ImageReferenceRepository: Send {
    async fn find_image_reference(&mut self, image_ref: &str) -> StoreResult<Option<ImageReference>>;

    /// Insert unless the reference is already stored; returns whether it was inserted
    async fn insert_image_reference(&mut self, image: &ImageReference) -> StoreResult<bool>;
}

#[async_trait]
pub trait TaskLedgerRepository: Send {
    async fn record_task(&mut self, task: &GenerationTaskRecord) -> StoreResult<()>;

    async fn find_task(&mut self, task_id: Uuid) -> StoreResult<Option<GenerationTaskRecord>>;

    /// Most recently recorded status-driving task for an entity; image tasks
    /// are skipped
    async fn latest_task_for_entity(&mut self, entity_id: Uuid) -> StoreResult<Option<GenerationTaskRecord>>;
}

/// One open transaction with repository handles bound to it
#[async_trait]
pub trait UnitOfWork:
    StoryConfigRepository
    + PublishedStoryRepository
    + ProgressRepository
    + SceneRepository
    + GameStateRepository
    + ImageReferenceRepository
    + TaskLedgerRepository
    + Send
{
    /// Serialize this unit with every other unit that locks the same owner,
    /// until commit or rollback
    async fn lock_owner(&mut self, owner_id: Uuid) -> StoreResult<()>;

    /// Commit exactly once. A failure here is reported, never retried.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Source of units of work plus the few reads that need no transaction
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    async fn story_config(&self, id: Uuid) -> StoreResult<Option<StoryConfig>>;

    async fn published_story(&self, id: Uuid) -> StoreResult<Option<PublishedStory>>;

    async fn game_state(&self, id: Uuid) -> StoreResult<Option<PlayerGameState>>;

    async fn scene(&self, id: Uuid) -> StoreResult<Option<StoryScene>>;

    async fn health_check(&self) -> StoreResult<bool>;

    /// Backend name for logging ("postgres", "in_memory")
    fn backend_name(&self) -> &'static str;
}
