//! # In-Memory Entity Store
//!
//! Thread-safe store for tests and local development.
//!
//! A unit of work takes the store's owned mutex guard for its whole lifetime
//! and mutates a cloned working copy of the tables. Commit writes the copy
//! back through the guard; dropping the unit discards it. Units are therefore
//! fully serialized, which is stronger than what Postgres gives but preserves
//! every guarantee callers depend on.
//!
//! Faults can be injected per operation name (the repository method name) to
//! exercise rollback paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::store::{
    EntityStore, GameStateRepository, ImageReferenceRepository, ProgressRepository,
    PublishedStoryRepository, SceneRepository, StoryConfigRepository, TaskLedgerRepository, UnitOfWork,
};
use crate::models::{
    GenerationStage, GenerationStatus, GenerationTaskRecord, ImageReference, PlayerGameState,
    PlayerProgress, PlayerStatus, PublishedStory, StoryConfig, StoryScene,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    story_configs: HashMap<Uuid, StoryConfig>,
    published_stories: HashMap<Uuid, PublishedStory>,
    progress: HashMap<Uuid, PlayerProgress>,
    scenes: HashMap<Uuid, StoryScene>,
    game_states: HashMap<Uuid, PlayerGameState>,
    image_references: HashMap<String, ImageReference>,
    tasks: HashMap<Uuid, GenerationTaskRecord>,
}

/// Row counts, for asserting that nothing leaked out of a rolled-back unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub story_configs: usize,
    pub published_stories: usize,
    pub progress: usize,
    pub scenes: usize,
    pub game_states: usize,
    pub image_references: usize,
    pub tasks: usize,
}

#[derive(Debug, Default)]
struct FaultPlan {
    failing_operations: Mutex<HashSet<String>>,
    unavailable: AtomicBool,
    fail_commits: AtomicBool,
}

impl FaultPlan {
    fn check(&self, operation: &str) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("in-memory store marked unavailable"));
        }
        if self.failing_operations.lock().contains(operation) {
            return Err(StoreError::Database(format!("injected failure in {operation}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryEntityStore {
    tables: Arc<AsyncMutex<Tables>>,
    faults: Arc<FaultPlan>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `operation` fail until cleared
    pub fn fail_on(&self, operation: &str) {
        self.faults.failing_operations.lock().insert(operation.to_string());
    }

    pub fn clear_faults(&self) {
        self.faults.failing_operations.lock().clear();
        self.faults.unavailable.store(false, Ordering::SeqCst);
        self.faults.fail_commits.store(false, Ordering::SeqCst);
    }

    /// Simulate an outage: `begin` and every read fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make commits fail after all statements succeeded
    pub fn fail_commits(&self, fail: bool) {
        self.faults.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub async fn counts(&self) -> TableCounts {
        let tables = self.tables.lock().await;
        TableCounts {
            story_configs: tables.story_configs.len(),
            published_stories: tables.published_stories.len(),
            progress: tables.progress.len(),
            scenes: tables.scenes.len(),
            game_states: tables.game_states.len(),
            image_references: tables.image_references.len(),
            tasks: tables.tasks.len(),
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        self.faults.check("begin")?;
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            working,
            faults: Arc::clone(&self.faults),
        }))
    }

    async fn story_config(&self, id: Uuid) -> StoreResult<Option<StoryConfig>> {
        self.faults.check("story_config")?;
        Ok(self.tables.lock().await.story_configs.get(&id).cloned())
    }

    async fn published_story(&self, id: Uuid) -> StoreResult<Option<PublishedStory>> {
        self.faults.check("published_story")?;
        Ok(self.tables.lock().await.published_stories.get(&id).cloned())
    }

    async fn game_state(&self, id: Uuid) -> StoreResult<Option<PlayerGameState>> {
        self.faults.check("game_state")?;
        Ok(self.tables.lock().await.game_states.get(&id).cloned())
    }

    async fn scene(&self, id: Uuid) -> StoreResult<Option<StoryScene>> {
        self.faults.check("scene")?;
        Ok(self.tables.lock().await.scenes.get(&id).cloned())
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(!self.faults.unavailable.load(Ordering::SeqCst))
    }

    fn backend_name(&self) -> &'static str {
        "in_memory"
    }
}

pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    faults: Arc<FaultPlan>,
}

impl std::fmt::Debug for InMemoryUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryUnitOfWork").finish_non_exhaustive()
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    // Units already hold the table lock for their whole lifetime
    async fn lock_owner(&mut self, _owner_id: Uuid) -> StoreResult<()> {
        self.faults.check("lock_owner")
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.faults.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::commit("injected commit failure"));
        }
        let Self {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl StoryConfigRepository for InMemoryUnitOfWork {
    async fn insert_story_config(&mut self, config: &StoryConfig) -> StoreResult<()> {
        self.faults.check("insert_story_config")?;
        self.working.story_configs.insert(config.id, config.clone());
        Ok(())
    }

    async fn find_story_config(&mut self, id: Uuid) -> StoreResult<Option<StoryConfig>> {
        self.faults.check("find_story_config")?;
        Ok(self.working.story_configs.get(&id).cloned())
    }

    async fn count_generating_story_configs(&mut self, owner_id: Uuid) -> StoreResult<i64> {
        self.faults.check("count_generating_story_configs")?;
        Ok(self
            .working
            .story_configs
            .values()
            .filter(|c| c.owner_id == owner_id && c.status == GenerationStatus::Generating)
            .count() as i64)
    }

    async fn restart_story_config(&mut self, id: Uuid, task_id: Uuid) -> StoreResult<bool> {
        self.faults.check("restart_story_config")?;
        Ok(match self.working.story_configs.get_mut(&id) {
            Some(c) if c.status == GenerationStatus::Error => {
                c.status = GenerationStatus::Generating;
                c.error_details = None;
                c.active_task_id = Some(task_id);
                c.updated_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn revise_story_config(&mut self, id: Uuid, task_id: Uuid, revision: &str) -> StoreResult<bool> {
        self.faults.check("revise_story_config")?;
        Ok(match self.working.story_configs.get_mut(&id) {
            Some(c) if matches!(c.status, GenerationStatus::Ready | GenerationStatus::Error) => {
                c.status = GenerationStatus::Generating;
                c.user_input.push(revision.to_string());
                c.error_details = None;
                c.active_task_id = Some(task_id);
                c.updated_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn complete_story_config(&mut self, id: Uuid, task_id: Uuid, config: &Value) -> StoreResult<bool> {
        self.faults.check("complete_story_config")?;
        Ok(match self.working.story_configs.get_mut(&id) {
            Some(c) if is_active(c.status, c.active_task_id, task_id) => {
                c.status = GenerationStatus::Ready;
                c.config = Some(config.clone());
                c.error_details = None;
                c.updated_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn fail_story_config(&mut self, id: Uuid, task_id: Uuid, reason: &str) -> StoreResult<bool> {
        self.faults.check("fail_story_config")?;
        Ok(match self.working.story_configs.get_mut(&id) {
            Some(c) if is_active(c.status, c.active_task_id, task_id) => {
                c.status = GenerationStatus::Error;
                c.error_details = Some(reason.to_string());
                c.updated_at = Utc::now();
                true
            }
            _ => false,
        })
    }
}

fn is_active(status: GenerationStatus, active_task_id: Option<Uuid>, task_id: Uuid) -> bool {
    status == GenerationStatus::Generating && active_task_id == Some(task_id)
}

#[async_trait]
impl PublishedStoryRepository for InMemoryUnitOfWork {
    async fn insert_published_story(&mut self, story: &PublishedStory) -> StoreResult<()> {
        self.faults.check("insert_published_story")?;
        self.working.published_stories.insert(story.id, story.clone());
        Ok(())
    }

    async fn find_published_story(&mut self, id: Uuid) -> StoreResult<Option<PublishedStory>> {
        self.faults.check("find_published_story")?;
        Ok(self.working.published_stories.get(&id).cloned())
    }

    async fn count_generating_published_stories(&mut self, owner_id: Uuid) -> StoreResult<i64> {
        self.faults.check("count_generating_published_stories")?;
        Ok(self
            .working
            .published_stories
            .values()
            .filter(|s| s.owner_id == owner_id && s.status == GenerationStatus::Generating)
            .count() as i64)
    }

    async fn restart_published_story(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        stage: GenerationStage,
    ) -> StoreResult<bool> {
        self.faults.check("restart_published_story")?;
        Ok(match self.working.published_stories.get_mut(&id) {
            Some(s) if s.status == GenerationStatus::Error => {
                s.status = GenerationStatus::Generating;
                s.generation_stage = Some(stage);
                s.error_details = None;
                s.active_task_id = Some(task_id);
                s.updated_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn advance_story_to_first_scene(
        &mut self,
        id: Uuid,
        from_task_id: Uuid,
        next_task_id: Uuid,
        setup: &Value,
        initial_state_hash: &str,
    ) -> StoreResult<bool> {
        self.faults.check("advance_story_to_first_scene")?;
        Ok(match self.working.published_stories.get_mut(&id) {
            Some(s)
                if is_active(s.status, s.active_task_id, from_task_id)
                    && s.generation_stage == Some(GenerationStage::Setup) =>
            {
                s.setup = Some(setup.clone());
                s.initial_state_hash = Some(initial_state_hash.to_string());
                s.generation_stage = Some(GenerationStage::FirstScene);
                s.active_task_id = Some(next_task_id);
                s.updated_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn complete_published_story(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        setup: Option<&Value>,
        initial_state_hash: Option<&str>,
    ) -> StoreResult<bool> {
        self.faults.check("complete_published_story")?;
        Ok(match self.working.published_stories.get_mut(&id) {
            Some(s) if is_active(s.status, s.active_task_id, task_id) => {
                if let Some(setup) = setup {
                    s.setup = Some(setup.clone());
                }
                if let Some(hash) = initial_state_hash {
                    s.initial_state_hash = Some(hash.to_string());
                }
                s.status = GenerationStatus::Ready;
                s.generation_stage = None;
                s.error_details = None;
                s.updated_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn fail_published_story(&mut self, id: Uuid, task_id: Uuid, reason: &str) -> StoreResult<bool> {
        self.faults.check("fail_published_story")?;
        Ok(match self.working.published_stories.get_mut(&id) {
            Some(s) if is_active(s.status, s.active_task_id, task_id) => {
                s.status = GenerationStatus::Error;
                s.error_details = Some(reason.to_string());
                s.updated_at = Utc::now();
                true
            }
            _ => false,
        })
    }
}

#[async_trait]
impl ProgressRepository for InMemoryUnitOfWork {
    async fn upsert_progress(&mut self, progress: &PlayerProgress) -> StoreResult<Uuid> {
        self.faults.check("upsert_progress")?;
        if let Some(existing) = self.working.progress.values_mut().find(|p| {
            p.published_story_id == progress.published_story_id
                && p.current_state_hash == progress.current_state_hash
        }) {
            existing.updated_at = Utc::now();
            return Ok(existing.id);
        }
        self.working.progress.insert(progress.id, progress.clone());
        Ok(progress.id)
    }

    async fn find_progress(&mut self, id: Uuid) -> StoreResult<Option<PlayerProgress>> {
        self.faults.check("find_progress")?;
        Ok(self.working.progress.get(&id).cloned())
    }
}

#[async_trait]
impl SceneRepository for InMemoryUnitOfWork {
    async fn find_scene(&mut self, id: Uuid) -> StoreResult<Option<StoryScene>> {
        self.faults.check("find_scene")?;
        Ok(self.working.scenes.get(&id).cloned())
    }

    async fn find_scene_by_hash(
        &mut self,
        published_story_id: Uuid,
        state_hash: &str,
    ) -> StoreResult<Option<StoryScene>> {
        self.faults.check("find_scene_by_hash")?;
        Ok(self
            .working
            .scenes
            .values()
            .find(|s| s.published_story_id == published_story_id && s.state_hash == state_hash)
            .cloned())
    }

    async fn insert_scene_if_absent(&mut self, scene: &StoryScene) -> StoreResult<StoryScene> {
        self.faults.check("insert_scene_if_absent")?;
        if let Some(existing) = self.working.scenes.values().find(|s| {
            s.published_story_id == scene.published_story_id && s.state_hash == scene.state_hash
        }) {
            return Ok(existing.clone());
        }
        self.working.scenes.insert(scene.id, scene.clone());
        Ok(scene.clone())
    }
}

#[async_trait]
impl GameStateRepository for InMemoryUnitOfWork {
    async fn list_game_states(
        &mut self,
        player_id: Uuid,
        published_story_id: Uuid,
    ) -> StoreResult<Vec<PlayerGameState>> {
        self.faults.check("list_game_states")?;
        Ok(self
            .working
            .game_states
            .values()
            .filter(|g| g.player_id == player_id && g.published_story_id == published_story_id)
            .cloned()
            .collect())
    }

    async fn find_game_state(&mut self, id: Uuid) -> StoreResult<Option<PlayerGameState>> {
        self.faults.check("find_game_state")?;
        Ok(self.working.game_states.get(&id).cloned())
    }

    async fn insert_game_state(&mut self, state: &PlayerGameState) -> StoreResult<()> {
        self.faults.check("insert_game_state")?;
        let slot_taken = self.working.game_states.values().any(|g| {
            g.player_id == state.player_id && g.published_story_id == state.published_story_id
        });
        if slot_taken {
            return Err(StoreError::UniqueViolation(
                "uq_player_game_states_player_story".to_string(),
            ));
        }
        self.working.game_states.insert(state.id, state.clone());
        Ok(())
    }

    async fn begin_scene_generation(
        &mut self,
        id: Uuid,
        progress_id: Uuid,
        task_id: Uuid,
    ) -> StoreResult<bool> {
        self.faults.check("begin_scene_generation")?;
        Ok(match self.working.game_states.get_mut(&id) {
            Some(g) if g.player_status == PlayerStatus::Playing => {
                g.player_status = PlayerStatus::GeneratingScene;
                g.player_progress_id = progress_id;
                g.active_task_id = Some(task_id);
                g.last_activity_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn move_to_scene(&mut self, id: Uuid, progress_id: Uuid, scene_id: Uuid) -> StoreResult<bool> {
        self.faults.check("move_to_scene")?;
        Ok(match self.working.game_states.get_mut(&id) {
            Some(g) if g.player_status == PlayerStatus::Playing => {
                g.player_progress_id = progress_id;
                g.current_scene_id = Some(scene_id);
                g.last_activity_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn complete_scene_generation(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        scene_id: Uuid,
    ) -> StoreResult<bool> {
        self.faults.check("complete_scene_generation")?;
        Ok(match self.working.game_states.get_mut(&id) {
            Some(g)
                if g.player_status == PlayerStatus::GeneratingScene
                    && g.active_task_id == Some(task_id) =>
            {
                g.player_status = PlayerStatus::Playing;
                g.current_scene_id = Some(scene_id);
                g.error_details = None;
                g.last_activity_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn begin_game_over(&mut self, id: Uuid, progress_id: Uuid, task_id: Uuid) -> StoreResult<bool> {
        self.faults.check("begin_game_over")?;
        Ok(match self.working.game_states.get_mut(&id) {
            Some(g) if g.player_status == PlayerStatus::Playing => {
                g.player_status = PlayerStatus::GameOverPending;
                g.player_progress_id = progress_id;
                g.current_scene_id = None;
                g.active_task_id = Some(task_id);
                g.last_activity_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn complete_game_over(&mut self, id: Uuid, task_id: Uuid, ending_text: &str) -> StoreResult<bool> {
        self.faults.check("complete_game_over")?;
        Ok(match self.working.game_states.get_mut(&id) {
            Some(g)
                if g.player_status == PlayerStatus::GameOverPending
                    && g.active_task_id == Some(task_id) =>
            {
                let now = Utc::now();
                g.player_status = PlayerStatus::Completed;
                g.ending_text = Some(ending_text.to_string());
                g.completed_at = Some(now);
                g.error_details = None;
                g.last_activity_at = now;
                true
            }
            _ => false,
        })
    }

    async fn fail_scene_generation(&mut self, id: Uuid, task_id: Uuid, reason: &str) -> StoreResult<bool> {
        self.faults.check("fail_scene_generation")?;
        Ok(match self.working.game_states.get_mut(&id) {
            Some(g) if g.player_status.is_generating() && g.active_task_id == Some(task_id) =>
            {
                g.player_status = PlayerStatus::Error;
                g.error_details = Some(reason.to_string());
                g.last_activity_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn restart_scene_generation(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        status: PlayerStatus,
    ) -> StoreResult<bool> {
        self.faults.check("restart_scene_generation")?;
        Ok(match self.working.game_states.get_mut(&id) {
            Some(g) if g.player_status == PlayerStatus::Error && status.is_generating() => {
                g.player_status = status;
                g.error_details = None;
                g.active_task_id = Some(task_id);
                g.last_activity_at = Utc::now();
                true
            }
            _ => false,
        })
    }

    async fn delete_game_state(&mut self, id: Uuid, player_id: Uuid) -> StoreResult<bool> {
        self.faults.check("delete_game_state")?;
        let owned = self
            .working
            .game_states
            .get(&id)
            .is_some_and(|g| g.player_id == player_id);
        if owned {
            self.working.game_states.remove(&id);
        }
        Ok(owned)
    }
}

#[async_trait]
impl ImageReferenceRepository for InMemoryUnitOfWork {
    async fn find_image_reference(&mut self, image_ref: &str) -> StoreResult<Option<ImageReference>> {
        self.faults.check("find_image_reference")?;
        Ok(self.working.image_references.get(image_ref).cloned())
    }

    async fn insert_image_reference(&mut self, image: &ImageReference) -> StoreResult<bool> {
        self.faults.check("insert_image_reference")?;
        if self.working.image_references.contains_key(&image.image_ref) {
            return Ok(false);
        }
        self.working.image_references.insert(image.image_ref.clone(), image.clone());
        Ok(true)
    }
}

#[async_trait]
impl TaskLedgerRepository for InMemoryUnitOfWork {
    async fn record_task(&mut self, task: &GenerationTaskRecord) -> StoreResult<()> {
        self.faults.check("record_task")?;
        if self.working.tasks.contains_key(&task.task_id) {
            return Err(StoreError::UniqueViolation("generation_tasks_pkey".to_string()));
        }
        self.working.tasks.insert(task.task_id, task.clone());
        Ok(())
    }

    async fn find_task(&mut self, task_id: Uuid) -> StoreResult<Option<GenerationTaskRecord>> {
        self.faults.check("find_task")?;
        Ok(self.working.tasks.get(&task_id).cloned())
    }

    async fn latest_task_for_entity(&mut self, entity_id: Uuid) -> StoreResult<Option<GenerationTaskRecord>> {
        self.faults.check("latest_task_for_entity")?;
        Ok(self
            .working
            .tasks
            .values()
            .filter(|t| t.entity_id == entity_id && !t.prompt_type.is_image())
            .max_by_key(|t| t.created_at)
            .cloned())
    }
}
