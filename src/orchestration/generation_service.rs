//! # Generation Service
//!
//! Caller-facing entry points: request a generation, retry a failed one, and
//! read an entity's generation status.
//!
//! A choice that trips a game-over condition does not ask for a scene; it
//! records an ending task and parks the game state in `game_over_pending`.
//!
//! Every operation takes an already-authenticated owner id and runs its
//! writes in one unit of work. Tasks recorded in that unit are published only
//! after it commits.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::database::{with_transaction, EntityStore};
use crate::error::{ConflictKind, OrchestrationError, OrchestrationResult};
use crate::models::{
    EntityKind, GenerationStage, GenerationStatus, GenerationTaskRecord, PlayerProgress, PlayerStatus,
    PromptType, PublishedStory, SceneChoice, StoryConfig,
};
use crate::metrics;

use super::task_publisher::TaskPublisher;
use super::transitions::{ensure_capacity, owned_game_state, owned_published_story, owned_story_config};
use super::types::{EntityRef, EntitySnapshot, GenerationIntent, GenerationOutcome};

/// What an `AdvanceScene` unit decided
enum SceneStep {
    Cached(EntitySnapshot),
    Generating(GenerationTaskRecord),
}

#[derive(Clone)]
pub struct GenerationService {
    store: Arc<dyn EntityStore>,
    publisher: TaskPublisher,
    generation_limit: i64,
}

impl std::fmt::Debug for GenerationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationService")
            .field("store", &self.store.backend_name())
            .field("generation_limit", &self.generation_limit)
            .finish()
    }
}

impl GenerationService {
    pub fn new(store: Arc<dyn EntityStore>, publisher: TaskPublisher, generation_limit: i64) -> Self {
        Self {
            store,
            publisher,
            generation_limit,
        }
    }

    /// Start (or serve from stored content) the generation described by `intent`
    #[instrument(skip(self, intent), fields(owner_id = %owner_id))]
    pub async fn request_generation(
        &self,
        owner_id: Uuid,
        intent: GenerationIntent,
    ) -> OrchestrationResult<GenerationOutcome> {
        match intent {
            GenerationIntent::Draft { prompt, language } => self.request_draft(owner_id, prompt, language).await,
            GenerationIntent::ReviseDraft {
                story_config_id,
                revision,
            } => self.request_revision(owner_id, story_config_id, revision).await,
            GenerationIntent::Publish { story_config_id } => self.request_publish(owner_id, story_config_id).await,
            GenerationIntent::AdvanceScene { game_state_id, choice } => {
                self.request_scene(owner_id, game_state_id, choice).await
            }
        }
    }

    async fn request_draft(
        &self,
        owner_id: Uuid,
        prompt: String,
        language: String,
    ) -> OrchestrationResult<GenerationOutcome> {
        let prompt = prompt.trim().to_string();
        let language = language.trim().to_string();
        if prompt.is_empty() {
            return Err(OrchestrationError::Validation("prompt must not be empty".to_string()));
        }
        if language.is_empty() {
            return Err(OrchestrationError::Validation("language must not be empty".to_string()));
        }

        let task_id = Uuid::new_v4();
        let config = StoryConfig::new_generating(owner_id, prompt.clone(), language.clone(), task_id);
        let task = GenerationTaskRecord::new(
            task_id,
            config.id,
            owner_id,
            PromptType::Narrator,
            Uuid::new_v4(),
            json!({ "user_input": [prompt], "language": language }),
        );
        let limit = self.generation_limit;

        let (config, task) = with_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                ensure_capacity(&mut **uow, owner_id, limit).await?;
                uow.insert_story_config(&config).await?;
                uow.record_task(&task).await?;
                Ok::<_, OrchestrationError>((config, task))
            })
        })
        .await?;

        info!(story_config_id = %config.id, task_id = %task.task_id, "Draft generation requested");
        self.publish_and_snapshot(&task).await
    }

    async fn request_revision(
        &self,
        owner_id: Uuid,
        story_config_id: Uuid,
        revision: String,
    ) -> OrchestrationResult<GenerationOutcome> {
        let revision = revision.trim().to_string();
        if revision.is_empty() {
            return Err(OrchestrationError::Validation("revision must not be empty".to_string()));
        }
        let limit = self.generation_limit;

        let task = with_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let draft = owned_story_config(&mut **uow, owner_id, story_config_id).await?;
                if draft.status == GenerationStatus::Generating {
                    return Err(OrchestrationError::Conflict(ConflictKind::AlreadyGenerating));
                }
                ensure_capacity(&mut **uow, owner_id, limit).await?;

                let mut user_input = draft.user_input.clone();
                user_input.push(revision.clone());
                let task = GenerationTaskRecord::new(
                    Uuid::new_v4(),
                    draft.id,
                    owner_id,
                    PromptType::NarratorReviser,
                    Uuid::new_v4(),
                    json!({
                        "config": draft.config,
                        "user_input": user_input,
                        "revision": revision,
                        "language": draft.language,
                    }),
                );

                uow.record_task(&task).await?;
                if !uow.revise_story_config(draft.id, task.task_id, &revision).await? {
                    return Err(OrchestrationError::Conflict(ConflictKind::AlreadyGenerating));
                }
                Ok::<_, OrchestrationError>(task)
            })
        })
        .await?;

        info!(story_config_id = %story_config_id, task_id = %task.task_id, "Draft revision requested");
        self.publish_and_snapshot(&task).await
    }

    async fn request_publish(&self, owner_id: Uuid, story_config_id: Uuid) -> OrchestrationResult<GenerationOutcome> {
        let limit = self.generation_limit;

        let (story, task) = with_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let draft = owned_story_config(&mut **uow, owner_id, story_config_id).await?;
                let config = match (&draft.status, &draft.config) {
                    (GenerationStatus::Ready, Some(config)) => config.clone(),
                    _ => {
                        return Err(OrchestrationError::NotReady {
                            entity: EntityKind::StoryConfig,
                            id: story_config_id.to_string(),
                            status: draft.status,
                        })
                    }
                };
                ensure_capacity(&mut **uow, owner_id, limit).await?;

                let task_id = Uuid::new_v4();
                let story = PublishedStory::new_generating(owner_id, draft.id, config.clone(), draft.language.clone(), task_id);
                let task = GenerationTaskRecord::new(
                    task_id,
                    story.id,
                    owner_id,
                    PromptType::NovelSetup,
                    Uuid::new_v4(),
                    json!({ "config": config, "language": draft.language }),
                );

                uow.insert_published_story(&story).await?;
                uow.record_task(&task).await?;
                Ok::<_, OrchestrationError>((story, task))
            })
        })
        .await?;

        info!(published_story_id = %story.id, task_id = %task.task_id, "Story publication requested");
        self.publish_and_snapshot(&task).await
    }

    async fn request_scene(
        &self,
        player_id: Uuid,
        game_state_id: Uuid,
        choice: SceneChoice,
    ) -> OrchestrationResult<GenerationOutcome> {
        let step = with_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let state = owned_game_state(&mut **uow, player_id, game_state_id).await?;
                match state.player_status {
                    PlayerStatus::Playing => {}
                    PlayerStatus::GeneratingScene | PlayerStatus::GameOverPending => {
                        return Err(OrchestrationError::Conflict(ConflictKind::AlreadyGenerating))
                    }
                    PlayerStatus::Error => return Err(OrchestrationError::Conflict(ConflictKind::AwaitingRetry)),
                    PlayerStatus::Completed => return Err(OrchestrationError::Conflict(ConflictKind::GameCompleted)),
                }

                let current = uow.find_progress(state.player_progress_id).await?.ok_or_else(|| {
                    OrchestrationError::internal(format!("progress node {} missing", state.player_progress_id))
                })?;
                let story = uow
                    .find_published_story(state.published_story_id)
                    .await?
                    .ok_or_else(|| OrchestrationError::not_found(EntityKind::PublishedStory, state.published_story_id))?;

                let node = PlayerProgress::from_state(player_id, story.id, current.state.apply(&choice)?)?;
                let node_id = uow.upsert_progress(&node).await?;

                if let Some(stat) = story.game_over_stat(&node.state.core_stats) {
                    let task = GenerationTaskRecord::new(
                        Uuid::new_v4(),
                        state.id,
                        player_id,
                        PromptType::NovelGameOverCreator,
                        Uuid::new_v4(),
                        json!({
                            "config": story.config,
                            "setup": story.setup,
                            "language": story.language,
                            "progress": node.state,
                            "game_over_stat": stat,
                            "previous_scene_id": state.current_scene_id,
                        }),
                    )
                    .with_state_hash(node.current_state_hash.clone());

                    uow.record_task(&task).await?;
                    if !uow.begin_game_over(state.id, node_id, task.task_id).await? {
                        return Err(OrchestrationError::Conflict(ConflictKind::AlreadyGenerating));
                    }
                    debug!(game_state_id = %state.id, stat = %stat, "Game-over condition met");
                    return Ok(SceneStep::Generating(task));
                }

                if let Some(scene) = uow.find_scene_by_hash(story.id, &node.current_state_hash).await? {
                    if !uow.move_to_scene(state.id, node_id, scene.id).await? {
                        return Err(OrchestrationError::Conflict(ConflictKind::AlreadyGenerating));
                    }
                    let mut moved = state.clone();
                    moved.player_progress_id = node_id;
                    moved.current_scene_id = Some(scene.id);
                    return Ok(SceneStep::Cached(EntitySnapshot::from_game_state(&moved, Some(&scene))));
                }

                let task = GenerationTaskRecord::new(
                    Uuid::new_v4(),
                    state.id,
                    player_id,
                    PromptType::NovelCreator,
                    Uuid::new_v4(),
                    json!({
                        "config": story.config,
                        "setup": story.setup,
                        "language": story.language,
                        "progress": node.state,
                        "previous_scene_id": state.current_scene_id,
                    }),
                )
                .with_state_hash(node.current_state_hash.clone());

                uow.record_task(&task).await?;
                if !uow.begin_scene_generation(state.id, node_id, task.task_id).await? {
                    return Err(OrchestrationError::Conflict(ConflictKind::AlreadyGenerating));
                }
                Ok::<_, OrchestrationError>(SceneStep::Generating(task))
            })
        })
        .await?;

        match step {
            SceneStep::Cached(snapshot) => {
                metrics::record_cache_hit(EntityKind::GameState);
                debug!(game_state_id = %game_state_id, "Scene served from stored content");
                Ok(GenerationOutcome::cached(snapshot))
            }
            SceneStep::Generating(task) => {
                info!(game_state_id = %game_state_id, task_id = %task.task_id, "Scene generation requested");
                self.publish_and_snapshot(&task).await
            }
        }
    }

    /// Reset a failed entity to generating and publish a fresh task for it
    #[instrument(skip(self), fields(owner_id = %owner_id, entity_id = %entity.id))]
    pub async fn retry_generation(&self, owner_id: Uuid, entity: EntityRef) -> OrchestrationResult<GenerationOutcome> {
        let limit = self.generation_limit;

        let task = with_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let status = match entity.kind {
                    EntityKind::StoryConfig => owned_story_config(&mut **uow, owner_id, entity.id).await?.status,
                    EntityKind::PublishedStory => owned_published_story(&mut **uow, owner_id, entity.id).await?.status,
                    EntityKind::GameState => owned_game_state(&mut **uow, owner_id, entity.id)
                        .await?
                        .player_status
                        .as_generation_status(),
                };
                if status != GenerationStatus::Error {
                    return Err(OrchestrationError::Conflict(ConflictKind::NotRetryable { status }));
                }
                if entity.kind != EntityKind::GameState {
                    ensure_capacity(&mut **uow, owner_id, limit).await?;
                }

                let previous = uow.latest_task_for_entity(entity.id).await?.ok_or_else(|| {
                    OrchestrationError::internal(format!("no generation task recorded for {}", entity.id))
                })?;
                let mut task = GenerationTaskRecord::new(
                    Uuid::new_v4(),
                    entity.id,
                    owner_id,
                    previous.prompt_type,
                    previous.correlation_id,
                    previous.payload.clone(),
                );
                task.state_hash = previous.state_hash.clone();

                let restarted = match entity.kind {
                    EntityKind::StoryConfig => uow.restart_story_config(entity.id, task.task_id).await?,
                    EntityKind::PublishedStory => {
                        let stage = match previous.prompt_type {
                            PromptType::NovelFirstSceneCreator => GenerationStage::FirstScene,
                            _ => GenerationStage::Setup,
                        };
                        uow.restart_published_story(entity.id, task.task_id, stage).await?
                    }
                    EntityKind::GameState => {
                        let status = match previous.prompt_type {
                            PromptType::NovelGameOverCreator => PlayerStatus::GameOverPending,
                            _ => PlayerStatus::GeneratingScene,
                        };
                        uow.restart_scene_generation(entity.id, task.task_id, status).await?
                    }
                };
                if !restarted {
                    return Err(OrchestrationError::Conflict(ConflictKind::AlreadyGenerating));
                }

                uow.record_task(&task).await?;
                Ok::<_, OrchestrationError>(task)
            })
        })
        .await?;

        info!(task_id = %task.task_id, prompt_type = %task.prompt_type, "Generation retried");
        self.publish_and_snapshot(&task).await
    }

    /// Current generation state of an owned entity
    #[instrument(skip(self), fields(owner_id = %owner_id, entity_id = %entity.id))]
    pub async fn get_status(&self, owner_id: Uuid, entity: EntityRef) -> OrchestrationResult<EntitySnapshot> {
        let not_found = || OrchestrationError::not_found(entity.kind, entity.id);

        match entity.kind {
            EntityKind::StoryConfig => {
                let config = self
                    .store
                    .story_config(entity.id)
                    .await?
                    .filter(|c| c.owner_id == owner_id)
                    .ok_or_else(not_found)?;
                Ok(EntitySnapshot::from_story_config(&config))
            }
            EntityKind::PublishedStory => {
                let story = self
                    .store
                    .published_story(entity.id)
                    .await?
                    .filter(|s| s.owner_id == owner_id)
                    .ok_or_else(not_found)?;
                Ok(EntitySnapshot::from_published_story(&story))
            }
            EntityKind::GameState => {
                let state = self
                    .store
                    .game_state(entity.id)
                    .await?
                    .filter(|g| g.player_id == owner_id)
                    .ok_or_else(not_found)?;
                let scene = match (state.player_status, state.current_scene_id) {
                    (PlayerStatus::Playing, Some(scene_id)) => self.store.scene(scene_id).await?,
                    _ => None,
                };
                Ok(EntitySnapshot::from_game_state(&state, scene.as_ref()))
            }
        }
    }

    async fn publish_and_snapshot(&self, task: &GenerationTaskRecord) -> OrchestrationResult<GenerationOutcome> {
        self.publisher.dispatch(task).await;
        let snapshot = self
            .get_status(task.owner_id, EntityRef {
                kind: task.entity_kind,
                id: task.entity_id,
            })
            .await?;
        Ok(GenerationOutcome::published(snapshot, task.task_id))
    }
}
