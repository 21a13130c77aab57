//! # Game State Service
//!
//! Opens a save slot on a published story.
//!
//! The slot, its root progress node and (when the opening scene is not stored
//! yet) the scene task are written in one unit of work. A failure at any step
//! leaves no partial slot behind.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::database::{with_transaction, EntityStore};
use crate::error::{ConflictKind, OrchestrationError, OrchestrationResult};
use crate::metrics;
use crate::models::{
    EntityKind, GenerationStatus, GenerationTaskRecord, PlayerGameState, PlayerProgress, PromptType,
};

use super::task_publisher::TaskPublisher;
use super::types::{EntitySnapshot, GenerationOutcome};

#[derive(Clone)]
pub struct GameStateService {
    store: Arc<dyn EntityStore>,
    publisher: TaskPublisher,
}

impl std::fmt::Debug for GameStateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameStateService")
            .field("store", &self.store.backend_name())
            .finish()
    }
}

impl GameStateService {
    pub fn new(store: Arc<dyn EntityStore>, publisher: TaskPublisher) -> Self {
        Self { store, publisher }
    }

    /// Create the player's save slot for `published_story_id`
    ///
    /// The slot starts `Playing` when the opening scene is already stored and
    /// `GeneratingScene` otherwise.
    #[instrument(skip(self), fields(player_id = %player_id, published_story_id = %published_story_id))]
    pub async fn create_new_game_state(
        &self,
        player_id: Uuid,
        published_story_id: Uuid,
    ) -> OrchestrationResult<GenerationOutcome> {
        let (state, scene, task) = with_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                if !uow.list_game_states(player_id, published_story_id).await?.is_empty() {
                    return Err(OrchestrationError::Conflict(ConflictKind::SaveSlotExists));
                }

                let story = uow
                    .find_published_story(published_story_id)
                    .await?
                    .ok_or_else(|| OrchestrationError::not_found(EntityKind::PublishedStory, published_story_id))?;
                if story.status != GenerationStatus::Ready {
                    return Err(OrchestrationError::NotReady {
                        entity: EntityKind::PublishedStory,
                        id: published_story_id.to_string(),
                        status: story.status,
                    });
                }
                let initial_hash = story.initial_state_hash.clone().ok_or_else(|| {
                    OrchestrationError::internal(format!("story {published_story_id} is ready without an initial state hash"))
                })?;

                let root = PlayerProgress::initial(player_id, story.id, story.initial_core_stats(), initial_hash.clone());
                let root_id = uow.upsert_progress(&root).await?;

                let (state, scene, task) = match uow.find_scene_by_hash(story.id, &initial_hash).await? {
                    Some(scene) => (PlayerGameState::playing(player_id, story.id, root_id, scene.id), Some(scene), None),
                    None => {
                        let task_id = Uuid::new_v4();
                        let state = PlayerGameState::awaiting_scene(player_id, story.id, root_id, task_id);
                        let task = GenerationTaskRecord::new(
                            task_id,
                            state.id,
                            player_id,
                            PromptType::NovelCreator,
                            Uuid::new_v4(),
                            json!({
                                "config": story.config,
                                "setup": story.setup,
                                "language": story.language,
                                "progress": root.state,
                                "previous_scene_id": null,
                            }),
                        )
                        .with_state_hash(initial_hash);
                        (state, None, Some(task))
                    }
                };

                uow.insert_game_state(&state).await?;
                if let Some(task) = &task {
                    uow.record_task(task).await?;
                }
                Ok::<_, OrchestrationError>((state, scene, task))
            })
        })
        .await?;

        match task {
            Some(task) => {
                info!(game_state_id = %state.id, task_id = %task.task_id, "Game state created; opening scene requested");
                self.publisher.dispatch(&task).await;
                let state = self.store.game_state(state.id).await?.unwrap_or(state);
                Ok(GenerationOutcome::published(EntitySnapshot::from_game_state(&state, None), task.task_id))
            }
            None => {
                metrics::record_cache_hit(EntityKind::GameState);
                info!(game_state_id = %state.id, "Game state created on stored opening scene");
                Ok(GenerationOutcome::cached(EntitySnapshot::from_game_state(&state, scene.as_ref())))
            }
        }
    }
}
