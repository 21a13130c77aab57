//! # Result Processor
//!
//! Applies worker results to the entities their tasks drive.
//!
//! Results are delivered at least once and may arrive late, duplicated or for
//! a task that has since been replaced by a retry. Every transition here is
//! conditional on the entity still generating under the result's task, so a
//! result applies at most once and anything else is a no-op reported as
//! [`HandleOutcome::Stale`].
//!
//! A successful setup whose opening scene is not stored yet does not finish
//! the story: it hands the story over to a follow-up first-scene task, which
//! is recorded in the same unit and published after commit. Any images the
//! setup asks for are recorded alongside and published as a batch.
//!
//! Image results only store their reference. They never move the story.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::constants::{DEFAULT_GENERATION_FAILURE, MISSING_ENDING_TEXT};
use crate::database::{with_transaction, EntityStore, UnitOfWork};
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::events::{EventPublisher, GenerationEvent};
use crate::hashing::first_scene_hash;
use crate::logging::{log_error, log_generation_operation};
use crate::messaging::{DeliveryHandler, DeliveryMetadata, GenerationResult, MessageDisposition};
use crate::metrics;
use crate::models::{GenerationTaskRecord, ImageReference, PlayerStatus, PromptType, PublishedStory, StoryScene};

use super::image_batch::{collect_image_requests, visual_style};
use super::task_publisher::TaskPublisher;
use super::transitions::fail_entity;
use super::types::EntityRef;

/// Stored when a worker reports success without an artifact
pub const MISSING_ARTIFACT: &str = "generation result missing artifact";

/// Reported when an image worker succeeds without a URL
pub const MISSING_IMAGE_URL: &str = "image result missing image_url";

/// What applying one result did
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// The entity reached its ready state
    Completed {
        entity: EntityRef,
        task_id: Uuid,
        images_requested: usize,
    },
    /// Setup stored; the opening scene is now generating under `next_task_id`
    Advanced {
        entity: EntityRef,
        task_id: Uuid,
        next_task_id: Uuid,
        images_requested: usize,
    },
    /// A generated image is now stored under `image_ref`
    ImageStored {
        entity: EntityRef,
        task_id: Uuid,
        image_ref: String,
    },
    /// An image worker failed; the story is unaffected
    ImageFailed {
        entity: EntityRef,
        task_id: Uuid,
        reason: String,
    },
    /// The entity moved to its error state
    Failed {
        entity: EntityRef,
        task_id: Uuid,
        reason: String,
    },
    /// Late, duplicate or superseded result; nothing changed
    Stale { task_id: Uuid },
    /// No task with this id was ever recorded
    UnknownTask { task_id: Uuid },
}

impl HandleOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Advanced { .. } | Self::Failed { .. } | Self::ImageStored { .. }
        )
    }
}

/// Result of the transactional half, before anything is published
enum Applied {
    Completed(GenerationTaskRecord, Vec<GenerationTaskRecord>),
    Advanced(GenerationTaskRecord, GenerationTaskRecord, Vec<GenerationTaskRecord>),
    ImageStored(GenerationTaskRecord, String),
    ImageFailed(GenerationTaskRecord, String),
    Failed(GenerationTaskRecord, String),
    Stale(GenerationTaskRecord),
    Unknown,
}

#[derive(Clone)]
pub struct ResultProcessor {
    store: Arc<dyn EntityStore>,
    publisher: TaskPublisher,
    events: EventPublisher,
}

impl std::fmt::Debug for ResultProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultProcessor")
            .field("store", &self.store.backend_name())
            .field("subscribers", &self.events.subscriber_count())
            .finish()
    }
}

impl ResultProcessor {
    pub fn new(store: Arc<dyn EntityStore>, publisher: TaskPublisher, events: EventPublisher) -> Self {
        Self {
            store,
            publisher,
            events,
        }
    }

    #[instrument(skip(self, result), fields(task_id = %result.task_id, success = result.success))]
    pub async fn handle_result(&self, result: GenerationResult) -> OrchestrationResult<HandleOutcome> {
        let task_id = result.task_id;

        let applied = with_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let Some(task) = uow.find_task(task_id).await? else {
                    return Ok::<_, OrchestrationError>(Applied::Unknown);
                };
                apply_result(&mut **uow, task, result).await
            })
        })
        .await?;

        Ok(self.after_commit(task_id, applied).await)
    }

    async fn after_commit(&self, task_id: Uuid, applied: Applied) -> HandleOutcome {
        match applied {
            Applied::Unknown => {
                warn!(task_id = %task_id, "Result for unknown task ignored");
                metrics::record_result_stale();
                HandleOutcome::UnknownTask { task_id }
            }
            Applied::Stale(task) => {
                debug!(
                    task_id = %task.task_id,
                    entity_id = %task.entity_id,
                    "Stale result ignored; entity no longer generating under this task"
                );
                metrics::record_result_stale();
                HandleOutcome::Stale { task_id }
            }
            Applied::Completed(task, images) => {
                metrics::record_result_applied(task.prompt_type, true);
                log_generation_operation(
                    "result_applied",
                    task.entity_kind,
                    task.entity_id,
                    Some(task.prompt_type),
                    Some(task.task_id),
                    "ready",
                    None,
                );
                self.events.publish(GenerationEvent::Completed {
                    entity_kind: task.entity_kind,
                    entity_id: task.entity_id,
                    task_id: task.task_id,
                    prompt_type: task.prompt_type,
                    at: Utc::now(),
                });
                let images_requested = self.publisher.dispatch_batch(&images).await;
                HandleOutcome::Completed {
                    entity: entity_of(&task),
                    task_id,
                    images_requested,
                }
            }
            Applied::Advanced(task, next, images) => {
                metrics::record_result_applied(task.prompt_type, true);
                log_generation_operation(
                    "setup_stored",
                    task.entity_kind,
                    task.entity_id,
                    Some(task.prompt_type),
                    Some(task.task_id),
                    "generating",
                    Some(&format!("first scene task {}", next.task_id)),
                );
                self.publisher.dispatch(&next).await;
                let images_requested = self.publisher.dispatch_batch(&images).await;
                HandleOutcome::Advanced {
                    entity: entity_of(&task),
                    task_id,
                    next_task_id: next.task_id,
                    images_requested,
                }
            }
            Applied::ImageStored(task, image_ref) => {
                metrics::record_result_applied(task.prompt_type, true);
                log_generation_operation(
                    "image_stored",
                    task.entity_kind,
                    task.entity_id,
                    Some(task.prompt_type),
                    Some(task.task_id),
                    "stored",
                    Some(&image_ref),
                );
                HandleOutcome::ImageStored {
                    entity: entity_of(&task),
                    task_id,
                    image_ref,
                }
            }
            Applied::ImageFailed(task, reason) => {
                metrics::record_result_applied(task.prompt_type, false);
                warn!(
                    task_id = %task.task_id,
                    published_story_id = %task.entity_id,
                    reason = %reason,
                    "Image generation failed"
                );
                HandleOutcome::ImageFailed {
                    entity: entity_of(&task),
                    task_id,
                    reason,
                }
            }
            Applied::Failed(task, reason) => {
                metrics::record_result_applied(task.prompt_type, false);
                log_generation_operation(
                    "result_applied",
                    task.entity_kind,
                    task.entity_id,
                    Some(task.prompt_type),
                    Some(task.task_id),
                    "error",
                    Some(&reason),
                );
                self.events.publish(GenerationEvent::Failed {
                    entity_kind: task.entity_kind,
                    entity_id: task.entity_id,
                    task_id: task.task_id,
                    prompt_type: task.prompt_type,
                    reason: reason.clone(),
                    at: Utc::now(),
                });
                HandleOutcome::Failed {
                    entity: entity_of(&task),
                    task_id,
                    reason,
                }
            }
        }
    }
}

fn entity_of(task: &GenerationTaskRecord) -> EntityRef {
    EntityRef {
        kind: task.entity_kind,
        id: task.entity_id,
    }
}

async fn apply_result(
    uow: &mut dyn UnitOfWork,
    task: GenerationTaskRecord,
    result: GenerationResult,
) -> OrchestrationResult<Applied> {
    if task.prompt_type.is_image() {
        return apply_image(uow, task, result).await;
    }

    let artifact = match (result.success, result.artifact) {
        (true, Some(artifact)) => artifact,
        (true, None) => return apply_failure(uow, task, MISSING_ARTIFACT.to_string()).await,
        (false, _) => {
            let reason = result
                .error_message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GENERATION_FAILURE.to_string());
            return apply_failure(uow, task, reason).await;
        }
    };

    match task.prompt_type {
        PromptType::Narrator | PromptType::NarratorReviser => {
            if uow.complete_story_config(task.entity_id, task.task_id, &artifact).await? {
                Ok(Applied::Completed(task, Vec::new()))
            } else {
                Ok(Applied::Stale(task))
            }
        }
        PromptType::NovelSetup => apply_setup(uow, task, artifact).await,
        PromptType::NovelFirstSceneCreator => apply_first_scene(uow, task, artifact).await,
        PromptType::NovelCreator => apply_scene(uow, task, artifact).await,
        PromptType::NovelGameOverCreator => apply_game_over(uow, task, artifact).await,
        PromptType::CharacterImage | PromptType::StoryPreviewImage => Ok(Applied::Stale(task)),
    }
}

async fn apply_image(
    uow: &mut dyn UnitOfWork,
    task: GenerationTaskRecord,
    result: GenerationResult,
) -> OrchestrationResult<Applied> {
    let Some(image_ref) = task.payload.get("image_ref").and_then(Value::as_str).map(str::to_string) else {
        return Err(OrchestrationError::internal(format!(
            "image task {} has no image_ref",
            task.task_id
        )));
    };
    if !result.success {
        let reason = result
            .error_message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GENERATION_FAILURE.to_string());
        return Ok(Applied::ImageFailed(task, reason));
    }
    let url = result
        .artifact
        .as_ref()
        .and_then(|a| a.get("image_url"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|u| !u.is_empty());
    let Some(url) = url else {
        return Ok(Applied::ImageFailed(task, MISSING_IMAGE_URL.to_string()));
    };

    if uow.insert_image_reference(&ImageReference::new(image_ref.clone(), url)).await? {
        Ok(Applied::ImageStored(task, image_ref))
    } else {
        Ok(Applied::Stale(task))
    }
}

/// Image tasks for refs not stored yet, recorded in the current unit
async fn record_image_tasks(
    uow: &mut dyn UnitOfWork,
    story: &PublishedStory,
    task: &GenerationTaskRecord,
    setup: &Value,
) -> OrchestrationResult<Vec<GenerationTaskRecord>> {
    let style = visual_style(&story.config, setup);
    let mut tasks = Vec::new();
    for request in collect_image_requests(story.id, setup) {
        if uow.find_image_reference(&request.image_ref).await?.is_some() {
            debug!(image_ref = %request.image_ref, "Image already stored");
            continue;
        }
        let image_task = request.to_task(story.id, task.owner_id, task.correlation_id, style);
        uow.record_task(&image_task).await?;
        tasks.push(image_task);
    }
    Ok(tasks)
}

async fn apply_failure(
    uow: &mut dyn UnitOfWork,
    task: GenerationTaskRecord,
    reason: String,
) -> OrchestrationResult<Applied> {
    if fail_entity(uow, task.entity_kind, task.entity_id, task.task_id, &reason).await? {
        Ok(Applied::Failed(task, reason))
    } else {
        Ok(Applied::Stale(task))
    }
}

async fn apply_setup(
    uow: &mut dyn UnitOfWork,
    task: GenerationTaskRecord,
    setup: Value,
) -> OrchestrationResult<Applied> {
    let Some(story) = uow.find_published_story(task.entity_id).await? else {
        return Ok(Applied::Stale(task));
    };
    let hash = first_scene_hash(&story.config, &setup)?;

    if uow.find_scene_by_hash(story.id, &hash).await?.is_some() {
        if !uow
            .complete_published_story(story.id, task.task_id, Some(&setup), Some(&hash))
            .await?
        {
            return Ok(Applied::Stale(task));
        }
        let images = record_image_tasks(uow, &story, &task, &setup).await?;
        return Ok(Applied::Completed(task, images));
    }

    let next = GenerationTaskRecord::new(
        Uuid::new_v4(),
        story.id,
        task.owner_id,
        PromptType::NovelFirstSceneCreator,
        task.correlation_id,
        json!({
            "config": story.config,
            "setup": setup,
            "language": story.language,
        }),
    )
    .with_state_hash(hash.clone());

    if !uow
        .advance_story_to_first_scene(story.id, task.task_id, next.task_id, &setup, &hash)
        .await?
    {
        return Ok(Applied::Stale(task));
    }
    uow.record_task(&next).await?;
    let images = record_image_tasks(uow, &story, &task, &setup).await?;
    Ok(Applied::Advanced(task, next, images))
}

async fn apply_first_scene(
    uow: &mut dyn UnitOfWork,
    task: GenerationTaskRecord,
    content: Value,
) -> OrchestrationResult<Applied> {
    let Some(story) = uow.find_published_story(task.entity_id).await? else {
        return Ok(Applied::Stale(task));
    };
    let Some(hash) = task.state_hash.clone().or_else(|| story.initial_state_hash.clone()) else {
        return Err(OrchestrationError::internal(format!(
            "first scene task {} has no state hash",
            task.task_id
        )));
    };

    if !uow.complete_published_story(story.id, task.task_id, None, None).await? {
        return Ok(Applied::Stale(task));
    }
    uow.insert_scene_if_absent(&StoryScene::new(story.id, hash, content)).await?;
    Ok(Applied::Completed(task, Vec::new()))
}

async fn apply_scene(
    uow: &mut dyn UnitOfWork,
    task: GenerationTaskRecord,
    content: Value,
) -> OrchestrationResult<Applied> {
    let Some(state) = uow.find_game_state(task.entity_id).await? else {
        return Ok(Applied::Stale(task));
    };
    if state.player_status != PlayerStatus::GeneratingScene || state.active_task_id != Some(task.task_id) {
        return Ok(Applied::Stale(task));
    }
    let Some(hash) = task.state_hash.clone() else {
        return Err(OrchestrationError::internal(format!(
            "scene task {} has no state hash",
            task.task_id
        )));
    };

    let scene = uow
        .insert_scene_if_absent(&StoryScene::new(state.published_story_id, hash, content))
        .await?;
    if uow.complete_scene_generation(state.id, task.task_id, scene.id).await? {
        Ok(Applied::Completed(task, Vec::new()))
    } else {
        Ok(Applied::Stale(task))
    }
}

async fn apply_game_over(
    uow: &mut dyn UnitOfWork,
    task: GenerationTaskRecord,
    content: Value,
) -> OrchestrationResult<Applied> {
    let ending = content
        .get("ending_text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let Some(ending) = ending else {
        return apply_failure(uow, task, MISSING_ENDING_TEXT.to_string()).await;
    };

    if uow.complete_game_over(task.entity_id, task.task_id, ending).await? {
        Ok(Applied::Completed(task, Vec::new()))
    } else {
        Ok(Applied::Stale(task))
    }
}

#[async_trait]
impl DeliveryHandler for ResultProcessor {
    type Message = GenerationResult;

    async fn handle(&self, message: GenerationResult, metadata: &DeliveryMetadata) -> MessageDisposition {
        let task_id = message.task_id;
        match self.handle_result(message).await {
            Ok(_) => MessageDisposition::Ack,
            Err(OrchestrationError::Internal(e)) => {
                log_error(
                    "result_processor",
                    "handle_result",
                    &e,
                    Some(&format!("task {task_id}, delivery {}", metadata.receive_count)),
                );
                MessageDisposition::Retry
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Result rejected; acknowledging");
                MessageDisposition::Ack
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryEntityStore;
    use crate::messaging::{InMemoryMessagingService, QueueRouter};
    use crate::models::{GenerationStatus, PlayerGameState, StoryConfig};

    async fn setup() -> (Arc<InMemoryEntityStore>, ResultProcessor, StoryConfig) {
        let store = Arc::new(InMemoryEntityStore::new());
        let messaging = Arc::new(InMemoryMessagingService::new());
        let events = EventPublisher::default();
        let publisher = TaskPublisher::new(store.clone(), messaging, QueueRouter::default(), events.clone());
        let processor = ResultProcessor::new(store.clone(), publisher, events);

        let task_id = Uuid::new_v4();
        let config = StoryConfig::new_generating(Uuid::new_v4(), "a heist".into(), "en".into(), task_id);
        let task = GenerationTaskRecord::new(
            task_id,
            config.id,
            config.owner_id,
            PromptType::Narrator,
            Uuid::new_v4(),
            json!({}),
        );
        let mut uow = store.begin().await.unwrap();
        uow.insert_story_config(&config).await.unwrap();
        uow.record_task(&task).await.unwrap();
        uow.commit().await.unwrap();

        (store, processor, config)
    }

    #[tokio::test]
    async fn test_success_without_artifact_fails_entity() {
        let (store, processor, config) = setup().await;
        let task_id = config.active_task_id.unwrap();

        let outcome = processor
            .handle_result(GenerationResult {
                task_id,
                success: true,
                artifact: None,
                error_message: None,
            })
            .await
            .unwrap();

        assert!(matches!(outcome, HandleOutcome::Failed { ref reason, .. } if reason == MISSING_ARTIFACT));
        let stored = store.story_config(config.id).await.unwrap().unwrap();
        assert_eq!(stored.status, GenerationStatus::Error);
    }

    #[tokio::test]
    async fn test_failure_without_message_uses_default_reason() {
        let (store, processor, config) = setup().await;
        let task_id = config.active_task_id.unwrap();

        let mut result = GenerationResult::failure(task_id, "");
        result.error_message = None;
        processor.handle_result(result).await.unwrap();

        let stored = store.story_config(config.id).await.unwrap().unwrap();
        assert_eq!(stored.error_details.as_deref(), Some(DEFAULT_GENERATION_FAILURE));
    }

    #[tokio::test]
    async fn test_unknown_task_is_ignored() {
        let (_store, processor, _config) = setup().await;
        let outcome = processor
            .handle_result(GenerationResult::success(Uuid::new_v4(), json!({})))
            .await
            .unwrap();
        assert!(matches!(outcome, HandleOutcome::UnknownTask { .. }));
        assert!(!outcome.is_applied());
    }

    #[tokio::test]
    async fn test_duplicate_result_is_stale() {
        let (_store, processor, config) = setup().await;
        let task_id = config.active_task_id.unwrap();

        let first = processor
            .handle_result(GenerationResult::success(task_id, json!({"title": "Heist"})))
            .await
            .unwrap();
        let second = processor
            .handle_result(GenerationResult::failure(task_id, "late failure"))
            .await
            .unwrap();

        assert!(matches!(first, HandleOutcome::Completed { .. }));
        assert_eq!(second, HandleOutcome::Stale { task_id });
    }

    #[tokio::test]
    async fn test_store_outage_is_retried() {
        let (store, processor, config) = setup().await;
        store.set_unavailable(true);

        let disposition = processor
            .handle(
                GenerationResult::success(config.active_task_id.unwrap(), json!({})),
                &DeliveryMetadata::new(1, Utc::now()),
            )
            .await;
        assert_eq!(disposition, MessageDisposition::Retry);
    }

    #[tokio::test]
    async fn test_image_result_stores_reference_and_leaves_story_alone() {
        let (store, processor, _config) = setup().await;
        let owner = Uuid::new_v4();
        let setup_task = Uuid::new_v4();
        let story = PublishedStory::new_generating(owner, Uuid::new_v4(), json!({}), "en".into(), setup_task);
        let image = GenerationTaskRecord::new(
            Uuid::new_v4(),
            story.id,
            owner,
            PromptType::CharacterImage,
            Uuid::new_v4(),
            json!({"image_ref": "ch_oduya"}),
        );
        let mut uow = store.begin().await.unwrap();
        uow.insert_published_story(&story).await.unwrap();
        uow.record_task(&image).await.unwrap();
        uow.commit().await.unwrap();

        let stored = processor
            .handle_result(GenerationResult::success(image.task_id, json!({"image_url": "https://img/oduya.png"})))
            .await
            .unwrap();
        assert!(matches!(stored, HandleOutcome::ImageStored { ref image_ref, .. } if image_ref == "ch_oduya"));
        assert!(stored.is_applied());

        let duplicate = processor
            .handle_result(GenerationResult::success(image.task_id, json!({"image_url": "https://img/other.png"})))
            .await
            .unwrap();
        assert_eq!(duplicate, HandleOutcome::Stale { task_id: image.task_id });

        let story_now = store.published_story(story.id).await.unwrap().unwrap();
        assert_eq!(story_now.status, GenerationStatus::Generating);
        assert_eq!(story_now.active_task_id, Some(setup_task));
        assert_eq!(store.counts().await.image_references, 1);
    }

    #[tokio::test]
    async fn test_image_without_url_is_reported_not_applied() {
        let (store, processor, _config) = setup().await;
        let story = PublishedStory::new_generating(Uuid::new_v4(), Uuid::new_v4(), json!({}), "en".into(), Uuid::new_v4());
        let image = GenerationTaskRecord::new(
            Uuid::new_v4(),
            story.id,
            story.owner_id,
            PromptType::StoryPreviewImage,
            Uuid::new_v4(),
            json!({"image_ref": "history_preview_x"}),
        );
        let mut uow = store.begin().await.unwrap();
        uow.insert_published_story(&story).await.unwrap();
        uow.record_task(&image).await.unwrap();
        uow.commit().await.unwrap();

        let outcome = processor
            .handle_result(GenerationResult::success(image.task_id, json!({})))
            .await
            .unwrap();
        assert!(matches!(outcome, HandleOutcome::ImageFailed { ref reason, .. } if reason == MISSING_IMAGE_URL));
        assert!(!outcome.is_applied());
        assert_eq!(
            store.published_story(story.id).await.unwrap().unwrap().status,
            GenerationStatus::Generating
        );
    }

    #[tokio::test]
    async fn test_ending_without_text_fails_game_state() {
        let (store, processor, _config) = setup().await;
        let state = PlayerGameState::playing(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let ending = GenerationTaskRecord::new(
            Uuid::new_v4(),
            state.id,
            state.player_id,
            PromptType::NovelGameOverCreator,
            Uuid::new_v4(),
            json!({}),
        );
        let mut uow = store.begin().await.unwrap();
        uow.insert_game_state(&state).await.unwrap();
        uow.record_task(&ending).await.unwrap();
        assert!(uow.begin_game_over(state.id, state.player_progress_id, ending.task_id).await.unwrap());
        uow.commit().await.unwrap();

        let outcome = processor
            .handle_result(GenerationResult::success(ending.task_id, json!({"ending_text": "  "})))
            .await
            .unwrap();

        assert!(matches!(outcome, HandleOutcome::Failed { ref reason, .. } if reason == MISSING_ENDING_TEXT));
        let stored = store.game_state(state.id).await.unwrap().unwrap();
        assert_eq!(stored.player_status, PlayerStatus::Error);
        assert!(stored.ending_text.is_none());
    }
}
