mod common;

use std::sync::Arc;

use common::{scene_artifact, setup_artifact, story_config_artifact, Harness};
use serde_json::json;
use storyloom_core::config::{QueuesConfig, StoryloomConfig};
use storyloom_core::constants::DISPATCH_FAILURE;
use storyloom_core::database::EntityStore;
use storyloom_core::error::{ConflictKind, OrchestrationError};
use storyloom_core::events::GenerationEvent;
use storyloom_core::messaging::{GenerationResult, QueueRouter};
use storyloom_core::models::{GenerationStatus, PlayerStatus, PromptType, SceneChoice};
use storyloom_core::orchestration::{
    EntityRef, GenerationIntent, GenerationService, HandleOutcome, TaskPublisher,
};
use uuid::Uuid;

fn draft_intent() -> GenerationIntent {
    GenerationIntent::Draft {
        prompt: "a heist aboard a generation ship".into(),
        language: "en".into(),
    }
}

fn brave_choice() -> SceneChoice {
    SceneChoice {
        stat_changes: [("nerve".to_string(), 1)].into_iter().collect(),
        set_flags: vec!["opened_airlock".into()],
        ..SceneChoice::default()
    }
}

#[tokio::test]
async fn test_story_lifecycle_end_to_end() {
    let harness = Harness::new().await;
    let service = harness.context.generation_service();
    let owner = Uuid::new_v4();
    let mut events = harness.context.events.subscribe();

    // Draft
    let draft = service.request_generation(owner, draft_intent()).await.unwrap();
    assert_eq!(draft.snapshot.status, GenerationStatus::Generating);
    assert!(draft.task_id.is_some());

    let narrator = harness.take_task(&harness.draft_queue()).await.unwrap();
    assert_eq!(narrator.prompt_type, PromptType::Narrator);
    assert_eq!(narrator.entity_id, draft.snapshot.id);
    assert_eq!(narrator.payload["user_input"], json!(["a heist aboard a generation ship"]));

    let outcome = harness.succeed(&narrator, story_config_artifact()).await;
    assert!(matches!(outcome, HandleOutcome::Completed { .. }));
    let status = service.get_status(owner, draft.entity()).await.unwrap();
    assert!(status.is_ready());
    assert_eq!(status.artifact, Some(story_config_artifact()));
    assert!(matches!(events.try_recv(), Ok(GenerationEvent::Completed { .. })));

    // Publish: setup, then the opening scene
    let publish = service
        .request_generation(owner, GenerationIntent::Publish { story_config_id: draft.snapshot.id })
        .await
        .unwrap();
    let setup = harness.take_task(&harness.story_queue()).await.unwrap();
    assert_eq!(setup.prompt_type, PromptType::NovelSetup);

    let advanced = harness.succeed(&setup, setup_artifact()).await;
    let HandleOutcome::Advanced { next_task_id, .. } = advanced else {
        panic!("expected setup to hand over to the first scene, got {advanced:?}");
    };
    let mid = service.get_status(owner, publish.entity()).await.unwrap();
    assert_eq!(mid.status, GenerationStatus::Generating);

    let first = harness.take_task(&harness.story_queue()).await.unwrap();
    assert_eq!(first.task_id, next_task_id);
    assert_eq!(first.prompt_type, PromptType::NovelFirstSceneCreator);
    assert_eq!(first.correlation_id, setup.correlation_id);
    harness.succeed(&first, scene_artifact("The airlock hisses open.")).await;

    let story = service.get_status(owner, publish.entity()).await.unwrap();
    assert!(story.is_ready());
    assert_eq!(story.artifact, Some(setup_artifact()));

    // A new game state lands on the stored opening scene
    let game = harness
        .context
        .game_state_service()
        .create_new_game_state(owner, story.id)
        .await
        .unwrap();
    assert!(game.cache_hit);
    assert!(game.task_id.is_none());
    assert_eq!(game.snapshot.artifact, Some(scene_artifact("The airlock hisses open.")));

    // Advancing generates the next scene
    let advance = service
        .request_generation(
            owner,
            GenerationIntent::AdvanceScene {
                game_state_id: game.snapshot.id,
                choice: brave_choice(),
            },
        )
        .await
        .unwrap();
    assert!(!advance.cache_hit);
    assert_eq!(advance.snapshot.status, GenerationStatus::Generating);

    let scene_task = harness.take_task(&harness.story_queue()).await.unwrap();
    assert_eq!(scene_task.prompt_type, PromptType::NovelCreator);
    assert_eq!(scene_task.payload["progress"]["core_stats"]["nerve"], json!(4));
    harness.succeed(&scene_task, scene_artifact("Alarms.")).await;

    let state = harness.store.game_state(game.snapshot.id).await.unwrap().unwrap();
    assert_eq!(state.player_status, PlayerStatus::Playing);
    let status = service.get_status(owner, advance.entity()).await.unwrap();
    assert_eq!(status.artifact, Some(scene_artifact("Alarms.")));
}

#[tokio::test]
async fn test_second_player_reuses_generated_scene() {
    let harness = Harness::new().await;
    let author = Uuid::new_v4();
    let story_id = harness.ready_story(author).await;
    let service = harness.context.generation_service();
    let games = harness.context.game_state_service();

    let first_game = games.create_new_game_state(author, story_id).await.unwrap();
    service
        .request_generation(
            author,
            GenerationIntent::AdvanceScene {
                game_state_id: first_game.snapshot.id,
                choice: brave_choice(),
            },
        )
        .await
        .unwrap();
    let task = harness.take_task(&harness.story_queue()).await.unwrap();
    harness.succeed(&task, scene_artifact("Alarms.")).await;

    let reader = Uuid::new_v4();
    let second_game = games.create_new_game_state(reader, story_id).await.unwrap();
    let outcome = service
        .request_generation(
            reader,
            GenerationIntent::AdvanceScene {
                game_state_id: second_game.snapshot.id,
                choice: brave_choice(),
            },
        )
        .await
        .unwrap();

    assert!(outcome.cache_hit);
    assert!(outcome.snapshot.is_ready());
    assert_eq!(outcome.snapshot.artifact, Some(scene_artifact("Alarms.")));
    assert!(harness.take_task(&harness.story_queue()).await.is_none());
}

#[tokio::test]
async fn test_duplicate_results_apply_once() {
    let harness = Harness::new().await;
    let owner = Uuid::new_v4();
    harness
        .context
        .generation_service()
        .request_generation(owner, draft_intent())
        .await
        .unwrap();
    let task = harness.take_task(&harness.draft_queue()).await.unwrap();

    let processor = Arc::new(harness.context.result_processor());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let processor = processor.clone();
            let result = if i % 2 == 0 {
                GenerationResult::success(task.task_id, story_config_artifact())
            } else {
                GenerationResult::failure(task.task_id, "worker crashed")
            };
            tokio::spawn(async move { processor.handle_result(result).await.unwrap() })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().is_applied() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
}

#[tokio::test]
async fn test_retry_supersedes_failed_task() {
    let harness = Harness::new().await;
    let service = harness.context.generation_service();
    let owner = Uuid::new_v4();

    let draft = service.request_generation(owner, draft_intent()).await.unwrap();
    let original = harness.take_task(&harness.draft_queue()).await.unwrap();
    harness
        .context
        .result_processor()
        .handle_result(GenerationResult::failure(original.task_id, "model overloaded"))
        .await
        .unwrap();

    let failed = service.get_status(owner, draft.entity()).await.unwrap();
    assert_eq!(failed.status, GenerationStatus::Error);
    assert_eq!(failed.error_details.as_deref(), Some("model overloaded"));

    let retried = service.retry_generation(owner, draft.entity()).await.unwrap();
    assert_eq!(retried.snapshot.status, GenerationStatus::Generating);
    assert!(retried.snapshot.error_details.is_none());

    let replacement = harness.take_task(&harness.draft_queue()).await.unwrap();
    assert_ne!(replacement.task_id, original.task_id);
    assert_eq!(replacement.correlation_id, original.correlation_id);
    assert_eq!(replacement.payload, original.payload);

    // The superseded task's late success must not land
    let late = harness.succeed(&original, story_config_artifact()).await;
    assert_eq!(late, HandleOutcome::Stale { task_id: original.task_id });

    harness.succeed(&replacement, story_config_artifact()).await;
    assert!(service.get_status(owner, draft.entity()).await.unwrap().is_ready());
}

#[tokio::test]
async fn test_retry_requires_error_state() {
    let harness = Harness::new().await;
    let service = harness.context.generation_service();
    let owner = Uuid::new_v4();
    let draft = service.request_generation(owner, draft_intent()).await.unwrap();

    let err = service.retry_generation(owner, draft.entity()).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::Conflict(ConflictKind::NotRetryable {
            status: GenerationStatus::Generating
        })
    ));
}

#[tokio::test]
async fn test_in_flight_ceiling() {
    let harness = Harness::new().await;
    let service = harness.context.generation_service();
    let owner = Uuid::new_v4();

    service.request_generation(owner, draft_intent()).await.unwrap();
    let err = service.request_generation(owner, draft_intent()).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::Conflict(ConflictKind::TooManyInFlight { active: 1, limit: 1 })
    ));

    // Other owners are unaffected
    service.request_generation(Uuid::new_v4(), draft_intent()).await.unwrap();

    let task = harness.take_task(&harness.draft_queue()).await.unwrap();
    harness.succeed(&task, story_config_artifact()).await;
    service.request_generation(owner, draft_intent()).await.unwrap();
}

#[tokio::test]
async fn test_dispatch_failure_marks_entity_failed() {
    let harness = Harness::new().await;
    let unrouted = QueueRouter::from_config(&QueuesConfig {
        draft_tasks: "never_declared".into(),
        ..QueuesConfig::default()
    });
    let publisher = TaskPublisher::new(
        harness.context.store.clone(),
        harness.context.messaging.clone(),
        unrouted,
        harness.context.events.clone(),
    );
    let service = GenerationService::new(harness.context.store.clone(), publisher, 1);
    let owner = Uuid::new_v4();

    let outcome = service.request_generation(owner, draft_intent()).await.unwrap();
    assert_eq!(outcome.snapshot.status, GenerationStatus::Error);
    assert_eq!(outcome.snapshot.error_details.as_deref(), Some(DISPATCH_FAILURE));

    // Failed drafts do not count against the ceiling
    let retry_target = outcome.entity();
    let err = service.retry_generation(owner, retry_target).await;
    assert!(err.is_ok());
}

#[tokio::test]
async fn test_request_validation_and_ownership() {
    let harness = Harness::new().await;
    let service = harness.context.generation_service();
    let owner = Uuid::new_v4();

    let err = service
        .request_generation(
            owner,
            GenerationIntent::Draft {
                prompt: "   ".into(),
                language: "en".into(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(_)));

    let draft = service.request_generation(owner, draft_intent()).await.unwrap();
    let err = service.get_status(Uuid::new_v4(), draft.entity()).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::NotFound { .. }));

    let err = service
        .request_generation(owner, GenerationIntent::Publish { story_config_id: draft.snapshot.id })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::NotReady {
            status: GenerationStatus::Generating,
            ..
        }
    ));

    let err = service
        .get_status(owner, EntityRef::published_story(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::NotFound { .. }));
}

#[tokio::test]
async fn test_advance_rejected_while_generating_or_failed() {
    let harness = Harness::new().await;
    let owner = Uuid::new_v4();
    let story_id = harness.ready_story(owner).await;
    let service = harness.context.generation_service();
    let game = harness
        .context
        .game_state_service()
        .create_new_game_state(owner, story_id)
        .await
        .unwrap();
    let advance = || GenerationIntent::AdvanceScene {
        game_state_id: game.snapshot.id,
        choice: brave_choice(),
    };

    service.request_generation(owner, advance()).await.unwrap();
    let err = service.request_generation(owner, advance()).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Conflict(ConflictKind::AlreadyGenerating)));

    let task = harness.take_task(&harness.story_queue()).await.unwrap();
    harness
        .context
        .result_processor()
        .handle_result(GenerationResult::failure(task.task_id, "timeout"))
        .await
        .unwrap();
    let err = service.request_generation(owner, advance()).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Conflict(ConflictKind::AwaitingRetry)));

    // Retrying regenerates the same scene
    service.retry_generation(owner, game.entity()).await.unwrap();
    let again = harness.take_task(&harness.story_queue()).await.unwrap();
    assert_eq!(again.prompt_type, PromptType::NovelCreator);
    assert_eq!(again.payload, task.payload);
}

#[tokio::test]
async fn test_generation_limit_is_configurable() {
    let mut config = StoryloomConfig::default();
    config.orchestration.generation_limit_per_owner = 2;
    let harness = Harness::with_config(config).await;
    let service = harness.context.generation_service();
    let owner = Uuid::new_v4();

    service.request_generation(owner, draft_intent()).await.unwrap();
    service.request_generation(owner, draft_intent()).await.unwrap();
    assert!(service
        .request_generation(owner, draft_intent())
        .await
        .unwrap_err()
        .is_conflict());
}

#[tokio::test]
async fn test_revision_reworks_ready_draft() {
    let harness = Harness::new().await;
    let service = harness.context.generation_service();
    let owner = Uuid::new_v4();
    let draft_id = harness.ready_draft(owner).await;
    let revise = |revision: &str| GenerationIntent::ReviseDraft {
        story_config_id: draft_id,
        revision: revision.into(),
    };

    let err = service.request_generation(owner, revise("  ")).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Validation(_)));

    let outcome = service.request_generation(owner, revise(" make it darker ")).await.unwrap();
    assert_eq!(outcome.snapshot.status, GenerationStatus::Generating);
    assert!(outcome.snapshot.artifact.is_none());

    let err = service.request_generation(owner, revise("again")).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Conflict(ConflictKind::AlreadyGenerating)));

    let task = harness.take_task(&harness.draft_queue()).await.unwrap();
    assert_eq!(task.prompt_type, PromptType::NarratorReviser);
    assert_eq!(
        task.payload["user_input"],
        json!(["a heist aboard a generation ship", "make it darker"])
    );
    assert_eq!(task.payload["config"], story_config_artifact());

    let revised = json!({"title": "Ark of Knives"});
    harness.succeed(&task, revised.clone()).await;
    let status = service.get_status(owner, outcome.entity()).await.unwrap();
    assert_eq!(status.artifact, Some(revised));

    let stored = harness.store.story_config(draft_id).await.unwrap().unwrap();
    assert_eq!(stored.user_input.len(), 2);
}

#[tokio::test]
async fn test_revision_respects_ownership_and_ceiling() {
    let harness = Harness::new().await;
    let service = harness.context.generation_service();
    let owner = Uuid::new_v4();
    let draft_id = harness.ready_draft(owner).await;
    let revise = GenerationIntent::ReviseDraft {
        story_config_id: draft_id,
        revision: "add a traitor".into(),
    };

    let err = service.request_generation(Uuid::new_v4(), revise.clone()).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::NotFound { .. }));

    service.request_generation(owner, draft_intent()).await.unwrap();
    let err = service.request_generation(owner, revise).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::Conflict(ConflictKind::TooManyInFlight { active: 1, limit: 1 })
    ));
    let stored = harness.store.story_config(draft_id).await.unwrap().unwrap();
    assert_eq!(stored.status, GenerationStatus::Ready);
}
