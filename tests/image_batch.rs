mod common;

use common::{scene_artifact, Harness};
use serde_json::{json, Value};
use storyloom_core::config::StoryloomConfig;
use storyloom_core::database::EntityStore;
use storyloom_core::messaging::GenerationResult;
use storyloom_core::models::{GenerationStatus, PromptType};
use storyloom_core::orchestration::image_batch::preview_ref;
use storyloom_core::orchestration::{GenerationIntent, HandleOutcome};
use uuid::Uuid;

fn illustrated_setup() -> Value {
    json!({
        "core_stats_definition": {"nerve": {"initial": 3}},
        "characters": [
            {"name": "Oduya", "image_ref": "oduya", "image_prompt": "a tired fence"},
            {"name": "Vey", "image_ref": "ch_vey", "image_prompt": "a smuggler"},
            {"name": "Crowd"},
        ],
        "story_preview_image_prompt": "a generation ship at dusk",
        "visual_style": "ink wash",
    })
}

async fn publish(harness: &Harness, owner: Uuid) -> Uuid {
    let draft_id = harness.ready_draft(owner).await;
    harness
        .context
        .generation_service()
        .request_generation(owner, GenerationIntent::Publish { story_config_id: draft_id })
        .await
        .unwrap()
        .snapshot
        .id
}

#[tokio::test]
async fn test_setup_fans_out_image_tasks() {
    let harness = Harness::new().await;
    let owner = Uuid::new_v4();
    let story_id = publish(&harness, owner).await;

    let setup = harness.take_task(&harness.story_queue()).await.unwrap();
    let outcome = harness.succeed(&setup, illustrated_setup()).await;
    let HandleOutcome::Advanced { images_requested, .. } = outcome else {
        panic!("expected the setup to advance, got {outcome:?}");
    };
    assert_eq!(images_requested, 3);

    let mut refs = Vec::new();
    while let Some(task) = harness.take_task(&harness.image_queue()).await {
        assert_eq!(task.entity_id, story_id);
        assert_eq!(task.correlation_id, setup.correlation_id);
        assert_eq!(task.payload["visual_style"], json!("ink wash"));
        refs.push(task.payload["image_ref"].as_str().unwrap().to_string());
    }
    refs.sort();
    let mut expected = vec!["ch_oduya".to_string(), "ch_vey".to_string(), preview_ref(story_id)];
    expected.sort();
    assert_eq!(refs, expected);

    // Images never gate the story
    let first = harness.take_task(&harness.story_queue()).await.unwrap();
    assert_eq!(first.prompt_type, PromptType::NovelFirstSceneCreator);
    harness.succeed(&first, scene_artifact("Dusk.")).await;
    let story = harness.store.published_story(story_id).await.unwrap().unwrap();
    assert_eq!(story.status, GenerationStatus::Ready);
}

#[tokio::test]
async fn test_stored_images_are_not_requested_again() {
    let harness = Harness::new().await;
    let owner = Uuid::new_v4();

    let first_story = publish(&harness, owner).await;
    let setup = harness.take_task(&harness.story_queue()).await.unwrap();
    harness.succeed(&setup, illustrated_setup()).await;
    let opening = harness.take_task(&harness.story_queue()).await.unwrap();
    harness.succeed(&opening, scene_artifact("Dusk.")).await;

    while let Some(task) = harness.take_task(&harness.image_queue()).await {
        let url = format!("https://img/{}.png", task.payload["image_ref"].as_str().unwrap());
        let outcome = harness.succeed(&task, json!({ "image_url": url })).await;
        assert!(matches!(outcome, HandleOutcome::ImageStored { .. }));
    }
    assert_eq!(harness.store.counts().await.image_references, 3);

    // A second story naming the same characters only needs its own cover
    let second_story = publish(&harness, owner).await;
    assert_ne!(first_story, second_story);
    let setup = harness.take_task(&harness.story_queue()).await.unwrap();
    let outcome = harness.succeed(&setup, illustrated_setup()).await;
    assert!(matches!(outcome, HandleOutcome::Advanced { images_requested: 1, .. }));

    let cover = harness.take_task(&harness.image_queue()).await.unwrap();
    assert_eq!(cover.prompt_type, PromptType::StoryPreviewImage);
    assert_eq!(cover.payload["image_ref"], json!(preview_ref(second_story)));
    assert!(harness.take_task(&harness.image_queue()).await.is_none());
}

#[tokio::test]
async fn test_failed_image_leaves_story_untouched() {
    let mut config = StoryloomConfig::default();
    config.orchestration.image_dispatch_concurrency = 1;
    let harness = Harness::with_config(config).await;
    let owner = Uuid::new_v4();
    let story_id = publish(&harness, owner).await;

    let setup = harness.take_task(&harness.story_queue()).await.unwrap();
    harness.succeed(&setup, illustrated_setup()).await;
    let image = harness.take_task(&harness.image_queue()).await.unwrap();

    let outcome = harness
        .context
        .result_processor()
        .handle_result(GenerationResult::failure(image.task_id, "nsfw filter"))
        .await
        .unwrap();
    assert!(matches!(outcome, HandleOutcome::ImageFailed { ref reason, .. } if reason == "nsfw filter"));

    let story = harness.store.published_story(story_id).await.unwrap().unwrap();
    assert_eq!(story.status, GenerationStatus::Generating);
    assert!(story.error_details.is_none());
}
