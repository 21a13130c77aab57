mod common;

use std::time::Duration;

use common::Harness;
use storyloom_core::config::StoryloomConfig;
use storyloom_core::constants::dead_letter_reason;
use storyloom_core::messaging::service::providers::{DEATH_REASON_DELIVERY_LIMIT, DEATH_REASON_REJECTED};
use storyloom_core::messaging::{dead_letter_queue_name, GenerationResult, MessagingService, MessagingServiceExt};
use storyloom_core::models::GenerationStatus;
use storyloom_core::orchestration::GenerationIntent;
use uuid::Uuid;

fn draft_intent() -> GenerationIntent {
    GenerationIntent::Draft {
        prompt: "a lighthouse keeper's last night".into(),
        language: "en".into(),
    }
}

#[tokio::test]
async fn test_rejected_task_fails_its_entity() {
    let harness = Harness::new().await;
    let owner = Uuid::new_v4();
    let service = harness.context.generation_service();
    let draft = service.request_generation(owner, draft_intent()).await.unwrap();

    // A worker gives up on the task
    let queue = harness.draft_queue();
    let mut batch = harness
        .broker
        .receive_raw(&queue, 1, Duration::from_secs(30))
        .await
        .unwrap();
    let delivery = batch.pop().unwrap();
    harness
        .broker
        .nack_message(&queue, &delivery.receipt_handle, false)
        .await
        .unwrap();
    assert_eq!(harness.broker.queue_length(&dead_letter_queue_name(&queue)).await, 1);

    let mut recovered = 0;
    for consumer in harness.context.dead_letter_consumers() {
        recovered += consumer.process_batch().await.unwrap().acked;
    }
    assert_eq!(recovered, 1);

    let status = service.get_status(owner, draft.entity()).await.unwrap();
    assert_eq!(status.status, GenerationStatus::Error);
    assert_eq!(status.error_details, Some(dead_letter_reason(Some(DEATH_REASON_REJECTED))));
    assert_eq!(harness.broker.queue_length(&dead_letter_queue_name(&queue)).await, 0);
}

#[tokio::test]
async fn test_exhausted_deliveries_are_recovered() {
    let mut config = StoryloomConfig::default();
    config.messaging.max_deliveries = 2;
    let harness = Harness::with_config(config).await;
    let owner = Uuid::new_v4();
    let service = harness.context.generation_service();
    let draft = service.request_generation(owner, draft_intent()).await.unwrap();

    // Two deliveries that time out without settling
    let queue = harness.draft_queue();
    for _ in 0..2 {
        let batch = harness
            .broker
            .receive_raw(&queue, 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        harness.broker.expire_visibility(&queue).await;
    }
    // The next poll moves it to the dead-letter queue
    assert!(harness
        .broker
        .receive_raw(&queue, 1, Duration::from_secs(30))
        .await
        .unwrap()
        .is_empty());

    let dlq = dead_letter_queue_name(&queue);
    let consumer = harness
        .context
        .dead_letter_consumers()
        .into_iter()
        .find(|c| c.queue_name() == dlq)
        .unwrap();
    assert_eq!(consumer.process_batch().await.unwrap().acked, 1);

    let status = service.get_status(owner, draft.entity()).await.unwrap();
    assert_eq!(status.status, GenerationStatus::Error);
    assert_eq!(
        status.error_details,
        Some(dead_letter_reason(Some(DEATH_REASON_DELIVERY_LIMIT)))
    );
}

#[tokio::test]
async fn test_dead_letter_after_success_is_ignored() {
    let harness = Harness::new().await;
    let owner = Uuid::new_v4();
    let service = harness.context.generation_service();
    let draft = service.request_generation(owner, draft_intent()).await.unwrap();

    // The worker answered, then the broker dead-lettered a redelivery anyway
    let task = harness.take_task(&harness.draft_queue()).await.unwrap();
    harness.succeed(&task, common::story_config_artifact()).await;
    let dlq = dead_letter_queue_name(&harness.draft_queue());
    harness.broker.send_message(&dlq, &task).await.unwrap();

    let consumer = harness
        .context
        .dead_letter_consumers()
        .into_iter()
        .find(|c| c.queue_name() == dlq)
        .unwrap();
    assert_eq!(consumer.process_batch().await.unwrap().acked, 1);
    assert!(service.get_status(owner, draft.entity()).await.unwrap().is_ready());
}

#[tokio::test]
async fn test_malformed_dead_letter_is_dropped() {
    let harness = Harness::new().await;
    let dlq = dead_letter_queue_name(&harness.story_queue());
    harness.broker.send_raw(&dlq, b"not json".to_vec()).await.unwrap();

    let consumer = harness
        .context
        .dead_letter_consumers()
        .into_iter()
        .find(|c| c.queue_name() == dlq)
        .unwrap();
    let outcome = consumer.process_batch().await.unwrap();
    assert_eq!(outcome.dropped, 1);
    assert_eq!(harness.broker.queue_length(&dlq).await, 0);
}

#[tokio::test]
async fn test_store_outage_does_not_requeue() {
    let harness = Harness::new().await;
    let owner = Uuid::new_v4();
    harness
        .context
        .generation_service()
        .request_generation(owner, draft_intent())
        .await
        .unwrap();
    let task = harness.take_task(&harness.draft_queue()).await.unwrap();
    let dlq = dead_letter_queue_name(&harness.draft_queue());
    harness.broker.send_message(&dlq, &task).await.unwrap();

    harness.store.set_unavailable(true);
    let consumer = harness
        .context
        .dead_letter_consumers()
        .into_iter()
        .find(|c| c.queue_name() == dlq)
        .unwrap();
    let outcome = consumer.process_batch().await.unwrap();

    assert_eq!(outcome.dead_lettered, 1);
    assert_eq!(harness.broker.queue_length(&dlq).await, 0);
}

#[tokio::test]
async fn test_exhausted_result_fails_its_entity() {
    let mut config = StoryloomConfig::default();
    config.messaging.max_deliveries = 2;
    let harness = Harness::with_config(config).await;
    let owner = Uuid::new_v4();
    let service = harness.context.generation_service();
    let draft = service.request_generation(owner, draft_intent()).await.unwrap();
    let task = harness.take_task(&harness.draft_queue()).await.unwrap();

    // The worker answers, but every attempt to apply the result fails
    harness.store.fail_on("complete_story_config");
    let results = harness.context.router.result_queue().to_string();
    harness
        .broker
        .send_message(&results, &GenerationResult::success(task.task_id, common::story_config_artifact()))
        .await
        .unwrap();

    let consumer = harness.context.result_consumer();
    assert_eq!(consumer.process_batch().await.unwrap().retried, 1);
    assert_eq!(consumer.process_batch().await.unwrap().dead_lettered, 1);
    assert_eq!(harness.broker.queue_length(&results).await, 0);
    assert_eq!(harness.broker.queue_length(&dead_letter_queue_name(&results)).await, 1);
    assert_eq!(
        service.get_status(owner, draft.entity()).await.unwrap().status,
        GenerationStatus::Generating
    );

    harness.store.clear_faults();
    let recovery = harness.context.result_dead_letter_consumer();
    assert_eq!(recovery.process_batch().await.unwrap().acked, 1);

    let status = service.get_status(owner, draft.entity()).await.unwrap();
    assert_eq!(status.status, GenerationStatus::Error);
    assert_eq!(harness.broker.queue_length(&dead_letter_queue_name(&results)).await, 0);

    // The failed draft can be retried like any other failure
    let retried = service.retry_generation(owner, draft.entity()).await.unwrap();
    assert_eq!(retried.snapshot.status, GenerationStatus::Generating);
}

#[tokio::test]
async fn test_dead_image_task_leaves_story_generating() {
    let harness = Harness::new().await;
    let owner = Uuid::new_v4();
    let draft_id = harness.ready_draft(owner).await;
    let story = harness
        .context
        .generation_service()
        .request_generation(owner, GenerationIntent::Publish { story_config_id: draft_id })
        .await
        .unwrap();
    let setup = harness.take_task(&harness.story_queue()).await.unwrap();
    harness
        .succeed(
            &setup,
            serde_json::json!({
                "core_stats_definition": {"nerve": {"initial": 3}},
                "story_preview_image_prompt": "a lighthouse in a storm",
            }),
        )
        .await;

    let queue = harness.image_queue();
    let mut batch = harness
        .broker
        .receive_raw(&queue, 1, Duration::from_secs(30))
        .await
        .unwrap();
    let delivery = batch.pop().unwrap();
    harness
        .broker
        .nack_message(&queue, &delivery.receipt_handle, false)
        .await
        .unwrap();

    let mut acked = 0;
    for consumer in harness.context.dead_letter_consumers() {
        acked += consumer.process_batch().await.unwrap().acked;
    }
    assert_eq!(acked, 1);

    let status = harness
        .context
        .generation_service()
        .get_status(owner, story.entity())
        .await
        .unwrap();
    assert_eq!(status.status, GenerationStatus::Generating);
    assert!(status.error_details.is_none());
}
