#![allow(dead_code)]

pub mod strategies;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use storyloom_core::config::StoryloomConfig;
use storyloom_core::database::InMemoryEntityStore;
use storyloom_core::messaging::{
    GenerationResult, GenerationTask, InMemoryMessagingService, MessagingService, MessagingServiceExt,
};
use storyloom_core::orchestration::{GenerationIntent, HandleOutcome, SystemContext};
use uuid::Uuid;

/// Test harness over the in-memory store and broker, keeping concrete handles
/// for fault injection.
pub struct Harness {
    pub context: SystemContext,
    pub store: Arc<InMemoryEntityStore>,
    pub broker: Arc<InMemoryMessagingService>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(StoryloomConfig::default()).await
    }

    pub async fn with_config(config: StoryloomConfig) -> Self {
        let store = Arc::new(InMemoryEntityStore::new());
        let broker = Arc::new(InMemoryMessagingService::with_max_deliveries(config.messaging.max_deliveries));
        let context = SystemContext::assemble(config, store.clone(), broker.clone())
            .await
            .expect("in-memory wiring");
        Self { context, store, broker }
    }

    pub fn draft_queue(&self) -> String {
        self.context.router.task_queue(storyloom_core::models::PromptType::Narrator).to_string()
    }

    pub fn story_queue(&self) -> String {
        self.context.router.task_queue(storyloom_core::models::PromptType::NovelSetup).to_string()
    }

    pub fn image_queue(&self) -> String {
        self.context.router.task_queue(storyloom_core::models::PromptType::CharacterImage).to_string()
    }

    /// Pop the next task from `queue` the way a worker would
    pub async fn take_task(&self, queue: &str) -> Option<GenerationTask> {
        let mut batch = self
            .broker
            .receive_messages::<GenerationTask>(queue, 1, Duration::from_secs(30))
            .await
            .expect("receive");
        let delivery = batch.pop()?;
        self.broker
            .ack_message(queue, &delivery.receipt_handle)
            .await
            .expect("ack");
        Some(delivery.message.expect("well-formed task"))
    }

    pub async fn succeed(&self, task: &GenerationTask, artifact: Value) -> HandleOutcome {
        self.context
            .result_processor()
            .handle_result(GenerationResult::success(task.task_id, artifact))
            .await
            .expect("result applied")
    }

    /// Drive a draft to ready and return its id
    pub async fn ready_draft(&self, owner: Uuid) -> Uuid {
        let outcome = self
            .context
            .generation_service()
            .request_generation(
                owner,
                GenerationIntent::Draft {
                    prompt: "a heist aboard a generation ship".into(),
                    language: "en".into(),
                },
            )
            .await
            .expect("draft requested");
        let task = self.take_task(&self.draft_queue()).await.expect("narrator task");
        self.succeed(&task, story_config_artifact()).await;
        outcome.snapshot.id
    }

    /// Drive a draft and its publication to ready and return the story id
    pub async fn ready_story(&self, owner: Uuid) -> Uuid {
        self.ready_story_with(owner, setup_artifact()).await
    }

    /// Same as [`Harness::ready_story`] with a caller-chosen setup
    pub async fn ready_story_with(&self, owner: Uuid, setup_content: Value) -> Uuid {
        let draft_id = self.ready_draft(owner).await;
        let outcome = self
            .context
            .generation_service()
            .request_generation(owner, GenerationIntent::Publish { story_config_id: draft_id })
            .await
            .expect("publish requested");

        let setup = self.take_task(&self.story_queue()).await.expect("setup task");
        if let HandleOutcome::Advanced { .. } = self.succeed(&setup, setup_content).await {
            let first = self.take_task(&self.story_queue()).await.expect("first scene task");
            self.succeed(&first, scene_artifact("The airlock hisses open.")).await;
        }
        outcome.snapshot.id
    }
}

pub fn story_config_artifact() -> Value {
    json!({
        "title": "Ark of Thieves",
        "short_description": "A heist aboard a generation ship",
        "language": "en",
        "is_adult_content": false,
        "player_name": "Vey",
        "player_gender": "unspecified",
        "player_description": "A smuggler with debts",
        "world_context": "Three centuries into the voyage",
        "themes": ["heist", "loyalty"],
    })
}

pub fn setup_artifact() -> Value {
    json!({
        "core_stats_definition": {
            "nerve": {"initial": 3},
            "credits": {"initial": 50},
        },
        "characters": [{"name": "Oduya", "role": "fence"}],
    })
}

pub fn scene_artifact(text: &str) -> Value {
    json!({ "text": text, "choices": ["wait", "run"] })
}
