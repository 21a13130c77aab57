//! # Queue Router
//!
//! Resolves queue names from configuration so no component hard-codes them.

use crate::config::QueuesConfig;
use crate::messaging::service::traits::dead_letter_queue_name;
use crate::models::PromptType;

#[derive(Debug, Clone)]
pub struct QueueRouter {
    draft_tasks: String,
    story_tasks: String,
    image_tasks: String,
    results: String,
}

impl QueueRouter {
    pub fn from_config(config: &QueuesConfig) -> Self {
        Self {
            draft_tasks: config.draft_tasks.clone(),
            story_tasks: config.story_tasks.clone(),
            image_tasks: config.image_tasks.clone(),
            results: config.results.clone(),
        }
    }

    /// Task queue a prompt type is published to
    ///
    /// Draft prompts go to their own queue so slow story generation never
    /// starves them; image prompts go to the image workers.
    pub fn task_queue(&self, prompt_type: PromptType) -> &str {
        if prompt_type.is_draft() {
            &self.draft_tasks
        } else if prompt_type.is_image() {
            &self.image_tasks
        } else {
            &self.story_tasks
        }
    }

    pub fn result_queue(&self) -> &str {
        &self.results
    }

    pub fn task_queues(&self) -> Vec<String> {
        vec![self.draft_tasks.clone(), self.story_tasks.clone(), self.image_tasks.clone()]
    }

    /// Task dead-letter queues drained by the recovery consumer
    pub fn dead_letter_queues(&self) -> Vec<String> {
        self.task_queues().iter().map(|q| dead_letter_queue_name(q)).collect()
    }

    /// Where results that exhausted their deliveries end up
    pub fn result_dead_letter_queue(&self) -> String {
        dead_letter_queue_name(&self.results)
    }

    /// Every queue the orchestrator publishes to or consumes from
    pub fn all_queues(&self) -> Vec<String> {
        let mut queues = self.task_queues();
        queues.push(self.results.clone());
        queues
    }
}

impl Default for QueueRouter {
    fn default() -> Self {
        Self::from_config(&QueuesConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_routing() {
        let router = QueueRouter::default();
        assert_eq!(router.task_queue(PromptType::Narrator), "draft_story_tasks");
        assert_eq!(router.task_queue(PromptType::NovelSetup), "story_generation_tasks");
        assert_eq!(router.task_queue(PromptType::NovelCreator), "story_generation_tasks");
        assert_eq!(router.task_queue(PromptType::NarratorReviser), "draft_story_tasks");
        assert_eq!(router.task_queue(PromptType::NovelGameOverCreator), "story_generation_tasks");
        assert_eq!(router.task_queue(PromptType::CharacterImage), "image_generation_tasks");
        assert_eq!(router.task_queue(PromptType::StoryPreviewImage), "image_generation_tasks");
        assert_eq!(router.result_queue(), "generation_results");
    }

    #[test]
    fn test_dead_letter_queues() {
        let router = QueueRouter::default();
        assert_eq!(
            router.dead_letter_queues(),
            vec![
                "draft_story_tasks_dlq".to_string(),
                "story_generation_tasks_dlq".to_string(),
                "image_generation_tasks_dlq".to_string(),
            ]
        );
        assert_eq!(router.result_dead_letter_queue(), "generation_results_dlq");
        assert_eq!(router.all_queues().len(), 4);
    }
}
