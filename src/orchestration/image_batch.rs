//! # Image Batch
//!
//! Collects the images a stored setup asks for: one portrait per character
//! that names an image reference and a prompt, plus the story's cover when
//! the setup carries a preview prompt.
//!
//! Image references are global. A reference that is already stored is never
//! requested again, whichever story first produced it.

use std::collections::HashSet;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{GenerationTaskRecord, PromptType};

const CHARACTER_RATIO: &str = "2:3";
const PREVIEW_RATIO: &str = "3:2";

/// One image to generate
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt_type: PromptType,
    pub image_ref: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub ratio: &'static str,
}

impl ImageRequest {
    /// Ledger record for this request, owned by the published story
    pub fn to_task(
        &self,
        published_story_id: Uuid,
        owner_id: Uuid,
        correlation_id: Uuid,
        visual_style: Option<&str>,
    ) -> GenerationTaskRecord {
        GenerationTaskRecord::new(
            Uuid::new_v4(),
            published_story_id,
            owner_id,
            self.prompt_type,
            correlation_id,
            json!({
                "image_ref": self.image_ref,
                "prompt": self.prompt,
                "negative_prompt": self.negative_prompt,
                "visual_style": visual_style,
                "ratio": self.ratio,
                "published_story_id": published_story_id,
            }),
        )
    }
}

/// Character references always carry the `ch_` prefix
pub fn normalize_character_ref(raw: &str) -> String {
    let bare = raw
        .strip_prefix("character_")
        .or_else(|| raw.strip_prefix("char_"))
        .or_else(|| raw.strip_prefix("ch_"))
        .unwrap_or(raw);
    format!("ch_{bare}")
}

pub fn preview_ref(published_story_id: Uuid) -> String {
    format!("history_preview_{published_story_id}")
}

/// Visual style shared by every image of a story; the setup wins over the draft
pub fn visual_style<'a>(config: &'a Value, setup: &'a Value) -> Option<&'a str> {
    setup
        .get("visual_style")
        .or_else(|| config.get("visual_style"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Every image `setup` asks for, deduplicated by reference
pub fn collect_image_requests(published_story_id: Uuid, setup: &Value) -> Vec<ImageRequest> {
    let mut seen = HashSet::new();
    let mut requests = Vec::new();

    let characters = setup.get("characters").and_then(Value::as_array);
    for character in characters.into_iter().flatten() {
        let text = |key: &str| {
            character
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };
        let (Some(raw_ref), Some(prompt)) = (text("image_ref"), text("image_prompt")) else {
            continue;
        };
        let image_ref = normalize_character_ref(raw_ref);
        if !seen.insert(image_ref.clone()) {
            continue;
        }
        requests.push(ImageRequest {
            prompt_type: PromptType::CharacterImage,
            image_ref,
            prompt: prompt.to_string(),
            negative_prompt: text("negative_prompt").map(str::to_string),
            ratio: CHARACTER_RATIO,
        });
    }

    let preview = setup
        .get("story_preview_image_prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(prompt) = preview {
        requests.push(ImageRequest {
            prompt_type: PromptType::StoryPreviewImage,
            image_ref: preview_ref(published_story_id),
            prompt: prompt.to_string(),
            negative_prompt: None,
            ratio: PREVIEW_RATIO,
        });
    }

    requests
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_refs_are_normalized() {
        assert_eq!(normalize_character_ref("ada"), "ch_ada");
        assert_eq!(normalize_character_ref("ch_ada"), "ch_ada");
        assert_eq!(normalize_character_ref("character_ada"), "ch_ada");
        assert_eq!(normalize_character_ref("char_ada"), "ch_ada");
    }

    #[test]
    fn test_collects_characters_and_preview() {
        let story_id = Uuid::new_v4();
        let setup = json!({
            "characters": [
                {"name": "Ada", "image_ref": "ada", "image_prompt": "a pilot"},
                {"name": "Ada again", "image_ref": "ch_ada", "image_prompt": "a pilot"},
                {"name": "Bo", "image_ref": "bo"},
                {"name": "Cy", "image_ref": "char_cy", "image_prompt": "a medic", "negative_prompt": "blurry"},
            ],
            "story_preview_image_prompt": "a derelict ship",
        });

        let requests = collect_image_requests(story_id, &setup);
        let refs: Vec<_> = requests.iter().map(|r| r.image_ref.as_str()).collect();
        assert_eq!(refs, vec!["ch_ada", "ch_cy", preview_ref(story_id).as_str()]);
        assert_eq!(requests[1].negative_prompt.as_deref(), Some("blurry"));
        assert_eq!(requests[0].ratio, "2:3");
        assert_eq!(requests[2].prompt_type, PromptType::StoryPreviewImage);
        assert_eq!(requests[2].ratio, "3:2");
    }

    #[test]
    fn test_setup_without_images_requests_nothing() {
        let setup = json!({"characters": [{"name": "Oduya", "role": "fence"}], "story_preview_image_prompt": " "});
        assert!(collect_image_requests(Uuid::new_v4(), &setup).is_empty());
    }

    #[test]
    fn test_visual_style_prefers_setup() {
        let config = json!({"visual_style": "ink wash"});
        assert_eq!(visual_style(&config, &json!({})), Some("ink wash"));
        assert_eq!(visual_style(&config, &json!({"visual_style": "neon"})), Some("neon"));
        assert_eq!(visual_style(&json!({}), &json!({"visual_style": ""})), None);
    }

    #[test]
    fn test_task_payload_carries_reference() {
        let story_id = Uuid::new_v4();
        let request = &collect_image_requests(story_id, &json!({"story_preview_image_prompt": "a ship"}))[0];
        let task = request.to_task(story_id, Uuid::new_v4(), Uuid::new_v4(), Some("neon"));

        assert_eq!(task.entity_id, story_id);
        assert_eq!(task.prompt_type, PromptType::StoryPreviewImage);
        assert_eq!(task.payload["image_ref"], json!(preview_ref(story_id)));
        assert_eq!(task.payload["visual_style"], json!("neon"));
    }
}
