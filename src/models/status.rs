use serde::{Deserialize, Serialize};
use std::fmt;

/// Generation status shared by drafts and published stories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    /// A task is in flight for this entity
    Generating,
    /// Generation completed and the artifact is stored
    Ready,
    /// Generation failed; only an explicit retry leaves this state
    Error,
}

impl GenerationStatus {
    /// Terminal from the pipeline's point of view: results no longer apply
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GenerationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generating" => Ok(Self::Generating),
            "ready" => Ok(Self::Ready),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid generation status: {s}")),
        }
    }
}

impl Default for GenerationStatus {
    fn default() -> Self {
        Self::Generating
    }
}

/// Status of a save slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    /// The current scene is available
    Playing,
    /// Waiting for the next scene to be generated
    GeneratingScene,
    /// Scene generation failed
    Error,
    /// A game-over condition was met; the ending is being generated
    GameOverPending,
    /// The ending is stored; no further choices apply
    Completed,
}

impl PlayerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Playing => "playing",
            Self::GeneratingScene => "generating_scene",
            Self::Error => "error",
            Self::GameOverPending => "game_over_pending",
            Self::Completed => "completed",
        }
    }

    /// Collapse onto the generic generation status used in snapshots
    pub fn as_generation_status(&self) -> GenerationStatus {
        match self {
            Self::Playing | Self::Completed => GenerationStatus::Ready,
            Self::GeneratingScene | Self::GameOverPending => GenerationStatus::Generating,
            Self::Error => GenerationStatus::Error,
        }
    }

    /// A scene or ending task is in flight
    pub fn is_generating(&self) -> bool {
        matches!(self, Self::GeneratingScene | Self::GameOverPending)
    }
}

impl fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlayerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "playing" => Ok(Self::Playing),
            "generating_scene" => Ok(Self::GeneratingScene),
            "error" => Ok(Self::Error),
            "game_over_pending" => Ok(Self::GameOverPending),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid player status: {s}")),
        }
    }
}

/// Which half of a published story's generation is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    Setup,
    FirstScene,
}

impl GenerationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::FirstScene => "first_scene",
        }
    }
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GenerationStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "setup" => Ok(Self::Setup),
            "first_scene" => Ok(Self::FirstScene),
            _ => Err(format!("Invalid generation stage: {s}")),
        }
    }
}

/// Kind of entity a generation task drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    StoryConfig,
    PublishedStory,
    GameState,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoryConfig => "story_config",
            Self::PublishedStory => "published_story",
            Self::GameState => "game_state",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "story_config" => Ok(Self::StoryConfig),
            "published_story" => Ok(Self::PublishedStory),
            "game_state" => Ok(Self::GameState),
            _ => Err(format!("Invalid entity kind: {s}")),
        }
    }
}

/// Prompt types understood by the generation workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    /// Draft a story config from free-form user input
    Narrator,
    /// Rework an existing draft with an added user prompt
    NarratorReviser,
    /// Generate the setup (stats, characters) of a published story
    NovelSetup,
    /// Generate the opening scene of a published story
    NovelFirstSceneCreator,
    /// Generate the next scene for a game state
    NovelCreator,
    /// Generate the ending of a game state that met a game-over condition
    NovelGameOverCreator,
    /// Portrait for one setup character
    CharacterImage,
    /// Cover image for a published story
    StoryPreviewImage,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Narrator => "narrator",
            Self::NarratorReviser => "narrator_reviser",
            Self::NovelSetup => "novel_setup",
            Self::NovelFirstSceneCreator => "novel_first_scene_creator",
            Self::NovelCreator => "novel_creator",
            Self::NovelGameOverCreator => "novel_game_over_creator",
            Self::CharacterImage => "character_image",
            Self::StoryPreviewImage => "story_preview_image",
        }
    }

    /// The entity this prompt's task is recorded against
    ///
    /// Image prompts belong to the published story but never drive its status.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Self::Narrator | Self::NarratorReviser => EntityKind::StoryConfig,
            Self::NovelSetup | Self::NovelFirstSceneCreator | Self::CharacterImage | Self::StoryPreviewImage => {
                EntityKind::PublishedStory
            }
            Self::NovelCreator | Self::NovelGameOverCreator => EntityKind::GameState,
        }
    }

    /// Drafts go to their own queue so long story jobs cannot starve them
    pub fn is_draft(&self) -> bool {
        matches!(self, Self::Narrator | Self::NarratorReviser)
    }

    pub fn is_image(&self) -> bool {
        matches!(self, Self::CharacterImage | Self::StoryPreviewImage)
    }
}

impl fmt::Display for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PromptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "narrator" => Ok(Self::Narrator),
            "narrator_reviser" => Ok(Self::NarratorReviser),
            "novel_setup" => Ok(Self::NovelSetup),
            "novel_first_scene_creator" => Ok(Self::NovelFirstSceneCreator),
            "novel_creator" => Ok(Self::NovelCreator),
            "novel_game_over_creator" => Ok(Self::NovelGameOverCreator),
            "character_image" => Ok(Self::CharacterImage),
            "story_preview_image" => Ok(Self::StoryPreviewImage),
            _ => Err(format!("Invalid prompt type: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_status_terminal_check() {
        assert!(GenerationStatus::Ready.is_terminal());
        assert!(GenerationStatus::Error.is_terminal());
        assert!(!GenerationStatus::Generating.is_terminal());
    }

    #[test]
    fn test_status_string_conversion() {
        assert_eq!(PlayerStatus::GeneratingScene.to_string(), "generating_scene");
        assert_eq!(
            "generating".parse::<GenerationStatus>().unwrap(),
            GenerationStatus::Generating
        );
        assert_eq!(
            "first_scene".parse::<GenerationStage>().unwrap(),
            GenerationStage::FirstScene
        );
        assert!("bogus".parse::<PlayerStatus>().is_err());
    }

    #[test]
    fn test_player_status_maps_onto_generation_status() {
        assert_eq!(PlayerStatus::Playing.as_generation_status(), GenerationStatus::Ready);
        assert_eq!(
            PlayerStatus::GeneratingScene.as_generation_status(),
            GenerationStatus::Generating
        );
        assert_eq!(PlayerStatus::Error.as_generation_status(), GenerationStatus::Error);
        assert_eq!(
            PlayerStatus::GameOverPending.as_generation_status(),
            GenerationStatus::Generating
        );
        assert_eq!(PlayerStatus::Completed.as_generation_status(), GenerationStatus::Ready);
        assert!(PlayerStatus::GameOverPending.is_generating());
        assert!(!PlayerStatus::Completed.is_generating());
        assert_eq!("game_over_pending".parse::<PlayerStatus>().unwrap(), PlayerStatus::GameOverPending);
    }

    #[test]
    fn test_prompt_type_routing() {
        assert_eq!(PromptType::Narrator.entity_kind(), EntityKind::StoryConfig);
        assert_eq!(PromptType::NovelSetup.entity_kind(), EntityKind::PublishedStory);
        assert_eq!(
            PromptType::NovelFirstSceneCreator.entity_kind(),
            EntityKind::PublishedStory
        );
        assert_eq!(PromptType::NovelCreator.entity_kind(), EntityKind::GameState);
        assert!(PromptType::Narrator.is_draft());
        assert!(!PromptType::NovelCreator.is_draft());

        assert_eq!(PromptType::NarratorReviser.entity_kind(), EntityKind::StoryConfig);
        assert!(PromptType::NarratorReviser.is_draft());
        assert_eq!(PromptType::NovelGameOverCreator.entity_kind(), EntityKind::GameState);
        assert_eq!(PromptType::CharacterImage.entity_kind(), EntityKind::PublishedStory);
        assert!(PromptType::StoryPreviewImage.is_image());
        assert!(!PromptType::NovelSetup.is_image());
    }

    #[test]
    fn test_every_prompt_type_parses_back() {
        for prompt in [
            PromptType::Narrator,
            PromptType::NarratorReviser,
            PromptType::NovelSetup,
            PromptType::NovelFirstSceneCreator,
            PromptType::NovelCreator,
            PromptType::NovelGameOverCreator,
            PromptType::CharacterImage,
            PromptType::StoryPreviewImage,
        ] {
            assert_eq!(prompt.as_str().parse::<PromptType>().unwrap(), prompt);
        }
    }

    #[test]
    fn test_prompt_type_serde() {
        let json = serde_json::to_string(&PromptType::NovelFirstSceneCreator).unwrap();
        assert_eq!(json, "\"novel_first_scene_creator\"");
        let parsed: PromptType = serde_json::from_str("\"novel_creator\"").unwrap();
        assert_eq!(parsed, PromptType::NovelCreator);
    }
}
