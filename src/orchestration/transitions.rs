//! Transition helpers shared by the request, result and recovery paths.
//!
//! All of them run inside a caller-owned unit of work.

use uuid::Uuid;

use crate::database::{StoreResult, UnitOfWork};
use crate::error::{ConflictKind, OrchestrationError, OrchestrationResult};
use crate::models::{EntityKind, PlayerGameState, PublishedStory, StoryConfig};

/// Move the entity driven by `task_id` to its error state
///
/// Returns `false` when the entity is gone, already terminal, or owned by a
/// newer task.
pub(crate) async fn fail_entity(
    uow: &mut dyn UnitOfWork,
    kind: EntityKind,
    entity_id: Uuid,
    task_id: Uuid,
    reason: &str,
) -> StoreResult<bool> {
    match kind {
        EntityKind::StoryConfig => uow.fail_story_config(entity_id, task_id, reason).await,
        EntityKind::PublishedStory => uow.fail_published_story(entity_id, task_id, reason).await,
        EntityKind::GameState => uow.fail_scene_generation(entity_id, task_id, reason).await,
    }
}

/// Reject a new generation when the owner is at the in-flight ceiling
///
/// Takes the owner lock first, so concurrent requests from one owner count
/// and insert one at a time.
pub(crate) async fn ensure_capacity(uow: &mut dyn UnitOfWork, owner_id: Uuid, limit: i64) -> OrchestrationResult<()> {
    uow.lock_owner(owner_id).await?;
    let active = uow.count_generating_story_configs(owner_id).await?
        + uow.count_generating_published_stories(owner_id).await?;

    if active >= limit {
        return Err(OrchestrationError::Conflict(ConflictKind::TooManyInFlight { active, limit }));
    }
    Ok(())
}

// Ownership mismatches are reported as missing so existence does not leak.

pub(crate) async fn owned_story_config(
    uow: &mut dyn UnitOfWork,
    owner_id: Uuid,
    id: Uuid,
) -> OrchestrationResult<StoryConfig> {
    uow.find_story_config(id)
        .await?
        .filter(|c| c.owner_id == owner_id)
        .ok_or_else(|| OrchestrationError::not_found(EntityKind::StoryConfig, id))
}

pub(crate) async fn owned_published_story(
    uow: &mut dyn UnitOfWork,
    owner_id: Uuid,
    id: Uuid,
) -> OrchestrationResult<PublishedStory> {
    uow.find_published_story(id)
        .await?
        .filter(|s| s.owner_id == owner_id)
        .ok_or_else(|| OrchestrationError::not_found(EntityKind::PublishedStory, id))
}

pub(crate) async fn owned_game_state(
    uow: &mut dyn UnitOfWork,
    player_id: Uuid,
    id: Uuid,
) -> OrchestrationResult<PlayerGameState> {
    uow.find_game_state(id)
        .await?
        .filter(|g| g.player_id == player_id)
        .ok_or_else(|| OrchestrationError::not_found(EntityKind::GameState, id))
}
