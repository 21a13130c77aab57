//! # Postgres Entity Store
//!
//! `sqlx` implementation of the entity store. Each unit of work owns one
//! `Transaction<'static, Postgres>`; sqlx rolls an uncommitted transaction back
//! when it is dropped.
//!
//! Conditional transitions are single `UPDATE ... WHERE status = ... AND
//! active_task_id = ...` statements, so two racing deliveries of the same
//! result serialize on the row lock and only the first sees a match.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::store::{
    EntityStore, GameStateRepository, ImageReferenceRepository, ProgressRepository,
    PublishedStoryRepository, SceneRepository, StoryConfigRepository, TaskLedgerRepository, UnitOfWork,
};
use crate::config::DatabaseConfig;
use crate::models::{
    GenerationStage, GenerationTaskRecord, ImageReference, PlayerGameState, PlayerProgress,
    PlayerStatus, PublishedStory, StoryConfig, StoryScene,
};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const STORY_CONFIG_COLUMNS: &str = "id, owner_id, user_input, config, language, status, error_details, \
     active_task_id, created_at, updated_at";

const PUBLISHED_STORY_COLUMNS: &str = "id, owner_id, story_config_id, config, setup, language, status, \
     generation_stage, initial_state_hash, error_details, active_task_id, created_at, updated_at";

const PROGRESS_COLUMNS: &str = "id, owner_id, published_story_id, core_stats, scene_index, global_flags, \
     story_variables, current_state_hash, created_at, updated_at";

const SCENE_COLUMNS: &str = "id, published_story_id, state_hash, content, created_at";

const GAME_STATE_COLUMNS: &str = "id, player_id, published_story_id, player_progress_id, current_scene_id, \
     player_status, error_details, active_task_id, ending_text, completed_at, started_at, last_activity_at";

const TASK_COLUMNS: &str = "task_id, entity_kind, entity_id, owner_id, prompt_type, correlation_id, \
     state_hash, payload, created_at";

#[derive(Debug, Clone)]
pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "💾 DATABASE: Connection pool established"
        );
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn story_config(&self, id: Uuid) -> StoreResult<Option<StoryConfig>> {
        let sql = format!("SELECT {STORY_CONFIG_COLUMNS} FROM story_configs WHERE id = $1");
        Ok(sqlx::query_as::<_, StoryConfig>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn published_story(&self, id: Uuid) -> StoreResult<Option<PublishedStory>> {
        let sql = format!("SELECT {PUBLISHED_STORY_COLUMNS} FROM published_stories WHERE id = $1");
        Ok(sqlx::query_as::<_, PublishedStory>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn game_state(&self, id: Uuid) -> StoreResult<Option<PlayerGameState>> {
        let sql = format!("SELECT {GAME_STATE_COLUMNS} FROM player_game_states WHERE id = $1");
        Ok(sqlx::query_as::<_, PlayerGameState>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn scene(&self, id: Uuid) -> StoreResult<Option<StoryScene>> {
        let sql = format!("SELECT {SCENE_COLUMNS} FROM story_scenes WHERE id = $1");
        Ok(sqlx::query_as::<_, StoryScene>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        let health: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(health == 1)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PgUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgUnitOfWork").finish_non_exhaustive()
    }
}

impl PgUnitOfWork {
    async fn execute_conditional(&mut self, query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>) -> StoreResult<bool> {
        let result = query.execute(&mut *self.tx).await?;
        Ok(result.rows_affected() == 1)
    }
}

fn scene_index_column(scene_index: u32) -> i32 {
    i32::try_from(scene_index).unwrap_or(i32::MAX)
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_owner(&mut self, owner_id: Uuid) -> StoreResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(owner_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(StoreError::commit)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(self.tx.rollback().await?)
    }
}

#[async_trait]
impl StoryConfigRepository for PgUnitOfWork {
    async fn insert_story_config(&mut self, config: &StoryConfig) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO story_configs (id, owner_id, user_input, config, language, status, \
             error_details, active_task_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(config.id)
        .bind(config.owner_id)
        .bind(Json(&config.user_input))
        .bind(&config.config)
        .bind(&config.language)
        .bind(config.status.as_str())
        .bind(&config.error_details)
        .bind(config.active_task_id)
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_story_config(&mut self, id: Uuid) -> StoreResult<Option<StoryConfig>> {
        let sql = format!("SELECT {STORY_CONFIG_COLUMNS} FROM story_configs WHERE id = $1 FOR UPDATE");
        Ok(sqlx::query_as::<_, StoryConfig>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn count_generating_story_configs(&mut self, owner_id: Uuid) -> StoreResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM story_configs WHERE owner_id = $1 AND status = 'generating'",
        )
        .bind(owner_id)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn restart_story_config(&mut self, id: Uuid, task_id: Uuid) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE story_configs SET status = 'generating', error_details = NULL, \
                 active_task_id = $2, updated_at = NOW() \
                 WHERE id = $1 AND status = 'error'",
            )
            .bind(id)
            .bind(task_id),
        )
        .await
    }

    async fn revise_story_config(&mut self, id: Uuid, task_id: Uuid, revision: &str) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE story_configs SET status = 'generating', \
                 user_input = user_input || jsonb_build_array($3::text), error_details = NULL, \
                 active_task_id = $2, updated_at = NOW() \
                 WHERE id = $1 AND status IN ('ready', 'error')",
            )
            .bind(id)
            .bind(task_id)
            .bind(revision),
        )
        .await
    }

    async fn complete_story_config(&mut self, id: Uuid, task_id: Uuid, config: &Value) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE story_configs SET status = 'ready', config = $3, error_details = NULL, \
                 updated_at = NOW() \
                 WHERE id = $1 AND status = 'generating' AND active_task_id = $2",
            )
            .bind(id)
            .bind(task_id)
            .bind(config),
        )
        .await
    }

    async fn fail_story_config(&mut self, id: Uuid, task_id: Uuid, reason: &str) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE story_configs SET status = 'error', error_details = $3, updated_at = NOW() \
                 WHERE id = $1 AND status = 'generating' AND active_task_id = $2",
            )
            .bind(id)
            .bind(task_id)
            .bind(reason),
        )
        .await
    }
}

#[async_trait]
impl PublishedStoryRepository for PgUnitOfWork {
    async fn insert_published_story(&mut self, story: &PublishedStory) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO published_stories (id, owner_id, story_config_id, config, setup, language, \
             status, generation_stage, initial_state_hash, error_details, active_task_id, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(story.id)
        .bind(story.owner_id)
        .bind(story.story_config_id)
        .bind(&story.config)
        .bind(&story.setup)
        .bind(&story.language)
        .bind(story.status.as_str())
        .bind(story.generation_stage.map(|stage| stage.as_str()))
        .bind(&story.initial_state_hash)
        .bind(&story.error_details)
        .bind(story.active_task_id)
        .bind(story.created_at)
        .bind(story.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_published_story(&mut self, id: Uuid) -> StoreResult<Option<PublishedStory>> {
        let sql = format!("SELECT {PUBLISHED_STORY_COLUMNS} FROM published_stories WHERE id = $1 FOR UPDATE");
        Ok(sqlx::query_as::<_, PublishedStory>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn count_generating_published_stories(&mut self, owner_id: Uuid) -> StoreResult<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM published_stories WHERE owner_id = $1 AND status = 'generating'",
        )
        .bind(owner_id)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn restart_published_story(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        stage: GenerationStage,
    ) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE published_stories SET status = 'generating', generation_stage = $3, \
                 error_details = NULL, active_task_id = $2, updated_at = NOW() \
                 WHERE id = $1 AND status = 'error'",
            )
            .bind(id)
            .bind(task_id)
            .bind(stage.as_str()),
        )
        .await
    }

    async fn advance_story_to_first_scene(
        &mut self,
        id: Uuid,
        from_task_id: Uuid,
        next_task_id: Uuid,
        setup: &Value,
        initial_state_hash: &str,
    ) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE published_stories SET setup = $4, initial_state_hash = $5, \
                 generation_stage = 'first_scene', active_task_id = $3, updated_at = NOW() \
                 WHERE id = $1 AND status = 'generating' AND active_task_id = $2 \
                 AND generation_stage = 'setup'",
            )
            .bind(id)
            .bind(from_task_id)
            .bind(next_task_id)
            .bind(setup)
            .bind(initial_state_hash),
        )
        .await
    }

    async fn complete_published_story(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        setup: Option<&Value>,
        initial_state_hash: Option<&str>,
    ) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE published_stories SET status = 'ready', generation_stage = NULL, \
                 setup = COALESCE($3, setup), initial_state_hash = COALESCE($4, initial_state_hash), \
                 error_details = NULL, updated_at = NOW() \
                 WHERE id = $1 AND status = 'generating' AND active_task_id = $2",
            )
            .bind(id)
            .bind(task_id)
            .bind(setup)
            .bind(initial_state_hash),
        )
        .await
    }

    async fn fail_published_story(&mut self, id: Uuid, task_id: Uuid, reason: &str) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE published_stories SET status = 'error', error_details = $3, updated_at = NOW() \
                 WHERE id = $1 AND status = 'generating' AND active_task_id = $2",
            )
            .bind(id)
            .bind(task_id)
            .bind(reason),
        )
        .await
    }
}

#[async_trait]
impl ProgressRepository for PgUnitOfWork {
    async fn upsert_progress(&mut self, progress: &PlayerProgress) -> StoreResult<Uuid> {
        // DO UPDATE (not DO NOTHING) so RETURNING yields the existing row's id.
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO player_progress (id, owner_id, published_story_id, core_stats, scene_index, \
             global_flags, story_variables, current_state_hash, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (published_story_id, current_state_hash) \
             DO UPDATE SET updated_at = NOW() \
             RETURNING id",
        )
        .bind(progress.id)
        .bind(progress.owner_id)
        .bind(progress.published_story_id)
        .bind(Json(&progress.state.core_stats))
        .bind(scene_index_column(progress.state.scene_index))
        .bind(Json(&progress.state.global_flags))
        .bind(Json(&progress.state.story_variables))
        .bind(&progress.current_state_hash)
        .bind(progress.created_at)
        .bind(progress.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn find_progress(&mut self, id: Uuid) -> StoreResult<Option<PlayerProgress>> {
        let sql = format!("SELECT {PROGRESS_COLUMNS} FROM player_progress WHERE id = $1");
        Ok(sqlx::query_as::<_, PlayerProgress>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }
}

#[async_trait]
impl SceneRepository for PgUnitOfWork {
    async fn find_scene(&mut self, id: Uuid) -> StoreResult<Option<StoryScene>> {
        let sql = format!("SELECT {SCENE_COLUMNS} FROM story_scenes WHERE id = $1");
        Ok(sqlx::query_as::<_, StoryScene>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn find_scene_by_hash(
        &mut self,
        published_story_id: Uuid,
        state_hash: &str,
    ) -> StoreResult<Option<StoryScene>> {
        let sql = format!(
            "SELECT {SCENE_COLUMNS} FROM story_scenes WHERE published_story_id = $1 AND state_hash = $2"
        );
        Ok(sqlx::query_as::<_, StoryScene>(&sql)
            .bind(published_story_id)
            .bind(state_hash)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn insert_scene_if_absent(&mut self, scene: &StoryScene) -> StoreResult<StoryScene> {
        // The no-op update makes RETURNING produce the already stored scene on conflict.
        let sql = format!(
            "INSERT INTO story_scenes (id, published_story_id, state_hash, content, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (published_story_id, state_hash) \
             DO UPDATE SET state_hash = story_scenes.state_hash \
             RETURNING {SCENE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, StoryScene>(&sql)
            .bind(scene.id)
            .bind(scene.published_story_id)
            .bind(&scene.state_hash)
            .bind(&scene.content)
            .bind(scene.created_at)
            .fetch_one(&mut *self.tx)
            .await?)
    }
}

#[async_trait]
impl GameStateRepository for PgUnitOfWork {
    async fn list_game_states(
        &mut self,
        player_id: Uuid,
        published_story_id: Uuid,
    ) -> StoreResult<Vec<PlayerGameState>> {
        let sql = format!(
            "SELECT {GAME_STATE_COLUMNS} FROM player_game_states \
             WHERE player_id = $1 AND published_story_id = $2 ORDER BY started_at"
        );
        Ok(sqlx::query_as::<_, PlayerGameState>(&sql)
            .bind(player_id)
            .bind(published_story_id)
            .fetch_all(&mut *self.tx)
            .await?)
    }

    async fn find_game_state(&mut self, id: Uuid) -> StoreResult<Option<PlayerGameState>> {
        let sql = format!("SELECT {GAME_STATE_COLUMNS} FROM player_game_states WHERE id = $1 FOR UPDATE");
        Ok(sqlx::query_as::<_, PlayerGameState>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn insert_game_state(&mut self, state: &PlayerGameState) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO player_game_states (id, player_id, published_story_id, player_progress_id, \
             current_scene_id, player_status, error_details, active_task_id, ending_text, \
             completed_at, started_at, last_activity_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(state.id)
        .bind(state.player_id)
        .bind(state.published_story_id)
        .bind(state.player_progress_id)
        .bind(state.current_scene_id)
        .bind(state.player_status.as_str())
        .bind(&state.error_details)
        .bind(state.active_task_id)
        .bind(&state.ending_text)
        .bind(state.completed_at)
        .bind(state.started_at)
        .bind(state.last_activity_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn begin_scene_generation(
        &mut self,
        id: Uuid,
        progress_id: Uuid,
        task_id: Uuid,
    ) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE player_game_states SET player_status = 'generating_scene', \
                 player_progress_id = $2, active_task_id = $3, last_activity_at = NOW() \
                 WHERE id = $1 AND player_status = 'playing'",
            )
            .bind(id)
            .bind(progress_id)
            .bind(task_id),
        )
        .await
    }

    async fn move_to_scene(&mut self, id: Uuid, progress_id: Uuid, scene_id: Uuid) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE player_game_states SET player_progress_id = $2, current_scene_id = $3, \
                 last_activity_at = NOW() \
                 WHERE id = $1 AND player_status = 'playing'",
            )
            .bind(id)
            .bind(progress_id)
            .bind(scene_id),
        )
        .await
    }

    async fn complete_scene_generation(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        scene_id: Uuid,
    ) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE player_game_states SET player_status = 'playing', current_scene_id = $3, \
                 error_details = NULL, last_activity_at = NOW() \
                 WHERE id = $1 AND player_status = 'generating_scene' AND active_task_id = $2",
            )
            .bind(id)
            .bind(task_id)
            .bind(scene_id),
        )
        .await
    }

    async fn begin_game_over(&mut self, id: Uuid, progress_id: Uuid, task_id: Uuid) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE player_game_states SET player_status = 'game_over_pending', \
                 player_progress_id = $2, current_scene_id = NULL, active_task_id = $3, \
                 last_activity_at = NOW() \
                 WHERE id = $1 AND player_status = 'playing'",
            )
            .bind(id)
            .bind(progress_id)
            .bind(task_id),
        )
        .await
    }

    async fn complete_game_over(&mut self, id: Uuid, task_id: Uuid, ending_text: &str) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE player_game_states SET player_status = 'completed', ending_text = $3, \
                 completed_at = NOW(), error_details = NULL, last_activity_at = NOW() \
                 WHERE id = $1 AND player_status = 'game_over_pending' AND active_task_id = $2",
            )
            .bind(id)
            .bind(task_id)
            .bind(ending_text),
        )
        .await
    }

    async fn fail_scene_generation(&mut self, id: Uuid, task_id: Uuid, reason: &str) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "UPDATE player_game_states SET player_status = 'error', error_details = $3, \
                 last_activity_at = NOW() \
                 WHERE id = $1 AND player_status IN ('generating_scene', 'game_over_pending') \
                 AND active_task_id = $2",
            )
            .bind(id)
            .bind(task_id)
            .bind(reason),
        )
        .await
    }

    async fn restart_scene_generation(
        &mut self,
        id: Uuid,
        task_id: Uuid,
        status: PlayerStatus,
    ) -> StoreResult<bool> {
        if !status.is_generating() {
            return Ok(false);
        }
        self.execute_conditional(
            sqlx::query(
                "UPDATE player_game_states SET player_status = $3, error_details = NULL, \
                 active_task_id = $2, last_activity_at = NOW() \
                 WHERE id = $1 AND player_status = 'error'",
            )
            .bind(id)
            .bind(task_id)
            .bind(status.as_str()),
        )
        .await
    }

    async fn delete_game_state(&mut self, id: Uuid, player_id: Uuid) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query("DELETE FROM player_game_states WHERE id = $1 AND player_id = $2")
                .bind(id)
                .bind(player_id),
        )
        .await
    }
}

#[async_trait]
impl ImageReferenceRepository for PgUnitOfWork {
    async fn find_image_reference(&mut self, image_ref: &str) -> StoreResult<Option<ImageReference>> {
        Ok(sqlx::query_as::<_, ImageReference>(
            "SELECT image_ref, image_url, created_at FROM image_references WHERE image_ref = $1",
        )
        .bind(image_ref)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn insert_image_reference(&mut self, image: &ImageReference) -> StoreResult<bool> {
        self.execute_conditional(
            sqlx::query(
                "INSERT INTO image_references (image_ref, image_url, created_at) \
                 VALUES ($1, $2, $3) ON CONFLICT (image_ref) DO NOTHING",
            )
            .bind(&image.image_ref)
            .bind(&image.image_url)
            .bind(image.created_at),
        )
        .await
    }
}

#[async_trait]
impl TaskLedgerRepository for PgUnitOfWork {
    async fn record_task(&mut self, task: &GenerationTaskRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO generation_tasks (task_id, entity_kind, entity_id, owner_id, prompt_type, \
             correlation_id, state_hash, payload, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(task.task_id)
        .bind(task.entity_kind.as_str())
        .bind(task.entity_id)
        .bind(task.owner_id)
        .bind(task.prompt_type.as_str())
        .bind(task.correlation_id)
        .bind(&task.state_hash)
        .bind(&task.payload)
        .bind(task.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_task(&mut self, task_id: Uuid) -> StoreResult<Option<GenerationTaskRecord>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM generation_tasks WHERE task_id = $1");
        Ok(sqlx::query_as::<_, GenerationTaskRecord>(&sql)
            .bind(task_id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn latest_task_for_entity(&mut self, entity_id: Uuid) -> StoreResult<Option<GenerationTaskRecord>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM generation_tasks WHERE entity_id = $1 \
             AND prompt_type NOT IN ('character_image', 'story_preview_image') \
             ORDER BY created_at DESC LIMIT 1"
        );
        Ok(sqlx::query_as::<_, GenerationTaskRecord>(&sql)
            .bind(entity_id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }
}
