//! SQLite-backed task store.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::migrations;
use crate::model::{GenerationStatus, TaskParameters, TaskResult, TaskStatus, TaskType};

use super::{
    AiPostRecord, AiUserRecord, NewAiPost, NewAiUser, NewWorld, TASK_COLUMNS, TaskRecord,
    TaskStatusCounts, TaskStore, WORLD_COLUMNS, WorldRecord, WorldStats, ensure_terminal,
    predecessor_list, rejected_transition,
};

/// Current time in the same text format the schema defaults use.
const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// SQLite-backed task store.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Wrap an existing pool. Migrations are not run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a `sqlite:` URL, creating the file if needed, and run
    /// migrations.
    ///
    /// In-memory databases live as long as their connection, so they get a
    /// single connection that is never recycled.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::database("connect", e))?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::database("connect", e))?;

        migrations::run_sqlite(&pool).await?;
        Ok(Self { pool })
    }

    /// Open (or create) a database file, creating parent directories.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::database(
                    "create_dir",
                    format!("Failed to create directory {:?}: {}", parent, e),
                )
            })?;
        }

        let url = format!("sqlite:{}", path.to_string_lossy());
        Self::connect(&url, 5).await
    }

    /// Fresh in-memory store with migrations applied.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:", 1).await
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn world_exists(&self, world_id: &str) -> Result<bool, StoreError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM worlds WHERE id = ?1")
            .bind(world_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_world(&self, world: &NewWorld) -> Result<WorldRecord, StoreError> {
        let id = Uuid::new_v4().to_string();
        let sql = format!(
            r#"
            INSERT INTO worlds (id, name, description, prompt, creator_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING {}
            "#,
            WORLD_COLUMNS
        );

        let record = sqlx::query_as::<_, WorldRecord>(&sql)
            .bind(&id)
            .bind(&world.name)
            .bind(&world.description)
            .bind(&world.prompt)
            .bind(&world.creator_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::database("create_world", e))?;

        debug!(world_id = %record.id, "World created");
        Ok(record)
    }

    async fn get_world(&self, world_id: &str) -> Result<Option<WorldRecord>, StoreError> {
        let sql = format!("SELECT {} FROM worlds WHERE id = ?1", WORLD_COLUMNS);
        let record = sqlx::query_as::<_, WorldRecord>(&sql)
            .bind(world_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn update_world_generation_status(
        &self,
        world_id: &str,
        status: GenerationStatus,
    ) -> Result<bool, StoreError> {
        let Some(allowed) = predecessor_list(status) else {
            return Err(StoreError::validation(
                "generation_status",
                format!("no transition leads to '{}'", status),
            ));
        };

        let sql = format!(
            r#"
            UPDATE worlds
            SET generation_status = ?1, updated_at = {}
            WHERE id = ?2 AND generation_status IN ({})
            "#,
            NOW, allowed
        );

        let result = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(world_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::database("update_world_generation_status", e))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if self.world_exists(world_id).await? {
            Ok(false)
        } else {
            Err(StoreError::WorldNotFound {
                world_id: world_id.to_string(),
            })
        }
    }

    async fn world_stats(&self, world_id: &str) -> Result<WorldStats, StoreError> {
        let users_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ai_users WHERE world_id = ?1")
                .bind(world_id)
                .fetch_one(&self.pool)
                .await?;
        let posts_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM ai_posts WHERE world_id = ?1")
                .bind(world_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(WorldStats {
            users_count,
            posts_count,
        })
    }

    async fn enqueue(
        &self,
        world_id: &str,
        task_type: TaskType,
        parameters: &TaskParameters,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let parameters = serde_json::to_string(parameters)?;

        sqlx::query(
            r#"
            INSERT INTO world_generation_tasks (id, world_id, task_type, parameters)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&id)
        .bind(world_id)
        .bind(task_type.as_str())
        .bind(&parameters)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database("enqueue", e))?;

        debug!(task_id = %id, world_id = %world_id, task_type = %task_type, "Task enqueued");
        Ok(id)
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM world_generation_tasks WHERE id = ?1",
            TASK_COLUMNS
        );
        let record = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list_tasks(&self, world_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM world_generation_tasks WHERE world_id = ?1 ORDER BY created_at ASC, seq ASC",
            TASK_COLUMNS
        );
        let records = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(world_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn claim_next_pending(&self) -> Result<Option<TaskRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM world_generation_tasks
            WHERE status = 'pending'
            ORDER BY created_at ASC, seq ASC
            LIMIT 1
            "#,
            TASK_COLUMNS
        );
        let record = sqlx::query_as::<_, TaskRecord>(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("claim_next_pending", e))?;
        Ok(record)
    }

    async fn mark_in_progress(&self, task_id: &str) -> Result<(), StoreError> {
        let sql = format!(
            r#"
            UPDATE world_generation_tasks
            SET status = 'in_progress', updated_at = {}
            WHERE id = ?1 AND status IN ('pending', 'in_progress')
            "#,
            NOW
        );
        let result = sqlx::query(&sql)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::database("mark_in_progress", e))?;

        if result.rows_affected() == 0 {
            let current = self.get_task(task_id).await?;
            return Err(rejected_transition(task_id, TaskStatus::Pending, current));
        }
        Ok(())
    }

    async fn claim_next_pending_atomic(&self) -> Result<Option<TaskRecord>, StoreError> {
        // SQLite serializes writers, so the subselect and the update cannot
        // interleave with another claim.
        let sql = format!(
            r#"
            UPDATE world_generation_tasks
            SET status = 'in_progress', updated_at = {}
            WHERE status = 'pending'
              AND seq = (
                SELECT seq FROM world_generation_tasks
                WHERE status = 'pending'
                ORDER BY created_at ASC, seq ASC
                LIMIT 1
              )
            RETURNING {}
            "#,
            NOW, TASK_COLUMNS
        );
        let record = sqlx::query_as::<_, TaskRecord>(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("claim_next_pending_atomic", e))?;
        Ok(record)
    }

    async fn finalize(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: &TaskResult,
    ) -> Result<(), StoreError> {
        ensure_terminal(task_id, status)?;
        let result_json = serde_json::to_string(result)?;

        let sql = format!(
            r#"
            UPDATE world_generation_tasks
            SET status = ?1, result = ?2, updated_at = {}
            WHERE id = ?3 AND status = 'in_progress'
            "#,
            NOW
        );
        let outcome = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(&result_json)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::database("finalize", e))?;

        if outcome.rows_affected() == 0 {
            let current = self.get_task(task_id).await?;
            return Err(rejected_transition(task_id, TaskStatus::InProgress, current));
        }
        Ok(())
    }

    async fn count_incomplete(&self, world_id: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM world_generation_tasks WHERE world_id = ?1 AND status != 'completed'",
        )
        .bind(world_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::database("count_incomplete", e))?;
        Ok(count)
    }

    async fn count_tasks_by_status(&self, world_id: &str) -> Result<TaskStatusCounts, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM world_generation_tasks WHERE world_id = ?1 GROUP BY status",
        )
        .bind(world_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = TaskStatusCounts::default();
        for (status, count) in rows {
            counts.add(&status, count);
        }
        Ok(counts)
    }

    async fn list_stale_in_progress(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM world_generation_tasks
            WHERE status = 'in_progress' AND updated_at < ?1
            ORDER BY updated_at ASC, seq ASC
            LIMIT ?2
            "#,
            TASK_COLUMNS
        );
        // Compare as text in the schema's own timestamp format.
        let cutoff = cutoff.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        let records = sqlx::query_as::<_, TaskRecord>(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn insert_ai_user(&self, user: &NewAiUser) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ai_users (id, world_id, username, description, is_ai)
            VALUES (?1, ?2, ?3, ?4, 1)
            "#,
        )
        .bind(&user.id)
        .bind(&user.world_id)
        .bind(&user.username)
        .bind(&user.description)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database("insert_ai_user", e))?;
        Ok(())
    }

    async fn insert_ai_post(&self, post: &NewAiPost) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ai_posts (id, world_id, user_id, caption, media_id, image_prompt)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&post.id)
        .bind(&post.world_id)
        .bind(&post.user_id)
        .bind(&post.caption)
        .bind(&post.media_id)
        .bind(&post.image_prompt)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database("insert_ai_post", e))?;
        Ok(())
    }

    async fn list_ai_users(&self, world_id: &str) -> Result<Vec<AiUserRecord>, StoreError> {
        let records = sqlx::query_as::<_, AiUserRecord>(
            r#"
            SELECT id, world_id, username, description, is_ai, created_at
            FROM ai_users
            WHERE world_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(world_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_ai_posts(&self, world_id: &str) -> Result<Vec<AiPostRecord>, StoreError> {
        let records = sqlx::query_as::<_, AiPostRecord>(
            r#"
            SELECT id, world_id, user_id, caption, media_id, image_prompt, created_at
            FROM ai_posts
            WHERE world_id = ?1
            ORDER BY seq ASC
            "#,
        )
        .bind(world_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_ai_user_ids(&self, world_id: &str) -> Result<Vec<String>, StoreError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM ai_users WHERE world_id = ?1 ORDER BY seq ASC")
                .bind(world_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}
