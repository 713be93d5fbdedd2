// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed task store.
//!
//! Each operation is a free function over a `PgPool` so that other crates
//! can run them against a pool they already own. [`PostgresTaskStore`]
//! implements [`TaskStore`] by delegating to them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
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

/// PostgreSQL-backed task store.
#[derive(Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    /// Wrap an existing pool. Migrations are not run.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a fresh pool and run migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::database("connect", e))?;

        migrations::run_postgres(&pool).await?;
        Ok(Self { pool })
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Worlds
// ============================================================================

/// Insert a world with lifecycle `active` and generation `not_started`.
pub async fn create_world(pool: &PgPool, world: &NewWorld) -> Result<WorldRecord, StoreError> {
    let id = Uuid::new_v4().to_string();
    let sql = format!(
        r#"
        INSERT INTO worlds (id, name, description, prompt, creator_id)
        VALUES ($1, $2, $3, $4, $5)
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
        .fetch_one(pool)
        .await
        .map_err(|e| StoreError::database("create_world", e))?;

    debug!(world_id = %record.id, "World created");
    Ok(record)
}

pub async fn get_world(pool: &PgPool, world_id: &str) -> Result<Option<WorldRecord>, StoreError> {
    let sql = format!("SELECT {} FROM worlds WHERE id = $1", WORLD_COLUMNS);
    let record = sqlx::query_as::<_, WorldRecord>(&sql)
        .bind(world_id)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

/// Guarded forward-only update of a world's generation status.
pub async fn update_world_generation_status(
    pool: &PgPool,
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
        SET generation_status = $1, updated_at = NOW()
        WHERE id = $2 AND generation_status IN ({})
        "#,
        allowed
    );

    let result = sqlx::query(&sql)
        .bind(status.as_str())
        .bind(world_id)
        .execute(pool)
        .await
        .map_err(|e| StoreError::database("update_world_generation_status", e))?;

    if result.rows_affected() > 0 {
        return Ok(true);
    }

    let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM worlds WHERE id = $1")
        .bind(world_id)
        .fetch_optional(pool)
        .await?;
    match exists {
        Some(_) => Ok(false),
        None => Err(StoreError::WorldNotFound {
            world_id: world_id.to_string(),
        }),
    }
}

pub async fn world_stats(pool: &PgPool, world_id: &str) -> Result<WorldStats, StoreError> {
    let (users_count, posts_count): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COUNT(*) FROM ai_users WHERE world_id = $1),
            (SELECT COUNT(*) FROM ai_posts WHERE world_id = $1)
        "#,
    )
    .bind(world_id)
    .fetch_one(pool)
    .await?;

    Ok(WorldStats {
        users_count,
        posts_count,
    })
}

// ============================================================================
// Tasks
// ============================================================================

/// Insert one pending task and return its id.
pub async fn enqueue(
    pool: &PgPool,
    world_id: &str,
    task_type: TaskType,
    parameters: &TaskParameters,
) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    let parameters = serde_json::to_string(parameters)?;

    sqlx::query(
        r#"
        INSERT INTO world_generation_tasks (id, world_id, task_type, parameters)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(&id)
    .bind(world_id)
    .bind(task_type.as_str())
    .bind(&parameters)
    .execute(pool)
    .await
    .map_err(|e| StoreError::database("enqueue", e))?;

    debug!(task_id = %id, world_id = %world_id, task_type = %task_type, "Task enqueued");
    Ok(id)
}

pub async fn get_task(pool: &PgPool, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM world_generation_tasks WHERE id = $1",
        TASK_COLUMNS
    );
    let record = sqlx::query_as::<_, TaskRecord>(&sql)
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

pub async fn list_tasks(pool: &PgPool, world_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
    let sql = format!(
        "SELECT {} FROM world_generation_tasks WHERE world_id = $1 ORDER BY created_at ASC, seq ASC",
        TASK_COLUMNS
    );
    let records = sqlx::query_as::<_, TaskRecord>(&sql)
        .bind(world_id)
        .fetch_all(pool)
        .await?;
    Ok(records)
}

/// Oldest pending task. No row lock is taken.
pub async fn claim_next_pending(pool: &PgPool) -> Result<Option<TaskRecord>, StoreError> {
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
        .fetch_optional(pool)
        .await
        .map_err(|e| StoreError::database("claim_next_pending", e))?;
    Ok(record)
}

pub async fn mark_in_progress(pool: &PgPool, task_id: &str) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE world_generation_tasks
        SET status = 'in_progress', updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'in_progress')
        "#,
    )
    .bind(task_id)
    .execute(pool)
    .await
    .map_err(|e| StoreError::database("mark_in_progress", e))?;

    if result.rows_affected() == 0 {
        let current = get_task(pool, task_id).await?;
        return Err(rejected_transition(task_id, TaskStatus::Pending, current));
    }
    Ok(())
}

/// Claim the oldest pending task in one statement.
///
/// `SKIP LOCKED` lets concurrent claimers pass over a row another
/// transaction is already moving.
pub async fn claim_next_pending_atomic(pool: &PgPool) -> Result<Option<TaskRecord>, StoreError> {
    let sql = format!(
        r#"
        UPDATE world_generation_tasks
        SET status = 'in_progress', updated_at = NOW()
        WHERE id = (
            SELECT id FROM world_generation_tasks
            WHERE status = 'pending'
            ORDER BY created_at ASC, seq ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {}
        "#,
        TASK_COLUMNS
    );
    let record = sqlx::query_as::<_, TaskRecord>(&sql)
        .fetch_optional(pool)
        .await
        .map_err(|e| StoreError::database("claim_next_pending_atomic", e))?;
    Ok(record)
}

pub async fn finalize(
    pool: &PgPool,
    task_id: &str,
    status: TaskStatus,
    result: &TaskResult,
) -> Result<(), StoreError> {
    ensure_terminal(task_id, status)?;
    let result_json = serde_json::to_string(result)?;

    let outcome = sqlx::query(
        r#"
        UPDATE world_generation_tasks
        SET status = $1, result = $2, updated_at = NOW()
        WHERE id = $3 AND status = 'in_progress'
        "#,
    )
    .bind(status.as_str())
    .bind(&result_json)
    .bind(task_id)
    .execute(pool)
    .await
    .map_err(|e| StoreError::database("finalize", e))?;

    if outcome.rows_affected() == 0 {
        let current = get_task(pool, task_id).await?;
        return Err(rejected_transition(task_id, TaskStatus::InProgress, current));
    }
    Ok(())
}

pub async fn count_incomplete(pool: &PgPool, world_id: &str) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM world_generation_tasks WHERE world_id = $1 AND status != 'completed'",
    )
    .bind(world_id)
    .fetch_one(pool)
    .await
    .map_err(|e| StoreError::database("count_incomplete", e))?;
    Ok(count)
}

pub async fn count_tasks_by_status(
    pool: &PgPool,
    world_id: &str,
) -> Result<TaskStatusCounts, StoreError> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM world_generation_tasks WHERE world_id = $1 GROUP BY status",
    )
    .bind(world_id)
    .fetch_all(pool)
    .await?;

    let mut counts = TaskStatusCounts::default();
    for (status, count) in rows {
        counts.add(&status, count);
    }
    Ok(counts)
}

pub async fn list_stale_in_progress(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<TaskRecord>, StoreError> {
    let sql = format!(
        r#"
        SELECT {}
        FROM world_generation_tasks
        WHERE status = 'in_progress' AND updated_at < $1
        ORDER BY updated_at ASC, seq ASC
        LIMIT $2
        "#,
        TASK_COLUMNS
    );
    let records = sqlx::query_as::<_, TaskRecord>(&sql)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(records)
}

// ============================================================================
// Generated content
// ============================================================================

pub async fn insert_ai_user(pool: &PgPool, user: &NewAiUser) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO ai_users (id, world_id, username, description, is_ai)
        VALUES ($1, $2, $3, $4, TRUE)
        "#,
    )
    .bind(&user.id)
    .bind(&user.world_id)
    .bind(&user.username)
    .bind(&user.description)
    .execute(pool)
    .await
    .map_err(|e| StoreError::database("insert_ai_user", e))?;
    Ok(())
}

pub async fn insert_ai_post(pool: &PgPool, post: &NewAiPost) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO ai_posts (id, world_id, user_id, caption, media_id, image_prompt)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&post.id)
    .bind(&post.world_id)
    .bind(&post.user_id)
    .bind(&post.caption)
    .bind(&post.media_id)
    .bind(&post.image_prompt)
    .execute(pool)
    .await
    .map_err(|e| StoreError::database("insert_ai_post", e))?;
    Ok(())
}

pub async fn list_ai_users(pool: &PgPool, world_id: &str) -> Result<Vec<AiUserRecord>, StoreError> {
    let records = sqlx::query_as::<_, AiUserRecord>(
        r#"
        SELECT id, world_id, username, description, is_ai, created_at
        FROM ai_users
        WHERE world_id = $1
        ORDER BY seq ASC
        "#,
    )
    .bind(world_id)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

pub async fn list_ai_posts(pool: &PgPool, world_id: &str) -> Result<Vec<AiPostRecord>, StoreError> {
    let records = sqlx::query_as::<_, AiPostRecord>(
        r#"
        SELECT id, world_id, user_id, caption, media_id, image_prompt, created_at
        FROM ai_posts
        WHERE world_id = $1
        ORDER BY seq ASC
        "#,
    )
    .bind(world_id)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

pub async fn list_ai_user_ids(pool: &PgPool, world_id: &str) -> Result<Vec<String>, StoreError> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM ai_users WHERE world_id = $1 ORDER BY seq ASC")
            .bind(world_id)
            .fetch_all(pool)
            .await?;
    Ok(ids)
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn create_world(&self, world: &NewWorld) -> Result<WorldRecord, StoreError> {
        create_world(&self.pool, world).await
    }

    async fn get_world(&self, world_id: &str) -> Result<Option<WorldRecord>, StoreError> {
        get_world(&self.pool, world_id).await
    }

    async fn update_world_generation_status(
        &self,
        world_id: &str,
        status: GenerationStatus,
    ) -> Result<bool, StoreError> {
        update_world_generation_status(&self.pool, world_id, status).await
    }

    async fn world_stats(&self, world_id: &str) -> Result<WorldStats, StoreError> {
        world_stats(&self.pool, world_id).await
    }

    async fn enqueue(
        &self,
        world_id: &str,
        task_type: TaskType,
        parameters: &TaskParameters,
    ) -> Result<String, StoreError> {
        enqueue(&self.pool, world_id, task_type, parameters).await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        get_task(&self.pool, task_id).await
    }

    async fn list_tasks(&self, world_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        list_tasks(&self.pool, world_id).await
    }

    async fn claim_next_pending(&self) -> Result<Option<TaskRecord>, StoreError> {
        claim_next_pending(&self.pool).await
    }

    async fn mark_in_progress(&self, task_id: &str) -> Result<(), StoreError> {
        mark_in_progress(&self.pool, task_id).await
    }

    async fn claim_next_pending_atomic(&self) -> Result<Option<TaskRecord>, StoreError> {
        claim_next_pending_atomic(&self.pool).await
    }

    async fn finalize(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: &TaskResult,
    ) -> Result<(), StoreError> {
        finalize(&self.pool, task_id, status, result).await
    }

    async fn count_incomplete(&self, world_id: &str) -> Result<i64, StoreError> {
        count_incomplete(&self.pool, world_id).await
    }

    async fn count_tasks_by_status(&self, world_id: &str) -> Result<TaskStatusCounts, StoreError> {
        count_tasks_by_status(&self.pool, world_id).await
    }

    async fn list_stale_in_progress(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        list_stale_in_progress(&self.pool, cutoff, limit).await
    }

    async fn insert_ai_user(&self, user: &NewAiUser) -> Result<(), StoreError> {
        insert_ai_user(&self.pool, user).await
    }

    async fn insert_ai_post(&self, post: &NewAiPost) -> Result<(), StoreError> {
        insert_ai_post(&self.pool, post).await
    }

    async fn list_ai_users(&self, world_id: &str) -> Result<Vec<AiUserRecord>, StoreError> {
        list_ai_users(&self.pool, world_id).await
    }

    async fn list_ai_posts(&self, world_id: &str) -> Result<Vec<AiPostRecord>, StoreError> {
        list_ai_posts(&self.pool, world_id).await
    }

    async fn list_ai_user_ids(&self, world_id: &str) -> Result<Vec<String>, StoreError> {
        list_ai_user_ids(&self.pool, world_id).await
    }
}
