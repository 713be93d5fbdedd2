//! Persistence interfaces and backends for generia-core.
//!
//! The [`TaskStore`] trait is the durable work queue plus the world and
//! generated-content tables it feeds. Two backends implement it: PostgreSQL
//! for deployments and SQLite for embedded use and tests.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresTaskStore;
pub use self::sqlite::SqliteTaskStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::StoreError;
use crate::model::{
    GenerationStatus, ParseEnumError, TaskParameters, TaskResult, TaskStatus, TaskType,
    WorldStatus,
};

/// Column list shared by every task query.
pub(crate) const TASK_COLUMNS: &str =
    "id, seq, world_id, task_type, status, parameters, result, created_at, updated_at";

pub(crate) const WORLD_COLUMNS: &str =
    "id, name, description, prompt, creator_id, status, generation_status, created_at, updated_at";

/// World record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct WorldRecord {
    /// Unique identifier for the world.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Prompt the generated content is derived from.
    pub prompt: String,
    /// User who created the world.
    pub creator_id: String,
    /// Lifecycle status (active, archived).
    pub status: String,
    /// Generation progress (not_started, in_progress, completed, failed).
    pub generation_status: String,
    /// When the world was created.
    pub created_at: DateTime<Utc>,
    /// When the world row last changed.
    pub updated_at: DateTime<Utc>,
}

impl WorldRecord {
    pub fn lifecycle_status(&self) -> Result<WorldStatus, ParseEnumError> {
        self.status.parse()
    }

    pub fn generation_status(&self) -> Result<GenerationStatus, ParseEnumError> {
        self.generation_status.parse()
    }
}

/// Generation task record from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TaskRecord {
    /// Unique identifier for the task.
    pub id: String,
    /// Insertion sequence, the FIFO tie-breaker for equal `created_at`.
    pub seq: i64,
    /// World this task generates content for.
    pub world_id: String,
    /// Task type as stored. May name a type this build does not know.
    pub task_type: String,
    /// Current status (pending, in_progress, completed, failed).
    pub status: String,
    /// JSON-encoded [`TaskParameters`].
    pub parameters: String,
    /// JSON-encoded [`TaskResult`], set together with a terminal status.
    pub result: Option<String>,
    /// When the task was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the task last changed status.
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn status(&self) -> Result<TaskStatus, ParseEnumError> {
        self.status.parse()
    }

    pub fn task_type(&self) -> Result<TaskType, ParseEnumError> {
        self.task_type.parse()
    }

    pub fn parameters(&self) -> Result<TaskParameters, serde_json::Error> {
        serde_json::from_str(&self.parameters)
    }

    pub fn result(&self) -> Result<Option<TaskResult>, serde_json::Error> {
        self.result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
    }
}

/// Generated AI user.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AiUserRecord {
    pub id: String,
    pub world_id: String,
    pub username: String,
    pub description: String,
    pub is_ai: bool,
    pub created_at: DateTime<Utc>,
}

/// Generated AI post.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AiPostRecord {
    pub id: String,
    pub world_id: String,
    pub user_id: String,
    pub caption: String,
    pub media_id: String,
    pub image_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`TaskStore::create_world`].
#[derive(Debug, Clone)]
pub struct NewWorld {
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub creator_id: String,
}

/// Input for [`TaskStore::insert_ai_user`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAiUser {
    pub id: String,
    pub world_id: String,
    pub username: String,
    pub description: String,
}

/// Input for [`TaskStore::insert_ai_post`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAiPost {
    pub id: String,
    pub world_id: String,
    pub user_id: String,
    pub caption: String,
    pub media_id: String,
    pub image_prompt: String,
}

/// Generated content counts for a world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorldStats {
    pub users_count: i64,
    pub posts_count: i64,
}

/// Task counts for a world, grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStatusCounts {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
}

impl TaskStatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.in_progress + self.completed + self.failed
    }

    /// Tasks whose status is not `completed`.
    pub fn incomplete(&self) -> i64 {
        self.total() - self.completed
    }

    /// No task is waiting or running.
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.in_progress == 0
    }

    pub(crate) fn add(&mut self, status: &str, count: i64) {
        match status.parse::<TaskStatus>() {
            Ok(TaskStatus::Pending) => self.pending += count,
            Ok(TaskStatus::InProgress) => self.in_progress += count,
            Ok(TaskStatus::Completed) => self.completed += count,
            Ok(TaskStatus::Failed) => self.failed += count,
            Err(e) => tracing::warn!(error = %e, "Ignoring tasks with unknown status"),
        }
    }
}

/// Durable task queue and content store.
///
/// Task status moves `pending -> in_progress -> completed | failed`. The
/// result column is written exactly once, in the same statement as the
/// terminal status.
#[async_trait]
#[allow(missing_docs)]
pub trait TaskStore: Send + Sync {
    // ---- worlds ----

    async fn create_world(&self, world: &NewWorld) -> Result<WorldRecord, StoreError>;

    async fn get_world(&self, world_id: &str) -> Result<Option<WorldRecord>, StoreError>;

    /// Move a world's generation status forward.
    ///
    /// Returns `Ok(true)` when the row changed and `Ok(false)` when the world
    /// was already at or past `status`. Backward moves never happen.
    async fn update_world_generation_status(
        &self,
        world_id: &str,
        status: GenerationStatus,
    ) -> Result<bool, StoreError>;

    async fn world_stats(&self, world_id: &str) -> Result<WorldStats, StoreError>;

    // ---- tasks ----

    /// Insert one pending task and return its id.
    async fn enqueue(
        &self,
        world_id: &str,
        task_type: TaskType,
        parameters: &TaskParameters,
    ) -> Result<String, StoreError>;

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError>;

    /// All tasks of a world in creation order.
    async fn list_tasks(&self, world_id: &str) -> Result<Vec<TaskRecord>, StoreError>;

    /// Oldest pending task across all worlds. Read only; nothing is locked.
    async fn claim_next_pending(&self) -> Result<Option<TaskRecord>, StoreError>;

    /// Write half of the read-then-write claim. Refuses terminal tasks.
    async fn mark_in_progress(&self, task_id: &str) -> Result<(), StoreError>;

    /// Move the oldest pending task to in_progress in a single statement and
    /// return it. Two callers never receive the same task.
    async fn claim_next_pending_atomic(&self) -> Result<Option<TaskRecord>, StoreError>;

    /// Set a terminal status and the result together.
    ///
    /// Fails with `InvalidTaskState` unless the task is in_progress, and with
    /// `ValidationError` for a non-terminal target.
    async fn finalize(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: &TaskResult,
    ) -> Result<(), StoreError>;

    /// Number of tasks of the world whose status is not completed.
    async fn count_incomplete(&self, world_id: &str) -> Result<i64, StoreError>;

    async fn count_tasks_by_status(&self, world_id: &str) -> Result<TaskStatusCounts, StoreError>;

    /// In-progress tasks whose `updated_at` is older than `cutoff`, oldest first.
    async fn list_stale_in_progress(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    // ---- generated content ----

    async fn insert_ai_user(&self, user: &NewAiUser) -> Result<(), StoreError>;

    async fn insert_ai_post(&self, post: &NewAiPost) -> Result<(), StoreError>;

    async fn list_ai_users(&self, world_id: &str) -> Result<Vec<AiUserRecord>, StoreError>;

    async fn list_ai_posts(&self, world_id: &str) -> Result<Vec<AiPostRecord>, StoreError>;

    /// AI user ids of the world in creation order.
    async fn list_ai_user_ids(&self, world_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list_ai_users(world_id)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect())
    }
}

/// Connect to the store named by `database_url` and run its migrations.
///
/// `postgres://` and `postgresql://` URLs select [`PostgresTaskStore`];
/// `sqlite:` URLs select [`SqliteTaskStore`].
pub async fn connect(
    database_url: &str,
    max_connections: u32,
) -> Result<Arc<dyn TaskStore>, StoreError> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        let store = PostgresTaskStore::connect(database_url, max_connections).await?;
        Ok(Arc::new(store))
    } else if database_url.starts_with("sqlite:") {
        let store = SqliteTaskStore::connect(database_url, max_connections).await?;
        Ok(Arc::new(store))
    } else {
        Err(StoreError::validation(
            "database_url",
            "expected a postgres:// or sqlite: URL",
        ))
    }
}

/// Reject non-terminal finalize targets before touching the database.
pub(crate) fn ensure_terminal(task_id: &str, status: TaskStatus) -> Result<(), StoreError> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(StoreError::validation(
            "status",
            format!(
                "cannot finalize task '{}' with non-terminal status '{}'",
                task_id, status
            ),
        ))
    }
}

/// Explain why a guarded task update touched no rows.
pub(crate) fn rejected_transition(
    task_id: &str,
    expected: TaskStatus,
    current: Option<TaskRecord>,
) -> StoreError {
    match current {
        None => StoreError::TaskNotFound {
            task_id: task_id.to_string(),
        },
        Some(task) => StoreError::InvalidTaskState {
            task_id: task_id.to_string(),
            expected: expected.to_string(),
            actual: task.status,
        },
    }
}

/// SQL `IN (...)` list of the statuses a world may move to `target` from.
pub(crate) fn predecessor_list(target: GenerationStatus) -> Option<String> {
    let allowed = target.predecessors();
    if allowed.is_empty() {
        return None;
    }
    Some(
        allowed
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", "),
    )
}
