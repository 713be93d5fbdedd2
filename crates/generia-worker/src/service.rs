// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! World service: the inbound boundary of the pipeline.
//!
//! `create_world` returns once the world and its task rows are durable;
//! generation happens later in the worker. `get_world` is the poll-only
//! progress view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use generia_core::{GenerationStatus, NewWorld, TaskRecord, TaskResult, TaskStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::producer::TaskProducer;

/// AI users generated when the request asks for none.
pub const DEFAULT_DESIRED_USERS: i64 = 25;
/// AI posts generated when the request asks for none.
pub const DEFAULT_DESIRED_POSTS: i64 = 150;
pub const MAX_DESIRED_USERS: i64 = 40;
pub const MAX_DESIRED_POSTS: i64 = 250;

/// A request to create a world.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateWorldRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    pub creator_id: String,
    /// `None` or zero selects the default.
    #[serde(default)]
    pub desired_user_count: Option<i64>,
    #[serde(default)]
    pub desired_post_count: Option<i64>,
}

/// Returned by [`WorldService::create_world`].
#[derive(Debug, Clone, Serialize)]
pub struct WorldSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub creator_id: String,
    pub generation_status: String,
    pub users_task_id: String,
    pub posts_task_id: String,
    pub desired_user_count: i64,
    pub desired_post_count: i64,
    pub created_at: DateTime<Utc>,
}

/// One task as seen by a polling client.
#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub id: String,
    pub task_type: String,
    pub status: String,
    pub result: Option<TaskResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskView {
    fn from_record(record: TaskRecord) -> Result<Self> {
        let result = record.result()?;
        Ok(Self {
            id: record.id,
            task_type: record.task_type,
            status: record.status,
            result,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Progress view of a world.
#[derive(Debug, Clone, Serialize)]
pub struct WorldView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub prompt: String,
    pub creator_id: String,
    pub status: String,
    pub generation_status: String,
    pub users_count: i64,
    pub posts_count: i64,
    pub tasks: Vec<TaskView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorldView {
    /// Whether the pipeline will no longer change the world.
    pub fn is_generation_finished(&self) -> bool {
        self.generation_status
            .parse::<GenerationStatus>()
            .is_ok_and(|s| s.is_terminal())
    }
}

pub struct WorldService {
    store: Arc<dyn TaskStore>,
    producer: Arc<TaskProducer>,
}

impl WorldService {
    pub fn new(store: Arc<dyn TaskStore>, producer: Arc<TaskProducer>) -> Self {
        Self { store, producer }
    }

    /// Create a world and queue its generation tasks.
    pub async fn create_world(&self, request: CreateWorldRequest) -> Result<WorldSummary> {
        require_non_empty("name", &request.name)?;
        require_non_empty("prompt", &request.prompt)?;
        require_non_empty("creator_id", &request.creator_id)?;
        let user_count = desired_count(
            "desired_user_count",
            request.desired_user_count,
            DEFAULT_DESIRED_USERS,
            MAX_DESIRED_USERS,
        )?;
        let post_count = desired_count(
            "desired_post_count",
            request.desired_post_count,
            DEFAULT_DESIRED_POSTS,
            MAX_DESIRED_POSTS,
        )?;

        let world = self
            .store
            .create_world(&NewWorld {
                name: request.name,
                description: request.description,
                prompt: request.prompt,
                creator_id: request.creator_id,
            })
            .await?;
        info!(world_id = %world.id, creator_id = %world.creator_id, "World created");

        let tasks = match self
            .producer
            .on_world_created(&world, user_count, post_count)
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(world_id = %world.id, error = %e, "Failed to queue generation tasks");
                return Err(e.into());
            }
        };

        Ok(WorldSummary {
            id: world.id,
            name: world.name,
            description: world.description,
            prompt: world.prompt,
            creator_id: world.creator_id,
            generation_status: world.generation_status,
            users_task_id: tasks.users_task_id,
            posts_task_id: tasks.posts_task_id,
            desired_user_count: user_count,
            desired_post_count: post_count,
            created_at: world.created_at,
        })
    }

    /// Current state of a world and its generation tasks.
    pub async fn get_world(&self, world_id: &str) -> Result<WorldView> {
        let world = self
            .store
            .get_world(world_id)
            .await?
            .ok_or_else(|| Error::WorldNotFound(world_id.to_string()))?;
        let stats = self.store.world_stats(world_id).await?;
        let tasks = self
            .store
            .list_tasks(world_id)
            .await?
            .into_iter()
            .map(TaskView::from_record)
            .collect::<Result<Vec<_>>>()?;

        Ok(WorldView {
            id: world.id,
            name: world.name,
            description: world.description,
            prompt: world.prompt,
            creator_id: world.creator_id,
            status: world.status,
            generation_status: world.generation_status,
            users_count: stats.users_count,
            posts_count: stats.posts_count,
            tasks,
            created_at: world.created_at,
            updated_at: world.updated_at,
        })
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidRequest(format!("{} is required", field)));
    }
    Ok(())
}

fn desired_count(field: &str, requested: Option<i64>, default: i64, max: i64) -> Result<i64> {
    match requested.unwrap_or(0) {
        0 => Ok(default),
        n if (1..=max).contains(&n) => Ok(n),
        n => Err(Error::InvalidRequest(format!(
            "{} must be between 1 and {}, got {}",
            field, max, n
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desired_count() {
        assert_eq!(desired_count("u", None, 25, 40).unwrap(), 25);
        assert_eq!(desired_count("u", Some(0), 25, 40).unwrap(), 25);
        assert_eq!(desired_count("u", Some(1), 25, 40).unwrap(), 1);
        assert_eq!(desired_count("u", Some(40), 25, 40).unwrap(), 40);
        assert!(matches!(
            desired_count("u", Some(41), 25, 40),
            Err(Error::InvalidRequest(_))
        ));
        assert!(desired_count("u", Some(-1), 25, 40).is_err());
    }

    #[test]
    fn test_require_non_empty() {
        assert!(require_non_empty("name", "Atlantis").is_ok());
        let err = require_non_empty("name", "   ").unwrap_err();
        assert_eq!(err.to_string(), "Invalid request: name is required");
    }
}
