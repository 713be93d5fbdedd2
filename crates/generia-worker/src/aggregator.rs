// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! World completion aggregation.
//!
//! The aggregator is the only writer of a world's generation status. It runs
//! after every task finalization and is idempotent: the store refuses
//! backward or repeated moves, so calling it twice changes nothing.

use std::str::FromStr;
use std::sync::Arc;

use generia_core::{GenerationStatus, ParseEnumError, StoreError, TaskStore};
use tracing::{debug, info};

/// When a world with finished tasks counts as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// Completed once every task is completed. A failed task keeps the world
    /// in_progress indefinitely.
    #[default]
    RequireAllCompleted,
    /// As above, and additionally failed once nothing is pending or running
    /// and at least one task failed.
    FailWhenSettled,
}

impl FromStr for CompletionPolicy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "require_all_completed" => Ok(Self::RequireAllCompleted),
            "fail_when_settled" => Ok(Self::FailWhenSettled),
            other => Err(ParseEnumError {
                kind: "completion policy",
                value: other.to_string(),
            }),
        }
    }
}

/// What [`CompletionAggregator::check_and_advance`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Tasks remain that are not completed.
    InProgress { incomplete: i64 },
    /// The world is completed. `newly` is false when it already was.
    Completed { newly: bool },
    /// The world is failed. Only under [`CompletionPolicy::FailWhenSettled`].
    Failed { newly: bool },
}

pub struct CompletionAggregator {
    store: Arc<dyn TaskStore>,
    policy: CompletionPolicy,
}

impl CompletionAggregator {
    pub fn new(store: Arc<dyn TaskStore>, policy: CompletionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    /// Move the world from not_started to in_progress. Returns whether it moved.
    pub async fn mark_started(&self, world_id: &str) -> Result<bool, StoreError> {
        let moved = self
            .store
            .update_world_generation_status(world_id, GenerationStatus::InProgress)
            .await?;
        if moved {
            info!(world_id = %world_id, "World generation started");
        }
        Ok(moved)
    }

    /// Re-evaluate the world's tasks and advance its generation status.
    pub async fn check_and_advance(&self, world_id: &str) -> Result<CompletionOutcome, StoreError> {
        match self.policy {
            CompletionPolicy::RequireAllCompleted => {
                let incomplete = self.store.count_incomplete(world_id).await?;
                if incomplete > 0 {
                    debug!(world_id = %world_id, incomplete, "World still generating");
                    return Ok(CompletionOutcome::InProgress { incomplete });
                }
                self.advance(world_id, GenerationStatus::Completed).await
            }
            CompletionPolicy::FailWhenSettled => {
                let counts = self.store.count_tasks_by_status(world_id).await?;
                if counts.incomplete() == 0 {
                    self.advance(world_id, GenerationStatus::Completed).await
                } else if counts.is_settled() && counts.failed > 0 {
                    self.advance(world_id, GenerationStatus::Failed).await
                } else {
                    debug!(
                        world_id = %world_id,
                        pending = counts.pending,
                        in_progress = counts.in_progress,
                        failed = counts.failed,
                        "World still generating"
                    );
                    Ok(CompletionOutcome::InProgress {
                        incomplete: counts.incomplete(),
                    })
                }
            }
        }
    }

    async fn advance(
        &self,
        world_id: &str,
        status: GenerationStatus,
    ) -> Result<CompletionOutcome, StoreError> {
        let newly = self
            .store
            .update_world_generation_status(world_id, status)
            .await?;
        if newly {
            info!(world_id = %world_id, status = %status, "World generation finished");
        }
        Ok(match status {
            GenerationStatus::Failed => CompletionOutcome::Failed { newly },
            _ => CompletionOutcome::Completed { newly },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use generia_core::{
        NewWorld, SqliteTaskStore, TaskParameters, TaskResult, TaskStatus, TaskType,
    };

    async fn setup() -> (Arc<SqliteTaskStore>, String) {
        let store = Arc::new(SqliteTaskStore::in_memory().await.unwrap());
        let world = store
            .create_world(&NewWorld {
                name: "Atlantis".to_string(),
                description: String::new(),
                prompt: "an underwater city".to_string(),
                creator_id: "creator-1".to_string(),
            })
            .await
            .unwrap();
        (store, world.id)
    }

    async fn run_task(store: &SqliteTaskStore, world_id: &str, task_type: TaskType, ok: bool) {
        let id = store
            .enqueue(world_id, task_type, &TaskParameters::new(1, "p"))
            .await
            .unwrap();
        store.mark_in_progress(&id).await.unwrap();
        let (status, result) = if ok {
            (TaskStatus::Completed, TaskResult::completed("done", vec![]))
        } else {
            (TaskStatus::Failed, TaskResult::failed("boom"))
        };
        store.finalize(&id, status, &result).await.unwrap();
    }

    async fn generation_status(store: &SqliteTaskStore, world_id: &str) -> GenerationStatus {
        store
            .get_world(world_id)
            .await
            .unwrap()
            .unwrap()
            .generation_status()
            .unwrap()
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!(
            "fail_when_settled".parse::<CompletionPolicy>().unwrap(),
            CompletionPolicy::FailWhenSettled
        );
        assert_eq!(CompletionPolicy::default(), CompletionPolicy::RequireAllCompleted);
        assert!("always".parse::<CompletionPolicy>().is_err());
    }

    #[tokio::test]
    async fn test_mark_started_is_idempotent() {
        let (store, world_id) = setup().await;
        let aggregator = CompletionAggregator::new(store.clone(), CompletionPolicy::default());

        assert!(aggregator.mark_started(&world_id).await.unwrap());
        assert!(!aggregator.mark_started(&world_id).await.unwrap());
        assert_eq!(
            generation_status(&store, &world_id).await,
            GenerationStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_completes_once_all_tasks_completed() {
        let (store, world_id) = setup().await;
        let aggregator = CompletionAggregator::new(store.clone(), CompletionPolicy::default());
        aggregator.mark_started(&world_id).await.unwrap();

        run_task(&store, &world_id, TaskType::Users, true).await;
        let pending = store
            .enqueue(&world_id, TaskType::Posts, &TaskParameters::new(1, "p"))
            .await
            .unwrap();
        assert_eq!(
            aggregator.check_and_advance(&world_id).await.unwrap(),
            CompletionOutcome::InProgress { incomplete: 1 }
        );

        store.mark_in_progress(&pending).await.unwrap();
        store
            .finalize(&pending, TaskStatus::Completed, &TaskResult::completed("ok", vec![]))
            .await
            .unwrap();

        assert_eq!(
            aggregator.check_and_advance(&world_id).await.unwrap(),
            CompletionOutcome::Completed { newly: true }
        );
        assert_eq!(
            aggregator.check_and_advance(&world_id).await.unwrap(),
            CompletionOutcome::Completed { newly: false }
        );
        assert_eq!(
            generation_status(&store, &world_id).await,
            GenerationStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_failed_task_keeps_world_in_progress_by_default() {
        let (store, world_id) = setup().await;
        let aggregator = CompletionAggregator::new(store.clone(), CompletionPolicy::default());
        aggregator.mark_started(&world_id).await.unwrap();

        run_task(&store, &world_id, TaskType::Users, true).await;
        run_task(&store, &world_id, TaskType::Posts, false).await;

        assert_eq!(
            aggregator.check_and_advance(&world_id).await.unwrap(),
            CompletionOutcome::InProgress { incomplete: 1 }
        );
        assert_eq!(
            generation_status(&store, &world_id).await,
            GenerationStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_fail_when_settled_marks_world_failed() {
        let (store, world_id) = setup().await;
        let aggregator =
            CompletionAggregator::new(store.clone(), CompletionPolicy::FailWhenSettled);
        aggregator.mark_started(&world_id).await.unwrap();

        run_task(&store, &world_id, TaskType::Posts, false).await;
        let pending = store
            .enqueue(&world_id, TaskType::Users, &TaskParameters::new(1, "p"))
            .await
            .unwrap();

        // A pending task means the world is not settled yet.
        assert!(matches!(
            aggregator.check_and_advance(&world_id).await.unwrap(),
            CompletionOutcome::InProgress { .. }
        ));

        store.mark_in_progress(&pending).await.unwrap();
        store
            .finalize(&pending, TaskStatus::Completed, &TaskResult::completed("ok", vec![]))
            .await
            .unwrap();

        assert_eq!(
            aggregator.check_and_advance(&world_id).await.unwrap(),
            CompletionOutcome::Failed { newly: true }
        );
        assert_eq!(
            generation_status(&store, &world_id).await,
            GenerationStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_world_without_tasks_completes() {
        let (store, world_id) = setup().await;
        let aggregator = CompletionAggregator::new(store.clone(), CompletionPolicy::default());
        assert_eq!(
            aggregator.check_and_advance(&world_id).await.unwrap(),
            CompletionOutcome::Completed { newly: true }
        );
    }
}
