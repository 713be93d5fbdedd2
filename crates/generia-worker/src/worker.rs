// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task worker loop.
//!
//! One worker drains the task queue sequentially:
//!
//! 1. Claim the oldest pending task through the [`TaskScheduler`].
//! 2. Mark the owning world as generating.
//! 3. Resolve the world, parameters and strategy, failing the task when any
//!    of them is unusable.
//! 4. Generate and persist entities one at a time, checking for shutdown
//!    before each one.
//! 5. Finalize the task (retrying transient store errors) and run the
//!    completion check for its world.
//!
//! A task interrupted by shutdown is left in_progress. Entities already
//! written by a failed task are not rolled back; their ids are recorded in
//! the task result.

use std::sync::Arc;
use std::time::Duration;

use generia_core::{
    MAX_TASK_COUNT, StoreError, TaskRecord, TaskResult, TaskStatus, TaskStore, WorldRecord,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::{CompletionAggregator, CompletionOutcome, CompletionPolicy};
use crate::generation::{
    GeneratedEntity, GenerationContext, PREALLOCATE_LIMIT, StrategyRegistry,
};
use crate::retry::{RetryError, RetryPolicy, retry_with_backoff};
use crate::scheduler::{ClaimOutcome, TaskScheduler};

/// Configuration for the task worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Idle wait when the queue is empty or the store is unreachable.
    pub poll_interval: Duration,
    /// Pause between two processed tasks.
    pub task_delay: Duration,
    /// Pause after a task could not be marked in_progress.
    pub claim_retry_delay: Duration,
    /// Backoff for transient errors while finalizing a task.
    pub finalize_retry: RetryPolicy,
    pub completion_policy: CompletionPolicy,
    /// Fixed seed for generation. Entropy when unset.
    pub rng_seed: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            task_delay: Duration::from_millis(500),
            claim_retry_delay: Duration::from_secs(1),
            finalize_retry: RetryPolicy::default(),
            completion_policy: CompletionPolicy::default(),
            rng_seed: None,
        }
    }
}

/// How a claimed task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDisposition {
    Completed,
    Failed,
    /// Shutdown was requested mid-task; the task is still in_progress.
    Abandoned,
    /// The terminal write did not succeed; the task is still in_progress.
    FinalizeFailed,
}

/// Summary of one processed task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: String,
    pub world_id: String,
    pub task_type: String,
    pub disposition: TaskDisposition,
    pub generated_count: usize,
    /// Completion check result, when the task was finalized and the check ran.
    pub world_outcome: Option<CompletionOutcome>,
}

/// Result of [`TaskWorker::run_once`].
#[derive(Debug)]
pub enum IterationOutcome {
    /// No pending task.
    Idle,
    /// The store could not be queried.
    StoreUnavailable(StoreError),
    /// A task was found but could not be marked in_progress.
    ClaimFailed { task_id: String },
    Processed(TaskReport),
}

/// Terminal write the worker wants to make, or the lack of one.
enum Execution {
    Finished {
        status: TaskStatus,
        result: TaskResult,
    },
    Abandoned {
        generated: usize,
    },
}

impl Execution {
    fn failed(message: impl Into<String>) -> Self {
        Self::Finished {
            status: TaskStatus::Failed,
            result: TaskResult::failed(message),
        }
    }
}

/// Sequential generation task worker.
pub struct TaskWorker {
    store: Arc<dyn TaskStore>,
    scheduler: Arc<dyn TaskScheduler>,
    strategies: StrategyRegistry,
    aggregator: CompletionAggregator,
    config: WorkerConfig,
    rng: StdRng,
    cancel: CancellationToken,
}

impl TaskWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        scheduler: Arc<dyn TaskScheduler>,
        config: WorkerConfig,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            aggregator: CompletionAggregator::new(store.clone(), config.completion_policy),
            store,
            scheduler,
            strategies: StrategyRegistry::with_defaults(),
            config,
            rng,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the strategy registry.
    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    /// Token that stops the worker. Cancelling it mid-task abandons the task.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until shutdown.
    pub async fn run(mut self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            task_delay_ms = self.config.task_delay.as_millis() as u64,
            strategies = self.strategies.len(),
            "Task worker started"
        );

        while !self.cancel.is_cancelled() {
            let pause = match self.run_once().await {
                IterationOutcome::Idle | IterationOutcome::StoreUnavailable(_) => {
                    self.scheduler
                        .wait_for_work(self.config.poll_interval, &self.cancel)
                        .await;
                    continue;
                }
                IterationOutcome::ClaimFailed { .. } => self.config.claim_retry_delay,
                IterationOutcome::Processed(_) => self.config.task_delay,
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("Task worker stopped");
    }

    /// Claim and process at most one task. Never sleeps.
    pub async fn run_once(&mut self) -> IterationOutcome {
        let task = match self.scheduler.claim_next().await {
            Ok(ClaimOutcome::Claimed(task)) => task,
            Ok(ClaimOutcome::Empty) => {
                debug!("No pending tasks");
                return IterationOutcome::Idle;
            }
            Ok(ClaimOutcome::MarkFailed { task_id, error }) => {
                error!(task_id = %task_id, error = %error, "Failed to mark task in progress");
                return IterationOutcome::ClaimFailed { task_id };
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch pending task");
                return IterationOutcome::StoreUnavailable(e);
            }
        };

        IterationOutcome::Processed(self.process(task).await)
    }

    async fn process(&mut self, task: TaskRecord) -> TaskReport {
        info!(
            task_id = %task.id,
            world_id = %task.world_id,
            task_type = %task.task_type,
            "Processing task"
        );

        if let Err(e) = self.aggregator.mark_started(&task.world_id).await {
            warn!(world_id = %task.world_id, error = %e, "Failed to mark world generation started");
        }

        let mut report = TaskReport {
            task_id: task.id.clone(),
            world_id: task.world_id.clone(),
            task_type: task.task_type.clone(),
            disposition: TaskDisposition::Abandoned,
            generated_count: 0,
            world_outcome: None,
        };

        let (status, result) = match self.execute(&task).await {
            Execution::Abandoned { generated } => {
                warn!(
                    task_id = %task.id,
                    generated,
                    "Shutdown requested, leaving task in progress"
                );
                report.generated_count = generated;
                return report;
            }
            Execution::Finished { status, result } => (status, result),
        };
        report.generated_count = result.generated_count.unwrap_or(0);

        if let Err(e) = self.finalize(&task.id, status, &result).await {
            error!(task_id = %task.id, status = %status, error = %e, "Failed to finalize task");
            report.disposition = TaskDisposition::FinalizeFailed;
            return report;
        }

        if status == TaskStatus::Completed {
            report.disposition = TaskDisposition::Completed;
            info!(task_id = %task.id, message = %result.message, "Task completed");
        } else {
            report.disposition = TaskDisposition::Failed;
            warn!(task_id = %task.id, message = %result.message, "Task failed");
        }

        match self.aggregator.check_and_advance(&task.world_id).await {
            Ok(outcome) => report.world_outcome = Some(outcome),
            Err(e) => {
                error!(world_id = %task.world_id, error = %e, "Failed to check world completion");
            }
        }
        report
    }

    async fn execute(&mut self, task: &TaskRecord) -> Execution {
        let world: WorldRecord = match self.store.get_world(&task.world_id).await {
            Ok(Some(world)) => world,
            Ok(None) => {
                return Execution::failed(format!(
                    "Failed to get world info: world '{}' not found",
                    task.world_id
                ));
            }
            Err(e) => return Execution::failed(format!("Failed to get world info: {}", e)),
        };

        let Some(strategy) = self.strategies.get(&task.task_type) else {
            return Execution::failed(format!("Unknown task type: {}", task.task_type));
        };

        let parameters = match task.parameters() {
            Ok(parameters) => parameters.resolve(strategy.task_type(), &world.prompt),
            Err(e) => return Execution::failed(format!("Invalid task parameters: {}", e)),
        };
        if parameters.exceeds_limit() {
            return Execution::failed(format!(
                "Invalid task parameters: count {} exceeds {}",
                parameters.count, MAX_TASK_COUNT
            ));
        }

        let authors = if strategy.requires_authors() {
            match self.store.list_ai_user_ids(&task.world_id).await {
                Ok(authors) => authors,
                Err(e) => return Execution::failed(format!("Failed to get AI users: {}", e)),
            }
        } else {
            Vec::new()
        };

        if self.cancel.is_cancelled() {
            return Execution::Abandoned { generated: 0 };
        }

        let ctx = GenerationContext {
            world_id: &task.world_id,
            prompt: &parameters.world_prompt,
            count: usize::try_from(parameters.count).unwrap_or(0),
            authors: &authors,
        };
        let mut generator = match strategy.start(&ctx) {
            Ok(generator) => generator,
            Err(e) => return Execution::failed(e.to_string()),
        };

        let mut ids = Vec::with_capacity(generator.remaining().min(PREALLOCATE_LIMIT));
        loop {
            if self.cancel.is_cancelled() {
                return Execution::Abandoned {
                    generated: ids.len(),
                };
            }
            let Some(entity) = generator.next_entity(&mut self.rng) else {
                break;
            };
            if let Err(e) = self.persist(&entity).await {
                return Execution::Finished {
                    status: TaskStatus::Failed,
                    result: TaskResult::failed_partial(
                        format!("Failed to save AI {}: {}", entity.kind(), e),
                        ids,
                    ),
                };
            }
            debug!(task_id = %task.id, entity_id = %entity.id(), kind = entity.kind(), "Entity saved");
            ids.push(entity.id().to_string());
        }

        Execution::Finished {
            status: TaskStatus::Completed,
            result: TaskResult::completed(strategy.completion_message(ids.len()), ids),
        }
    }

    async fn persist(&self, entity: &GeneratedEntity) -> Result<(), StoreError> {
        match entity {
            GeneratedEntity::User(user) => self.store.insert_ai_user(user).await,
            GeneratedEntity::Post(post) => self.store.insert_ai_post(post).await,
        }
    }

    async fn finalize(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: &TaskResult,
    ) -> Result<(), StoreError> {
        let mut attempts: u32 = 0;
        let outcome = retry_with_backoff(
            &self.config.finalize_retry,
            "finalize_task",
            StoreError::is_transient,
            || {
                attempts += 1;
                self.store.finalize(task_id, status, result)
            },
        )
        .await
        .map_err(RetryError::into_inner);

        match outcome {
            // An earlier attempt committed but its response was lost.
            Err(StoreError::InvalidTaskState { actual, .. })
                if attempts > 1 && actual == status.as_str() =>
            {
                debug!(task_id = %task_id, status = %status, "Task already finalized by a retried attempt");
                Ok(())
            }
            other => other,
        }
    }
}
