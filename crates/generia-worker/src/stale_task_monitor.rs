// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for failing abandoned tasks.
//!
//! A task stays in_progress when its worker stops mid-task. Tasks that have
//! not been updated within the configured timeout are finalized as failed,
//! which lets the completion check settle their world. The monitor is only
//! started when a timeout is configured.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use generia_core::{StoreError, TaskResult, TaskStatus, TaskStore};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::aggregator::CompletionAggregator;

/// Configuration for the stale task monitor.
#[derive(Debug, Clone)]
pub struct StaleTaskMonitorConfig {
    /// How often to look for stale tasks.
    pub poll_interval: Duration,
    /// Time without an update after which an in_progress task is failed.
    pub task_timeout: Duration,
    /// Maximum tasks failed per check.
    pub batch_size: i64,
}

impl Default for StaleTaskMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            task_timeout: Duration::from_secs(30 * 60),
            batch_size: 100,
        }
    }
}

/// Background worker that fails in_progress tasks nobody is working on.
pub struct StaleTaskMonitor {
    store: Arc<dyn TaskStore>,
    aggregator: Arc<CompletionAggregator>,
    config: StaleTaskMonitorConfig,
    shutdown: Arc<Notify>,
}

impl StaleTaskMonitor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        aggregator: Arc<CompletionAggregator>,
        config: StaleTaskMonitorConfig,
    ) -> Self {
        Self {
            store,
            aggregator,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the monitor loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            task_timeout_secs = self.config.task_timeout.as_secs(),
            "Stale task monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Stale task monitor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.check_stale_tasks().await {
                        error!(error = %e, "Failed to check stale tasks");
                    }
                }
            }
        }

        info!("Stale task monitor stopped");
    }

    /// Fail every stale task in one batch. Returns how many were failed.
    pub async fn check_stale_tasks(&self) -> Result<usize, StoreError> {
        let timeout = chrono::Duration::from_std(self.config.task_timeout).map_err(|e| {
            StoreError::ValidationError {
                field: "task_timeout".to_string(),
                message: e.to_string(),
            }
        })?;
        let cutoff = Utc::now() - timeout;

        let stale = self
            .store
            .list_stale_in_progress(cutoff, self.config.batch_size)
            .await?;
        if stale.is_empty() {
            debug!("No stale tasks found");
            return Ok(0);
        }

        info!(count = stale.len(), "Found stale tasks to fail");

        let mut failed = 0;
        for task in stale {
            let result = TaskResult::failed(format!(
                "Task abandoned: no progress since {} (timeout: {}s)",
                task.updated_at.to_rfc3339(),
                self.config.task_timeout.as_secs()
            ));
            match self.store.finalize(&task.id, TaskStatus::Failed, &result).await {
                Ok(()) => {
                    failed += 1;
                    warn!(
                        task_id = %task.id,
                        world_id = %task.world_id,
                        last_update = %task.updated_at,
                        "Failed stale task"
                    );
                }
                // Finished by its worker after the listing.
                Err(StoreError::InvalidTaskState { .. }) => continue,
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "Failed to fail stale task");
                    continue;
                }
            }

            if let Err(e) = self.aggregator.check_and_advance(&task.world_id).await {
                error!(world_id = %task.world_id, error = %e, "Failed to check world completion");
            }
        }

        Ok(failed)
    }
}
