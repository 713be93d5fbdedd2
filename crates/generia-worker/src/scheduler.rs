// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task claiming and idle waiting.
//!
//! A [`TaskScheduler`] hands the worker its next task and decides how long
//! to wait when there is none. Two backends exist:
//!
//! - [`PollingScheduler`] sleeps the full poll interval when idle.
//! - [`NotifyingScheduler`] also wakes as soon as a `task_created` event
//!   arrives on the in-process bus.
//!
//! Both claim with the configured [`ClaimMode`].

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use generia_core::{ParseEnumError, StoreError, TaskRecord, TaskStatus, TaskStore};
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::notification::BusMessage;

/// How a task moves from pending to in_progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimMode {
    /// Read the oldest pending task, then mark it in_progress in a second
    /// statement. Two workers can claim the same task.
    #[default]
    ReadThenWrite,
    /// Claim in one conditional statement. Safe with several workers.
    CompareAndSwap,
}

impl FromStr for ClaimMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_then_write" => Ok(Self::ReadThenWrite),
            "compare_and_swap" => Ok(Self::CompareAndSwap),
            other => Err(ParseEnumError {
                kind: "claim mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Which scheduler backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerKind {
    #[default]
    Polling,
    Notifying,
}

impl FromStr for SchedulerKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "polling" => Ok(Self::Polling),
            "notifying" => Ok(Self::Notifying),
            other => Err(ParseEnumError {
                kind: "scheduler",
                value: other.to_string(),
            }),
        }
    }
}

/// Result of one claim attempt that reached the store.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The task is now in_progress and belongs to the caller.
    Claimed(TaskRecord),
    /// No pending task.
    Empty,
    /// A pending task was found but could not be marked in_progress. It is
    /// still pending.
    MarkFailed {
        task_id: String,
        error: StoreError,
    },
}

#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Claim the next task. `Err` means the store could not be read.
    async fn claim_next(&self) -> Result<ClaimOutcome, StoreError>;

    /// Wait up to `idle` for new work. Returns early on cancellation.
    async fn wait_for_work(&self, idle: Duration, cancel: &CancellationToken);
}

async fn claim(store: &dyn TaskStore, mode: ClaimMode) -> Result<ClaimOutcome, StoreError> {
    match mode {
        ClaimMode::CompareAndSwap => Ok(match store.claim_next_pending_atomic().await? {
            Some(task) => ClaimOutcome::Claimed(task),
            None => ClaimOutcome::Empty,
        }),
        ClaimMode::ReadThenWrite => {
            let Some(mut task) = store.claim_next_pending().await? else {
                return Ok(ClaimOutcome::Empty);
            };
            match store.mark_in_progress(&task.id).await {
                Ok(()) => {
                    task.status = TaskStatus::InProgress.to_string();
                    Ok(ClaimOutcome::Claimed(task))
                }
                Err(error) => Ok(ClaimOutcome::MarkFailed {
                    task_id: task.id,
                    error,
                }),
            }
        }
    }
}

/// Fixed-interval polling.
pub struct PollingScheduler {
    store: Arc<dyn TaskStore>,
    mode: ClaimMode,
}

impl PollingScheduler {
    pub fn new(store: Arc<dyn TaskStore>, mode: ClaimMode) -> Self {
        Self { store, mode }
    }
}

#[async_trait]
impl TaskScheduler for PollingScheduler {
    async fn claim_next(&self) -> Result<ClaimOutcome, StoreError> {
        claim(self.store.as_ref(), self.mode).await
    }

    async fn wait_for_work(&self, idle: Duration, cancel: &CancellationToken) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(idle) => {}
        }
    }
}

/// Polling that also wakes on `task_created` events for one topic.
///
/// Events that arrive while a task is being processed stay queued in the
/// receiver, so the next wait returns at once.
pub struct NotifyingScheduler {
    store: Arc<dyn TaskStore>,
    mode: ClaimMode,
    topic: String,
    events: Mutex<broadcast::Receiver<BusMessage>>,
}

impl NotifyingScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        mode: ClaimMode,
        topic: impl Into<String>,
        events: broadcast::Receiver<BusMessage>,
    ) -> Self {
        Self {
            store,
            mode,
            topic: topic.into(),
            events: Mutex::new(events),
        }
    }
}

#[async_trait]
impl TaskScheduler for NotifyingScheduler {
    async fn claim_next(&self) -> Result<ClaimOutcome, StoreError> {
        claim(self.store.as_ref(), self.mode).await
    }

    async fn wait_for_work(&self, idle: Duration, cancel: &CancellationToken) {
        let mut events = self.events.lock().await;
        let task_created = async {
            loop {
                match events.recv().await {
                    Ok(message) if message.topic == self.topic && message.task_created().is_some() => {
                        return;
                    }
                    Ok(_) => continue,
                    // Missed events may have been task_created; look at the store.
                    Err(broadcast::error::RecvError::Lagged(_)) => return,
                    Err(broadcast::error::RecvError::Closed) => {
                        std::future::pending::<()>().await;
                    }
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = task_created => {
                debug!(topic = %self.topic, "Woken by task notification");
            }
            _ = tokio::time::sleep(idle) => {}
        }
    }
}
