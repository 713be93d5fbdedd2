// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for generia-worker integration tests.
//!
//! Provides an in-memory store, a store wrapper with injectable failures,
//! and recording/failing notification publishers.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use generia_core::{
    AiPostRecord, AiUserRecord, GenerationStatus, NewAiPost, NewAiUser, NewWorld, SqliteTaskStore,
    StoreError, TaskParameters, TaskRecord, TaskResult, TaskStatus, TaskStatusCounts, TaskStore,
    TaskType, WorldRecord, WorldStats,
};
use generia_worker::notification::{NotificationError, NotificationPublisher, TaskCreatedEvent};
use generia_worker::retry::RetryPolicy;
use generia_worker::scheduler::{ClaimMode, PollingScheduler};
use generia_worker::worker::{TaskWorker, WorkerConfig};

/// Fresh in-memory store with migrations applied.
pub async fn test_store() -> Arc<SqliteTaskStore> {
    Arc::new(
        SqliteTaskStore::in_memory()
            .await
            .expect("Failed to open in-memory store"),
    )
}

pub async fn seed_world(store: &dyn TaskStore, prompt: &str) -> WorldRecord {
    store
        .create_world(&NewWorld {
            name: "Test World".to_string(),
            description: "A world for tests".to_string(),
            prompt: prompt.to_string(),
            creator_id: "creator-1".to_string(),
        })
        .await
        .expect("Failed to create world")
}

/// Worker config that never sleeps long and retries finalization quickly.
pub fn fast_config(seed: u64) -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(20),
        task_delay: Duration::from_millis(5),
        claim_retry_delay: Duration::from_millis(5),
        finalize_retry: RetryPolicy::new(3, Duration::from_millis(1)).with_jitter(false),
        rng_seed: Some(seed),
        ..WorkerConfig::default()
    }
}

/// Polling worker with the default claim mode.
pub fn worker(store: Arc<dyn TaskStore>, config: WorkerConfig) -> TaskWorker {
    let scheduler = Arc::new(PollingScheduler::new(store.clone(), ClaimMode::default()));
    TaskWorker::new(store, scheduler, config)
}

pub async fn generation_status(store: &dyn TaskStore, world_id: &str) -> GenerationStatus {
    store
        .get_world(world_id)
        .await
        .expect("Failed to load world")
        .expect("World not found")
        .generation_status()
        .expect("Unknown generation status")
}

pub async fn task_result(store: &dyn TaskStore, task_id: &str) -> TaskResult {
    store
        .get_task(task_id)
        .await
        .expect("Failed to load task")
        .expect("Task not found")
        .result()
        .expect("Invalid result JSON")
        .expect("Task has no result")
}

fn injected(operation: &str) -> StoreError {
    StoreError::DatabaseError {
        operation: operation.to_string(),
        details: "injected failure".to_string(),
    }
}

// ============================================================================
// FlakyStore
// ============================================================================

/// Delegates to a [`SqliteTaskStore`] and fails selected operations on demand.
pub struct FlakyStore {
    pub inner: Arc<SqliteTaskStore>,
    /// `claim_next_pending` and `claim_next_pending_atomic` fail.
    pub fail_claim: AtomicBool,
    /// `mark_in_progress` fails.
    pub fail_mark_in_progress: AtomicBool,
    /// `get_world` fails.
    pub fail_get_world: AtomicBool,
    /// `get_world` reports the world as missing.
    pub hide_world: AtomicBool,
    /// Content inserts succeed this many times, then fail.
    pub inserts_before_failure: AtomicUsize,
    /// Number of upcoming `finalize` calls that fail with a transient error.
    pub finalize_failures: AtomicU32,
    /// Number of upcoming `finalize` calls that commit, then report a
    /// transient error.
    pub finalize_lost_responses: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<SqliteTaskStore>) -> Self {
        Self {
            inner,
            fail_claim: AtomicBool::new(false),
            fail_mark_in_progress: AtomicBool::new(false),
            fail_get_world: AtomicBool::new(false),
            hide_world: AtomicBool::new(false),
            inserts_before_failure: AtomicUsize::new(usize::MAX),
            finalize_failures: AtomicU32::new(0),
            finalize_lost_responses: AtomicU32::new(0),
        }
    }

    fn take_insert(&self) -> Result<(), StoreError> {
        let allowed = self
            .inserts_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match allowed {
            Ok(_) => Ok(()),
            Err(_) => Err(injected("insert")),
        }
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn create_world(&self, world: &NewWorld) -> Result<WorldRecord, StoreError> {
        self.inner.create_world(world).await
    }

    async fn get_world(&self, world_id: &str) -> Result<Option<WorldRecord>, StoreError> {
        if self.fail_get_world.load(Ordering::SeqCst) {
            return Err(injected("get_world"));
        }
        if self.hide_world.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get_world(world_id).await
    }

    async fn update_world_generation_status(
        &self,
        world_id: &str,
        status: GenerationStatus,
    ) -> Result<bool, StoreError> {
        self.inner
            .update_world_generation_status(world_id, status)
            .await
    }

    async fn world_stats(&self, world_id: &str) -> Result<WorldStats, StoreError> {
        self.inner.world_stats(world_id).await
    }

    async fn enqueue(
        &self,
        world_id: &str,
        task_type: TaskType,
        parameters: &TaskParameters,
    ) -> Result<String, StoreError> {
        self.inner.enqueue(world_id, task_type, parameters).await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        self.inner.get_task(task_id).await
    }

    async fn list_tasks(&self, world_id: &str) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.list_tasks(world_id).await
    }

    async fn claim_next_pending(&self) -> Result<Option<TaskRecord>, StoreError> {
        if self.fail_claim.load(Ordering::SeqCst) {
            return Err(injected("claim_next_pending"));
        }
        self.inner.claim_next_pending().await
    }

    async fn mark_in_progress(&self, task_id: &str) -> Result<(), StoreError> {
        if self.fail_mark_in_progress.load(Ordering::SeqCst) {
            return Err(injected("mark_in_progress"));
        }
        self.inner.mark_in_progress(task_id).await
    }

    async fn claim_next_pending_atomic(&self) -> Result<Option<TaskRecord>, StoreError> {
        if self.fail_claim.load(Ordering::SeqCst) {
            return Err(injected("claim_next_pending_atomic"));
        }
        self.inner.claim_next_pending_atomic().await
    }

    async fn finalize(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: &TaskResult,
    ) -> Result<(), StoreError> {
        let failing = self
            .finalize_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(injected("finalize"));
        }
        self.inner.finalize(task_id, status, result).await?;
        let lost = self
            .finalize_lost_responses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lost {
            return Err(injected("finalize"));
        }
        Ok(())
    }

    async fn count_incomplete(&self, world_id: &str) -> Result<i64, StoreError> {
        self.inner.count_incomplete(world_id).await
    }

    async fn count_tasks_by_status(&self, world_id: &str) -> Result<TaskStatusCounts, StoreError> {
        self.inner.count_tasks_by_status(world_id).await
    }

    async fn list_stale_in_progress(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        self.inner.list_stale_in_progress(cutoff, limit).await
    }

    async fn insert_ai_user(&self, user: &NewAiUser) -> Result<(), StoreError> {
        self.take_insert()?;
        self.inner.insert_ai_user(user).await
    }

    async fn insert_ai_post(&self, post: &NewAiPost) -> Result<(), StoreError> {
        self.take_insert()?;
        self.inner.insert_ai_post(post).await
    }

    async fn list_ai_users(&self, world_id: &str) -> Result<Vec<AiUserRecord>, StoreError> {
        self.inner.list_ai_users(world_id).await
    }

    async fn list_ai_posts(&self, world_id: &str) -> Result<Vec<AiPostRecord>, StoreError> {
        self.inner.list_ai_posts(world_id).await
    }
}

// ============================================================================
// Publishers
// ============================================================================

/// Records every published event.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(String, TaskCreatedEvent)>>,
}

impl RecordingPublisher {
    pub fn events(&self) -> Vec<(String, TaskCreatedEvent)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationPublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        _key: &str,
        payload: &[u8],
    ) -> Result<(), NotificationError> {
        let event: TaskCreatedEvent = serde_json::from_slice(payload)?;
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), event));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Rejects every message.
pub struct FailingPublisher;

#[async_trait]
impl NotificationPublisher for FailingPublisher {
    async fn publish(&self, topic: &str, _: &str, _: &[u8]) -> Result<(), NotificationError> {
        Err(NotificationError::Publish {
            topic: topic.to_string(),
            message: "broker unavailable".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
