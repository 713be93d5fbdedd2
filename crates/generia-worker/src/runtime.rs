// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for generia-worker.
//!
//! [`WorkerRuntime`] wires the store, notification bus, scheduler, worker
//! loop and optional stale task monitor together, so the pipeline can run
//! inside an existing tokio application as well as from the binary.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use generia_core::SqliteTaskStore;
//! use generia_worker::notification::BroadcastPublisher;
//! use generia_worker::runtime::WorkerRuntime;
//! use generia_worker::scheduler::SchedulerKind;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteTaskStore::from_path("generia.db").await?);
//!
//!     let runtime = WorkerRuntime::builder()
//!         .store(store)
//!         .bus(BroadcastPublisher::default())
//!         .scheduler(SchedulerKind::Notifying)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let world = runtime.world_service().create_world(request).await?;
//!     // ... poll runtime.world_service().get_world(&world.id) ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use generia_core::TaskStore;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::aggregator::CompletionAggregator;
use crate::generation::StrategyRegistry;
use crate::notification::{
    BroadcastPublisher, DEFAULT_TASKS_TOPIC, NoopPublisher, NotificationPublisher,
};
use crate::producer::TaskProducer;
use crate::scheduler::{
    ClaimMode, NotifyingScheduler, PollingScheduler, SchedulerKind, TaskScheduler,
};
use crate::service::WorldService;
use crate::stale_task_monitor::{StaleTaskMonitor, StaleTaskMonitorConfig};
use crate::worker::{TaskWorker, WorkerConfig};

/// Builder for creating a [`WorkerRuntime`].
pub struct WorkerRuntimeBuilder {
    store: Option<Arc<dyn TaskStore>>,
    publisher: Option<Arc<dyn NotificationPublisher>>,
    bus: Option<BroadcastPublisher>,
    scheduler: SchedulerKind,
    claim_mode: ClaimMode,
    worker_config: WorkerConfig,
    strategies: StrategyRegistry,
    tasks_topic: String,
    publish_timeout: Duration,
    stale_task_timeout: Option<Duration>,
    stale_task_poll_interval: Duration,
}

impl Default for WorkerRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            publisher: None,
            bus: None,
            scheduler: SchedulerKind::default(),
            claim_mode: ClaimMode::default(),
            worker_config: WorkerConfig::default(),
            strategies: StrategyRegistry::with_defaults(),
            tasks_topic: DEFAULT_TASKS_TOPIC.to_string(),
            publish_timeout: Duration::from_secs(5),
            stale_task_timeout: None,
            stale_task_poll_interval: Duration::from_secs(60),
        }
    }
}

impl WorkerRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task store (required).
    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the publisher used by the producer. Defaults to the in-process
    /// bus when one is set, otherwise to a publisher that drops messages.
    pub fn publisher(mut self, publisher: Arc<dyn NotificationPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Set the in-process bus the notifying scheduler listens on.
    pub fn bus(mut self, bus: BroadcastPublisher) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn scheduler(mut self, kind: SchedulerKind) -> Self {
        self.scheduler = kind;
        self
    }

    pub fn claim_mode(mut self, mode: ClaimMode) -> Self {
        self.claim_mode = mode;
        self
    }

    pub fn worker_config(mut self, config: WorkerConfig) -> Self {
        self.worker_config = config;
        self
    }

    pub fn strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn tasks_topic(mut self, topic: impl Into<String>) -> Self {
        self.tasks_topic = topic.into();
        self
    }

    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Enable the stale task monitor with the given timeout.
    pub fn stale_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stale_task_timeout = timeout;
        self
    }

    pub fn stale_task_poll_interval(mut self, interval: Duration) -> Self {
        self.stale_task_poll_interval = interval;
        self
    }

    /// Build the runtime configuration.
    pub fn build(self) -> Result<WorkerRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;

        if self.scheduler == SchedulerKind::Notifying && self.bus.is_none() {
            anyhow::bail!("the notifying scheduler requires an in-process bus");
        }

        let publisher: Arc<dyn NotificationPublisher> = match (self.publisher, &self.bus) {
            (Some(publisher), _) => publisher,
            (None, Some(bus)) => Arc::new(bus.clone()),
            (None, None) => Arc::new(NoopPublisher),
        };

        Ok(WorkerRuntimeConfig {
            store,
            publisher,
            bus: self.bus,
            scheduler: self.scheduler,
            claim_mode: self.claim_mode,
            worker_config: self.worker_config,
            strategies: self.strategies,
            tasks_topic: self.tasks_topic,
            publish_timeout: self.publish_timeout,
            stale_task_timeout: self.stale_task_timeout,
            stale_task_poll_interval: self.stale_task_poll_interval,
        })
    }
}

/// Configuration for a [`WorkerRuntime`].
pub struct WorkerRuntimeConfig {
    store: Arc<dyn TaskStore>,
    publisher: Arc<dyn NotificationPublisher>,
    bus: Option<BroadcastPublisher>,
    scheduler: SchedulerKind,
    claim_mode: ClaimMode,
    worker_config: WorkerConfig,
    strategies: StrategyRegistry,
    tasks_topic: String,
    publish_timeout: Duration,
    stale_task_timeout: Option<Duration>,
    stale_task_poll_interval: Duration,
}

impl WorkerRuntimeConfig {
    /// Start the runtime, spawning the worker and the stale task monitor.
    pub async fn start(self) -> Result<WorkerRuntime> {
        let scheduler: Arc<dyn TaskScheduler> = match (self.scheduler, &self.bus) {
            (SchedulerKind::Notifying, Some(bus)) => Arc::new(NotifyingScheduler::new(
                self.store.clone(),
                self.claim_mode,
                self.tasks_topic.clone(),
                bus.subscribe(),
            )),
            _ => Arc::new(PollingScheduler::new(self.store.clone(), self.claim_mode)),
        };

        let producer = Arc::new(
            TaskProducer::new(self.store.clone(), self.publisher.clone())
                .with_topic(self.tasks_topic.clone())
                .with_publish_timeout(self.publish_timeout),
        );
        let world_service = Arc::new(WorldService::new(self.store.clone(), producer));

        let completion_policy = self.worker_config.completion_policy;
        let worker = TaskWorker::new(self.store.clone(), scheduler, self.worker_config)
            .with_strategies(self.strategies);
        let worker_shutdown = worker.shutdown_handle();
        let worker_handle = tokio::spawn(worker.run());

        let stale_monitor = self.stale_task_timeout.map(|task_timeout| {
            let monitor = StaleTaskMonitor::new(
                self.store.clone(),
                Arc::new(CompletionAggregator::new(
                    self.store.clone(),
                    completion_policy,
                )),
                StaleTaskMonitorConfig {
                    poll_interval: self.stale_task_poll_interval,
                    task_timeout,
                    ..StaleTaskMonitorConfig::default()
                },
            );
            let shutdown = monitor.shutdown_handle();
            let handle = tokio::spawn(async move {
                monitor.run().await;
            });
            (shutdown, handle)
        });

        info!(
            scheduler = ?self.scheduler,
            claim_mode = ?self.claim_mode,
            publisher = self.publisher.name(),
            topic = %self.tasks_topic,
            stale_task_monitor = stale_monitor.is_some(),
            "WorkerRuntime started"
        );

        Ok(WorkerRuntime {
            worker_handle,
            worker_shutdown,
            stale_monitor,
            world_service,
        })
    }
}

/// A running world generation pipeline.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination. A task in
/// flight at shutdown is left in_progress.
pub struct WorkerRuntime {
    worker_handle: JoinHandle<()>,
    worker_shutdown: CancellationToken,
    stale_monitor: Option<(Arc<Notify>, JoinHandle<()>)>,
    world_service: Arc<WorldService>,
}

impl WorkerRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> WorkerRuntimeBuilder {
        WorkerRuntimeBuilder::new()
    }

    /// Service for creating and polling worlds against this runtime's store.
    pub fn world_service(&self) -> &Arc<WorldService> {
        &self.world_service
    }

    /// Check if the worker is still running.
    pub fn is_running(&self) -> bool {
        !self.worker_handle.is_finished()
    }

    /// Signal the worker and the stale task monitor to stop, then wait for them.
    pub async fn shutdown(self) -> Result<()> {
        info!("WorkerRuntime shutting down...");

        self.worker_shutdown.cancel();
        if let Some((shutdown, _)) = &self.stale_monitor {
            shutdown.notify_one();
        }

        if let Some((_, handle)) = self.stale_monitor
            && let Err(e) = handle.await
        {
            error!("Stale task monitor task panicked: {}", e);
        }

        match self.worker_handle.await {
            Ok(()) => {
                info!("WorkerRuntime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Task worker task panicked: {}", e);
                Err(anyhow::anyhow!("worker task panicked: {}", e))
            }
        }
    }
}
