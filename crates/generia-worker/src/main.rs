// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generia Worker - World Generation Task Worker
//!
//! Drains the world generation task queue:
//! - Claims pending tasks in FIFO order
//! - Generates AI users and posts
//! - Promotes worlds once their tasks are done
//! - Optionally fails tasks abandoned by a crashed worker

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use generia_core::{StoreError, TaskStore};
use generia_worker::config::{self, Config};
use generia_worker::notification::{BroadcastPublisher, NotificationPublisher};
use generia_worker::retry::{RetryPolicy, retry_with_backoff};
use generia_worker::runtime::WorkerRuntime;
use generia_worker::scheduler::SchedulerKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present, before the log filter is read
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(config::log_filter())
                .unwrap_or_else(|_| config::DEFAULT_LOG_FILTER.into()),
        )
        .init();

    if let Err(e) = dotenv {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        scheduler = ?config.scheduler,
        claim_mode = ?config.claim_mode,
        completion_policy = ?config.completion_policy,
        topic = %config.tasks_topic,
        "Starting Generia Worker"
    );

    // Connect and migrate, retrying while the database comes up
    let connect_policy = RetryPolicy::new(5, Duration::from_secs(1));
    let store: Arc<dyn TaskStore> = retry_with_backoff(
        &connect_policy,
        "connect_database",
        StoreError::is_transient,
        || generia_core::connect(&config.database_url, config.db_max_connections),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    info!("Connected to database");

    let bus = (config.scheduler == SchedulerKind::Notifying).then(BroadcastPublisher::default);
    let external = external_publisher(&config)?;

    let mut builder = WorkerRuntime::builder()
        .store(store)
        .scheduler(config.scheduler)
        .claim_mode(config.claim_mode)
        .worker_config(config.worker_config())
        .tasks_topic(&config.tasks_topic)
        .publish_timeout(Duration::from_millis(config.publish_timeout_ms))
        .stale_task_timeout(config.stale_task_timeout_secs.map(Duration::from_secs))
        .stale_task_poll_interval(Duration::from_secs(config.stale_task_poll_interval_secs));

    builder = match (external, bus) {
        (Some(external), Some(bus)) => {
            let publishers: Vec<Arc<dyn NotificationPublisher>> =
                vec![external, Arc::new(bus.clone())];
            builder
                .publisher(Arc::new(
                    generia_worker::notification::FanoutPublisher::new(publishers),
                ))
                .bus(bus)
        }
        (Some(external), None) => builder.publisher(external),
        (None, Some(bus)) => builder.bus(bus),
        (None, None) => builder,
    };

    let runtime = builder.build()?.start().await?;

    info!("Generia Worker ready");

    wait_for_shutdown().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Generia Worker shut down");

    Ok(())
}

#[cfg(feature = "kafka")]
fn external_publisher(config: &Config) -> anyhow::Result<Option<Arc<dyn NotificationPublisher>>> {
    use generia_worker::notification::KafkaPublisher;

    match &config.kafka_brokers {
        Some(brokers) => {
            let publisher = KafkaPublisher::new(
                brokers,
                Duration::from_millis(config.publish_timeout_ms),
            )?;
            Ok(Some(Arc::new(publisher)))
        }
        None => Ok(None),
    }
}

#[cfg(not(feature = "kafka"))]
fn external_publisher(config: &Config) -> anyhow::Result<Option<Arc<dyn NotificationPublisher>>> {
    if config.kafka_brokers.is_some() {
        warn!("GENERIA_KAFKA_BROKERS is set but this build has no kafka feature; notifications stay in-process");
    }
    Ok(None)
}

#[cfg(unix)]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
