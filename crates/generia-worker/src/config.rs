// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for generia-worker.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::aggregator::CompletionPolicy;
use crate::notification::DEFAULT_TASKS_TOPIC;
use crate::scheduler::{ClaimMode, SchedulerKind};
use crate::worker::WorkerConfig;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `postgres://…` or `sqlite:…`
    pub database_url: String,
    pub db_max_connections: u32,
    /// Idle wait when the queue is empty
    pub poll_interval_ms: u64,
    /// Pause between processed tasks
    pub task_delay_ms: u64,
    /// Pause after a task could not be marked in_progress
    pub claim_retry_delay_ms: u64,
    pub claim_mode: ClaimMode,
    pub scheduler: SchedulerKind,
    pub completion_policy: CompletionPolicy,
    /// Fixed seed for content generation
    pub rng_seed: Option<u64>,
    /// Comma-separated Kafka brokers. Notifications stay in-process when unset.
    pub kafka_brokers: Option<String>,
    pub tasks_topic: String,
    pub publish_timeout_ms: u64,
    /// Enables the stale task monitor
    pub stale_task_timeout_secs: Option<u64>,
    pub stale_task_poll_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("GENERIA_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingEnvVar("GENERIA_DATABASE_URL or DATABASE_URL"))?;

        Ok(Self {
            database_url,
            db_max_connections: parse_or("GENERIA_DB_MAX_CONNECTIONS", 10)?,
            poll_interval_ms: parse_or("GENERIA_POLL_INTERVAL_MS", 5000)?,
            task_delay_ms: parse_or("GENERIA_TASK_DELAY_MS", 500)?,
            claim_retry_delay_ms: parse_or("GENERIA_CLAIM_RETRY_DELAY_MS", 1000)?,
            claim_mode: parse_or("GENERIA_CLAIM_MODE", ClaimMode::default())?,
            scheduler: parse_or("GENERIA_SCHEDULER", SchedulerKind::default())?,
            completion_policy: parse_or(
                "GENERIA_COMPLETION_POLICY",
                CompletionPolicy::default(),
            )?,
            rng_seed: parse_opt("GENERIA_RNG_SEED")?,
            kafka_brokers: non_empty("GENERIA_KAFKA_BROKERS"),
            tasks_topic: non_empty("GENERIA_TASKS_TOPIC")
                .unwrap_or_else(|| DEFAULT_TASKS_TOPIC.to_string()),
            publish_timeout_ms: parse_or("GENERIA_PUBLISH_TIMEOUT_MS", 5000)?,
            stale_task_timeout_secs: parse_opt("GENERIA_STALE_TASK_TIMEOUT_SECS")?,
            stale_task_poll_interval_secs: parse_or("GENERIA_STALE_TASK_POLL_INTERVAL_SECS", 60)?,
        })
    }

    /// Worker loop settings derived from this configuration.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            task_delay: Duration::from_millis(self.task_delay_ms),
            claim_retry_delay: Duration::from_millis(self.claim_retry_delay_ms),
            completion_policy: self.completion_policy,
            rng_seed: self.rng_seed,
            ..WorkerConfig::default()
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// An environment variable could not be parsed.
    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "generia_worker=info,generia_core=info";

/// Tracing filter directives from `RUST_LOG`. Call after `.env` is loaded.
pub fn log_filter() -> String {
    non_empty("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

fn non_empty(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_opt<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match non_empty(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
        None => Ok(None),
    }
}

fn parse_or<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    Ok(parse_opt(var)?.unwrap_or(default))
}
