// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generia Worker - World Generation Pipeline
//!
//! This crate turns a world creation request into AI-authored users and
//! posts. Creating a world queues generation tasks in the task store; a
//! worker drains the queue, runs a generation strategy per task and
//! persists its output; an aggregator promotes the world once its tasks are
//! done. Clients observe progress by polling.
//!
//! # Architecture
//!
//! ```text
//!  CreateWorld                                     GetWorld (poll)
//!      │                                                ▲
//!      ▼                                                │
//! ┌──────────────┐  enqueue users, posts  ┌─────────────┴────────────┐
//! │ WorldService │──────────────────────► │                          │
//! │ TaskProducer │                        │    TaskStore             │
//! └──────┬───────┘                        │    (generia-core)        │
//!        │ task_created (advisory)        │                          │
//!        ▼                                └─────────────▲────────────┘
//! ┌──────────────┐   wake early    ┌──────────────┐     │ claim / insert /
//! │ Notification │ ──────────────► │ TaskScheduler│     │ finalize
//! │ bus          │                 └──────┬───────┘     │
//! └──────────────┘                        ▼             │
//!                                  ┌──────────────┐     │
//!                                  │  TaskWorker  │─────┤
//!                                  │  strategies  │     │
//!                                  └──────┬───────┘     │
//!                                         ▼             │
//!                                  ┌──────────────┐     │
//!                                  │  Completion  │─────┘
//!                                  │  Aggregator  │
//!                                  └──────────────┘
//! ```
//!
//! The task table is the source of truth. Notifications only shorten the
//! worker's idle wait; losing one delays a task by at most one poll
//! interval.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `GENERIA_DATABASE_URL` | Yes* | - | `postgres://…` or `sqlite:…` |
//! | `DATABASE_URL` | Yes* | - | Fallback if above not set |
//! | `GENERIA_DB_MAX_CONNECTIONS` | No | `10` | Pool size |
//! | `GENERIA_POLL_INTERVAL_MS` | No | `5000` | Idle wait |
//! | `GENERIA_TASK_DELAY_MS` | No | `500` | Pause between tasks |
//! | `GENERIA_CLAIM_RETRY_DELAY_MS` | No | `1000` | Pause after a failed claim write |
//! | `GENERIA_CLAIM_MODE` | No | `read_then_write` | Or `compare_and_swap` |
//! | `GENERIA_SCHEDULER` | No | `polling` | Or `notifying` |
//! | `GENERIA_COMPLETION_POLICY` | No | `require_all_completed` | Or `fail_when_settled` |
//! | `GENERIA_RNG_SEED` | No | - | Fixed generation seed |
//! | `GENERIA_KAFKA_BROKERS` | No | - | Kafka brokers (`kafka` feature) |
//! | `GENERIA_TASKS_TOPIC` | No | `generia-tasks` | Notification topic |
//! | `GENERIA_PUBLISH_TIMEOUT_MS` | No | `5000` | Publish bound |
//! | `GENERIA_STALE_TASK_TIMEOUT_SECS` | No | - | Enables the stale task monitor |
//! | `GENERIA_STALE_TASK_POLL_INTERVAL_SECS` | No | `60` | Stale task check period |

/// Completion detection for worlds.
pub mod aggregator;

/// Worker configuration loaded from environment variables.
pub mod config;

/// Error types for worker operations.
pub mod error;

/// Per-task-type content generation.
pub mod generation;

/// Advisory task notifications.
pub mod notification;

/// Queues generation tasks for new worlds.
pub mod producer;

/// Retry with exponential backoff.
pub mod retry;

/// Embeddable runtime.
pub mod runtime;

/// Task claiming and idle waiting.
pub mod scheduler;

/// World creation and progress queries.
pub mod service;

/// Background worker for failing abandoned tasks.
pub mod stale_task_monitor;

/// The task worker loop.
pub mod worker;

pub use error::{Error, Result};
