// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generia Core - World Generation Task Store
//!
//! This crate owns the durable state of the world generation pipeline: worlds,
//! the generation task queue, and the AI users and posts produced by tasks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐      enqueue       ┌──────────────────────────┐
//! │  World service /     │───────────────────►│                          │
//! │  task producer       │                    │        TaskStore         │
//! └──────────────────────┘                    │  (PostgreSQL | SQLite)   │
//!                                             │                          │
//! ┌──────────────────────┐  claim / finalize  │  worlds                  │
//! │  Task worker loop    │◄──────────────────►│  world_generation_tasks  │
//! │  + aggregator        │  insert content    │  ai_users, ai_posts      │
//! └──────────────────────┘                    └──────────────────────────┘
//! ```
//!
//! # Task lifecycle
//!
//! | From | To | Operation |
//! |------|----|-----------|
//! | (none) | `pending` | [`TaskStore::enqueue`] |
//! | `pending` | `in_progress` | [`TaskStore::mark_in_progress`], [`TaskStore::claim_next_pending_atomic`] |
//! | `in_progress` | `completed` / `failed` | [`TaskStore::finalize`] |
//!
//! The result column is non-null exactly when the task is terminal. Both
//! schemas enforce this with a check constraint.
//!
//! # World generation status
//!
//! `not_started -> in_progress -> completed | failed`, forward only, guarded
//! in SQL by [`TaskStore::update_world_generation_status`].

pub mod error;
pub mod migrations;
pub mod model;
pub mod persistence;

pub use error::{Result, StoreError};
pub use model::{
    GenerationStatus, MAX_TASK_COUNT, ParseEnumError, TaskParameters, TaskResult, TaskStatus, TaskType,
    WorldStatus,
};
pub use persistence::{
    AiPostRecord, AiUserRecord, NewAiPost, NewAiUser, NewWorld, PostgresTaskStore,
    SqliteTaskStore, TaskRecord, TaskStatusCounts, TaskStore, WorldRecord, WorldStats, connect,
};
