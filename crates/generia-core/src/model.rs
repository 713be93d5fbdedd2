// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain model: status enums, task parameters and results.
//!
//! Statuses are stored as their snake_case string form. The enums here own
//! the transition rules; the stores only enforce them in SQL.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default number of AI users generated when a task asks for zero or fewer.
pub const DEFAULT_USER_COUNT: i64 = 10;

/// Default number of AI posts generated when a task asks for zero or fewer.
pub const DEFAULT_POST_COUNT: i64 = 50;

/// Largest count a single task may ask for.
pub const MAX_TASK_COUNT: i64 = 10_000;

/// Returned when a stored string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The offending value.
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            /// Stored string form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// Lifecycle status of a world, independent of generation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldStatus {
    Active,
    Archived,
}

string_enum!(WorldStatus, "world status", {
    Active => "active",
    Archived => "archived",
});

/// Generation progress of a world.
///
/// Moves forward only: `not_started -> in_progress -> completed | failed`.
/// Terminal values are never changed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

string_enum!(GenerationStatus, "generation status", {
    NotStarted => "not_started",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
});

impl GenerationStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::InProgress => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a forward move from `self`.
    pub fn can_transition_to(&self, next: GenerationStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Statuses from which `self` may be reached. Used as the SQL guard for
    /// world status updates.
    pub fn predecessors(&self) -> &'static [GenerationStatus] {
        match self {
            Self::NotStarted => &[],
            Self::InProgress => &[Self::NotStarted],
            Self::Completed | Self::Failed => &[Self::NotStarted, Self::InProgress],
        }
    }
}

/// Status of a single generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

string_enum!(TaskStatus, "task status", {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
});

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// `pending -> in_progress -> completed | failed`, nothing else.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }
}

/// Kind of content a task generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Users,
    Posts,
}

string_enum!(TaskType, "task type", {
    Users => "users",
    Posts => "posts",
});

impl TaskType {
    /// Count used when a task asks for zero or fewer entities.
    pub fn default_count(&self) -> i64 {
        match self {
            Self::Users => DEFAULT_USER_COUNT,
            Self::Posts => DEFAULT_POST_COUNT,
        }
    }
}

/// Parameters stored with every task as JSON `{count, world_prompt}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParameters {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub world_prompt: String,
}

impl TaskParameters {
    pub fn new(count: i64, world_prompt: impl Into<String>) -> Self {
        Self {
            count,
            world_prompt: world_prompt.into(),
        }
    }

    /// Fill in defaults: a non-positive count becomes the task type's
    /// default, and an empty prompt falls back to the world's prompt.
    /// The count is not capped here; see [`TaskParameters::exceeds_limit`].
    pub fn resolve(&self, task_type: TaskType, fallback_prompt: &str) -> TaskParameters {
        let count = if self.count <= 0 {
            task_type.default_count()
        } else {
            self.count
        };
        let world_prompt = if self.world_prompt.is_empty() {
            fallback_prompt.to_string()
        } else {
            self.world_prompt.clone()
        };
        TaskParameters {
            count,
            world_prompt,
        }
    }

    /// Whether `count` is above [`MAX_TASK_COUNT`].
    pub fn exceeds_limit(&self) -> bool {
        self.count > MAX_TASK_COUNT
    }
}

/// Result written atomically with a task's terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_ids: Option<Vec<String>>,
}

impl TaskResult {
    /// Successful run that produced `ids`.
    pub fn completed(message: impl Into<String>, ids: Vec<String>) -> Self {
        Self {
            message: message.into(),
            generated_count: Some(ids.len()),
            generated_ids: Some(ids),
        }
    }

    /// Failure with no partial output.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            generated_count: None,
            generated_ids: None,
        }
    }

    /// Failure after some entities were already written.
    pub fn failed_partial(message: impl Into<String>, ids: Vec<String>) -> Self {
        if ids.is_empty() {
            return Self::failed(message);
        }
        Self::completed(message, ids)
    }
}
