// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for generia-core.
//!
//! Every task store operation returns [`StoreError`]. Each variant carries a
//! stable machine-readable code so callers can log or branch on it.

use std::fmt;

/// Result type using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the task store.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum StoreError {
    /// Task was not found in the database.
    TaskNotFound {
        /// The task ID that was not found.
        task_id: String,
    },

    /// World was not found in the database.
    WorldNotFound {
        /// The world ID that was not found.
        world_id: String,
    },

    /// Task is in a state that does not allow the requested transition.
    InvalidTaskState {
        /// The task ID.
        task_id: String,
        /// The status the operation required.
        expected: String,
        /// The status the task actually had.
        actual: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed (connection loss, timeout, constraint).
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl StoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Self::WorldNotFound { .. } => "WORLD_NOT_FOUND",
            Self::InvalidTaskState { .. } => "INVALID_TASK_STATE",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether the error came from the storage layer itself rather than
    /// from the state of the data. The worker loop retries these.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseError { .. })
    }

    pub(crate) fn database(operation: &str, details: impl fmt::Display) -> Self {
        Self::DatabaseError {
            operation: operation.to_string(),
            details: details.to_string(),
        }
    }

    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskNotFound { task_id } => {
                write!(f, "Task '{}' not found", task_id)
            }
            Self::WorldNotFound { world_id } => {
                write!(f, "World '{}' not found", world_id)
            }
            Self::InvalidTaskState {
                task_id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Task '{}' is in invalid state: expected '{}', got '{}'",
                    task_id, expected, actual
                )
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::DatabaseError {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
