// Copyright (C) 2025 The Generia Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for generia-worker.

use thiserror::Error;

/// Worker errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Task store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] generia_core::StoreError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// World was not found.
    #[error("World not found: {0}")]
    WorldNotFound(String),
}

/// Result type using worker Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use generia_core::StoreError;

    #[test]
    fn test_store_errors_convert() {
        let err: Error = StoreError::WorldNotFound {
            world_id: "w1".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Store(StoreError::WorldNotFound { .. })));
        assert!(err.to_string().starts_with("Store error: "));
    }

    #[test]
    fn test_request_errors_display() {
        assert_eq!(
            Error::InvalidRequest("name is required".to_string()).to_string(),
            "Invalid request: name is required"
        );
        assert_eq!(
            Error::WorldNotFound("w1".to_string()).to_string(),
            "World not found: w1"
        );
    }
}
