// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Error taxonomy for the Cortex bounded context.
//!
//! Graph synchronisation failures and training-lock conflicts are reported
//! here but are never fatal to a running workflow: callers log them and carry
//! on with the last valid state.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CortexError {
    /// Reloading the graph from storage failed; the previous graph is retained.
    #[error("Graph sync failed: {0}")]
    GraphSync(String),

    #[error("Invalid edge {from} -> {to}: {reason}")]
    InvalidEdge {
        from: String,
        to: String,
        reason: String,
    },

    /// The training lock is held by another owner. The update is deferred.
    #[error("Training lock held by '{holder}', requested by '{requested_by}'")]
    TrainingConflict {
        holder: String,
        requested_by: String,
    },

    #[error("Model parameters do not match model structure: {0}")]
    ParamsMismatch(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Storage error: {0}")]
    Db(#[from] DbError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by a [`crate::infrastructure::DbClient`] implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

pub type CortexResult<T> = std::result::Result<T, CortexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CortexError::TrainingConflict {
            holder: "batch-retrain".to_string(),
            requested_by: "execution:42".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Training lock held by 'batch-retrain', requested by 'execution:42'"
        );

        let err: CortexError = DbError::Database("connection reset".to_string()).into();
        assert_eq!(err.to_string(), "Storage error: Database error: connection reset");
    }
}
