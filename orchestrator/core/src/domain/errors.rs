// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Task- and executor-level error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::workflow::{DagError, RunId, TaskId};

/// Why a task ended in `Error` or `Skipped`. Stored in the run trace.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    #[error("task exceeded its {timeout_ms}ms deadline")]
    Timeout { timeout_ms: u64 },

    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("tool execution failed: {message}")]
    ToolExecution { message: String },

    /// Synthetic: a dependency did not succeed, so the task never ran.
    #[error("dependency {dependency} did not succeed")]
    DependencyFailed { dependency: TaskId },

    #[error("run was cancelled")]
    Cancelled,
}

impl TaskError {
    /// Stable reason code for dashboards and traces.
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "TIMEOUT",
            TaskError::PermissionDenied { .. } => "PERMISSION_DENIED",
            TaskError::ToolExecution { .. } => "TOOL_EXECUTION_ERROR",
            TaskError::DependencyFailed { .. } => "DEPENDENCY_FAILED",
            TaskError::Cancelled => "CANCELLED",
        }
    }

    /// Whether the retry policy may attempt the task again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Timeout { .. } | TaskError::ToolExecution { .. })
    }
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("invalid workflow: {0}")]
    InvalidDag(#[from] DagError),

    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("run task failed to join: {0}")]
    Join(String),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_serializes_with_kind_tag() {
        let error = TaskError::Timeout { timeout_ms: 250 };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["timeout_ms"], 250);
        assert_eq!(error.code(), "TIMEOUT");

        let back: TaskError = serde_json::from_value(json).unwrap();
        assert_eq!(back, error);
    }

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(TaskError::Timeout { timeout_ms: 1 }.is_retryable());
        assert!(TaskError::ToolExecution { message: "boom".into() }.is_retryable());
        assert!(!TaskError::PermissionDenied { message: "no".into() }.is_retryable());
        assert!(!TaskError::Cancelled.is_retryable());
    }
}
