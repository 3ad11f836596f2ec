// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Contract for the sandboxed runtime that actually runs tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::permission::PermissionSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: serde_json::Value,
    /// Permissions granted to the capability for this attempt.
    pub permissions: PermissionSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("{0}")]
    Execution(String),
}

/// The executor never assumes success: every `Err` becomes a task error.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, invocation: &ToolInvocation) -> Result<serde_json::Value, ToolError>;
}
