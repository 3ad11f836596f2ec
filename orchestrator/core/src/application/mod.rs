// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod controlled_executor;
pub mod dag_suggester;

// Re-export use cases for convenience
pub use controlled_executor::{ControlledExecutor, RunHandle, RunReport};
pub use dag_suggester::{DagSuggester, ImportReport, Suggestion};
