// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cortex Domain Layer
//!
//! Pure domain types for the graph learning loop. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`graph`] | `GraphNode`, `GraphEdge`, `EdgeRecord`, `ConfidencePolicy` |
//! | [`capability`] | `Capability`, `Hyperedge` |
//! | [`training`] | `TrainingExample`, `ExecutionTrace` |
//! | [`pattern`] | `LearnedPatterns`, `MergeStrategy` |
//! | [`events`] | `CortexEvent`, `EventSink` |
//! | [`errors`] | `CortexError`, `DbError` |

pub mod capability;
pub mod errors;
pub mod events;
pub mod graph;
pub mod pattern;
pub mod training;

pub use capability::*;
pub use errors::*;
pub use events::*;
pub use graph::*;
pub use pattern::*;
pub use training::*;
