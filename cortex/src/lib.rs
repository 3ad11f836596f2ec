// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Strata Cortex
//!
//! Adaptive graph recommendation: the tool/capability graph, the hypergraph
//! attention scorer and the training loop that feeds both from executed runs.
//!
//! # Architecture
//!
//! - **Layer:** Learning & Memory Layer
//! - **Purpose:** Learn which tool to run next from past executions

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::*;
pub use domain::*;
pub use infrastructure::*;
