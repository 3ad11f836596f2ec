// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Strata Orchestrator Core
//!
//! Runs tool workflows as layered DAGs and keeps the recommendation graph
//! in `strata-cortex` learning from every run.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **domain:** workflow DAG, run state, permissions, approvals, events, config
//! - **application:** [`ControlledExecutor`](application::ControlledExecutor) and
//!   [`DagSuggester`](application::DagSuggester)
//! - **infrastructure:** event bus, approval gateway, capability registry, tracing

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
