// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Workflow DAGs, run state, permissions, approvals and configuration.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types shared by the executor, suggester and gateways

pub mod approval;
pub mod config;
pub mod errors;
pub mod events;
pub mod permission;
pub mod tool;
pub mod workflow;
