// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure
//!
//! Event bus, approval gateway, capability registry and tracing setup.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer

pub mod approval_gateway;
pub mod capability_registry;
pub mod event_bus;
pub mod telemetry;
