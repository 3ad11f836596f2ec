// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Capabilities and the hyperedges derived from them.
//!
//! A capability is a reusable unit distilled from a successful workflow. It
//! contains tools and, at higher hierarchy levels, other capabilities.

use chrono::{DateTime, Utc};
use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub embedding: Vec<f32>,
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub children: Vec<String>,
    pub success_rate: f64,
    #[serde(default)]
    pub hierarchy_level: u32,
    #[serde(default)]
    pub usage_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl Capability {
    pub fn new(id: impl Into<String>, embedding: Vec<f32>, tools_used: Vec<String>) -> Self {
        Self {
            id: id.into(),
            embedding,
            tools_used,
            children: Vec::new(),
            success_rate: 1.0,
            hierarchy_level: 0,
            usage_count: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_children(mut self, children: Vec<String>) -> Self {
        self.hierarchy_level = if children.is_empty() { 0 } else { 1 };
        self.children = children;
        self
    }

    /// Fold one execution outcome into the running success rate.
    pub fn record_usage(&mut self, success: bool) {
        let outcome = if success { 1.0 } else { 0.0 };
        self.usage_count += 1;
        self.success_rate += (outcome - self.success_rate) / self.usage_count as f64;
        self.success_rate = self.success_rate.clamp(0.0, 1.0);
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HyperedgeKind {
    CapToTool,
    CapToCap,
}

/// A capability and every node it contains, as an index set over the graph arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Hyperedge {
    pub capability_id: String,
    pub capability: NodeIndex,
    pub members: BTreeSet<NodeIndex>,
    pub member_ids: BTreeSet<String>,
    pub kind: HyperedgeKind,
}

impl Hyperedge {
    /// Number of member nodes; the capability itself is held in `capability`.
    pub fn order(&self) -> usize {
        self.members.len()
    }
}
