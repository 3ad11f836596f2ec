// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Portable learned patterns: the observed edge set, exported for bootstrap
//! of other instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::graph::{EdgeSource, EdgeType};

pub const LEARNED_PATTERNS_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub from: String,
    pub to: String,
    pub weight: f64,
    pub count: u64,
    #[serde(default)]
    pub edge_type: EdgeType,
    #[serde(default)]
    pub source: EdgeSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPatterns {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub patterns: Vec<LearnedPattern>,
}

impl LearnedPatterns {
    pub fn new(patterns: Vec<LearnedPattern>) -> Self {
        Self {
            version: LEARNED_PATTERNS_VERSION,
            exported_at: Utc::now(),
            patterns,
        }
    }
}

/// How imported patterns combine with edges that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Average the weights and sum the counts.
    Merge,
    /// Incoming weight and count overwrite the existing edge.
    Replace,
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "merge" => Ok(Self::Merge),
            "replace" => Ok(Self::Replace),
            other => Err(format!("unknown merge strategy: {}", other)),
        }
    }
}
