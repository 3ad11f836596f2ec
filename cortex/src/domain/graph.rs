// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tool/capability graph entities for the Cortex.
//!
//! Edge attributes are a closed structure validated at construction time;
//! there is no free-form property bag.

use serde::{Deserialize, Serialize};

use super::errors::CortexError;

/// Kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Tool,
    Capability,
}

/// Node in the tool/capability graph. Identity is the tool or capability id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    /// PageRank centrality in [0, 1], refreshed after every sync.
    pub pagerank: f64,
    pub degree: usize,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            pagerank: 0.0,
            degree: 0,
        }
    }
}

/// Relationship carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Capability contains a tool or a child capability.
    Contains,
    /// `to` was executed after `from`.
    Sequence,
    /// `to` consumed the output of `from`.
    Dependency,
}

impl Default for EdgeType {
    fn default() -> Self {
        Self::Sequence
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeType::Contains => write!(f, "contains"),
            EdgeType::Sequence => write!(f, "sequence"),
            EdgeType::Dependency => write!(f, "dependency"),
        }
    }
}

/// Where an edge's evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSource {
    Observed,
    Inferred,
    Template,
    Hint,
    Merged,
    Imported,
}

impl Default for EdgeSource {
    fn default() -> Self {
        Self::Observed
    }
}

/// Attributes of a directed edge.
///
/// `weight` is a confidence estimate in [0, 1]. It is not a probability mass:
/// the weights of a node's out-edges need not sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub weight: f64,
    pub observed_count: u64,
    pub edge_type: EdgeType,
    pub source: EdgeSource,
}

impl GraphEdge {
    pub fn new(
        weight: f64,
        observed_count: u64,
        edge_type: EdgeType,
        source: EdgeSource,
    ) -> Result<Self, String> {
        validate_confidence(weight)?;
        Ok(Self {
            weight,
            observed_count,
            edge_type,
            source,
        })
    }
}

pub(crate) fn validate_confidence(weight: f64) -> Result<(), String> {
    if !weight.is_finite() {
        return Err(format!("confidence must be finite, got {}", weight));
    }
    if !(0.0..=1.0).contains(&weight) {
        return Err(format!("confidence must be within [0, 1], got {}", weight));
    }
    Ok(())
}

/// Persisted form of an edge as exchanged with the [`crate::infrastructure::DbClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: String,
    pub to: String,
    #[serde(flatten)]
    pub edge: GraphEdge,
}

impl EdgeRecord {
    pub fn new(from: impl Into<String>, to: impl Into<String>, edge: GraphEdge) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            edge,
        }
    }

    /// Re-validate a record read from storage.
    pub fn validate(&self) -> Result<(), CortexError> {
        if self.from.is_empty() || self.to.is_empty() {
            return Err(CortexError::InvalidEdge {
                from: self.from.clone(),
                to: self.to.clone(),
                reason: "endpoint id cannot be empty".to_string(),
            });
        }
        validate_confidence(self.edge.weight).map_err(|reason| CortexError::InvalidEdge {
            from: self.from.clone(),
            to: self.to.clone(),
            reason,
        })
    }
}

/// Options for [`crate::application::GraphRagEngine::add_edge`].
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeOptions {
    pub weight: f64,
    pub count: u64,
    pub source: EdgeSource,
    pub edge_type: EdgeType,
}

impl EdgeOptions {
    pub fn new(weight: f64, count: u64) -> Self {
        Self {
            weight,
            count,
            source: EdgeSource::Observed,
            edge_type: EdgeType::Sequence,
        }
    }

    pub fn with_source(mut self, source: EdgeSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_type(mut self, edge_type: EdgeType) -> Self {
        self.edge_type = edge_type;
        self
    }
}

/// How a new confidence observation combines with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ConfidencePolicy {
    /// The incoming weight replaces the stored weight.
    Replace,
    /// `stored * (1 - alpha) + incoming * alpha`.
    ExponentialMovingAverage { alpha: f64 },
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self::Replace
    }
}

impl ConfidencePolicy {
    pub fn combine(&self, stored: f64, incoming: f64) -> f64 {
        match self {
            ConfidencePolicy::Replace => incoming,
            ConfidencePolicy::ExponentialMovingAverage { alpha } => {
                let alpha = alpha.clamp(0.0, 1.0);
                (stored * (1.0 - alpha) + incoming * alpha).clamp(0.0, 1.0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_rejects_out_of_range_weight() {
        assert!(GraphEdge::new(1.2, 1, EdgeType::Sequence, EdgeSource::Observed).is_err());
        assert!(GraphEdge::new(-0.1, 1, EdgeType::Sequence, EdgeSource::Observed).is_err());
        assert!(GraphEdge::new(f64::NAN, 1, EdgeType::Sequence, EdgeSource::Observed).is_err());
        assert!(GraphEdge::new(0.0, 0, EdgeType::Contains, EdgeSource::Template).is_ok());
        assert!(GraphEdge::new(1.0, 3, EdgeType::Dependency, EdgeSource::Hint).is_ok());
    }

    #[test]
    fn test_confidence_policy() {
        assert_eq!(ConfidencePolicy::Replace.combine(0.6, 0.8), 0.8);

        let ema = ConfidencePolicy::ExponentialMovingAverage { alpha: 0.5 };
        assert!((ema.combine(0.6, 0.8) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_edge_record_serde_shape() {
        let record = EdgeRecord::new(
            "fs:read",
            "json:parse",
            GraphEdge::new(0.7, 4, EdgeType::Sequence, EdgeSource::Observed).unwrap(),
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["from"], "fs:read");
        assert_eq!(value["edge_type"], "sequence");
        assert_eq!(value["source"], "observed");

        let parsed: EdgeRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_edge_record_validate() {
        let mut record = EdgeRecord::new(
            "a",
            "b",
            GraphEdge::new(0.5, 1, EdgeType::Sequence, EdgeSource::Observed).unwrap(),
        );
        assert!(record.validate().is_ok());

        record.edge.weight = 3.0;
        assert!(matches!(record.validate(), Err(CortexError::InvalidEdge { .. })));
    }
}
