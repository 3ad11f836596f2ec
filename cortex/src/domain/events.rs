// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events for the Cortex bounded context.
//!
//! The Cortex publishes through [`EventSink`]; the orchestrator's event bus
//! implements it, so graph events and workflow events share one dispatch path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::graph::{EdgeSource, EdgeType};

/// Advisory time window attached to metric emissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsRange {
    Hour,
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedNode {
    pub id: String,
    pub pagerank: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    pub density: f64,
    pub top_pagerank: Vec<RankedNode>,
    pub community_count: usize,
    pub range: MetricsRange,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CortexEvent {
    /// The in-memory graph was rebuilt from storage.
    GraphSynced {
        node_count: usize,
        edge_count: usize,
        hyperedge_count: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    EdgeCreated {
        from: String,
        to: String,
        edge_type: EdgeType,
        source: EdgeSource,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    EdgeUpdated {
        from: String,
        to: String,
        edge_type: EdgeType,
        old_confidence: f64,
        new_confidence: f64,
        observed_count: u64,
        timestamp: DateTime<Utc>,
    },

    MetricsUpdated {
        metrics: GraphMetrics,
    },

    /// A training pass finished and SHGAT weights changed.
    ModelTrained {
        owner: String,
        examples: usize,
        mean_loss: f64,
        timestamp: DateTime<Utc>,
    },
}

impl CortexEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CortexEvent::GraphSynced { .. } => "graph_synced",
            CortexEvent::EdgeCreated { .. } => "edge_created",
            CortexEvent::EdgeUpdated { .. } => "edge_updated",
            CortexEvent::MetricsUpdated { .. } => "metrics_updated",
            CortexEvent::ModelTrained { .. } => "model_trained",
        }
    }
}

/// Publisher seam used by Cortex services.
pub trait EventSink: Send + Sync {
    fn publish_cortex(&self, event: CortexEvent);
}

/// Sink that drops every event. Used when no subscriber is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn publish_cortex(&self, _event: CortexEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_snake_case_tag() {
        let event = CortexEvent::EdgeCreated {
            from: "a".to_string(),
            to: "b".to_string(),
            edge_type: EdgeType::Sequence,
            source: EdgeSource::Hint,
            confidence: 0.5,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "edge_created");
        assert_eq!(event.name(), "edge_created");
    }
}
