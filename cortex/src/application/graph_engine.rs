// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # GraphRagEngine: Tool/Capability Graph Service
//!
//! Owns the in-memory [`GraphStore`] and keeps it in step with storage:
//!
//! - **Sync**: `sync_from_database` rebuilds the whole graph off-lock and
//!   swaps it in. A failed load leaves the previous graph in place.
//! - **Edges**: `add_edge` upserts one `(from, to, type)` edge and writes it
//!   through to the [`DbClient`]; the in-memory graph stays authoritative when
//!   the write-through fails.
//! - **Analytics**: PageRank and community detection over the current graph,
//!   reported through `get_metrics`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Graph synchronisation and edge learning

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::application::graph_algorithms::{
    community_count, detect_communities, pagerank, PageRankConfig,
};
use crate::domain::capability::Capability;
use crate::domain::errors::{CortexError, CortexResult};
use crate::domain::events::{CortexEvent, EventSink, GraphMetrics, MetricsRange, RankedNode};
use crate::domain::graph::{
    ConfidencePolicy, EdgeOptions, EdgeRecord, EdgeSource, EdgeType, GraphEdge, GraphNode,
    NodeKind,
};
use crate::infrastructure::capability_index::CapabilityIndex;
use crate::infrastructure::graph_store::{EdgeUpsert, GraphSnapshot, GraphStore};
use crate::infrastructure::hyperedge_cache::HyperedgeCache;
use crate::infrastructure::repository::DbClient;

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEngineConfig {
    pub pagerank: PageRankConfig,
    pub confidence_policy: ConfidencePolicy,
    /// Smoothing factor for transitions observed from executed runs.
    pub transition_alpha: f64,
    /// Number of nodes reported in `GraphMetrics::top_pagerank`.
    pub top_k: usize,
}

impl Default for GraphEngineConfig {
    fn default() -> Self {
        Self {
            pagerank: PageRankConfig::default(),
            confidence_policy: ConfidencePolicy::Replace,
            transition_alpha: 0.2,
            top_k: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub node_count: usize,
    pub edge_count: usize,
    pub hyperedge_count: usize,
    pub duration_ms: u64,
}

pub struct GraphRagEngine {
    store: Arc<GraphStore>,
    hyperedges: Arc<HyperedgeCache>,
    capabilities: Arc<CapabilityIndex>,
    db: Arc<dyn DbClient>,
    events: Arc<dyn EventSink>,
    config: GraphEngineConfig,
}

impl GraphRagEngine {
    pub fn new(db: Arc<dyn DbClient>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store: Arc::new(GraphStore::new()),
            hyperedges: Arc::new(HyperedgeCache::new()),
            capabilities: Arc::new(CapabilityIndex::new()),
            db,
            events,
            config: GraphEngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GraphEngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> Arc<GraphStore> {
        self.store.clone()
    }

    pub fn hyperedges(&self) -> Arc<HyperedgeCache> {
        self.hyperedges.clone()
    }

    pub fn capabilities(&self) -> Arc<CapabilityIndex> {
        self.capabilities.clone()
    }

    pub fn config(&self) -> &GraphEngineConfig {
        &self.config
    }

    /// Reload nodes, edges and capabilities from storage.
    ///
    /// Fails closed: any load error or invalid record keeps the current graph.
    pub async fn sync_from_database(&self) -> CortexResult<SyncReport> {
        let started = Instant::now();

        let loaded = async {
            let edges = self.db.load_edges().await?;
            let capabilities = self.db.load_capabilities().await?;
            Ok::<_, CortexError>((edges, capabilities))
        }
        .await;

        let (edges, capabilities) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(error = %e, "Graph sync failed, keeping previous graph");
                return Err(CortexError::GraphSync(e.to_string()));
            }
        };

        let mut nodes: Vec<GraphNode> = capabilities
            .iter()
            .map(|c| GraphNode::new(c.id.clone(), NodeKind::Capability))
            .collect();
        nodes.extend(
            capabilities
                .iter()
                .flat_map(|c| c.tools_used.iter())
                .map(|tool| GraphNode::new(tool.clone(), NodeKind::Tool)),
        );

        if let Err(e) = self.store.replace(GraphSnapshot { nodes, edges }) {
            error!(error = %e, "Graph sync rejected invalid records, keeping previous graph");
            return Err(CortexError::GraphSync(e.to_string()));
        }

        let hyperedge_count = self.hyperedges.rebuild(&self.store, &capabilities);
        self.capabilities.replace(capabilities).await;
        self.refresh_pagerank();

        let report = SyncReport {
            node_count: self.store.node_count(),
            edge_count: self.store.edge_count(),
            hyperedge_count,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            nodes = report.node_count,
            edges = report.edge_count,
            hyperedges = report.hyperedge_count,
            duration_ms = report.duration_ms,
            "Graph synced from database"
        );
        self.events.publish_cortex(CortexEvent::GraphSynced {
            node_count: report.node_count,
            edge_count: report.edge_count,
            hyperedge_count: report.hyperedge_count,
            duration_ms: report.duration_ms,
            timestamp: Utc::now(),
        });
        Ok(report)
    }

    /// Upsert an edge. Counts accumulate; the confidence follows the
    /// configured [`ConfidencePolicy`].
    pub async fn add_edge(
        &self,
        from: &str,
        to: &str,
        options: EdgeOptions,
    ) -> CortexResult<GraphEdge> {
        let policy = self.config.confidence_policy;
        let upsert = self
            .store
            .upsert_edge_with(from, to, options.edge_type, |existing| match existing {
                Some(old) => GraphEdge::new(
                    policy.combine(old.weight, options.weight),
                    old.observed_count + options.count,
                    options.edge_type,
                    options.source,
                ),
                None => GraphEdge::new(
                    options.weight,
                    options.count,
                    options.edge_type,
                    options.source,
                ),
            })?;
        Ok(self.commit(from, to, upsert).await)
    }

    /// Upsert with a caller-supplied combination rule, for pattern import.
    pub async fn upsert_edge_with<F>(
        &self,
        from: &str,
        to: &str,
        edge_type: EdgeType,
        update: F,
    ) -> CortexResult<GraphEdge>
    where
        F: FnOnce(Option<&GraphEdge>) -> Result<GraphEdge, String>,
    {
        let upsert = self.store.upsert_edge_with(from, to, edge_type, update)?;
        Ok(self.commit(from, to, upsert).await)
    }

    /// Fold one observed `from -> to` dependency into the edge confidence.
    ///
    /// The confidence moves toward 1.0 on success and 0.0 on failure by
    /// `transition_alpha`; a new edge starts from 0.5.
    pub async fn observe_transition(
        &self,
        from: &str,
        to: &str,
        success: bool,
    ) -> CortexResult<GraphEdge> {
        let alpha = self.config.transition_alpha.clamp(0.0, 1.0);
        let target = if success { 1.0 } else { 0.0 };
        self.upsert_edge_with(from, to, EdgeType::Dependency, |existing| {
            let (stored, count, source) = match existing {
                Some(old) => (old.weight, old.observed_count, old.source),
                None => (0.5, 0, EdgeSource::Observed),
            };
            let weight = (stored + alpha * (target - stored)).clamp(0.0, 1.0);
            GraphEdge::new(weight, count + 1, EdgeType::Dependency, source)
        })
        .await
    }

    async fn commit(&self, from: &str, to: &str, upsert: EdgeUpsert) -> GraphEdge {
        let edge = upsert.current().clone();
        let event = match &upsert {
            EdgeUpsert::Created(new) => {
                debug!(from, to, edge_type = %new.edge_type, weight = new.weight, "Edge created");
                CortexEvent::EdgeCreated {
                    from: from.to_string(),
                    to: to.to_string(),
                    edge_type: new.edge_type,
                    source: new.source,
                    confidence: new.weight,
                    timestamp: Utc::now(),
                }
            }
            EdgeUpsert::Updated { old, new } => {
                debug!(
                    from,
                    to,
                    edge_type = %new.edge_type,
                    old = old.weight,
                    new = new.weight,
                    "Edge updated"
                );
                CortexEvent::EdgeUpdated {
                    from: from.to_string(),
                    to: to.to_string(),
                    edge_type: new.edge_type,
                    old_confidence: old.weight,
                    new_confidence: new.weight,
                    observed_count: new.observed_count,
                    timestamp: Utc::now(),
                }
            }
        };
        self.events.publish_cortex(event);

        let record = EdgeRecord::new(from, to, edge.clone());
        if let Err(e) = self.db.save_edge(&record).await {
            warn!(from, to, error = %e, "Failed to persist edge, keeping in-memory value");
        }
        edge
    }

    /// Register or update a capability: persists it, adds `Contains` edges to
    /// its members and refreshes its hyperedge and vector entry.
    pub async fn register_capability(&self, capability: Capability) -> CortexResult<()> {
        self.store.mark_capability(&capability.id);
        for member in capability.tools_used.iter().chain(capability.children.iter()) {
            self.store
                .upsert_edge_with(&capability.id, member, EdgeType::Contains, |existing| {
                    match existing {
                        Some(old) => Ok(old.clone()),
                        None => GraphEdge::new(1.0, 1, EdgeType::Contains, EdgeSource::Template),
                    }
                })?;
        }
        self.hyperedges.upsert(&self.store, &capability);
        self.db.save_capability(&capability).await?;
        self.capabilities.upsert(capability).await;
        Ok(())
    }

    /// Fold an execution outcome into a capability's usage statistics.
    pub async fn record_capability_usage(&self, id: &str, success: bool) -> CortexResult<bool> {
        let Some(mut capability) = self.capabilities.get(id).await else {
            return Ok(false);
        };
        capability.record_usage(success);
        self.db.save_capability(&capability).await?;
        self.capabilities.upsert(capability).await;
        Ok(true)
    }

    /// Non-`Contains` out-edges of `node`, highest confidence first, ties by id.
    pub fn outgoing(&self, node: &str) -> Vec<(String, GraphEdge)> {
        let mut edges: Vec<(String, GraphEdge)> = self
            .store
            .outgoing(node)
            .into_iter()
            .filter(|(_, e)| e.edge_type != EdgeType::Contains)
            .collect();
        edges.sort_by(|a, b| {
            b.1.weight
                .partial_cmp(&a.1.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        edges
    }

    pub fn edge(&self, from: &str, to: &str, edge_type: EdgeType) -> Option<GraphEdge> {
        self.store.edge(from, to, edge_type)
    }

    pub fn edges(&self) -> Vec<EdgeRecord> {
        self.store.edge_records()
    }

    pub fn pagerank(&self) -> HashMap<String, f64> {
        let adjacency = self.store.adjacency();
        let ranks = pagerank(&adjacency, &self.config.pagerank);
        adjacency.ids.into_iter().zip(ranks).collect()
    }

    /// Community label per node id. Same graph, same partition.
    pub fn communities(&self) -> HashMap<String, usize> {
        let adjacency = self.store.adjacency();
        let labels = detect_communities(&adjacency);
        adjacency.ids.into_iter().zip(labels).collect()
    }

    fn refresh_pagerank(&self) -> HashMap<String, f64> {
        let ranks = self.pagerank();
        self.store.set_pagerank(&ranks);
        ranks
    }

    pub fn get_metrics(&self, range: MetricsRange) -> GraphMetrics {
        let ranks = self.refresh_pagerank();
        let adjacency = self.store.adjacency();
        let labels = detect_communities(&adjacency);

        let node_count = self.store.node_count();
        let edge_count = self.store.edge_count();
        let density = if node_count < 2 {
            0.0
        } else {
            edge_count as f64 / (node_count as f64 * (node_count as f64 - 1.0))
        };

        let mut top: Vec<RankedNode> = ranks
            .into_iter()
            .map(|(id, pagerank)| RankedNode { id, pagerank })
            .collect();
        top.sort_by(|a, b| {
            b.pagerank
                .partial_cmp(&a.pagerank)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        top.truncate(self.config.top_k);

        let metrics = GraphMetrics {
            node_count,
            edge_count,
            density,
            top_pagerank: top,
            community_count: community_count(&labels),
            range,
            computed_at: Utc::now(),
        };
        self.events.publish_cortex(CortexEvent::MetricsUpdated {
            metrics: metrics.clone(),
        });
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::NullEventSink;
    use crate::infrastructure::repository::InMemoryDbClient;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<CortexEvent>>,
    }

    impl EventSink for RecordingSink {
        fn publish_cortex(&self, event: CortexEvent) {
            self.events.lock().push(event);
        }
    }

    fn engine(db: Arc<InMemoryDbClient>) -> GraphRagEngine {
        GraphRagEngine::new(db, Arc::new(NullEventSink))
    }

    #[tokio::test]
    async fn test_add_edge_last_write_wins_and_counts_accumulate() {
        let engine = engine(Arc::new(InMemoryDbClient::new()));

        engine.add_edge("x", "y", EdgeOptions::new(0.6, 1)).await.unwrap();
        let edge = engine.add_edge("x", "y", EdgeOptions::new(0.8, 1)).await.unwrap();

        assert_eq!(edge.weight, 0.8);
        assert_eq!(edge.observed_count, 2);
    }

    #[tokio::test]
    async fn test_add_edge_ema_policy() {
        let engine = engine(Arc::new(InMemoryDbClient::new())).with_config(GraphEngineConfig {
            confidence_policy: ConfidencePolicy::ExponentialMovingAverage { alpha: 0.5 },
            ..Default::default()
        });

        engine.add_edge("x", "y", EdgeOptions::new(0.6, 1)).await.unwrap();
        let edge = engine.add_edge("x", "y", EdgeOptions::new(0.8, 1)).await.unwrap();
        assert!((edge.weight - 0.7).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_add_edge_rejects_invalid_weight() {
        let engine = engine(Arc::new(InMemoryDbClient::new()));
        let result = engine.add_edge("x", "y", EdgeOptions::new(1.5, 1)).await;
        assert!(matches!(result, Err(CortexError::InvalidEdge { .. })));
        assert_eq!(engine.store().edge_count(), 0);
    }

    #[tokio::test]
    async fn test_add_edge_emits_created_then_updated() {
        let sink = Arc::new(RecordingSink::default());
        let engine = GraphRagEngine::new(Arc::new(InMemoryDbClient::new()), sink.clone());

        engine.add_edge("a", "b", EdgeOptions::new(0.3, 1)).await.unwrap();
        engine.add_edge("a", "b", EdgeOptions::new(0.4, 1)).await.unwrap();

        let names: Vec<&str> = sink.events.lock().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["edge_created", "edge_updated"]);
    }

    #[tokio::test]
    async fn test_add_edge_survives_persistence_failure() {
        let db = Arc::new(InMemoryDbClient::new());
        db.set_failing(true);
        let engine = engine(db);

        let edge = engine.add_edge("a", "b", EdgeOptions::new(0.5, 1)).await.unwrap();
        assert_eq!(edge.weight, 0.5);
        assert_eq!(engine.edge("a", "b", EdgeType::Sequence), Some(edge));
    }

    #[tokio::test]
    async fn test_sync_loads_graph_and_hyperedges() {
        let db = Arc::new(InMemoryDbClient::new());
        db.save_edge(&EdgeRecord::new(
            "fs:read",
            "json:parse",
            GraphEdge::new(0.9, 3, EdgeType::Sequence, EdgeSource::Observed).unwrap(),
        ))
        .await
        .unwrap();
        db.save_capability(&Capability::new(
            "cap:load",
            vec![1.0, 0.0],
            vec!["fs:read".to_string(), "json:parse".to_string()],
        ))
        .await
        .unwrap();

        let sink = Arc::new(RecordingSink::default());
        let engine = GraphRagEngine::new(db, sink.clone());
        let report = engine.sync_from_database().await.unwrap();

        assert_eq!(report.node_count, 3);
        assert_eq!(report.edge_count, 1);
        assert_eq!(report.hyperedge_count, 1);
        assert_eq!(engine.hyperedges().members("cap:load").len(), 2);
        assert_eq!(engine.capabilities().len().await, 1);
        assert!(engine.store().node("json:parse").unwrap().pagerank > 0.0);
        assert_eq!(sink.events.lock().last().unwrap().name(), "graph_synced");

        // Idempotent.
        let again = engine.sync_from_database().await.unwrap();
        assert_eq!(again.node_count, report.node_count);
        assert_eq!(again.edge_count, report.edge_count);
    }

    #[tokio::test]
    async fn test_sync_failure_keeps_previous_graph() {
        let db = Arc::new(InMemoryDbClient::new());
        let engine = engine(db.clone());
        engine.add_edge("a", "b", EdgeOptions::new(0.5, 1)).await.unwrap();

        db.set_failing(true);
        let result = engine.sync_from_database().await;

        assert!(matches!(result, Err(CortexError::GraphSync(_))));
        assert_eq!(engine.store().edge_count(), 1);
        assert!(engine.store().contains_node("a"));
    }

    #[tokio::test]
    async fn test_observe_transition_smooths_toward_outcome() {
        let engine = engine(Arc::new(InMemoryDbClient::new()));

        let first = engine.observe_transition("a", "b", true).await.unwrap();
        assert!((first.weight - 0.6).abs() < 1e-12);
        let second = engine.observe_transition("a", "b", false).await.unwrap();
        assert!((second.weight - 0.48).abs() < 1e-12);
        assert_eq!(second.observed_count, 2);
    }

    #[tokio::test]
    async fn test_concurrent_transitions_lose_no_updates() {
        let engine = Arc::new(engine(Arc::new(InMemoryDbClient::new())));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine.observe_transition("a", "b", true).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let edge = engine.edge("a", "b", EdgeType::Dependency).unwrap();
        assert_eq!(edge.observed_count, 32);
    }

    #[tokio::test]
    async fn test_metrics_without_edges() {
        let engine = engine(Arc::new(InMemoryDbClient::new()));
        for id in ["a", "b", "c", "d"] {
            engine.store().ensure_node(id, NodeKind::Tool);
        }

        let metrics = engine.get_metrics(MetricsRange::Day);
        assert_eq!(metrics.node_count, 4);
        assert_eq!(metrics.density, 0.0);
        assert_eq!(metrics.community_count, 4);
        for ranked in &metrics.top_pagerank {
            assert!((ranked.pagerank - 0.25).abs() < 1e-12);
        }
        assert_eq!(metrics.top_pagerank[0].id, "a");
    }

    #[tokio::test]
    async fn test_outgoing_excludes_contains_and_orders_by_confidence() {
        let engine = engine(Arc::new(InMemoryDbClient::new()));
        engine.add_edge("a", "c", EdgeOptions::new(0.4, 1)).await.unwrap();
        engine.add_edge("a", "b", EdgeOptions::new(0.4, 1)).await.unwrap();
        engine.add_edge("a", "d", EdgeOptions::new(0.9, 1)).await.unwrap();
        engine
            .add_edge("a", "e", EdgeOptions::new(1.0, 1).with_type(EdgeType::Contains))
            .await
            .unwrap();

        let ids: Vec<String> = engine.outgoing("a").into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["d", "b", "c"]);
    }

    #[tokio::test]
    async fn test_register_capability_marks_node_kind() {
        let engine = engine(Arc::new(InMemoryDbClient::new()));
        engine
            .add_edge("cap:etl", "fs:read", EdgeOptions::new(0.5, 1))
            .await
            .unwrap();
        assert_eq!(engine.store().node("cap:etl").unwrap().kind, NodeKind::Tool);

        engine
            .register_capability(Capability::new(
                "cap:etl",
                vec![1.0],
                vec!["fs:read".to_string()],
            ))
            .await
            .unwrap();

        assert_eq!(engine.store().node("cap:etl").unwrap().kind, NodeKind::Capability);
        assert_eq!(engine.hyperedges().get("cap:etl").unwrap().order(), 1);
    }

    #[tokio::test]
    async fn test_record_capability_usage() {
        let db = Arc::new(InMemoryDbClient::new());
        let engine = engine(db.clone());
        engine
            .register_capability(Capability::new(
                "cap:etl",
                vec![1.0],
                vec!["fs:read".to_string()],
            ))
            .await
            .unwrap();

        assert!(engine.record_capability_usage("cap:etl", false).await.unwrap());
        assert!(!engine.record_capability_usage("cap:missing", true).await.unwrap());

        let stored = db.load_capabilities().await.unwrap();
        assert_eq!(stored[0].usage_count, 1);
        assert_eq!(stored[0].success_rate, 0.0);
        assert!(engine.edge("cap:etl", "fs:read", EdgeType::Contains).is_some());
    }
}
