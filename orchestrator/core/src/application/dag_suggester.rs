// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! DAG Suggester
//!
//! Ranks "what to run next" for a given intent and the tools already in
//! context. Three sources contribute candidates:
//!
//! 1. **Topology**: out-edges of the context nodes, scored by edge confidence
//! 2. **SHGAT**: learned relevance over the hypergraph neighbourhood
//! 3. **Vector**: capabilities whose embedding is close to the intent
//!
//! The candidate set is the union of all three minus the context itself.
//! Each candidate's score is the weighted mean of its component scores, so it
//! stays in [0, 1] and can be compared against the adaptive thresholds.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Next-step suggestion and learned-pattern portability

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use strata_cortex::application::{
    AdaptiveThresholdManager, GraphRagEngine, Shgat, SuggestionMode, SyncReport,
};
use strata_cortex::domain::capability::Capability;
use strata_cortex::domain::errors::{CortexError, CortexResult};
use strata_cortex::domain::graph::{EdgeOptions, EdgeSource, EdgeType, GraphEdge, NodeKind};
use strata_cortex::domain::pattern::{
    LearnedPattern, LearnedPatterns, MergeStrategy, LEARNED_PATTERNS_VERSION,
};
use strata_cortex::infrastructure::EmbeddingModel;

use crate::domain::config::SuggesterConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    /// Weighted mean of the component scores, in [0, 1].
    pub score: f64,
    pub topology_score: f64,
    pub shgat_score: f64,
    pub vector_score: f64,
    pub mode: SuggestionMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Components {
    topology: f64,
    shgat: f64,
    vector: f64,
}

pub struct DagSuggester {
    engine: Arc<GraphRagEngine>,
    shgat: Arc<Shgat>,
    embeddings: Arc<dyn EmbeddingModel>,
    thresholds: Arc<AdaptiveThresholdManager>,
    config: SuggesterConfig,
}

impl DagSuggester {
    pub fn new(
        engine: Arc<GraphRagEngine>,
        shgat: Arc<Shgat>,
        embeddings: Arc<dyn EmbeddingModel>,
        thresholds: Arc<AdaptiveThresholdManager>,
        config: SuggesterConfig,
    ) -> Self {
        Self {
            engine,
            shgat,
            embeddings,
            thresholds,
            config,
        }
    }

    pub fn thresholds(&self) -> Arc<AdaptiveThresholdManager> {
        self.thresholds.clone()
    }

    pub async fn encode_intent(&self, intent: &str) -> CortexResult<Vec<f32>> {
        self.embeddings.encode(intent).await
    }

    /// Top-`k` next steps, best first, ties broken by id.
    pub async fn suggest_next(
        &self,
        intent_embedding: &[f32],
        context_tools: &[String],
        k: usize,
    ) -> CortexResult<Vec<Suggestion>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let context: HashSet<&str> = context_tools.iter().map(String::as_str).collect();
        let mut candidates: BTreeMap<String, Components> = BTreeMap::new();

        for tool in context_tools {
            for (to, edge) in self.engine.outgoing(tool) {
                if context.contains(to.as_str()) {
                    continue;
                }
                let entry = candidates.entry(to).or_default();
                entry.topology = entry.topology.max(edge.weight);
            }
        }

        for (capability, similarity) in self
            .engine
            .capabilities()
            .search_similar(intent_embedding, self.config.vector_limit)
            .await
        {
            if context.contains(capability.id.as_str()) {
                continue;
            }
            let entry = candidates.entry(capability.id).or_default();
            entry.vector = entry.vector.max(similarity);
        }

        for id in self.shgat.node_ids() {
            if !context.contains(id.as_str()) {
                candidates.entry(id).or_default();
            }
        }

        let ids: Vec<String> = candidates.keys().cloned().collect();
        match self.shgat.score(intent_embedding, context_tools, &ids) {
            Ok(scored) => {
                for candidate in scored {
                    if let Some(entry) = candidates.get_mut(&candidate.id) {
                        entry.shgat = candidate.score;
                    }
                }
            }
            Err(e) => warn!(error = %e, "SHGAT scoring unavailable, ranking without it"),
        }

        let mut suggestions: Vec<Suggestion> = candidates
            .into_iter()
            .map(|(id, c)| {
                let score = self.combine(c);
                Suggestion {
                    id,
                    score,
                    topology_score: c.topology,
                    shgat_score: c.shgat,
                    vector_score: c.vector,
                    mode: self.thresholds.decide(score),
                }
            })
            .collect();
        suggestions.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        suggestions.truncate(k);

        debug!(
            context = context_tools.len(),
            returned = suggestions.len(),
            "Computed next-step suggestions"
        );
        Ok(suggestions)
    }

    fn combine(&self, c: Components) -> f64 {
        let cfg = &self.config;
        let total = cfg.topology_weight + cfg.shgat_weight + cfg.vector_weight;
        if total <= 0.0 {
            return 0.0;
        }
        let sum = cfg.topology_weight * c.topology
            + cfg.shgat_weight * c.shgat
            + cfg.vector_weight * c.vector;
        (sum / total).clamp(0.0, 1.0)
    }

    /// Record an agent's belief that `to` follows `from`.
    pub async fn register_agent_hint(
        &self,
        from: &str,
        to: &str,
        confidence: f64,
    ) -> CortexResult<GraphEdge> {
        self.engine
            .add_edge(
                from,
                to,
                EdgeOptions::new(confidence, 1)
                    .with_source(EdgeSource::Hint)
                    .with_type(EdgeType::Sequence),
            )
            .await
    }

    /// Embed a tool description and make the tool scoreable.
    pub async fn register_tool(&self, tool_id: &str, description: &str) -> CortexResult<()> {
        let embedding = self.embeddings.encode(description).await?;
        self.engine.store().ensure_node(tool_id, NodeKind::Tool);
        self.shgat.register_node(tool_id, &embedding)
    }

    pub async fn register_capability(&self, capability: Capability) -> CortexResult<()> {
        self.shgat.register_node(&capability.id, &capability.embedding)?;
        self.engine.register_capability(capability).await
    }

    /// Reload the graph from storage and give every loaded capability and
    /// tool member a SHGAT feature.
    ///
    /// Capabilities use their stored embedding. A tool without a feature is
    /// embedded from its id; features already registered are kept.
    pub async fn sync(&self) -> CortexResult<SyncReport> {
        let report = self.engine.sync_from_database().await?;

        let mut registered = 0usize;
        let mut tools: BTreeSet<String> = BTreeSet::new();
        for capability in self.engine.capabilities().all().await {
            match self.shgat.register_node(&capability.id, &capability.embedding) {
                Ok(()) => registered += 1,
                Err(e) => {
                    warn!(capability = %capability.id, error = %e, "Capability embedding not usable by SHGAT");
                }
            }
            tools.extend(capability.tools_used.iter().cloned());
        }
        for tool in tools.iter().filter(|id| !self.shgat.has_node(id)) {
            let embedding = self.embeddings.encode(tool).await?;
            self.shgat.register_node(tool, &embedding)?;
            registered += 1;
        }

        info!(
            nodes = report.node_count,
            features = registered,
            "Registered synced nodes with SHGAT"
        );
        Ok(report)
    }

    /// Every non-`Contains` edge.
    pub fn export_learned_patterns(&self) -> LearnedPatterns {
        let patterns = self
            .engine
            .edges()
            .into_iter()
            .filter(|r| r.edge.edge_type != EdgeType::Contains)
            .map(|r| LearnedPattern {
                from: r.from,
                to: r.to,
                weight: r.edge.weight,
                count: r.edge.observed_count,
                edge_type: r.edge.edge_type,
                source: r.edge.source,
            })
            .collect();
        LearnedPatterns::new(patterns)
    }

    /// Import patterns exported by another instance.
    ///
    /// With [`MergeStrategy::Merge`] an existing edge takes the average weight
    /// and the summed count; with [`MergeStrategy::Replace`] the incoming
    /// values overwrite it. Invalid patterns are skipped.
    pub async fn import_learned_patterns(
        &self,
        patterns: LearnedPatterns,
        strategy: MergeStrategy,
    ) -> CortexResult<ImportReport> {
        if patterns.version != LEARNED_PATTERNS_VERSION {
            return Err(CortexError::ParamsMismatch(format!(
                "learned patterns version {} is not supported (expected {})",
                patterns.version, LEARNED_PATTERNS_VERSION
            )));
        }

        let mut report = ImportReport::default();
        for pattern in patterns.patterns {
            if pattern.edge_type == EdgeType::Contains {
                report.skipped += 1;
                continue;
            }
            let mut existed = false;
            let result = self
                .engine
                .upsert_edge_with(&pattern.from, &pattern.to, pattern.edge_type, |existing| {
                    existed = existing.is_some();
                    match (existing, strategy) {
                        (Some(old), MergeStrategy::Merge) => GraphEdge::new(
                            (old.weight + pattern.weight) / 2.0,
                            old.observed_count + pattern.count,
                            pattern.edge_type,
                            EdgeSource::Merged,
                        ),
                        _ => GraphEdge::new(
                            pattern.weight,
                            pattern.count,
                            pattern.edge_type,
                            EdgeSource::Imported,
                        ),
                    }
                })
                .await;
            match result {
                Ok(_) if existed => report.updated += 1,
                Ok(_) => report.created += 1,
                Err(e) => {
                    warn!(from = %pattern.from, to = %pattern.to, error = %e, "Skipping invalid pattern");
                    report.skipped += 1;
                }
            }
        }

        info!(
            strategy = ?strategy,
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            "Imported learned patterns"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_cortex::application::{ShgatConfig, TrainingCoordinator};
    use strata_cortex::domain::events::NullEventSink;
    use strata_cortex::infrastructure::{DbClient, HashEmbeddingModel, InMemoryDbClient};

    const D: usize = 16;

    fn suggester() -> DagSuggester {
        suggester_over(Arc::new(InMemoryDbClient::new()))
    }

    fn suggester_over(db: Arc<InMemoryDbClient>) -> DagSuggester {
        let engine = Arc::new(GraphRagEngine::new(db, Arc::new(NullEventSink)));
        let shgat = Arc::new(Shgat::new(
            ShgatConfig {
                embedding_dim: D,
                hidden_dim: 4,
                num_heads: 2,
                ..Default::default()
            },
            engine.store(),
            engine.hyperedges(),
            Arc::new(TrainingCoordinator::new()),
        ));
        DagSuggester::new(
            engine,
            shgat,
            Arc::new(HashEmbeddingModel::new(D)),
            Arc::new(AdaptiveThresholdManager::default()),
            SuggesterConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_topology_candidates_rank_by_confidence() {
        let s = suggester();
        s.register_agent_hint("fs:read", "json:parse", 0.9).await.unwrap();
        s.register_agent_hint("fs:read", "csv:parse", 0.3).await.unwrap();

        let intent = s.encode_intent("load settings").await.unwrap();
        let suggestions = s
            .suggest_next(&intent, &["fs:read".to_string()], 5)
            .await
            .unwrap();

        let ids: Vec<&str> = suggestions.iter().map(|x| x.id.as_str()).collect();
        assert_eq!(ids, vec!["json:parse", "csv:parse"]);
        assert_eq!(suggestions[0].topology_score, 0.9);
        assert!(suggestions.iter().all(|x| (0.0..=1.0).contains(&x.score)));
    }

    #[tokio::test]
    async fn test_context_is_excluded_and_k_respected() {
        let s = suggester();
        s.register_tool("fs:read", "read a file from disk").await.unwrap();
        s.register_tool("fs:write", "write a file to disk").await.unwrap();
        s.register_tool("http:get", "fetch a url").await.unwrap();
        s.register_agent_hint("fs:read", "fs:write", 0.8).await.unwrap();

        let intent = s.encode_intent("copy a file").await.unwrap();
        let suggestions = s
            .suggest_next(&intent, &["fs:read".to_string()], 1)
            .await
            .unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_ne!(suggestions[0].id, "fs:read");

        let all = s
            .suggest_next(&intent, &["fs:read".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|x| x.id != "fs:read"));
    }

    #[tokio::test]
    async fn test_vector_candidates_come_from_capabilities() {
        let s = suggester();
        let embedding = s.encode_intent("send weekly report").await.unwrap();
        s.register_capability(Capability::new(
            "cap:report",
            embedding.clone(),
            vec!["mail:send".to_string()],
        ))
        .await
        .unwrap();

        let suggestions = s.suggest_next(&embedding, &[], 5).await.unwrap();
        let report = suggestions.iter().find(|x| x.id == "cap:report").unwrap();
        assert!(report.vector_score > 0.99);
    }

    #[tokio::test]
    async fn test_sync_makes_stored_capabilities_scoreable() {
        let db = Arc::new(InMemoryDbClient::new());
        let mut embedding = vec![0.0; D];
        embedding[0] = 1.0;
        db.save_capability(&Capability::new(
            "cap:load",
            embedding.clone(),
            vec!["fs:read".to_string(), "json:parse".to_string()],
        ))
        .await
        .unwrap();
        db.save_capability(&Capability::new(
            "cap:broken",
            vec![1.0, 0.0],
            vec!["fs:read".to_string()],
        ))
        .await
        .unwrap();

        let s = suggester_over(db);
        assert!(!s.shgat.has_node("cap:load"));

        let report = s.sync().await.unwrap();
        assert_eq!(report.hyperedge_count, 2);
        assert!(s.shgat.has_node("cap:load"));
        assert!(s.shgat.has_node("fs:read"));
        assert!(s.shgat.has_node("json:parse"));
        assert!(!s.shgat.has_node("cap:broken"));
        assert_eq!(s.shgat.node_ids(), vec!["cap:load", "fs:read", "json:parse"]);

        let suggestions = s.suggest_next(&embedding, &[], 5).await.unwrap();
        let load = suggestions.iter().find(|x| x.id == "cap:load").unwrap();
        assert!(load.vector_score > 0.99);
    }

    #[tokio::test]
    async fn test_ranking_is_deterministic() {
        let s = suggester();
        for tool in ["b:tool", "a:tool", "c:tool"] {
            s.register_agent_hint("start", tool, 0.5).await.unwrap();
        }
        let intent = vec![0.0; D];
        let first = s.suggest_next(&intent, &["start".to_string()], 3).await.unwrap();
        let second = s.suggest_next(&intent, &["start".to_string()], 3).await.unwrap();
        assert_eq!(first, second);
        let ids: Vec<&str> = first.iter().map(|x| x.id.as_str()).collect();
        assert_eq!(ids, vec!["a:tool", "b:tool", "c:tool"]);
    }

    #[tokio::test]
    async fn test_merge_import_averages_weight_and_sums_count() {
        let s = suggester();
        s.engine
            .add_edge("x", "y", EdgeOptions::new(0.4, 2))
            .await
            .unwrap();

        let incoming = LearnedPatterns::new(vec![LearnedPattern {
            from: "x".to_string(),
            to: "y".to_string(),
            weight: 0.8,
            count: 3,
            edge_type: EdgeType::Sequence,
            source: EdgeSource::Observed,
        }]);
        let report = s
            .import_learned_patterns(incoming, MergeStrategy::Merge)
            .await
            .unwrap();
        assert_eq!(report.updated, 1);

        let edge = s.engine.edge("x", "y", EdgeType::Sequence).unwrap();
        assert!((edge.weight - 0.6).abs() < 1e-12);
        assert_eq!(edge.observed_count, 5);
        assert_eq!(edge.source, EdgeSource::Merged);
    }

    #[tokio::test]
    async fn test_replace_import_overwrites_and_inserts() {
        let s = suggester();
        s.engine
            .add_edge("x", "y", EdgeOptions::new(0.4, 2))
            .await
            .unwrap();

        let incoming = LearnedPatterns::new(vec![
            LearnedPattern {
                from: "x".to_string(),
                to: "y".to_string(),
                weight: 0.8,
                count: 3,
                edge_type: EdgeType::Sequence,
                source: EdgeSource::Observed,
            },
            LearnedPattern {
                from: "y".to_string(),
                to: "z".to_string(),
                weight: 0.1,
                count: 1,
                edge_type: EdgeType::Dependency,
                source: EdgeSource::Observed,
            },
            LearnedPattern {
                from: "bad".to_string(),
                to: "weight".to_string(),
                weight: 1.5,
                count: 1,
                edge_type: EdgeType::Sequence,
                source: EdgeSource::Observed,
            },
        ]);
        let report = s
            .import_learned_patterns(incoming, MergeStrategy::Replace)
            .await
            .unwrap();
        assert_eq!(
            report,
            ImportReport {
                created: 1,
                updated: 1,
                skipped: 1
            }
        );

        let edge = s.engine.edge("x", "y", EdgeType::Sequence).unwrap();
        assert_eq!(edge.weight, 0.8);
        assert_eq!(edge.observed_count, 3);
        let inserted = s.engine.edge("y", "z", EdgeType::Dependency).unwrap();
        assert_eq!(inserted.source, EdgeSource::Imported);
    }

    #[tokio::test]
    async fn test_export_skips_contains_edges() {
        let s = suggester();
        s.register_capability(Capability::new(
            "cap:etl",
            vec![0.0; D],
            vec!["fs:read".to_string()],
        ))
        .await
        .unwrap();
        s.register_agent_hint("fs:read", "json:parse", 0.7).await.unwrap();

        let exported = s.export_learned_patterns();
        assert_eq!(exported.version, LEARNED_PATTERNS_VERSION);
        assert_eq!(exported.patterns.len(), 1);
        assert_eq!(exported.patterns[0].source, EdgeSource::Hint);
    }

    #[tokio::test]
    async fn test_unsupported_pattern_version() {
        let s = suggester();
        let mut patterns = LearnedPatterns::new(vec![]);
        patterns.version = LEARNED_PATTERNS_VERSION + 1;
        let result = s.import_learned_patterns(patterns, MergeStrategy::Merge).await;
        assert!(matches!(result, Err(CortexError::ParamsMismatch(_))));
    }
}
