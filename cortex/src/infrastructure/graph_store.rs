// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory tool/capability graph.
//!
//! Nodes and edges live in a `StableDiGraph` arena addressed by stable
//! `NodeIndex` keys, with an id -> index map on the side. Every mutation
//! happens under the write half of a single lock, so a reader sees either the
//! state before a write or after it, never a partially written edge.

use parking_lot::RwLock;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};

use crate::domain::errors::CortexError;
use crate::domain::graph::{EdgeRecord, EdgeType, GraphEdge, GraphNode, NodeKind};

/// Outcome of an edge upsert.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeUpsert {
    Created(GraphEdge),
    Updated { old: GraphEdge, new: GraphEdge },
}

impl EdgeUpsert {
    pub fn current(&self) -> &GraphEdge {
        match self {
            EdgeUpsert::Created(edge) => edge,
            EdgeUpsert::Updated { new, .. } => new,
        }
    }
}

/// Complete graph content, built off-lock and swapped in wholesale.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<EdgeRecord>,
}

/// Dense, id-sorted view of the topology for graph algorithms.
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    pub ids: Vec<String>,
    /// `out[i]` holds `(target position, confidence)`, one entry per distinct target.
    pub out: Vec<Vec<(usize, f64)>>,
}

impl Adjacency {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.out.iter().map(Vec::len).sum()
    }
}

#[derive(Default)]
struct GraphInner {
    graph: StableDiGraph<GraphNode, GraphEdge>,
    index: HashMap<String, NodeIndex>,
    generation: u64,
}

impl GraphInner {
    fn ensure_node(&mut self, id: &str, kind: NodeKind) -> NodeIndex {
        if let Some(&index) = self.index.get(id) {
            return index;
        }
        let index = self.graph.add_node(GraphNode::new(id, kind));
        self.index.insert(id.to_string(), index);
        index
    }

    fn find_edge(
        &self,
        from: NodeIndex,
        to: NodeIndex,
        edge_type: EdgeType,
    ) -> Option<petgraph::stable_graph::EdgeIndex> {
        self.graph
            .edges_directed(from, Direction::Outgoing)
            .find(|e| e.target() == to && e.weight().edge_type == edge_type)
            .map(|e| e.id())
    }

    fn bump_degree(&mut self, index: NodeIndex) {
        if let Some(node) = self.graph.node_weight_mut(index) {
            node.degree += 1;
        }
    }
}

pub struct GraphStore {
    inner: RwLock<GraphInner>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner::default()),
        }
    }

    /// Insert a node if absent. An existing node keeps its kind.
    pub fn ensure_node(&self, id: &str, kind: NodeKind) -> NodeIndex {
        self.inner.write().ensure_node(id, kind)
    }

    /// Atomic read-modify-write of the `(from, to, edge_type)` edge.
    ///
    /// `update` receives the stored edge (if any) and returns the edge to
    /// store. Missing endpoints are created; the source of a `Contains` edge is
    /// created as a capability, everything else as a tool.
    pub fn upsert_edge_with<F>(
        &self,
        from: &str,
        to: &str,
        edge_type: EdgeType,
        update: F,
    ) -> Result<EdgeUpsert, CortexError>
    where
        F: FnOnce(Option<&GraphEdge>) -> Result<GraphEdge, String>,
    {
        let invalid = |reason: String| CortexError::InvalidEdge {
            from: from.to_string(),
            to: to.to_string(),
            reason,
        };
        if from.is_empty() || to.is_empty() {
            return Err(invalid("endpoint id cannot be empty".to_string()));
        }

        let mut inner = self.inner.write();
        let from_kind = if edge_type == EdgeType::Contains {
            NodeKind::Capability
        } else {
            NodeKind::Tool
        };

        if let (Some(a), Some(b)) = (inner.index.get(from).copied(), inner.index.get(to).copied()) {
            if let Some(edge_index) = inner.find_edge(a, b, edge_type) {
                let old = inner.graph[edge_index].clone();
                let mut new = update(Some(&old)).map_err(invalid)?;
                new.edge_type = edge_type;
                crate::domain::graph::validate_confidence(new.weight).map_err(invalid)?;
                inner.graph[edge_index] = new.clone();
                return Ok(EdgeUpsert::Updated { old, new });
            }
        }

        let mut new = update(None).map_err(invalid)?;
        new.edge_type = edge_type;
        crate::domain::graph::validate_confidence(new.weight).map_err(invalid)?;
        let a = inner.ensure_node(from, from_kind);
        let b = inner.ensure_node(to, NodeKind::Tool);
        inner.graph.add_edge(a, b, new.clone());
        inner.bump_degree(a);
        inner.bump_degree(b);
        Ok(EdgeUpsert::Created(new))
    }

    pub fn edge(&self, from: &str, to: &str, edge_type: EdgeType) -> Option<GraphEdge> {
        let inner = self.inner.read();
        let a = *inner.index.get(from)?;
        let b = *inner.index.get(to)?;
        inner
            .find_edge(a, b, edge_type)
            .map(|e| inner.graph[e].clone())
    }

    pub fn node(&self, id: &str) -> Option<GraphNode> {
        let inner = self.inner.read();
        inner
            .index
            .get(id)
            .and_then(|&index| inner.graph.node_weight(index))
            .cloned()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.inner.read().index.contains_key(id)
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.inner.read().index.get(id).copied()
    }

    pub fn id_of(&self, index: NodeIndex) -> Option<String> {
        self.inner
            .read()
            .graph
            .node_weight(index)
            .map(|node| node.id.clone())
    }

    /// Out-edges of `id`, every edge type included.
    pub fn outgoing(&self, id: &str) -> Vec<(String, GraphEdge)> {
        self.directed(id, Direction::Outgoing)
    }

    pub fn incoming(&self, id: &str) -> Vec<(String, GraphEdge)> {
        self.directed(id, Direction::Incoming)
    }

    fn directed(&self, id: &str, direction: Direction) -> Vec<(String, GraphEdge)> {
        let inner = self.inner.read();
        let Some(&index) = inner.index.get(id) else {
            return Vec::new();
        };
        let mut edges: Vec<(String, GraphEdge)> = inner
            .graph
            .edges_directed(index, direction)
            .filter_map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                inner
                    .graph
                    .node_weight(other)
                    .map(|node| (node.id.clone(), e.weight().clone()))
            })
            .collect();
        edges.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.edge_type.cmp(&b.1.edge_type)));
        edges
    }

    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().index.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<String> {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner
            .graph
            .node_weights()
            .filter(|node| node.kind == kind)
            .map(|node| node.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().graph.edge_count()
    }

    /// Incremented on every wholesale replace; derived indexes compare against it.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Every edge as a persistable record, sorted by endpoints.
    pub fn edge_records(&self) -> Vec<EdgeRecord> {
        let inner = self.inner.read();
        let mut records: Vec<EdgeRecord> = inner
            .graph
            .edge_references()
            .filter_map(|e| {
                let from = inner.graph.node_weight(e.source())?;
                let to = inner.graph.node_weight(e.target())?;
                Some(EdgeRecord::new(from.id.clone(), to.id.clone(), e.weight().clone()))
            })
            .collect();
        records.sort_by(|a, b| {
            a.from
                .cmp(&b.from)
                .then(a.to.cmp(&b.to))
                .then(a.edge.edge_type.cmp(&b.edge.edge_type))
        });
        records
    }

    /// Replace the whole graph. The new arena is built before the lock is taken.
    pub fn replace(&self, snapshot: GraphSnapshot) -> Result<(), CortexError> {
        let mut next = GraphInner::default();
        for node in snapshot.nodes {
            if next.index.contains_key(&node.id) {
                continue;
            }
            let id = node.id.clone();
            let index = next.graph.add_node(GraphNode { degree: 0, ..node });
            next.index.insert(id, index);
        }
        for record in snapshot.edges {
            record.validate()?;
            let from_kind = if record.edge.edge_type == EdgeType::Contains {
                NodeKind::Capability
            } else {
                NodeKind::Tool
            };
            let a = next.ensure_node(&record.from, from_kind);
            let b = next.ensure_node(&record.to, NodeKind::Tool);
            match next.find_edge(a, b, record.edge.edge_type) {
                Some(existing) => next.graph[existing] = record.edge,
                None => {
                    next.graph.add_edge(a, b, record.edge);
                    next.bump_degree(a);
                    next.bump_degree(b);
                }
            }
        }

        let mut inner = self.inner.write();
        next.generation = inner.generation + 1;
        *inner = next;
        Ok(())
    }

    pub fn adjacency(&self) -> Adjacency {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner.index.keys().cloned().collect();
        ids.sort();
        let position: HashMap<&str, usize> =
            ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

        let mut out = vec![Vec::new(); ids.len()];
        for (i, id) in ids.iter().enumerate() {
            let index = inner.index[id.as_str()];
            let mut targets: BTreeMap<usize, f64> = BTreeMap::new();
            for e in inner.graph.edges_directed(index, Direction::Outgoing) {
                let Some(target) = inner.graph.node_weight(e.target()) else {
                    continue;
                };
                let j = position[target.id.as_str()];
                let weight = targets.entry(j).or_insert(0.0);
                *weight = weight.max(e.weight().weight);
            }
            out[i] = targets.into_iter().collect();
        }
        Adjacency { ids, out }
    }

    pub fn set_pagerank(&self, ranks: &HashMap<String, f64>) {
        let mut inner = self.inner.write();
        let indices: Vec<(NodeIndex, f64)> = inner
            .index
            .iter()
            .map(|(id, &index)| (index, ranks.get(id).copied().unwrap_or(0.0)))
            .collect();
        for (index, rank) in indices {
            if let Some(node) = inner.graph.node_weight_mut(index) {
                node.pagerank = rank;
            }
        }
    }

    pub fn mark_capability(&self, id: &str) -> NodeIndex {
        let mut inner = self.inner.write();
        let index = inner.ensure_node(id, NodeKind::Capability);
        if let Some(node) = inner.graph.node_weight_mut(index) {
            node.kind = NodeKind::Capability;
        }
        index
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}
