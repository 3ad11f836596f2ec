// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Capability hyperedges, derived from capability records.
//!
//! The cache is an index over the [`GraphStore`] arena. It records the store
//! generation it was built against; after a wholesale graph replace the
//! cache must be rebuilt before member lookups are meaningful again.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

use crate::domain::capability::{Capability, Hyperedge, HyperedgeKind};
use crate::infrastructure::graph_store::GraphStore;

#[derive(Default)]
struct CacheInner {
    hyperedges: HashMap<String, Hyperedge>,
    generation: u64,
}

#[derive(Default)]
pub struct HyperedgeCache {
    inner: RwLock<CacheInner>,
}

impl HyperedgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn build(store: &GraphStore, capability: &Capability) -> Option<Hyperedge> {
        let member_ids: BTreeSet<String> = capability
            .tools_used
            .iter()
            .chain(capability.children.iter())
            .filter(|id| **id != capability.id)
            .cloned()
            .collect();
        if member_ids.is_empty() {
            return None;
        }

        let capability_index = store.index_of(&capability.id)?;
        let members: BTreeSet<_> = member_ids
            .iter()
            .filter_map(|id| store.index_of(id))
            .collect();
        if members.is_empty() {
            return None;
        }

        let kind = if capability.children.is_empty() {
            HyperedgeKind::CapToTool
        } else {
            HyperedgeKind::CapToCap
        };

        Some(Hyperedge {
            capability_id: capability.id.clone(),
            capability: capability_index,
            members,
            member_ids,
            kind,
        })
    }

    /// Rebuild every hyperedge against the current store.
    ///
    /// Members missing from the graph are dropped; a capability that is not
    /// itself in the graph, or is left with no member, produces no hyperedge.
    /// The store is only read.
    pub fn rebuild(&self, store: &GraphStore, capabilities: &[Capability]) -> usize {
        let hyperedges: HashMap<String, Hyperedge> = capabilities
            .iter()
            .filter_map(|capability| Self::build(store, capability))
            .map(|h| (h.capability_id.clone(), h))
            .collect();
        let count = hyperedges.len();

        let mut inner = self.inner.write();
        inner.hyperedges = hyperedges;
        inner.generation = store.generation();
        count
    }

    pub fn upsert(&self, store: &GraphStore, capability: &Capability) -> bool {
        let built = Self::build(store, capability);
        let mut inner = self.inner.write();
        match built {
            Some(hyperedge) => {
                inner
                    .hyperedges
                    .insert(capability.id.clone(), hyperedge);
                true
            }
            None => {
                inner.hyperedges.remove(&capability.id);
                false
            }
        }
    }

    pub fn get(&self, capability_id: &str) -> Option<Hyperedge> {
        self.inner.read().hyperedges.get(capability_id).cloned()
    }

    pub fn members(&self, capability_id: &str) -> Vec<String> {
        self.inner
            .read()
            .hyperedges
            .get(capability_id)
            .map(|h| h.member_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Capabilities whose hyperedge contains `node_id`.
    pub fn containing(&self, node_id: &str) -> Vec<String> {
        let inner = self.inner.read();
        let mut ids: Vec<String> = inner
            .hyperedges
            .values()
            .filter(|h| h.member_ids.contains(node_id))
            .map(|h| h.capability_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.read().hyperedges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stale(&self, store: &GraphStore) -> bool {
        self.inner.read().generation != store.generation()
    }
}
