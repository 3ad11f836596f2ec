// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory vector index over capability embeddings.
//!
//! Feeds the vector component of suggestion scoring. Similarity is cosine,
//! clamped to [0, 1].

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::capability::Capability;

pub struct CapabilityIndex {
    entries: Arc<RwLock<HashMap<String, Capability>>>,
}

impl CapabilityIndex {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if magnitude_a == 0.0 || magnitude_b == 0.0 {
            return 0.0;
        }

        (dot_product / (magnitude_a * magnitude_b)) as f64
    }

    pub async fn upsert(&self, capability: Capability) {
        self.entries
            .write()
            .await
            .insert(capability.id.clone(), capability);
    }

    /// Swap the whole index for `capabilities`.
    pub async fn replace(&self, capabilities: Vec<Capability>) {
        let next: HashMap<String, Capability> = capabilities
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        *self.entries.write().await = next;
    }

    pub async fn get(&self, id: &str) -> Option<Capability> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn all(&self) -> Vec<Capability> {
        let mut all: Vec<Capability> = self.entries.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Top `limit` capabilities by similarity to `query`, ties by id.
    pub async fn search_similar(&self, query: &[f32], limit: usize) -> Vec<(Capability, f64)> {
        let entries = self.entries.read().await;

        let mut results: Vec<(Capability, f64)> = entries
            .values()
            .map(|capability| {
                let similarity =
                    Self::cosine_similarity(query, &capability.embedding).clamp(0.0, 1.0);
                (capability.clone(), similarity)
            })
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        results.truncate(limit);
        results
    }
}

impl Default for CapabilityIndex {
    fn default() -> Self {
        Self::new()
    }
}
