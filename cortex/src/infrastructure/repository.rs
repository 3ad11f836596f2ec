// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Persistence contract for the Cortex bounded context.
//!
//! Storage is an external collaborator. The graph engine, the reinforcement
//! loop and the batch trainer only ever see [`DbClient`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::capability::Capability;
use crate::domain::errors::DbError;
use crate::domain::graph::{EdgeRecord, EdgeType};
use crate::domain::training::ExecutionTrace;

pub type DbResult<T> = std::result::Result<T, DbError>;

#[async_trait]
pub trait DbClient: Send + Sync {
    async fn load_edges(&self) -> DbResult<Vec<EdgeRecord>>;

    /// Upsert keyed by `(from, to, edge_type)`.
    async fn save_edge(&self, record: &EdgeRecord) -> DbResult<()>;

    async fn load_capabilities(&self) -> DbResult<Vec<Capability>>;

    async fn save_capability(&self, capability: &Capability) -> DbResult<()>;

    async fn save_trace(&self, trace: &ExecutionTrace) -> DbResult<()>;

    /// Most recent traces first, at most `limit`.
    async fn load_traces(&self, limit: usize) -> DbResult<Vec<ExecutionTrace>>;

    /// Store an opaque model snapshot under `name`, replacing any previous one.
    async fn save_model_params(&self, name: &str, params: &serde_json::Value) -> DbResult<()>;

    async fn load_model_params(&self, name: &str) -> DbResult<Option<serde_json::Value>>;
}

#[derive(Default)]
struct InMemoryTables {
    edges: HashMap<(String, String, EdgeType), EdgeRecord>,
    capabilities: HashMap<String, Capability>,
    traces: Vec<ExecutionTrace>,
    params: HashMap<String, serde_json::Value>,
}

/// Process-local [`DbClient`]. Used by tests and single-node deployments.
#[derive(Clone, Default)]
pub struct InMemoryDbClient {
    tables: Arc<RwLock<InMemoryTables>>,
    failing: Arc<std::sync::atomic::AtomicBool>,
}

impl InMemoryDbClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `DbError::Database`.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> DbResult<()> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DbError::Database("storage unavailable".to_string()));
        }
        Ok(())
    }

    pub async fn trace_count(&self) -> usize {
        self.tables.read().await.traces.len()
    }
}

#[async_trait]
impl DbClient for InMemoryDbClient {
    async fn load_edges(&self) -> DbResult<Vec<EdgeRecord>> {
        self.check()?;
        let tables = self.tables.read().await;
        let mut edges: Vec<EdgeRecord> = tables.edges.values().cloned().collect();
        edges.sort_by(|a, b| {
            a.from
                .cmp(&b.from)
                .then(a.to.cmp(&b.to))
                .then(a.edge.edge_type.cmp(&b.edge.edge_type))
        });
        Ok(edges)
    }

    async fn save_edge(&self, record: &EdgeRecord) -> DbResult<()> {
        self.check()?;
        let key = (record.from.clone(), record.to.clone(), record.edge.edge_type);
        self.tables.write().await.edges.insert(key, record.clone());
        Ok(())
    }

    async fn load_capabilities(&self) -> DbResult<Vec<Capability>> {
        self.check()?;
        let tables = self.tables.read().await;
        let mut capabilities: Vec<Capability> = tables.capabilities.values().cloned().collect();
        capabilities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(capabilities)
    }

    async fn save_capability(&self, capability: &Capability) -> DbResult<()> {
        self.check()?;
        self.tables
            .write()
            .await
            .capabilities
            .insert(capability.id.clone(), capability.clone());
        Ok(())
    }

    async fn save_trace(&self, trace: &ExecutionTrace) -> DbResult<()> {
        self.check()?;
        self.tables.write().await.traces.push(trace.clone());
        Ok(())
    }

    async fn load_traces(&self, limit: usize) -> DbResult<Vec<ExecutionTrace>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables.traces.iter().rev().take(limit).cloned().collect())
    }

    async fn save_model_params(&self, name: &str, params: &serde_json::Value) -> DbResult<()> {
        self.check()?;
        self.tables
            .write()
            .await
            .params
            .insert(name.to_string(), params.clone());
        Ok(())
    }

    async fn load_model_params(&self, name: &str) -> DbResult<Option<serde_json::Value>> {
        self.check()?;
        Ok(self.tables.read().await.params.get(name).cloned())
    }
}
