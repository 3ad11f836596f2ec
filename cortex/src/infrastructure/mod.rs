// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure layer for Cortex bounded context

pub mod capability_index;
pub mod embedding_client;
pub mod graph_store;
pub mod hyperedge_cache;
pub mod repository;

pub use capability_index::CapabilityIndex;
pub use embedding_client::{EmbeddingModel, HashEmbeddingModel};
pub use graph_store::{Adjacency, EdgeUpsert, GraphSnapshot, GraphStore};
pub use hyperedge_cache::HyperedgeCache;
pub use repository::{DbClient, DbResult, InMemoryDbClient};
