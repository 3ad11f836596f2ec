// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Embedding Client
//!
//! Contract for turning intent text into vectors, plus a deterministic
//! feature-hashing model.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Intent and capability embeddings

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::domain::errors::CortexError;

/// Text encoder. The model architecture lives outside this crate.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, CortexError>;

    fn dimension(&self) -> usize;
}

/// Hashes lowercase tokens and token bigrams into `dimension` signed buckets
/// with SHA-256, then L2-normalises. Texts sharing words land near each other.
pub struct HashEmbeddingModel {
    dimension: usize,
}

impl HashEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        let value = u64::from_le_bytes(raw);
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        ((value % self.dimension as u64) as usize, sign)
    }

    pub fn encode_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect();

        for token in &tokens {
            let (index, sign) = self.bucket(token);
            embedding[index] += sign;
        }
        for pair in tokens.windows(2) {
            let (index, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            embedding[index] += 0.5 * sign;
        }

        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            embedding.iter_mut().for_each(|x| *x /= norm);
        }
        embedding
    }
}

impl Default for HashEmbeddingModel {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingModel for HashEmbeddingModel {
    async fn encode(&self, text: &str) -> Result<Vec<f32>, CortexError> {
        Ok(self.encode_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_embedding() {
        let model = HashEmbeddingModel::new(32);
        let embedding = model.encode("read the config file").await.unwrap();

        assert_eq!(embedding.len(), 32);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_consistent_embeddings() {
        let model = HashEmbeddingModel::default();
        let first = model.encode("same text").await.unwrap();
        let second = model.encode("Same  TEXT").await.unwrap();

        assert_eq!(first, second, "Same tokens should produce same embedding");
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let model = HashEmbeddingModel::new(8);
        let embedding = model.encode("  ").await.unwrap();
        assert!(embedding.iter().all(|x| *x == 0.0));
    }
}
