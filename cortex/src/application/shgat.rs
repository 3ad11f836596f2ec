// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SHGAT: Hypergraph Attention Scorer
//!
//! Ranks candidate next tools or capabilities for an intent by attending over
//! each candidate's hypergraph neighbourhood.
//!
//! ## Model
//!
//! For a candidate `c` the query input is `e = intent + γ · mean(context)`.
//! Its neighbourhood is `c` itself, the members of its hyperedge, the
//! capabilities containing it and its sequence/dependency neighbours, each
//! carrying a log-confidence prior. Every head `h` projects
//! `q = Wq[h]·e`, `v_j = Wn[h]·x_j` and attends with
//! `α = softmax(q·v_j/√H + prior_j)`, giving `s_h = q·(Σ α_j v_j)/√H`.
//! The score is `σ(b + Σ w_h s_h)`. A candidate with no neighbourhood falls
//! back to `σ(b + f·e)`.
//!
//! ## Training
//!
//! One step takes the analytic gradient of binary cross-entropy, clips its
//! norm and halves the step until the example's loss does not increase. Every
//! weight mutation requires a [`TrainingLease`].

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::application::training_coordinator::{TrainingCoordinator, TrainingLease};
use crate::domain::errors::{CortexError, CortexResult};
use crate::domain::graph::EdgeType;
use crate::domain::training::TrainingExample;
use crate::infrastructure::graph_store::GraphStore;
use crate::infrastructure::hyperedge_cache::HyperedgeCache;

pub const SHGAT_PARAMS_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ShgatConfig {
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    pub num_heads: usize,
    /// Weight of the mean context feature in the query input.
    pub context_weight: f64,
    pub learning_rate: f64,
    pub max_grad_norm: f64,
    pub max_backtracks: usize,
    pub seed: u64,
}

impl Default for ShgatConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 64,
            hidden_dim: 16,
            num_heads: 4,
            context_weight: 0.5,
            learning_rate: 0.1,
            max_grad_norm: 5.0,
            max_backtracks: 10,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShgatDims {
    pub embedding_dim: usize,
    pub hidden_dim: usize,
    pub num_heads: usize,
}

/// Weight tensors. Projections are row-major `hidden_dim × embedding_dim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShgatWeights {
    pub query: Vec<Vec<f64>>,
    pub node: Vec<Vec<f64>>,
    pub head_mix: Vec<f64>,
    pub bias: f64,
    pub fallback: Vec<f64>,
}

impl ShgatWeights {
    fn zeros(dims: &ShgatDims) -> Self {
        let size = dims.hidden_dim * dims.embedding_dim;
        Self {
            query: vec![vec![0.0; size]; dims.num_heads],
            node: vec![vec![0.0; size]; dims.num_heads],
            head_mix: vec![0.0; dims.num_heads],
            bias: 0.0,
            fallback: vec![0.0; dims.embedding_dim],
        }
    }

    fn random(dims: &ShgatDims, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let scale = 1.0 / (dims.embedding_dim.max(1) as f64).sqrt();
        let mut fill = |len: usize| -> Vec<f64> {
            (0..len).map(|_| rng.random_range(-scale..scale)).collect()
        };
        let size = dims.hidden_dim * dims.embedding_dim;
        let query = (0..dims.num_heads).map(|_| fill(size)).collect();
        let node = (0..dims.num_heads).map(|_| fill(size)).collect();
        Self {
            query,
            node,
            head_mix: vec![1.0 / dims.num_heads.max(1) as f64; dims.num_heads],
            bias: 0.0,
            fallback: vec![0.0; dims.embedding_dim],
        }
    }

    fn check(&self, dims: &ShgatDims) -> Result<(), String> {
        let size = dims.hidden_dim * dims.embedding_dim;
        if self.query.len() != dims.num_heads || self.node.len() != dims.num_heads {
            return Err(format!("expected {} heads", dims.num_heads));
        }
        if self.query.iter().chain(self.node.iter()).any(|m| m.len() != size) {
            return Err(format!("projection size must be {}", size));
        }
        if self.head_mix.len() != dims.num_heads {
            return Err(format!("head mix must have {} entries", dims.num_heads));
        }
        if self.fallback.len() != dims.embedding_dim {
            return Err(format!("fallback must have {} entries", dims.embedding_dim));
        }
        let finite = self
            .query
            .iter()
            .chain(self.node.iter())
            .flatten()
            .chain(self.head_mix.iter())
            .chain(self.fallback.iter())
            .all(|x| x.is_finite())
            && self.bias.is_finite();
        if !finite {
            return Err("weights must be finite".to_string());
        }
        Ok(())
    }

    fn norm_sq(&self) -> f64 {
        self.query
            .iter()
            .chain(self.node.iter())
            .flatten()
            .chain(self.head_mix.iter())
            .chain(self.fallback.iter())
            .map(|x| x * x)
            .sum::<f64>()
            + self.bias * self.bias
    }

    /// `self + scale * other`.
    fn axpy(&self, scale: f64, other: &ShgatWeights) -> ShgatWeights {
        let add = |a: &[f64], b: &[f64]| -> Vec<f64> {
            a.iter().zip(b.iter()).map(|(x, y)| x + scale * y).collect()
        };
        ShgatWeights {
            query: self
                .query
                .iter()
                .zip(other.query.iter())
                .map(|(a, b)| add(a, b))
                .collect(),
            node: self
                .node
                .iter()
                .zip(other.node.iter())
                .map(|(a, b)| add(a, b))
                .collect(),
            head_mix: add(&self.head_mix, &other.head_mix),
            bias: self.bias + scale * other.bias,
            fallback: add(&self.fallback, &other.fallback),
        }
    }
}

/// Versioned snapshot produced by [`Shgat::export_params`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShgatParams {
    pub version: u32,
    pub dims: ShgatDims,
    pub weights: ShgatWeights,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainStep {
    pub loss_before: f64,
    pub loss_after: f64,
    pub prediction: f64,
}

/// Inputs of one forward pass, resolved from graph state once per call.
struct ForwardInput {
    query_input: Vec<f64>,
    neighbours: Vec<(Vec<f64>, f64)>,
}

struct HeadTrace {
    q: Vec<f64>,
    values: Vec<Vec<f64>>,
    logits: Vec<f64>,
    attention: Vec<f64>,
    score: f64,
}

struct ForwardTrace {
    heads: Vec<HeadTrace>,
    logit: f64,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn project(matrix: &[f64], input: &[f64], rows: usize) -> Vec<f64> {
    let cols = input.len();
    (0..rows)
        .map(|r| dot(&matrix[r * cols..(r + 1) * cols], input))
        .collect()
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Numerically stable binary cross-entropy on a logit.
fn bce_with_logit(logit: f64, target: f64) -> f64 {
    logit.max(0.0) - logit * target + (1.0 + (-logit.abs()).exp()).ln()
}

fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

fn forward(weights: &ShgatWeights, dims: &ShgatDims, input: &ForwardInput) -> ForwardTrace {
    if input.neighbours.is_empty() {
        return ForwardTrace {
            heads: Vec::new(),
            logit: weights.bias + dot(&weights.fallback, &input.query_input),
        };
    }

    let h = dims.hidden_dim;
    let scale = (h.max(1) as f64).sqrt();
    let mut logit = weights.bias;
    let mut heads = Vec::with_capacity(dims.num_heads);
    for head in 0..dims.num_heads {
        let q = project(&weights.query[head], &input.query_input, h);
        let values: Vec<Vec<f64>> = input
            .neighbours
            .iter()
            .map(|(x, _)| project(&weights.node[head], x, h))
            .collect();
        let logits: Vec<f64> = values.iter().map(|v| dot(&q, v) / scale).collect();
        let biased: Vec<f64> = logits
            .iter()
            .zip(input.neighbours.iter())
            .map(|(r, (_, prior))| r + prior)
            .collect();
        let attention = softmax(&biased);
        let score: f64 = attention.iter().zip(logits.iter()).map(|(a, r)| a * r).sum();
        logit += weights.head_mix[head] * score;
        heads.push(HeadTrace {
            q,
            values,
            logits,
            attention,
            score,
        });
    }
    ForwardTrace { heads, logit }
}

/// Gradient of the loss with respect to every weight, given `d_logit`.
fn backward(
    weights: &ShgatWeights,
    dims: &ShgatDims,
    input: &ForwardInput,
    trace: &ForwardTrace,
    d_logit: f64,
) -> ShgatWeights {
    let mut grad = ShgatWeights::zeros(dims);
    grad.bias = d_logit;
    if trace.heads.is_empty() {
        for (g, e) in grad.fallback.iter_mut().zip(input.query_input.iter()) {
            *g = d_logit * e;
        }
        return grad;
    }

    let h = dims.hidden_dim;
    let d = dims.embedding_dim;
    let scale = (h.max(1) as f64).sqrt();
    for (head, ht) in trace.heads.iter().enumerate() {
        grad.head_mix[head] = d_logit * ht.score;
        let d_score = d_logit * weights.head_mix[head];

        // s = Σ α_j r_j with α = softmax(r + prior): ds/dr_j = α_j (1 + r_j - s).
        let d_r: Vec<f64> = ht
            .attention
            .iter()
            .zip(ht.logits.iter())
            .map(|(a, r)| d_score * a * (1.0 + r - ht.score))
            .collect();

        let mut d_q = vec![0.0; h];
        for (j, v) in ht.values.iter().enumerate() {
            for k in 0..h {
                d_q[k] += d_r[j] * v[k] / scale;
            }
            let x = &input.neighbours[j].0;
            for k in 0..h {
                let d_v = d_r[j] * ht.q[k] / scale;
                if d_v == 0.0 {
                    continue;
                }
                let row = &mut grad.node[head][k * d..(k + 1) * d];
                for (g, xi) in row.iter_mut().zip(x.iter()) {
                    *g += d_v * xi;
                }
            }
        }
        for k in 0..h {
            let row = &mut grad.query[head][k * d..(k + 1) * d];
            for (g, ei) in row.iter_mut().zip(input.query_input.iter()) {
                *g += d_q[k] * ei;
            }
        }
    }
    grad
}

pub struct Shgat {
    dims: ShgatDims,
    config: ShgatConfig,
    weights: RwLock<ShgatWeights>,
    features: RwLock<HashMap<String, Vec<f64>>>,
    store: Arc<GraphStore>,
    hyperedges: Arc<HyperedgeCache>,
    coordinator: Arc<TrainingCoordinator>,
}

impl Shgat {
    pub fn new(
        config: ShgatConfig,
        store: Arc<GraphStore>,
        hyperedges: Arc<HyperedgeCache>,
        coordinator: Arc<TrainingCoordinator>,
    ) -> Self {
        let dims = ShgatDims {
            embedding_dim: config.embedding_dim.max(1),
            hidden_dim: config.hidden_dim.max(1),
            num_heads: config.num_heads.max(1),
        };
        Self {
            weights: RwLock::new(ShgatWeights::random(&dims, config.seed)),
            dims,
            config,
            features: RwLock::new(HashMap::new()),
            store,
            hyperedges,
            coordinator,
        }
    }

    pub fn dims(&self) -> ShgatDims {
        self.dims
    }

    pub fn coordinator(&self) -> Arc<TrainingCoordinator> {
        self.coordinator.clone()
    }

    /// Attach an embedding to a node. Features are graph state, not weights.
    pub fn register_node(&self, id: &str, embedding: &[f32]) -> CortexResult<()> {
        if embedding.len() != self.dims.embedding_dim {
            return Err(CortexError::ParamsMismatch(format!(
                "feature for '{}' has dimension {}, expected {}",
                id,
                embedding.len(),
                self.dims.embedding_dim
            )));
        }
        let feature = embedding.iter().map(|x| *x as f64).collect();
        self.features.write().insert(id.to_string(), feature);
        Ok(())
    }

    pub fn has_node(&self, id: &str) -> bool {
        self.features.read().contains_key(id)
    }

    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.features.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn check_lease(&self, lease: &TrainingLease) -> CortexResult<()> {
        if lease.is_valid_for(&self.coordinator) {
            return Ok(());
        }
        Err(CortexError::TrainingConflict {
            holder: self.coordinator.holder().unwrap_or_default(),
            requested_by: lease.owner().to_string(),
        })
    }

    fn resolve(&self, intent: &[f32], context: &[String], candidate: &str) -> CortexResult<ForwardInput> {
        let d = self.dims.embedding_dim;
        if intent.len() != d {
            return Err(CortexError::ParamsMismatch(format!(
                "intent has dimension {}, expected {}",
                intent.len(),
                d
            )));
        }
        let features = self.features.read();

        let mut query_input: Vec<f64> = intent.iter().map(|x| *x as f64).collect();
        let known: Vec<&Vec<f64>> = context.iter().filter_map(|id| features.get(id)).collect();
        if !known.is_empty() {
            let weight = self.config.context_weight / known.len() as f64;
            for feature in known {
                for (q, x) in query_input.iter_mut().zip(feature.iter()) {
                    *q += weight * x;
                }
            }
        }

        // Ordered by id so the forward pass is independent of map iteration.
        let mut priors: BTreeMap<String, f64> = BTreeMap::new();
        let mut offer = |id: &str, prior: f64| {
            if features.contains_key(id) {
                let entry = priors.entry(id.to_string()).or_insert(f64::NEG_INFINITY);
                *entry = (*entry).max(prior);
            }
        };
        offer(candidate, 0.0);
        for member in self.hyperedges.members(candidate) {
            offer(&member, 0.0);
        }
        for capability in self.hyperedges.containing(candidate) {
            offer(&capability, 0.0);
        }
        for (other, edge) in self
            .store
            .outgoing(candidate)
            .into_iter()
            .chain(self.store.incoming(candidate))
        {
            if edge.edge_type == EdgeType::Contains || edge.weight <= 0.0 {
                continue;
            }
            offer(&other, edge.weight.ln());
        }

        let neighbours = priors
            .into_iter()
            .filter_map(|(id, prior)| features.get(&id).map(|x| (x.clone(), prior)))
            .collect();
        Ok(ForwardInput {
            query_input,
            neighbours,
        })
    }

    /// Score every candidate, highest first, ties by id.
    pub fn score(
        &self,
        intent: &[f32],
        context: &[String],
        candidates: &[String],
    ) -> CortexResult<Vec<ScoredCandidate>> {
        let inputs = candidates
            .iter()
            .map(|c| self.resolve(intent, context, c).map(|input| (c, input)))
            .collect::<CortexResult<Vec<_>>>()?;

        let weights = self.weights.read();
        let mut scored: Vec<ScoredCandidate> = inputs
            .into_iter()
            .map(|(id, input)| ScoredCandidate {
                id: id.clone(),
                score: sigmoid(forward(&weights, &self.dims, &input).logit),
            })
            .collect();
        drop(weights);

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(scored)
    }

    pub fn predict(&self, example: &TrainingExample) -> CortexResult<f64> {
        let input = self.resolve(
            &example.intent_embedding,
            &example.context_tools,
            &example.candidate_id,
        )?;
        let weights = self.weights.read();
        Ok(sigmoid(forward(&weights, &self.dims, &input).logit))
    }

    pub fn train_on_example(
        &self,
        lease: &TrainingLease,
        example: &TrainingExample,
    ) -> CortexResult<TrainStep> {
        self.train_weighted(lease, example, 1.0)
    }

    /// One step on `example` with its gradient scaled by `importance`.
    ///
    /// The step is halved until the example's loss does not increase; if no
    /// halving helps, the weights are left unchanged.
    pub fn train_weighted(
        &self,
        lease: &TrainingLease,
        example: &TrainingExample,
        importance: f64,
    ) -> CortexResult<TrainStep> {
        self.check_lease(lease)?;
        let target = example.outcome.clamp(0.0, 1.0);
        let importance = if importance.is_finite() {
            importance.max(0.0)
        } else {
            0.0
        };
        let input = self.resolve(
            &example.intent_embedding,
            &example.context_tools,
            &example.candidate_id,
        )?;

        let mut weights = self.weights.write();
        let trace = forward(&weights, &self.dims, &input);
        let loss_before = bce_with_logit(trace.logit, target);
        let d_logit = importance * (sigmoid(trace.logit) - target);

        let mut grad = backward(&weights, &self.dims, &input, &trace, d_logit);
        let norm = grad.norm_sq().sqrt();
        if norm > self.config.max_grad_norm && norm > 0.0 {
            grad = ShgatWeights::zeros(&self.dims).axpy(self.config.max_grad_norm / norm, &grad);
        }

        let mut step = self.config.learning_rate;
        let mut accepted: Option<(ShgatWeights, f64)> = None;
        if d_logit != 0.0 {
            for _ in 0..=self.config.max_backtracks {
                let candidate = weights.axpy(-step, &grad);
                let logit = forward(&candidate, &self.dims, &input).logit;
                let loss = bce_with_logit(logit, target);
                if loss.is_finite() && loss <= loss_before {
                    accepted = Some((candidate, logit));
                    break;
                }
                step /= 2.0;
            }
        }

        let (loss_after, logit_after) = match accepted {
            Some((next, logit)) => {
                *weights = next;
                (bce_with_logit(logit, target), logit)
            }
            None => (loss_before, trace.logit),
        };
        drop(weights);

        metrics::counter!("strata_shgat_train_steps_total").increment(1);
        debug!(
            owner = lease.owner(),
            candidate = %example.candidate_id,
            loss_before,
            loss_after,
            "SHGAT training step"
        );
        Ok(TrainStep {
            loss_before,
            loss_after,
            prediction: sigmoid(logit_after),
        })
    }

    pub fn export_params(&self) -> ShgatParams {
        ShgatParams {
            version: SHGAT_PARAMS_VERSION,
            dims: self.dims,
            weights: self.weights.read().clone(),
        }
    }

    pub fn import_params(&self, lease: &TrainingLease, params: ShgatParams) -> CortexResult<()> {
        self.check_lease(lease)?;
        if params.version != SHGAT_PARAMS_VERSION {
            return Err(CortexError::ParamsMismatch(format!(
                "unsupported snapshot version {}",
                params.version
            )));
        }
        if params.dims != self.dims {
            return Err(CortexError::ParamsMismatch(format!(
                "snapshot dims {:?} differ from model dims {:?}",
                params.dims, self.dims
            )));
        }
        params
            .weights
            .check(&self.dims)
            .map_err(CortexError::ParamsMismatch)?;
        *self.weights.write() = params.weights;
        Ok(())
    }

    /// Import a snapshot stored as JSON, ignoring snapshots that do not fit.
    pub fn import_json(&self, lease: &TrainingLease, value: serde_json::Value) -> CortexResult<()> {
        let params: ShgatParams = serde_json::from_value(value)?;
        if let Err(e) = self.import_params(lease, params) {
            warn!(error = %e, "Rejected SHGAT snapshot");
            return Err(e);
        }
        Ok(())
    }
}
