// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Centrality and community detection over an [`Adjacency`] snapshot.
//!
//! Both algorithms are deterministic: node order is the sorted id order of
//! the snapshot and every tie is broken toward the lower position.

use std::collections::{BTreeMap, HashMap};

use crate::infrastructure::graph_store::Adjacency;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRankConfig {
    pub damping: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-9,
        }
    }
}

/// Power-iteration PageRank over distinct out-targets.
///
/// Mass from nodes without out-edges is spread uniformly, so the ranks always
/// sum to 1. A graph with no edges yields `1/N` everywhere.
pub fn pagerank(adjacency: &Adjacency, config: &PageRankConfig) -> Vec<f64> {
    let n = adjacency.len();
    if n == 0 {
        return Vec::new();
    }
    let uniform = 1.0 / n as f64;
    let damping = config.damping.clamp(0.0, 1.0);
    let mut ranks = vec![uniform; n];

    for _ in 0..config.max_iterations {
        let dangling: f64 = adjacency
            .out
            .iter()
            .zip(ranks.iter())
            .filter(|(out, _)| out.is_empty())
            .map(|(_, rank)| rank)
            .sum();

        let base = (1.0 - damping) * uniform + damping * dangling * uniform;
        let mut next = vec![base; n];
        for (i, out) in adjacency.out.iter().enumerate() {
            if out.is_empty() {
                continue;
            }
            let share = damping * ranks[i] / out.len() as f64;
            for &(j, _) in out {
                next[j] += share;
            }
        }

        let delta: f64 = next
            .iter()
            .zip(ranks.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        ranks = next;
        if delta < config.tolerance {
            break;
        }
    }
    ranks
}

/// Modularity local-moving over the undirected, confidence-weighted view.
///
/// Returns one community label per node position, labels renumbered densely
/// in order of first appearance.
pub fn detect_communities(adjacency: &Adjacency) -> Vec<usize> {
    let n = adjacency.len();
    if n == 0 {
        return Vec::new();
    }

    let mut neighbours: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
    for (i, out) in adjacency.out.iter().enumerate() {
        for &(j, weight) in out {
            if i == j || weight <= 0.0 {
                continue;
            }
            *neighbours[i].entry(j).or_insert(0.0) += weight;
            *neighbours[j].entry(i).or_insert(0.0) += weight;
        }
    }

    let degree: Vec<f64> = neighbours.iter().map(|m| m.values().sum()).collect();
    let two_m: f64 = degree.iter().sum();
    let mut community: Vec<usize> = (0..n).collect();
    if two_m <= 0.0 {
        return community;
    }
    let mut totals = degree.clone();

    for _ in 0..100 {
        let mut moved = false;
        for i in 0..n {
            let current = community[i];
            totals[current] -= degree[i];

            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            links.insert(current, 0.0);
            for (&j, &weight) in &neighbours[i] {
                *links.entry(community[j]).or_insert(0.0) += weight;
            }

            let gain = |c: usize, k_in: f64| k_in - degree[i] * totals[c] / two_m;
            let stay_gain = gain(current, links[&current]);
            let mut best = current;
            let mut best_gain = stay_gain;
            // BTreeMap iteration is ascending, so strict > keeps the smallest id on ties.
            for (&c, &k_in) in &links {
                let g = gain(c, k_in);
                if g > best_gain + 1e-12 || (c < best && (g - best_gain).abs() <= 1e-12) {
                    best = c;
                    best_gain = g;
                }
            }

            community[i] = best;
            totals[best] += degree[i];
            if best != current {
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }

    let mut relabel: HashMap<usize, usize> = HashMap::new();
    community
        .iter()
        .map(|c| {
            let next = relabel.len();
            *relabel.entry(*c).or_insert(next)
        })
        .collect()
}

pub fn community_count(labels: &[usize]) -> usize {
    labels.iter().max().map(|m| m + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjacency(ids: &[&str], edges: &[(usize, usize, f64)]) -> Adjacency {
        let mut out = vec![Vec::new(); ids.len()];
        for &(a, b, w) in edges {
            out[a].push((b, w));
        }
        Adjacency {
            ids: ids.iter().map(|s| s.to_string()).collect(),
            out,
        }
    }

    #[test]
    fn test_pagerank_uniform_without_edges() {
        let ranks = pagerank(&adjacency(&["a", "b", "c", "d"], &[]), &PageRankConfig::default());
        for rank in ranks {
            assert!((rank - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_pagerank_empty_graph() {
        assert!(pagerank(&Adjacency::default(), &PageRankConfig::default()).is_empty());
    }

    #[test]
    fn test_pagerank_sums_to_one_and_favours_sink() {
        let graph = adjacency(&["a", "b", "c"], &[(0, 2, 1.0), (1, 2, 1.0)]);
        let ranks = pagerank(&graph, &PageRankConfig::default());

        let total: f64 = ranks.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(ranks[2] > ranks[0]);
        assert!((ranks[0] - ranks[1]).abs() < 1e-12);
    }

    #[test]
    fn test_communities_split_two_cliques() {
        // Two triangles joined by one weak edge.
        let graph = adjacency(
            &["a", "b", "c", "x", "y", "z"],
            &[
                (0, 1, 1.0),
                (1, 2, 1.0),
                (2, 0, 1.0),
                (3, 4, 1.0),
                (4, 5, 1.0),
                (5, 3, 1.0),
                (2, 3, 0.1),
            ],
        );
        let labels = detect_communities(&graph);

        assert_eq!(community_count(&labels), 2);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_communities_are_deterministic() {
        let graph = adjacency(
            &["a", "b", "c", "d"],
            &[(0, 1, 0.5), (1, 2, 0.5), (2, 3, 0.5), (3, 0, 0.5)],
        );
        assert_eq!(detect_communities(&graph), detect_communities(&graph));
    }

    #[test]
    fn test_isolated_nodes_are_singletons() {
        let labels = detect_communities(&adjacency(&["a", "b"], &[]));
        assert_eq!(labels, vec![0, 1]);
    }
}
