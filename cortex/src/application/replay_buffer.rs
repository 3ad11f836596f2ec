// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Prioritised experience replay.
//!
//! Items are drawn without replacement with probability proportional to
//! `priority^alpha`. Every pushed item gets a monotonic id; samples report
//! ids, so a priority update still finds its item after later pushes and
//! evictions.

use rand::Rng;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerConfig {
    pub capacity: usize,
    /// Prioritisation strength in [0, 1]; 0 samples uniformly.
    pub alpha: f64,
    /// Floor added to absolute errors so no item becomes unreachable.
    pub epsilon: f64,
}

impl Default for PerConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            alpha: 0.6,
            epsilon: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerSample<T> {
    pub ids: Vec<u64>,
    pub items: Vec<T>,
    /// Importance weights, normalised so the largest is exactly 1.0.
    pub weights: Vec<f64>,
}

impl<T> PerSample<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Entry<T> {
    id: u64,
    item: T,
    priority: f64,
}

#[derive(Debug, Clone)]
pub struct PerBuffer<T> {
    /// Ordered by id, oldest first.
    entries: VecDeque<Entry<T>>,
    config: PerConfig,
    max_priority: f64,
    next_id: u64,
}

impl<T: Clone> PerBuffer<T> {
    pub fn new(config: PerConfig) -> Self {
        Self {
            entries: VecDeque::new(),
            config: PerConfig {
                capacity: config.capacity.max(1),
                alpha: config.alpha.clamp(0.0, 1.0),
                epsilon: config.epsilon.max(f64::MIN_POSITIVE),
            },
            max_priority: 1.0,
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.max_priority = 1.0;
    }

    /// New items enter at the highest priority seen so far, so each one is
    /// likely to be replayed at least once. The oldest item is evicted at capacity.
    pub fn push(&mut self, item: T) -> u64 {
        if self.entries.len() == self.config.capacity {
            self.entries.pop_front();
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(Entry {
            id,
            item,
            priority: self.max_priority,
        });
        id
    }

    pub fn priorities(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.priority).collect()
    }

    pub fn priority_of(&self, id: u64) -> Option<f64> {
        self.position(id).map(|i| self.entries[i].priority)
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.entries.binary_search_by_key(&id, |e| e.id).ok()
    }

    pub fn sample<R: Rng>(&self, batch_size: usize, beta: f64, rng: &mut R) -> PerSample<T> {
        let n = self.entries.len();
        if batch_size >= n {
            return PerSample {
                ids: self.entries.iter().map(|e| e.id).collect(),
                items: self.entries.iter().map(|e| e.item.clone()).collect(),
                weights: vec![1.0; n],
            };
        }

        let scaled: Vec<f64> = self
            .entries
            .iter()
            .map(|e| e.priority.powf(self.config.alpha))
            .collect();
        let total: f64 = scaled.iter().sum();

        let mut remaining: Vec<usize> = (0..n).collect();
        let mut remaining_mass = total;
        let mut indices = Vec::with_capacity(batch_size);
        for _ in 0..batch_size {
            let mut target = rng.random::<f64>() * remaining_mass;
            let mut chosen = remaining.len() - 1;
            for (slot, &index) in remaining.iter().enumerate() {
                if target < scaled[index] {
                    chosen = slot;
                    break;
                }
                target -= scaled[index];
            }
            let index = remaining.swap_remove(chosen);
            remaining_mass -= scaled[index];
            indices.push(index);
        }

        let beta = beta.clamp(0.0, 1.0);
        let raw: Vec<f64> = indices
            .iter()
            .map(|&i| (n as f64 * scaled[i] / total).powf(-beta))
            .collect();
        let max = raw.iter().cloned().fold(f64::MIN_POSITIVE, f64::max);

        PerSample {
            ids: indices.iter().map(|&i| self.entries[i].id).collect(),
            items: indices.iter().map(|&i| self.entries[i].item.clone()).collect(),
            weights: raw.iter().map(|w| w / max).collect(),
        }
    }

    /// Rewrite priorities from absolute errors. Ids evicted since sampling
    /// are skipped.
    pub fn update_priorities(&mut self, ids: &[u64], errors: &[f64]) {
        for (&id, error) in ids.iter().zip(errors.iter()) {
            let Some(entry) = self.position(id).and_then(|i| self.entries.get_mut(i)) else {
                continue;
            };
            let priority = if error.is_finite() {
                error.abs() + self.config.epsilon
            } else {
                self.max_priority
            };
            entry.priority = priority;
            self.max_priority = self.max_priority.max(priority);
        }
    }
}

/// Importance-sampling exponent for `epoch` out of `total_epochs`.
///
/// Linear from `beta_start` at epoch 0 to 1.0 at the final epoch and held
/// there afterwards. A run of one epoch or fewer uses full correction.
pub fn anneal_beta(epoch: usize, total_epochs: usize, beta_start: f64) -> f64 {
    if total_epochs <= 1 {
        return 1.0;
    }
    let start = beta_start.clamp(0.0, 1.0);
    let last = (total_epochs - 1) as f64;
    let progress = (epoch as f64).min(last) / last;
    (start + (1.0 - start) * progress).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn buffer(alpha: f64, items: usize) -> PerBuffer<usize> {
        let mut buffer = PerBuffer::new(PerConfig {
            capacity: 100,
            alpha,
            epsilon: 1e-3,
        });
        for i in 0..items {
            buffer.push(i);
        }
        buffer
    }

    #[test]
    fn test_batch_larger_than_buffer_returns_everything_at_weight_one() {
        let mut buffer = buffer(0.6, 5);
        buffer.update_priorities(&[0, 3], &[4.0, 0.1]);
        let mut rng = StdRng::seed_from_u64(1);

        let sample = buffer.sample(8, 0.4, &mut rng);
        assert_eq!(sample.items, vec![0, 1, 2, 3, 4]);
        assert!(sample.weights.iter().all(|w| *w == 1.0));
    }

    #[test]
    fn test_sample_is_without_replacement_and_max_weight_is_one() {
        let mut buffer = buffer(1.0, 10);
        let errors = [0.1, 0.5, 1.0, 2.0, 0.2, 0.3, 0.9, 5.0, 0.05, 1.5];
        buffer.update_priorities(&(0..10).collect::<Vec<_>>(), &errors);
        let mut rng = StdRng::seed_from_u64(7);

        let sample = buffer.sample(6, 0.5, &mut rng);
        let mut seen = sample.ids.clone();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 6);
        let max = sample.weights.iter().cloned().fold(0.0, f64::max);
        assert!((max - 1.0).abs() < 1e-12);
        assert!(sample.weights.iter().all(|w| *w > 0.0 && *w <= 1.0));
    }

    #[test]
    fn test_alpha_zero_is_uniform() {
        let mut buffer = buffer(0.0, 4);
        buffer.update_priorities(&[0, 1, 2, 3], &[100.0, 0.0, 3.0, 0.5]);
        let mut rng = StdRng::seed_from_u64(42);

        let mut counts = [0usize; 4];
        let draws = 20_000;
        for _ in 0..draws {
            let sample = buffer.sample(1, 1.0, &mut rng);
            counts[sample.ids[0] as usize] += 1;
        }
        for count in counts {
            let share = count as f64 / draws as f64;
            assert!((share - 0.25).abs() < 0.02, "share {} not uniform", share);
        }
    }

    #[test]
    fn test_high_priority_is_sampled_more_often() {
        let mut buffer = buffer(1.0, 2);
        buffer.update_priorities(&[0, 1], &[9.0, 1.0]);
        let mut rng = StdRng::seed_from_u64(3);

        let hits = (0..2_000)
            .filter(|_| buffer.sample(1, 1.0, &mut rng).ids[0] == 0)
            .count();
        assert!(hits > 1_600);
    }

    #[test]
    fn test_new_items_take_max_priority_and_oldest_evicted() {
        let mut buffer = PerBuffer::new(PerConfig {
            capacity: 2,
            alpha: 0.6,
            epsilon: 0.01,
        });
        buffer.push("a");
        buffer.update_priorities(&[0], &[3.0]);
        buffer.push("b");
        buffer.push("c");

        assert_eq!(buffer.len(), 2);
        let priorities = buffer.priorities();
        assert!((priorities[0] - 3.01).abs() < 1e-12);
        assert!((priorities[1] - 3.01).abs() < 1e-12);
    }

    #[test]
    fn test_priority_update_follows_item_across_eviction() {
        let mut buffer = PerBuffer::new(PerConfig {
            capacity: 3,
            alpha: 1.0,
            epsilon: 0.0,
        });
        for item in ["a", "b", "c"] {
            buffer.push(item);
        }
        let mut rng = StdRng::seed_from_u64(5);
        let sample = buffer.sample(3, 1.0, &mut rng);
        let b = sample.ids[sample.items.iter().position(|i| *i == "b").unwrap()];

        // Evicts "a" and shifts every position.
        buffer.push("d");
        buffer.update_priorities(&[b], &[9.0]);

        assert_eq!(buffer.priority_of(b), Some(9.0));
        let priorities = buffer.priorities();
        assert_eq!(priorities[0], 9.0);
        assert_eq!(priorities[1], 1.0);
    }

    #[test]
    fn test_update_for_evicted_item_is_ignored() {
        let mut buffer = PerBuffer::new(PerConfig {
            capacity: 1,
            alpha: 1.0,
            epsilon: 0.0,
        });
        let old = buffer.push("old");
        buffer.push("new");
        buffer.update_priorities(&[old], &[7.0]);
        assert_eq!(buffer.priority_of(old), None);
        assert_eq!(buffer.priorities(), vec![1.0]);
    }

    #[test]
    fn test_anneal_beta_endpoints() {
        for total in 2..20 {
            assert_eq!(anneal_beta(0, total, 0.4), 0.4);
            assert_eq!(anneal_beta(total - 1, total, 0.4), 1.0);
            assert_eq!(anneal_beta(total + 5, total, 0.4), 1.0);
        }
        assert_eq!(anneal_beta(0, 1, 0.4), 1.0);
        assert!((anneal_beta(1, 3, 0.4) - 0.7).abs() < 1e-12);
    }
}
