// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Adaptive decision thresholds for suggestions.
//!
//! A suggestion whose confidence clears `suggestion_threshold` may be acted on
//! speculatively; one that clears only `explicit_threshold` is surfaced for
//! explicit confirmation; anything lower is withheld.
//!
//! After every outcome each threshold moves by
//! `learning_rate * (false_positive_share - false_negative_share)` measured
//! over the recent window, so one step never exceeds the learning rate.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub suggestion_threshold: f64,
    pub explicit_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionMode {
    Speculate,
    ExplicitConfirm,
    Withhold,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdConfig {
    pub initial: Thresholds,
    pub learning_rate: f64,
    pub window_size: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            initial: Thresholds {
                suggestion_threshold: 0.7,
                explicit_threshold: 0.5,
            },
            learning_rate: 0.05,
            window_size: 50,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    confidence: f64,
    accepted: bool,
}

struct ThresholdState {
    thresholds: Thresholds,
    window: VecDeque<Outcome>,
}

pub struct AdaptiveThresholdManager {
    config: ThresholdConfig,
    state: Mutex<ThresholdState>,
}

impl AdaptiveThresholdManager {
    pub fn new(config: ThresholdConfig) -> Self {
        let thresholds = Thresholds {
            suggestion_threshold: config.initial.suggestion_threshold.clamp(0.0, 1.0),
            explicit_threshold: config.initial.explicit_threshold.clamp(0.0, 1.0),
        };
        Self {
            config: ThresholdConfig {
                learning_rate: config.learning_rate.clamp(0.0, 1.0),
                window_size: config.window_size.max(1),
                ..config
            },
            state: Mutex::new(ThresholdState {
                thresholds,
                window: VecDeque::new(),
            }),
        }
    }

    pub fn get_thresholds(&self) -> Thresholds {
        self.state.lock().thresholds
    }

    pub fn decide(&self, confidence: f64) -> SuggestionMode {
        let thresholds = self.get_thresholds();
        if confidence >= thresholds.suggestion_threshold {
            SuggestionMode::Speculate
        } else if confidence >= thresholds.explicit_threshold {
            SuggestionMode::ExplicitConfirm
        } else {
            SuggestionMode::Withhold
        }
    }

    fn step(window: &VecDeque<Outcome>, threshold: f64, learning_rate: f64) -> f64 {
        let total = window.len() as f64;
        if total == 0.0 {
            return threshold;
        }
        // Passed the threshold but rejected.
        let false_positives = window
            .iter()
            .filter(|o| o.confidence >= threshold && !o.accepted)
            .count() as f64;
        // Fell short of the threshold but accepted.
        let false_negatives = window
            .iter()
            .filter(|o| o.confidence < threshold && o.accepted)
            .count() as f64;
        let delta = learning_rate * (false_positives - false_negatives) / total;
        (threshold + delta).clamp(0.0, 1.0)
    }

    /// Record whether a suggestion made at `confidence` was accepted and
    /// adapt both thresholds.
    pub fn record_outcome(&self, confidence: f64, accepted: bool) -> Thresholds {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let mut state = self.state.lock();
        state.window.push_back(Outcome {
            confidence,
            accepted,
        });
        while state.window.len() > self.config.window_size {
            state.window.pop_front();
        }

        let lr = self.config.learning_rate;
        let next = Thresholds {
            suggestion_threshold: Self::step(&state.window, state.thresholds.suggestion_threshold, lr),
            explicit_threshold: Self::step(&state.window, state.thresholds.explicit_threshold, lr),
        };
        debug!(
            confidence,
            accepted,
            suggestion = next.suggestion_threshold,
            explicit = next.explicit_threshold,
            "Thresholds adjusted"
        );
        state.thresholds = next;
        next
    }

    pub fn window_len(&self) -> usize {
        self.state.lock().window.len()
    }
}

impl Default for AdaptiveThresholdManager {
    fn default() -> Self {
        Self::new(ThresholdConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_above_threshold_raise_it() {
        let manager = AdaptiveThresholdManager::default();
        let before = manager.get_thresholds();

        let after = manager.record_outcome(0.9, false);
        assert!(after.suggestion_threshold > before.suggestion_threshold);
        assert!(after.explicit_threshold > before.explicit_threshold);
    }

    #[test]
    fn test_acceptances_below_threshold_lower_it() {
        let manager = AdaptiveThresholdManager::default();
        let after = manager.record_outcome(0.6, true);

        assert!(after.suggestion_threshold < 0.7);
        // 0.6 already clears the explicit threshold, so it holds.
        assert_eq!(after.explicit_threshold, 0.5);
    }

    #[test]
    fn test_steps_are_bounded_and_in_range() {
        let manager = AdaptiveThresholdManager::new(ThresholdConfig {
            initial: Thresholds {
                suggestion_threshold: 0.98,
                explicit_threshold: 0.02,
            },
            learning_rate: 0.1,
            window_size: 5,
        });

        let mut previous = manager.get_thresholds();
        for i in 0..200 {
            let confidence = (i % 11) as f64 / 10.0;
            let next = manager.record_outcome(confidence, i % 3 == 0);
            assert!((0.0..=1.0).contains(&next.suggestion_threshold));
            assert!((0.0..=1.0).contains(&next.explicit_threshold));
            assert!((next.suggestion_threshold - previous.suggestion_threshold).abs() <= 0.1 + 1e-12);
            assert!((next.explicit_threshold - previous.explicit_threshold).abs() <= 0.1 + 1e-12);
            previous = next;
        }
        assert_eq!(manager.window_len(), 5);
    }

    #[test]
    fn test_decide_bands() {
        let manager = AdaptiveThresholdManager::default();
        assert_eq!(manager.decide(0.95), SuggestionMode::Speculate);
        assert_eq!(manager.decide(0.6), SuggestionMode::ExplicitConfirm);
        assert_eq!(manager.decide(0.1), SuggestionMode::Withhold);
    }

    #[test]
    fn test_consistent_rejections_saturate_at_one() {
        let manager = AdaptiveThresholdManager::new(ThresholdConfig {
            learning_rate: 0.5,
            ..Default::default()
        });
        for _ in 0..100 {
            manager.record_outcome(1.0, false);
        }
        assert_eq!(manager.get_thresholds().suggestion_threshold, 1.0);
    }
}
