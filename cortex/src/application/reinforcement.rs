// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Reinforcement
//!
//! Folds one finished run back into the learned state:
//!
//! 1. every dependency transition nudges its edge confidence toward the
//!    outcome of the downstream task,
//! 2. capability usage counts and success rates are updated,
//! 3. training examples derived from the trace are queued for replay once per run,
//! 4. if the training lock is free, SHGAT takes one step per example.
//!
//! A held training lock is not an error here: the examples stay queued and
//! the next batch retrain consumes them.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::graph_engine::GraphRagEngine;
use crate::application::shgat::Shgat;
use crate::application::training_coordinator::TrainingCoordinator;
use crate::domain::errors::{CortexError, CortexResult};
use crate::domain::events::{CortexEvent, EventSink};
use crate::domain::training::{ExecutionTrace, StepOutcome};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReinforcementReport {
    pub transitions_observed: usize,
    pub capabilities_updated: usize,
    pub examples_queued: usize,
    /// False when the training lock was held elsewhere.
    pub trained: bool,
    pub mean_loss: Option<f64>,
}

pub struct ExecutionReinforcer {
    engine: Arc<GraphRagEngine>,
    shgat: Arc<Shgat>,
    coordinator: Arc<TrainingCoordinator>,
    events: Arc<dyn EventSink>,
}

impl ExecutionReinforcer {
    pub fn new(
        engine: Arc<GraphRagEngine>,
        shgat: Arc<Shgat>,
        coordinator: Arc<TrainingCoordinator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            engine,
            shgat,
            coordinator,
            events,
        }
    }

    pub async fn reinforce(&self, trace: &ExecutionTrace) -> CortexResult<ReinforcementReport> {
        let mut report = ReinforcementReport::default();

        for transition in &trace.transitions {
            let Some(step) = trace.step(&transition.to_task) else {
                continue;
            };
            if step.outcome == StepOutcome::Skipped {
                continue;
            }
            let success = step.outcome == StepOutcome::Success;
            match self
                .engine
                .observe_transition(&transition.from_tool, &transition.to_tool, success)
                .await
            {
                Ok(_) => report.transitions_observed += 1,
                Err(e) => warn!(
                    run_id = %trace.run_id,
                    from = %transition.from_tool,
                    to = %transition.to_tool,
                    error = %e,
                    "Failed to observe transition"
                ),
            }
        }

        for step in trace.steps.iter().filter(|s| s.outcome != StepOutcome::Skipped) {
            let success = step.outcome == StepOutcome::Success;
            match self.engine.record_capability_usage(&step.tool, success).await {
                Ok(true) => report.capabilities_updated += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    run_id = %trace.run_id,
                    capability = %step.tool,
                    error = %e,
                    "Failed to record capability usage"
                ),
            }
        }

        report.examples_queued = self.coordinator.push_trace(trace);
        if report.examples_queued == 0 {
            return Ok(report);
        }
        let examples = trace.training_examples();

        let owner = format!("execution:{}", trace.run_id);
        let lease = match self.coordinator.lease(&owner) {
            Ok(lease) => lease,
            Err(CortexError::TrainingConflict { holder, .. }) => {
                info!(
                    run_id = %trace.run_id,
                    holder = %holder,
                    queued = report.examples_queued,
                    "Training lock held, deferring reinforcement to replay"
                );
                metrics::counter!("strata_training_deferred_total").increment(1);
                return Ok(report);
            }
            Err(e) => return Err(e),
        };

        let mut losses = Vec::with_capacity(examples.len());
        for example in &examples {
            match self.shgat.train_on_example(&lease, example) {
                Ok(step) => losses.push(step.loss_after),
                Err(e) => debug!(
                    candidate = %example.candidate_id,
                    error = %e,
                    "Skipping example"
                ),
            }
        }
        drop(lease);

        report.trained = !losses.is_empty();
        if report.trained {
            let mean_loss = losses.iter().sum::<f64>() / losses.len() as f64;
            report.mean_loss = Some(mean_loss);
            self.events.publish_cortex(CortexEvent::ModelTrained {
                owner,
                examples: losses.len(),
                mean_loss,
                timestamp: Utc::now(),
            });
        }
        Ok(report)
    }
}
