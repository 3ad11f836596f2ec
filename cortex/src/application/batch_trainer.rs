// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Batch retraining of SHGAT over historical traces with prioritised replay.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::replay_buffer::anneal_beta;
use crate::application::shgat::Shgat;
use crate::application::training_coordinator::TrainingCoordinator;
use crate::domain::errors::CortexResult;
use crate::domain::events::{CortexEvent, EventSink};
use crate::infrastructure::repository::DbClient;

pub const BATCH_RETRAIN_OWNER: &str = "batch-retrain";

#[derive(Debug, Clone, PartialEq)]
pub struct BatchTrainerConfig {
    pub trace_limit: usize,
    pub batch_size: usize,
    pub beta_start: f64,
    pub seed: u64,
    /// Name the SHGAT snapshot is stored under.
    pub snapshot_name: String,
}

impl Default for BatchTrainerConfig {
    fn default() -> Self {
        Self {
            trace_limit: 500,
            batch_size: 32,
            beta_start: 0.4,
            seed: 7,
            snapshot_name: "shgat".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrainReport {
    pub epochs: usize,
    pub traces_loaded: usize,
    pub steps: usize,
    pub mean_loss: Option<f64>,
    pub persisted: bool,
}

pub struct BatchTrainer {
    shgat: Arc<Shgat>,
    coordinator: Arc<TrainingCoordinator>,
    db: Arc<dyn DbClient>,
    events: Arc<dyn EventSink>,
    config: BatchTrainerConfig,
}

impl BatchTrainer {
    pub fn new(
        shgat: Arc<Shgat>,
        coordinator: Arc<TrainingCoordinator>,
        db: Arc<dyn DbClient>,
        events: Arc<dyn EventSink>,
        config: BatchTrainerConfig,
    ) -> Self {
        Self {
            shgat,
            coordinator,
            db,
            events,
            config,
        }
    }

    /// Retrain for `epochs` epochs.
    ///
    /// Fails with `TrainingConflict` when an execution holds the lock; the
    /// caller retries later.
    pub async fn retrain(&self, epochs: usize) -> CortexResult<RetrainReport> {
        let lease = self.coordinator.lease(BATCH_RETRAIN_OWNER)?;

        let traces = self.db.load_traces(self.config.trace_limit).await?;
        let traces_loaded = traces.len();
        let queued: usize = traces.iter().map(|t| self.coordinator.push_trace(t)).sum();
        debug!(traces = traces_loaded, queued, "Queued unseen traces for replay");

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut losses = Vec::new();
        for epoch in 0..epochs {
            let beta = anneal_beta(epoch, epochs, self.config.beta_start);
            let sample = self
                .coordinator
                .replay()
                .sample(self.config.batch_size, beta, &mut rng);
            if sample.is_empty() {
                break;
            }

            let mut errors = Vec::with_capacity(sample.len());
            for (example, weight) in sample.items.iter().zip(sample.weights.iter()) {
                match self.shgat.train_weighted(&lease, example, *weight) {
                    Ok(step) => {
                        errors.push((step.prediction - example.outcome).abs());
                        losses.push(step.loss_after);
                    }
                    Err(e) => {
                        debug!(candidate = %example.candidate_id, error = %e, "Skipping example");
                        errors.push(0.0);
                    }
                }
            }
            self.coordinator
                .replay()
                .update_priorities(&sample.ids, &errors);
            debug!(epoch, beta, batch = sample.len(), "Retrain epoch finished");
        }

        let persisted = match serde_json::to_value(self.shgat.export_params()) {
            Ok(value) => match self
                .db
                .save_model_params(&self.config.snapshot_name, &value)
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Failed to persist SHGAT snapshot");
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "Failed to serialise SHGAT snapshot");
                false
            }
        };
        drop(lease);

        let mean_loss = if losses.is_empty() {
            None
        } else {
            Some(losses.iter().sum::<f64>() / losses.len() as f64)
        };
        if let Some(mean_loss) = mean_loss {
            self.events.publish_cortex(CortexEvent::ModelTrained {
                owner: BATCH_RETRAIN_OWNER.to_string(),
                examples: losses.len(),
                mean_loss,
                timestamp: Utc::now(),
            });
        }
        info!(
            epochs,
            traces = traces_loaded,
            steps = losses.len(),
            persisted,
            "Batch retrain complete"
        );
        Ok(RetrainReport {
            epochs,
            traces_loaded,
            steps: losses.len(),
            mean_loss,
            persisted,
        })
    }

    /// Load the persisted snapshot into SHGAT. Returns false when none exists.
    pub async fn restore_model(&self) -> CortexResult<bool> {
        let Some(value) = self
            .db
            .load_model_params(&self.config.snapshot_name)
            .await?
        else {
            return Ok(false);
        };
        let lease = self.coordinator.lease(BATCH_RETRAIN_OWNER)?;
        self.shgat.import_json(&lease, value)?;
        info!(snapshot = %self.config.snapshot_name, "Restored SHGAT snapshot");
        Ok(true)
    }
}
