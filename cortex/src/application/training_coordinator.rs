// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Serialises SHGAT weight updates between batch retraining and
//! per-execution reinforcement.
//!
//! The coordinator is constructed by whoever composes the executor and the
//! recommender and shared through an `Arc`. Acquisition never blocks; a caller
//! that loses the race backs off and retries later. It also owns the replay
//! buffer both producers feed.

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::application::replay_buffer::{PerBuffer, PerConfig};
use crate::domain::errors::CortexError;
use crate::domain::training::{ExecutionTrace, TrainingExample};

#[derive(Debug)]
pub struct TrainingCoordinator {
    holder: Mutex<Option<String>>,
    replay: Mutex<PerBuffer<TrainingExample>>,
    /// Runs whose examples already entered the replay buffer.
    ingested: Mutex<HashSet<Uuid>>,
}

impl Default for TrainingCoordinator {
    fn default() -> Self {
        Self::with_replay(PerConfig::default())
    }
}

impl TrainingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replay(config: PerConfig) -> Self {
        Self {
            holder: Mutex::new(None),
            replay: Mutex::new(PerBuffer::new(config)),
            ingested: Mutex::new(HashSet::new()),
        }
    }

    /// Queue examples for replay. Needs no lease.
    pub fn push_examples(&self, examples: impl IntoIterator<Item = TrainingExample>) -> usize {
        let mut replay = self.replay.lock();
        for example in examples {
            replay.push(example);
        }
        replay.len()
    }

    /// Queue the examples of `trace` once per run id. Returns how many were
    /// queued; zero when the run was ingested before.
    pub fn push_trace(&self, trace: &ExecutionTrace) -> usize {
        if !self.ingested.lock().insert(trace.run_id) {
            debug!(run_id = %trace.run_id, "Trace already queued for replay");
            return 0;
        }
        let examples = trace.training_examples();
        let queued = examples.len();
        self.push_examples(examples);
        queued
    }

    pub fn is_ingested(&self, run_id: Uuid) -> bool {
        self.ingested.lock().contains(&run_id)
    }

    pub fn replay(&self) -> MutexGuard<'_, PerBuffer<TrainingExample>> {
        self.replay.lock()
    }

    /// Returns false when another owner holds the lock. Re-acquiring as the
    /// current holder succeeds.
    pub fn acquire(&self, owner: &str) -> bool {
        let mut holder = self.holder.lock();
        match holder.as_deref() {
            None => {
                *holder = Some(owner.to_string());
                true
            }
            Some(current) => current == owner,
        }
    }

    /// Releases only when `owner` is the current holder. A stale release from
    /// a superseded owner is ignored.
    pub fn release(&self, owner: &str) {
        let mut holder = self.holder.lock();
        match holder.as_deref() {
            Some(current) if current == owner => {
                *holder = None;
            }
            current => {
                debug!(owner, holder = ?current, "Ignoring release from non-holder");
            }
        }
    }

    pub fn holder(&self) -> Option<String> {
        self.holder.lock().clone()
    }

    pub fn is_held_by(&self, owner: &str) -> bool {
        self.holder.lock().as_deref() == Some(owner)
    }

    /// Acquire as `owner` and wrap the hold in a guard released on drop.
    pub fn lease(self: &Arc<Self>, owner: &str) -> Result<TrainingLease, CortexError> {
        let mut holder = self.holder.lock();
        let acquired = match holder.as_deref() {
            None => {
                *holder = Some(owner.to_string());
                true
            }
            Some(current) if current == owner => false,
            Some(current) => {
                return Err(CortexError::TrainingConflict {
                    holder: current.to_string(),
                    requested_by: owner.to_string(),
                });
            }
        };
        Ok(TrainingLease {
            coordinator: self.clone(),
            owner: owner.to_string(),
            acquired,
        })
    }
}

/// Proof of holding the training lock. Weight mutations take one by reference.
///
/// A lease that re-entered a lock already held by its owner leaves the
/// release to the outer holder.
#[derive(Debug)]
pub struct TrainingLease {
    coordinator: Arc<TrainingCoordinator>,
    owner: String,
    acquired: bool,
}

impl TrainingLease {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_valid_for(&self, coordinator: &Arc<TrainingCoordinator>) -> bool {
        Arc::ptr_eq(&self.coordinator, coordinator) && coordinator.is_held_by(&self.owner)
    }
}

impl Drop for TrainingLease {
    fn drop(&mut self) {
        if self.acquired {
            self.coordinator.release(&self.owner);
        }
    }
}
