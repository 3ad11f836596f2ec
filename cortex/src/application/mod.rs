// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Application services for the Cortex bounded context

pub mod batch_trainer;
pub mod graph_algorithms;
pub mod graph_engine;
pub mod reinforcement;
pub mod replay_buffer;
pub mod shgat;
pub mod threshold_manager;
pub mod training_coordinator;

pub use batch_trainer::{BatchTrainer, BatchTrainerConfig, RetrainReport};
pub use graph_engine::{GraphEngineConfig, GraphRagEngine, SyncReport};
pub use reinforcement::{ExecutionReinforcer, ReinforcementReport};
pub use replay_buffer::{anneal_beta, PerBuffer, PerConfig, PerSample};
pub use shgat::{ScoredCandidate, Shgat, ShgatConfig, ShgatParams, TrainStep};
pub use threshold_manager::{
    AdaptiveThresholdManager, SuggestionMode, ThresholdConfig, Thresholds,
};
pub use training_coordinator::{TrainingCoordinator, TrainingLease};
