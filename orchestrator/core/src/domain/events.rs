// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{ApprovalDecision, ApprovalKind};
use crate::domain::errors::TaskError;
use crate::domain::workflow::{LayerOutcome, RunId, RunStatus, TaskId};

/// Run lifecycle events emitted by the controlled executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunStarted {
        run_id: RunId,
        task_count: usize,
        layer_count: usize,
        started_at: DateTime<Utc>,
    },
    LayerStarted {
        run_id: RunId,
        layer: usize,
        task_ids: Vec<TaskId>,
        started_at: DateTime<Utc>,
    },
    TaskStarted {
        run_id: RunId,
        task_id: TaskId,
        tool: String,
        attempt: u32,
        started_at: DateTime<Utc>,
    },
    TaskRetrying {
        run_id: RunId,
        task_id: TaskId,
        attempt: u32,
        error: TaskError,
    },
    TaskCompleted {
        run_id: RunId,
        task_id: TaskId,
        attempts: u32,
        duration_ms: u64,
        completed_at: DateTime<Utc>,
    },
    TaskFailed {
        run_id: RunId,
        task_id: TaskId,
        attempts: u32,
        error: TaskError,
        failed_at: DateTime<Utc>,
    },
    TaskSkipped {
        run_id: RunId,
        task_id: TaskId,
        reason: TaskError,
    },
    LayerCompleted {
        run_id: RunId,
        layer: usize,
        outcome: LayerOutcome,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        completed_at: DateTime<Utc>,
    },
    /// The run is suspended until an external approver answers.
    DecisionRequired {
        run_id: RunId,
        request_id: Uuid,
        approval: ApprovalKind,
        requested_at: DateTime<Utc>,
    },
    DecisionResolved {
        run_id: RunId,
        request_id: Uuid,
        decision: ApprovalDecision,
        resolved_at: DateTime<Utc>,
    },
    Heartbeat {
        run_id: RunId,
        layer: usize,
        running: usize,
        completed: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// Speculative ranking for a layer compared with what actually ran.
    SpeculationEvaluated {
        run_id: RunId,
        layer: usize,
        predicted: Vec<String>,
        hits: usize,
        /// Thresholds after this layer's outcomes were recorded.
        suggestion_threshold: f64,
        explicit_threshold: f64,
    },
    WorkflowExecuted {
        run_id: RunId,
        status: RunStatus,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
        completed_at: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            WorkflowEvent::RunStarted { run_id, .. }
            | WorkflowEvent::LayerStarted { run_id, .. }
            | WorkflowEvent::TaskStarted { run_id, .. }
            | WorkflowEvent::TaskRetrying { run_id, .. }
            | WorkflowEvent::TaskCompleted { run_id, .. }
            | WorkflowEvent::TaskFailed { run_id, .. }
            | WorkflowEvent::TaskSkipped { run_id, .. }
            | WorkflowEvent::LayerCompleted { run_id, .. }
            | WorkflowEvent::DecisionRequired { run_id, .. }
            | WorkflowEvent::DecisionResolved { run_id, .. }
            | WorkflowEvent::Heartbeat { run_id, .. }
            | WorkflowEvent::SpeculationEvaluated { run_id, .. }
            | WorkflowEvent::WorkflowExecuted { run_id, .. } => *run_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::RunStarted { .. } => "run_started",
            WorkflowEvent::LayerStarted { .. } => "layer_started",
            WorkflowEvent::TaskStarted { .. } => "task_started",
            WorkflowEvent::TaskRetrying { .. } => "task_retrying",
            WorkflowEvent::TaskCompleted { .. } => "task_completed",
            WorkflowEvent::TaskFailed { .. } => "task_failed",
            WorkflowEvent::TaskSkipped { .. } => "task_skipped",
            WorkflowEvent::LayerCompleted { .. } => "layer_completed",
            WorkflowEvent::DecisionRequired { .. } => "decision_required",
            WorkflowEvent::DecisionResolved { .. } => "decision_resolved",
            WorkflowEvent::Heartbeat { .. } => "heartbeat",
            WorkflowEvent::SpeculationEvaluated { .. } => "speculation_evaluated",
            WorkflowEvent::WorkflowExecuted { .. } => "workflow_executed",
        }
    }
}
