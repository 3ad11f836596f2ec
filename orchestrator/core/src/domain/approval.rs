// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Human decisions the executor can suspend on: layer checkpoints and
//! permission escalations.

use serde::{Deserialize, Serialize};

use crate::domain::permission::PermissionEscalationRequest;
use crate::domain::workflow::TaskId;

/// Preview entry for a task in the next layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub task_id: TaskId,
    pub tool: String,
}

/// State of a run after a layer, shown to the approver at a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub layer: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub next_layer: Vec<PlannedTask>,
}

impl CheckpointSummary {
    pub fn text(&self) -> String {
        let preview = if self.next_layer.is_empty() {
            "nothing".to_string()
        } else {
            self.next_layer
                .iter()
                .map(|t| format!("{} ({})", t.task_id, t.tool))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "Layer {} finished: {} completed, {} failed, {} skipped. Next: {}",
            self.layer, self.completed, self.failed, self.skipped, preview
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalKind {
    Checkpoint { summary: CheckpointSummary, text: String },
    PermissionEscalation { request: PermissionEscalationRequest },
}

impl ApprovalKind {
    pub fn checkpoint(summary: CheckpointSummary) -> Self {
        let text = summary.text();
        ApprovalKind::Checkpoint { summary, text }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ApprovalKind::Checkpoint { .. } => "checkpoint",
            ApprovalKind::PermissionEscalation { .. } => "permission_escalation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved {
        approved_by: Option<String>,
        feedback: Option<String>,
    },
    Rejected {
        rejected_by: Option<String>,
        reason: String,
    },
    /// The run was aborted while the request was pending.
    Cancelled,
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::Approved { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_text_previews_next_layer() {
        let kind = ApprovalKind::checkpoint(CheckpointSummary {
            layer: 0,
            completed: 2,
            failed: 1,
            skipped: 0,
            next_layer: vec![PlannedTask {
                task_id: "send".into(),
                tool: "mail:send".to_string(),
            }],
        });
        let ApprovalKind::Checkpoint { text, .. } = kind else {
            panic!("expected checkpoint");
        };
        assert_eq!(
            text,
            "Layer 0 finished: 2 completed, 1 failed, 0 skipped. Next: send (mail:send)"
        );
    }
}
