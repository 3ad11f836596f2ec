// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Learning inputs: training examples and execution traces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One supervised signal for the SHGAT scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub intent_embedding: Vec<f32>,
    pub context_tools: Vec<String>,
    pub candidate_id: String,
    /// Target relevance in [0, 1].
    pub outcome: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Error,
    Skipped,
}

/// One task of a finished run, as recorded for learning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub task_id: String,
    pub tool: String,
    pub layer: usize,
    pub outcome: StepOutcome,
    pub attempts: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Durable record of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_embedding: Option<Vec<f32>>,
    pub steps: Vec<TraceStep>,
    /// Dependency edges between tasks, as (from tool, to tool, to task id).
    pub transitions: Vec<TraceTransition>,
    pub succeeded: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceTransition {
    pub from_tool: String,
    pub to_tool: String,
    pub to_task: String,
}

impl ExecutionTrace {
    pub fn step(&self, task_id: &str) -> Option<&TraceStep> {
        self.steps.iter().find(|s| s.task_id == task_id)
    }

    /// Derive SHGAT training examples from this trace.
    ///
    /// Context for a step is every tool that finished successfully in an
    /// earlier layer. Skipped steps carry no signal and are ignored. Returns
    /// nothing when the run has no intent embedding.
    pub fn training_examples(&self) -> Vec<TrainingExample> {
        let Some(intent) = self.intent_embedding.as_ref() else {
            return Vec::new();
        };

        self.steps
            .iter()
            .filter(|step| step.outcome != StepOutcome::Skipped)
            .map(|step| {
                let context_tools = self
                    .steps
                    .iter()
                    .filter(|s| s.layer < step.layer && s.outcome == StepOutcome::Success)
                    .map(|s| s.tool.clone())
                    .collect();
                TrainingExample {
                    intent_embedding: intent.clone(),
                    context_tools,
                    candidate_id: step.tool.clone(),
                    outcome: if step.outcome == StepOutcome::Success { 1.0 } else { 0.0 },
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, tool: &str, layer: usize, outcome: StepOutcome) -> TraceStep {
        TraceStep {
            task_id: id.to_string(),
            tool: tool.to_string(),
            layer,
            outcome,
            attempts: 1,
            duration_ms: 5,
            error: None,
        }
    }

    #[test]
    fn test_training_examples_use_earlier_successes_as_context() {
        let now = Utc::now();
        let trace = ExecutionTrace {
            run_id: Uuid::new_v4(),
            intent: Some("summarise logs".to_string()),
            intent_embedding: Some(vec![1.0, 0.0]),
            steps: vec![
                step("a", "fs:read", 0, StepOutcome::Success),
                step("b", "text:summarise", 1, StepOutcome::Error),
                step("c", "mail:send", 2, StepOutcome::Skipped),
            ],
            transitions: vec![],
            succeeded: false,
            started_at: now,
            finished_at: now,
        };

        let examples = trace.training_examples();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].candidate_id, "fs:read");
        assert!(examples[0].context_tools.is_empty());
        assert_eq!(examples[0].outcome, 1.0);
        assert_eq!(examples[1].candidate_id, "text:summarise");
        assert_eq!(examples[1].context_tools, vec!["fs:read".to_string()]);
        assert_eq!(examples[1].outcome, 0.0);
    }

    #[test]
    fn test_no_examples_without_intent() {
        let now = Utc::now();
        let trace = ExecutionTrace {
            run_id: Uuid::new_v4(),
            intent: None,
            intent_embedding: None,
            steps: vec![step("a", "fs:read", 0, StepOutcome::Success)],
            transitions: vec![],
            succeeded: true,
            started_at: now,
            finished_at: now,
        };
        assert!(trace.training_examples().is_empty());
    }
}
