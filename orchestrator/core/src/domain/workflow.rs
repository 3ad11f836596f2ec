// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Domain Model
//!
//! A workflow is a DAG of tool invocations. The DAG is validated once at
//! construction and leveled into layers: every task in layer `n` depends only
//! on tasks in layers `< n`, so a layer can run concurrently once its
//! predecessors are terminal.
//!
//! # Architectural Context
//!
//! - **Bounded Context:** Execution Context
//! - **Aggregate Root:** WorkflowDag
//!
//! # Design Principles
//!
//! 1. **Immutability:** tasks and layers never change after planning
//! 2. **Self-Validating:** `WorkflowDag::new` rejects duplicates, unknown
//!    dependencies and cycles
//! 3. **Determinism:** order within a layer follows declaration order

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::errors::TaskError;

// ============================================================================
// Value Objects: Identifiers
// ============================================================================

/// Unique identifier for one execution of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task identifier, unique within one DAG.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tasks and the DAG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub id: TaskId,
    /// Capability or tool id handed to the `ToolExecutor`.
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub depends_on: BTreeSet<TaskId>,
}

impl WorkflowTask {
    pub fn new(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            tool: tool.into(),
            args: serde_json::Value::Null,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(TaskId::new));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("workflow has no tasks")]
    Empty,

    #[error("duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("dependency cycle through tasks: {0:?}")]
    Cycle(Vec<TaskId>),
}

/// Validated, leveled workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDag {
    tasks: Vec<WorkflowTask>,
    layers: Vec<Vec<TaskId>>,
    #[serde(skip)]
    positions: HashMap<TaskId, usize>,
    #[serde(skip)]
    layer_of: HashMap<TaskId, usize>,
}

impl WorkflowDag {
    pub fn new(tasks: Vec<WorkflowTask>) -> Result<Self, DagError> {
        if tasks.is_empty() {
            return Err(DagError::Empty);
        }

        let mut positions = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if positions.insert(task.id.clone(), i).is_some() {
                return Err(DagError::DuplicateTask(task.id.clone()));
            }
        }
        for task in &tasks {
            if let Some(missing) = task.depends_on.iter().find(|d| !positions.contains_key(*d)) {
                return Err(DagError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let layers = Self::level(&tasks)?;
        let layer_of = layers
            .iter()
            .enumerate()
            .flat_map(|(n, layer)| layer.iter().map(move |id| (id.clone(), n)))
            .collect();

        Ok(Self {
            tasks,
            layers,
            positions,
            layer_of,
        })
    }

    /// Kahn levels. Each round takes every remaining task whose dependencies
    /// are all placed, in declaration order.
    fn level(tasks: &[WorkflowTask]) -> Result<Vec<Vec<TaskId>>, DagError> {
        let mut placed: HashSet<&TaskId> = HashSet::with_capacity(tasks.len());
        let mut remaining: Vec<&WorkflowTask> = tasks.iter().collect();
        let mut layers = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&WorkflowTask>, Vec<&WorkflowTask>) = remaining
                .into_iter()
                .partition(|t| t.depends_on.iter().all(|d| placed.contains(d)));
            if ready.is_empty() {
                return Err(DagError::Cycle(blocked.iter().map(|t| t.id.clone()).collect()));
            }
            placed.extend(ready.iter().map(|t| &t.id));
            layers.push(ready.iter().map(|t| t.id.clone()).collect());
            remaining = blocked;
        }
        Ok(layers)
    }

    pub fn tasks(&self) -> &[WorkflowTask] {
        &self.tasks
    }

    pub fn task(&self, id: &TaskId) -> Option<&WorkflowTask> {
        self.positions.get(id).map(|i| &self.tasks[*i])
    }

    pub fn layers(&self) -> &[Vec<TaskId>] {
        &self.layers
    }

    pub fn layer_of(&self, id: &TaskId) -> Option<usize> {
        self.layer_of.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every task that depends on `id`, directly or transitively, in
    /// declaration order.
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        let mut reached: HashSet<&TaskId> = HashSet::new();
        let mut queue: VecDeque<&TaskId> = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for task in &self.tasks {
                if task.depends_on.contains(current) && reached.insert(&task.id) {
                    queue.push_back(&task.id);
                }
            }
        }
        self.tasks
            .iter()
            .filter(|t| reached.contains(&t.id))
            .map(|t| t.id.clone())
            .collect()
    }
}

// ============================================================================
// Run state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Error,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Error | TaskStatus::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Planned,
    Running,
    AwaitingApproval,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerOutcome {
    AllSuccess,
    PartialFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub tool: String,
    pub layer: usize,
    pub status: TaskStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<TaskError>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl TaskResult {
    fn pending(task: &WorkflowTask, layer: usize) -> Self {
        Self {
            task_id: task.id.clone(),
            tool: task.tool.clone(),
            layer,
            status: TaskStatus::Pending,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
        }
    }
}

/// Per-run task results, kept in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: RunId,
    pub status: RunStatus,
    pub results: Vec<TaskResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(run_id: RunId, dag: &WorkflowDag) -> Self {
        let results = dag
            .tasks()
            .iter()
            .map(|t| TaskResult::pending(t, dag.layer_of(&t.id).unwrap_or_default()))
            .collect();
        Self {
            run_id,
            status: RunStatus::Planned,
            results,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn result(&self, id: &TaskId) -> Option<&TaskResult> {
        self.results.iter().find(|r| &r.task_id == id)
    }

    pub fn status_of(&self, id: &TaskId) -> Option<TaskStatus> {
        self.result(id).map(|r| r.status)
    }

    pub fn mark_running(&mut self, id: &TaskId) {
        if let Some(result) = self.results.iter_mut().find(|r| &r.task_id == id) {
            result.status = TaskStatus::Running;
            result.started_at.get_or_insert_with(Utc::now);
        }
    }

    /// Replace a task's result. Terminal results are final.
    pub fn record(&mut self, result: TaskResult) {
        if let Some(slot) = self.results.iter_mut().find(|r| r.task_id == result.task_id) {
            if !slot.status.is_terminal() {
                *slot = result;
            }
        }
    }

    /// Mark a non-terminal task skipped. Returns false if it was already terminal.
    pub fn skip(&mut self, id: &TaskId, reason: TaskError) -> bool {
        let Some(slot) = self.results.iter_mut().find(|r| &r.task_id == id) else {
            return false;
        };
        if slot.status.is_terminal() {
            return false;
        }
        slot.status = TaskStatus::Skipped;
        slot.error = Some(reason);
        slot.finished_at = Some(Utc::now());
        true
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn duration_ms(&self) -> u64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(layer: &[TaskId]) -> Vec<&str> {
        layer.iter().map(|t| t.as_str()).collect()
    }

    #[test]
    fn test_layers_follow_dependencies_and_declaration_order() {
        let dag = WorkflowDag::new(vec![
            WorkflowTask::new("c", "fs:write").depends_on(["a", "b"]),
            WorkflowTask::new("b", "http:get"),
            WorkflowTask::new("a", "fs:read"),
            WorkflowTask::new("d", "mail:send").depends_on(["a"]),
        ])
        .unwrap();

        assert_eq!(dag.layers().len(), 2);
        assert_eq!(ids(&dag.layers()[0]), vec!["b", "a"]);
        assert_eq!(ids(&dag.layers()[1]), vec!["c", "d"]);
        assert_eq!(dag.layer_of(&TaskId::from("d")), Some(1));
    }

    #[test]
    fn test_invalid_dags_are_rejected() {
        assert_eq!(WorkflowDag::new(vec![]).unwrap_err(), DagError::Empty);

        let duplicate = WorkflowDag::new(vec![
            WorkflowTask::new("a", "x"),
            WorkflowTask::new("a", "y"),
        ]);
        assert_eq!(duplicate.unwrap_err(), DagError::DuplicateTask("a".into()));

        let unknown = WorkflowDag::new(vec![WorkflowTask::new("a", "x").depends_on(["ghost"])]);
        assert!(matches!(unknown, Err(DagError::UnknownDependency { .. })));

        let cycle = WorkflowDag::new(vec![
            WorkflowTask::new("root", "x"),
            WorkflowTask::new("a", "x").depends_on(["b"]),
            WorkflowTask::new("b", "x").depends_on(["a"]),
        ]);
        assert_eq!(
            cycle.unwrap_err(),
            DagError::Cycle(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let result = WorkflowDag::new(vec![WorkflowTask::new("a", "x").depends_on(["a"])]);
        assert!(matches!(result, Err(DagError::Cycle(_))));
    }

    #[test]
    fn test_dependents_are_transitive() {
        let dag = WorkflowDag::new(vec![
            WorkflowTask::new("a", "x"),
            WorkflowTask::new("b", "x").depends_on(["a"]),
            WorkflowTask::new("c", "x").depends_on(["b"]),
            WorkflowTask::new("d", "x"),
        ])
        .unwrap();

        let dependents = dag.dependents(&"a".into());
        assert_eq!(dependents, vec![TaskId::from("b"), TaskId::from("c")]);
        assert!(dag.dependents(&"d".into()).is_empty());
    }

    #[test]
    fn test_terminal_results_are_final() {
        let dag = WorkflowDag::new(vec![WorkflowTask::new("a", "x")]).unwrap();
        let mut state = WorkflowState::new(RunId::new(), &dag);
        let id = TaskId::from("a");

        state.mark_running(&id);
        assert_eq!(state.status_of(&id), Some(TaskStatus::Running));
        assert!(state.skip(&id, TaskError::Cancelled));
        assert!(!state.skip(&id, TaskError::Cancelled));

        let mut late = state.result(&id).unwrap().clone();
        late.status = TaskStatus::Success;
        state.record(late);
        assert_eq!(state.status_of(&id), Some(TaskStatus::Skipped));
    }
}
