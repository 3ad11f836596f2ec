// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Controlled Executor
//!
//! Runs a [`WorkflowDag`] layer by layer:
//!
//! ```text
//! Planned -> Running -> (per layer: Executing -> AllSuccess | PartialFailure)
//!         -> Completed | Aborted        (AwaitingApproval while suspended)
//! ```
//!
//! - Layers are strictly sequential; a layer starts only once every task of
//!   the previous one is terminal.
//! - Within a layer a semaphore bounds concurrency.
//! - Each attempt is bounded by the task timeout. Timeouts and tool errors
//!   are retried up to `max_retries`, and only for idempotent capabilities.
//! - A permission denial suspends that branch on an escalation request.
//!   Approval upgrades the capability and retries once; rejection fails the
//!   task and skips its dependents. Other branches keep running.
//! - With checkpoints enabled the run suspends after every non-final layer;
//!   a rejection aborts the run.
//! - Aborting cancels in-flight attempts and skips every non-terminal task.
//!
//! Every run ends with a `workflow_executed` event, a persisted
//! [`ExecutionTrace`] and, when wired, a reinforcement pass.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Collaborators:** ToolExecutor, CapabilityRegistry, ApprovalGateway,
//!   EventBus, DbClient, ExecutionReinforcer, DagSuggester

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strata_cortex::application::{ExecutionReinforcer, ReinforcementReport};
use strata_cortex::domain::training::{ExecutionTrace, StepOutcome, TraceStep, TraceTransition};
use strata_cortex::infrastructure::DbClient;

use crate::application::dag_suggester::{DagSuggester, Suggestion};
use crate::domain::approval::{ApprovalDecision, ApprovalKind, CheckpointSummary, PlannedTask};
use crate::domain::config::ExecutorConfig;
use crate::domain::errors::{ExecutorError, ExecutorResult, TaskError};
use crate::domain::events::WorkflowEvent;
use crate::domain::permission::PermissionEscalationRequest;
use crate::domain::tool::{ToolError, ToolExecutor, ToolInvocation};
use crate::domain::workflow::{
    LayerOutcome, RunId, RunStatus, TaskId, TaskResult, TaskStatus, WorkflowDag, WorkflowState,
    WorkflowTask,
};
use crate::infrastructure::approval_gateway::ApprovalGateway;
use crate::infrastructure::capability_registry::CapabilityRegistry;
use crate::infrastructure::event_bus::EventBus;

/// Final state of a run. Always carries every task's result.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub status: RunStatus,
    pub state: WorkflowState,
    pub trace: ExecutionTrace,
    pub reinforcement: Option<ReinforcementReport>,
}

impl RunReport {
    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.state.status_of(&TaskId::from(task_id))
    }

    pub fn result(&self, task_id: &str) -> Option<&TaskResult> {
        self.state.result(&TaskId::from(task_id))
    }
}

/// Handle to a run started with [`ControlledExecutor::start`].
pub struct RunHandle {
    run_id: RunId,
    cancel: CancellationToken,
    join: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Cancel in-flight tasks and skip the rest. Results so far are kept.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn wait(self) -> ExecutorResult<RunReport> {
        self.join
            .await
            .map_err(|e| ExecutorError::Join(e.to_string()))
    }
}

struct SpeculationJob {
    layer: usize,
    handle: JoinHandle<Vec<Suggestion>>,
}

pub struct ControlledExecutor {
    tools: Arc<dyn ToolExecutor>,
    registry: Arc<CapabilityRegistry>,
    approvals: Arc<ApprovalGateway>,
    event_bus: Arc<EventBus>,
    db: Arc<dyn DbClient>,
    reinforcer: Option<Arc<ExecutionReinforcer>>,
    suggester: Option<Arc<DagSuggester>>,
    config: ExecutorConfig,
    active_runs: Mutex<HashMap<RunId, CancellationToken>>,
}

impl ControlledExecutor {
    pub fn new(
        tools: Arc<dyn ToolExecutor>,
        registry: Arc<CapabilityRegistry>,
        approvals: Arc<ApprovalGateway>,
        event_bus: Arc<EventBus>,
        db: Arc<dyn DbClient>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            tools,
            registry,
            approvals,
            event_bus,
            db,
            reinforcer: None,
            suggester: None,
            config,
            active_runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_reinforcer(mut self, reinforcer: Arc<ExecutionReinforcer>) -> Self {
        self.reinforcer = Some(reinforcer);
        self
    }

    /// Needed for intent embeddings and speculative prefetch.
    pub fn with_suggester(mut self, suggester: Arc<DagSuggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Validate `tasks` and run them to completion.
    pub async fn execute_tasks(
        &self,
        tasks: Vec<WorkflowTask>,
        intent: Option<String>,
    ) -> ExecutorResult<RunReport> {
        let dag = WorkflowDag::new(tasks)?;
        Ok(self.execute(dag, intent).await)
    }

    pub async fn execute(&self, dag: WorkflowDag, intent: Option<String>) -> RunReport {
        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        self.active_runs.lock().insert(run_id, cancel.clone());
        let report = self.run(run_id, dag, intent, cancel).await;
        self.active_runs.lock().remove(&run_id);
        report
    }

    /// Run in the background. The returned handle can abort or await it.
    pub fn start(self: &Arc<Self>, dag: WorkflowDag, intent: Option<String>) -> RunHandle {
        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        self.active_runs.lock().insert(run_id, cancel.clone());

        let executor = self.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let report = executor.run(run_id, dag, intent, token).await;
            executor.active_runs.lock().remove(&run_id);
            report
        });
        RunHandle {
            run_id,
            cancel,
            join,
        }
    }

    pub fn abort_run(&self, run_id: RunId) -> ExecutorResult<()> {
        let runs = self.active_runs.lock();
        let token = runs.get(&run_id).ok_or(ExecutorError::RunNotFound(run_id))?;
        info!(run_id = %run_id, "Aborting run");
        token.cancel();
        Ok(())
    }

    pub fn active_runs(&self) -> Vec<RunId> {
        self.active_runs.lock().keys().copied().collect()
    }

    async fn run(
        &self,
        run_id: RunId,
        dag: WorkflowDag,
        intent: Option<String>,
        cancel: CancellationToken,
    ) -> RunReport {
        let started = Instant::now();
        let state = Mutex::new(WorkflowState::new(run_id, &dag));
        state.lock().status = RunStatus::Running;

        info!(
            run_id = %run_id,
            tasks = dag.len(),
            layers = dag.layers().len(),
            "Starting workflow run"
        );
        self.event_bus.publish_workflow_event(WorkflowEvent::RunStarted {
            run_id,
            task_count: dag.len(),
            layer_count: dag.layers().len(),
            started_at: Utc::now(),
        });

        let intent_embedding = self.intent_embedding(intent.as_deref()).await;
        let mut speculation: Option<SpeculationJob> = None;
        let mut aborted = false;

        for (n, layer) in dag.layers().iter().enumerate() {
            if let Some(job) = speculation.take() {
                self.evaluate_speculation(run_id, &dag, job).await;
            }
            if cancel.is_cancelled() {
                aborted = true;
                break;
            }

            let runnable: Vec<&WorkflowTask> = layer
                .iter()
                .filter_map(|id| dag.task(id))
                .filter(|task| self.ready(&state, task, run_id))
                .collect();

            self.event_bus.publish_workflow_event(WorkflowEvent::LayerStarted {
                run_id,
                layer: n,
                task_ids: runnable.iter().map(|t| t.id.clone()).collect(),
                started_at: Utc::now(),
            });
            debug!(run_id = %run_id, layer = n, tasks = runnable.len(), "Executing layer");

            if let (Some(embedding), true) = (&intent_embedding, n + 1 < dag.layers().len()) {
                speculation = self.spawn_speculation(&dag, &state, n, embedding.clone());
            }

            let results = self
                .run_layer(run_id, &dag, &state, &runnable, n, &cancel, started)
                .await;
            for result in results {
                self.finish_task(run_id, &dag, &state, result);
            }

            let (succeeded, failed, skipped) = {
                let state = state.lock();
                layer.iter().fold((0, 0, 0), |(s, f, k), id| match state.status_of(id) {
                    Some(TaskStatus::Success) => (s + 1, f, k),
                    Some(TaskStatus::Error) => (s, f + 1, k),
                    _ => (s, f, k + 1),
                })
            };
            let outcome = if succeeded == layer.len() {
                LayerOutcome::AllSuccess
            } else {
                LayerOutcome::PartialFailure
            };
            self.event_bus.publish_workflow_event(WorkflowEvent::LayerCompleted {
                run_id,
                layer: n,
                outcome,
                succeeded,
                failed,
                skipped,
                completed_at: Utc::now(),
            });

            if cancel.is_cancelled() {
                aborted = true;
                break;
            }

            if self.config.hil_checkpoints
                && n + 1 < dag.layers().len()
                && !self.checkpoint(run_id, &dag, &state, n, &cancel).await
            {
                aborted = true;
                break;
            }
        }

        if let Some(job) = speculation.take() {
            job.handle.abort();
        }

        let report = {
            let mut state = state.into_inner();
            if aborted {
                self.skip_remaining(run_id, &mut state, TaskError::Cancelled);
                state.status = RunStatus::Aborted;
            } else {
                state.status = RunStatus::Completed;
            }
            state.finished_at = Some(Utc::now());
            let trace = self.build_trace(&dag, &state, intent, intent_embedding);
            RunReport {
                run_id,
                status: state.status,
                state,
                trace,
                reinforcement: None,
            }
        };
        self.complete(report, started).await
    }

    async fn intent_embedding(&self, intent: Option<&str>) -> Option<Vec<f32>> {
        let (Some(suggester), Some(intent)) = (&self.suggester, intent) else {
            return None;
        };
        match suggester.encode_intent(intent).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "Failed to embed run intent");
                None
            }
        }
    }

    /// False when a dependency did not succeed; the task is then skipped.
    fn ready(&self, state: &Mutex<WorkflowState>, task: &WorkflowTask, run_id: RunId) -> bool {
        let mut state = state.lock();
        if state.status_of(&task.id).is_some_and(|s| s.is_terminal()) {
            return false;
        }
        let failed = task
            .depends_on
            .iter()
            .find(|dep| state.status_of(dep) != Some(TaskStatus::Success));
        match failed {
            None => true,
            Some(dependency) => {
                let reason = TaskError::DependencyFailed {
                    dependency: dependency.clone(),
                };
                if state.skip(&task.id, reason.clone()) {
                    self.publish_skipped(run_id, &task.id, reason);
                }
                false
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_layer(
        &self,
        run_id: RunId,
        dag: &WorkflowDag,
        state: &Mutex<WorkflowState>,
        tasks: &[&WorkflowTask],
        layer: usize,
        cancel: &CancellationToken,
        run_started: Instant,
    ) -> Vec<TaskResult> {
        let semaphore = Semaphore::new(self.config.max_concurrency.max(1));
        let futures = tasks.iter().map(|task| {
            let semaphore = &semaphore;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return self.cancelled_result(state, task, layer, 0);
                };
                if cancel.is_cancelled() {
                    return self.cancelled_result(state, task, layer, 0);
                }
                self.run_task(run_id, dag, state, task, layer, cancel).await
            }
        });
        let layer_future = join_all(futures);
        tokio::pin!(layer_future);

        let period = self.config.heartbeat_interval().max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                results = &mut layer_future => return results,
                _ = heartbeat.tick() => {
                    let (running, completed) = {
                        let state = state.lock();
                        (
                            state.count(TaskStatus::Running),
                            state.results.iter().filter(|r| r.status.is_terminal()).count(),
                        )
                    };
                    self.event_bus.publish_workflow_event(WorkflowEvent::Heartbeat {
                        run_id,
                        layer,
                        running,
                        completed,
                        elapsed_ms: run_started.elapsed().as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }

    async fn run_task(
        &self,
        run_id: RunId,
        dag: &WorkflowDag,
        state: &Mutex<WorkflowState>,
        task: &WorkflowTask,
        layer: usize,
        cancel: &CancellationToken,
    ) -> TaskResult {
        let idempotent = self.registry.is_idempotent(&task.tool);
        let max_attempts = if idempotent {
            1 + self.config.max_retries
        } else {
            1
        };
        let timeout = self.config.task_timeout();
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut escalated = false;
        state.lock().mark_running(&task.id);

        loop {
            if cancel.is_cancelled() {
                return self.cancelled_result(state, task, layer, attempts);
            }
            attempts += 1;
            self.event_bus.publish_workflow_event(WorkflowEvent::TaskStarted {
                run_id,
                task_id: task.id.clone(),
                tool: task.tool.clone(),
                attempt: attempts,
                started_at: Utc::now(),
            });
            let invocation = ToolInvocation {
                tool: task.tool.clone(),
                args: task.args.clone(),
                permissions: self.registry.permissions(&task.tool),
            };

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TaskError::Cancelled),
                result = tokio::time::timeout(timeout, self.tools.execute(&invocation)) => match result {
                    Err(_) => Err(TaskError::Timeout { timeout_ms: timeout.as_millis() as u64 }),
                    Ok(Ok(output)) => Ok(output),
                    Ok(Err(ToolError::PermissionDenied { message })) => {
                        Err(TaskError::PermissionDenied { message })
                    }
                    Ok(Err(ToolError::Execution(message))) => Err(TaskError::ToolExecution { message }),
                },
            };

            let error = match outcome {
                Ok(output) => {
                    return self.completed_result(state, task, layer, attempts, started, Ok(output));
                }
                Err(TaskError::Cancelled) => {
                    return self.cancelled_result(state, task, layer, attempts);
                }
                Err(error) => error,
            };

            if let TaskError::PermissionDenied { message } = &error {
                if escalated {
                    return self.completed_result(state, task, layer, attempts, started, Err(error));
                }
                escalated = true;
                match self.escalate(run_id, task, message, cancel).await {
                    ApprovalDecision::Approved { .. } => continue,
                    ApprovalDecision::Rejected { .. } => {
                        return self.completed_result(state, task, layer, attempts, started, Err(error));
                    }
                    ApprovalDecision::Cancelled => {
                        return self.cancelled_result(state, task, layer, attempts);
                    }
                }
            }

            if error.is_retryable() && attempts < max_attempts {
                warn!(
                    run_id = %run_id,
                    task_id = %task.id,
                    attempt = attempts,
                    error = %error,
                    "Task attempt failed, retrying"
                );
                metrics::counter!("strata_task_retries_total").increment(1);
                self.event_bus.publish_workflow_event(WorkflowEvent::TaskRetrying {
                    run_id,
                    task_id: task.id.clone(),
                    attempt: attempts,
                    error,
                });
                tokio::select! {
                    _ = cancel.cancelled() => return self.cancelled_result(state, task, layer, attempts),
                    _ = tokio::time::sleep(self.config.retry_backoff()) => {}
                }
                continue;
            }

            if !idempotent && error.is_retryable() {
                debug!(task_id = %task.id, tool = %task.tool, "Not retrying non-idempotent capability");
            }
            debug!(
                task_id = %task.id,
                dependents = dag.dependents(&task.id).len(),
                "Task failed terminally"
            );
            return self.completed_result(state, task, layer, attempts, started, Err(error));
        }
    }

    async fn escalate(
        &self,
        run_id: RunId,
        task: &WorkflowTask,
        message: &str,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        let request = PermissionEscalationRequest::from_denial(
            run_id,
            task.id.clone(),
            task.tool.clone(),
            self.registry.permissions(&task.tool),
            message,
        );
        let requested = request.requested_set.clone();
        info!(
            run_id = %run_id,
            task_id = %task.id,
            capability = %task.tool,
            requested = %requested,
            operation = %request.detected_operation,
            confidence = request.confidence,
            "Permission denied, requesting escalation"
        );
        metrics::counter!("strata_permission_escalations_total").increment(1);

        let decision = self
            .approvals
            .request(run_id, ApprovalKind::PermissionEscalation { request }, cancel)
            .await;
        if decision.is_approved() {
            self.registry.upgrade_permissions(&task.tool, &requested);
        }
        decision
    }

    fn completed_result(
        &self,
        state: &Mutex<WorkflowState>,
        task: &WorkflowTask,
        layer: usize,
        attempts: u32,
        started: Instant,
        outcome: Result<serde_json::Value, TaskError>,
    ) -> TaskResult {
        let started_at = state.lock().result(&task.id).and_then(|r| r.started_at);
        let (status, output, error) = match outcome {
            Ok(output) => (TaskStatus::Success, Some(output), None),
            Err(error) => (TaskStatus::Error, None, Some(error)),
        };
        TaskResult {
            task_id: task.id.clone(),
            tool: task.tool.clone(),
            layer,
            status,
            output,
            error,
            attempts,
            started_at,
            finished_at: Some(Utc::now()),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn cancelled_result(
        &self,
        state: &Mutex<WorkflowState>,
        task: &WorkflowTask,
        layer: usize,
        attempts: u32,
    ) -> TaskResult {
        let started_at = state.lock().result(&task.id).and_then(|r| r.started_at);
        TaskResult {
            task_id: task.id.clone(),
            tool: task.tool.clone(),
            layer,
            status: TaskStatus::Skipped,
            output: None,
            error: Some(TaskError::Cancelled),
            attempts,
            started_at,
            finished_at: Some(Utc::now()),
            duration_ms: 0,
        }
    }

    /// Record a task's result and skip the dependents of a failed task.
    fn finish_task(
        &self,
        run_id: RunId,
        dag: &WorkflowDag,
        state: &Mutex<WorkflowState>,
        result: TaskResult,
    ) {
        let task_id = result.task_id.clone();
        let status = result.status;
        metrics::counter!("strata_tasks_total", "status" => status_label(status)).increment(1);

        match status {
            TaskStatus::Success => {
                info!(run_id = %run_id, task_id = %task_id, attempts = result.attempts, "Task succeeded");
                self.event_bus.publish_workflow_event(WorkflowEvent::TaskCompleted {
                    run_id,
                    task_id: task_id.clone(),
                    attempts: result.attempts,
                    duration_ms: result.duration_ms,
                    completed_at: Utc::now(),
                });
            }
            TaskStatus::Error => {
                let error = result.error.clone().unwrap_or(TaskError::ToolExecution {
                    message: "unknown failure".to_string(),
                });
                warn!(run_id = %run_id, task_id = %task_id, code = error.code(), "Task failed");
                self.event_bus.publish_workflow_event(WorkflowEvent::TaskFailed {
                    run_id,
                    task_id: task_id.clone(),
                    attempts: result.attempts,
                    error,
                    failed_at: Utc::now(),
                });
            }
            TaskStatus::Skipped => {
                let reason = result.error.clone().unwrap_or(TaskError::Cancelled);
                self.publish_skipped(run_id, &task_id, reason);
            }
            TaskStatus::Pending | TaskStatus::Running => {}
        }

        let mut state = state.lock();
        state.record(result);
        if status == TaskStatus::Error {
            for dependent in dag.dependents(&task_id) {
                let reason = TaskError::DependencyFailed {
                    dependency: task_id.clone(),
                };
                if state.skip(&dependent, reason.clone()) {
                    self.publish_skipped(run_id, &dependent, reason);
                }
            }
        }
    }

    fn publish_skipped(&self, run_id: RunId, task_id: &TaskId, reason: TaskError) {
        debug!(run_id = %run_id, task_id = %task_id, reason = reason.code(), "Task skipped");
        self.event_bus.publish_workflow_event(WorkflowEvent::TaskSkipped {
            run_id,
            task_id: task_id.clone(),
            reason,
        });
    }

    fn skip_remaining(&self, run_id: RunId, state: &mut WorkflowState, reason: TaskError) {
        let pending: Vec<TaskId> = state
            .results
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.task_id.clone())
            .collect();
        for task_id in pending {
            if state.skip(&task_id, reason.clone()) {
                self.publish_skipped(run_id, &task_id, reason.clone());
            }
        }
    }

    /// Suspend for approval after layer `n`. Returns false when the run must
    /// abort.
    async fn checkpoint(
        &self,
        run_id: RunId,
        dag: &WorkflowDag,
        state: &Mutex<WorkflowState>,
        n: usize,
        cancel: &CancellationToken,
    ) -> bool {
        let summary = {
            let mut state = state.lock();
            state.status = RunStatus::AwaitingApproval;
            let layer = &dag.layers()[n];
            let count = |status| {
                layer
                    .iter()
                    .filter(|id| state.status_of(id) == Some(status))
                    .count()
            };
            CheckpointSummary {
                layer: n,
                completed: count(TaskStatus::Success),
                failed: count(TaskStatus::Error),
                skipped: count(TaskStatus::Skipped),
                next_layer: dag.layers()[n + 1]
                    .iter()
                    .filter_map(|id| dag.task(id))
                    .map(|t| PlannedTask {
                        task_id: t.id.clone(),
                        tool: t.tool.clone(),
                    })
                    .collect(),
            }
        };
        info!(run_id = %run_id, layer = n, "Awaiting checkpoint approval");

        let decision = self
            .approvals
            .request(run_id, ApprovalKind::checkpoint(summary), cancel)
            .await;
        state.lock().status = RunStatus::Running;
        match decision {
            ApprovalDecision::Approved { .. } => true,
            ApprovalDecision::Rejected { reason, .. } => {
                info!(run_id = %run_id, layer = n, reason = %reason, "Checkpoint rejected, aborting run");
                false
            }
            ApprovalDecision::Cancelled => false,
        }
    }

    /// Start ranking candidates for layer `n + 1` while layer `n` runs.
    fn spawn_speculation(
        &self,
        dag: &WorkflowDag,
        state: &Mutex<WorkflowState>,
        n: usize,
        intent_embedding: Vec<f32>,
    ) -> Option<SpeculationJob> {
        if !self.config.speculation {
            return None;
        }
        let suggester = self.suggester.clone()?;

        // Context as it will be if the current layer succeeds.
        let mut context: Vec<String> = {
            let state = state.lock();
            state
                .results
                .iter()
                .filter(|r| r.status == TaskStatus::Success)
                .map(|r| r.tool.clone())
                .collect()
        };
        context.extend(
            dag.layers()[n]
                .iter()
                .filter_map(|id| dag.task(id))
                .map(|t| t.tool.clone()),
        );
        context.sort();
        context.dedup();

        let k = self.config.speculation_k;
        let handle = tokio::spawn(async move {
            match suggester.suggest_next(&intent_embedding, &context, k).await {
                Ok(suggestions) => suggestions,
                Err(e) => {
                    debug!(error = %e, "Speculative ranking failed");
                    Vec::new()
                }
            }
        });
        Some(SpeculationJob {
            layer: n + 1,
            handle,
        })
    }

    /// Compare a finished prefetch with the layer that actually runs and feed
    /// the outcome to the thresholds. An unfinished prefetch is discarded.
    async fn evaluate_speculation(&self, run_id: RunId, dag: &WorkflowDag, job: SpeculationJob) {
        if !job.handle.is_finished() {
            job.handle.abort();
            debug!(run_id = %run_id, layer = job.layer, "Discarding unfinished speculation");
            return;
        }
        let suggestions = match job.handle.await {
            Ok(suggestions) => suggestions,
            Err(e) => {
                debug!(error = %e, "Speculation task failed");
                return;
            }
        };
        let Some(suggester) = &self.suggester else {
            return;
        };
        let actual: Vec<&str> = dag.layers()[job.layer]
            .iter()
            .filter_map(|id| dag.task(id))
            .map(|t| t.tool.as_str())
            .collect();

        let thresholds = suggester.thresholds();
        let mut hits = 0;
        let mut updated = thresholds.get_thresholds();
        for suggestion in &suggestions {
            let accepted = actual.contains(&suggestion.id.as_str());
            if accepted {
                hits += 1;
            }
            updated = thresholds.record_outcome(suggestion.score, accepted);
        }
        debug!(
            run_id = %run_id,
            layer = job.layer,
            hits,
            predicted = suggestions.len(),
            suggestion_threshold = updated.suggestion_threshold,
            explicit_threshold = updated.explicit_threshold,
            "Speculation evaluated"
        );
        self.event_bus.publish_workflow_event(WorkflowEvent::SpeculationEvaluated {
            run_id,
            layer: job.layer,
            predicted: suggestions.into_iter().map(|s| s.id).collect(),
            hits,
            suggestion_threshold: updated.suggestion_threshold,
            explicit_threshold: updated.explicit_threshold,
        });
    }

    fn build_trace(
        &self,
        dag: &WorkflowDag,
        state: &WorkflowState,
        intent: Option<String>,
        intent_embedding: Option<Vec<f32>>,
    ) -> ExecutionTrace {
        let steps = state
            .results
            .iter()
            .map(|r| TraceStep {
                task_id: r.task_id.to_string(),
                tool: r.tool.clone(),
                layer: r.layer,
                outcome: match r.status {
                    TaskStatus::Success => StepOutcome::Success,
                    TaskStatus::Error => StepOutcome::Error,
                    _ => StepOutcome::Skipped,
                },
                attempts: r.attempts,
                duration_ms: r.duration_ms,
                error: r.error.as_ref().map(|e| e.to_string()),
            })
            .collect();
        let transitions = dag
            .tasks()
            .iter()
            .flat_map(|task| {
                task.depends_on.iter().filter_map(move |dep| {
                    dag.task(dep).map(|from| TraceTransition {
                        from_tool: from.tool.clone(),
                        to_tool: task.tool.clone(),
                        to_task: task.id.to_string(),
                    })
                })
            })
            .collect();

        ExecutionTrace {
            run_id: state.run_id.as_uuid(),
            intent,
            intent_embedding,
            steps,
            transitions,
            succeeded: state.status == RunStatus::Completed
                && state.results.iter().all(|r| r.status == TaskStatus::Success),
            started_at: state.started_at,
            finished_at: state.finished_at.unwrap_or_else(Utc::now),
        }
    }

    async fn complete(&self, mut report: RunReport, started: Instant) -> RunReport {
        let run_id = report.run_id;
        let succeeded = report.state.count(TaskStatus::Success);
        let failed = report.state.count(TaskStatus::Error);
        let skipped = report.state.count(TaskStatus::Skipped);
        let elapsed = started.elapsed();

        info!(
            run_id = %run_id,
            status = ?report.status,
            succeeded,
            failed,
            skipped,
            duration_ms = elapsed.as_millis() as u64,
            "Workflow run finished"
        );
        metrics::histogram!("strata_run_duration_seconds").record(elapsed.as_secs_f64());
        self.event_bus.publish_workflow_event(WorkflowEvent::WorkflowExecuted {
            run_id,
            status: report.status,
            succeeded,
            failed,
            skipped,
            duration_ms: elapsed.as_millis() as u64,
            completed_at: Utc::now(),
        });

        if let Err(e) = self.db.save_trace(&report.trace).await {
            warn!(run_id = %run_id, error = %e, "Failed to persist execution trace");
        }
        if let Some(reinforcer) = &self.reinforcer {
            match reinforcer.reinforce(&report.trace).await {
                Ok(result) => report.reinforcement = Some(result),
                Err(e) => warn!(run_id = %run_id, error = %e, "Reinforcement failed"),
            }
        }
        report
    }
}

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Success => "success",
        TaskStatus::Error => "error",
        TaskStatus::Skipped => "skipped",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use strata_cortex::infrastructure::InMemoryDbClient;

    struct EchoTools;

    #[async_trait]
    impl ToolExecutor for EchoTools {
        async fn execute(&self, invocation: &ToolInvocation) -> Result<serde_json::Value, ToolError> {
            Ok(json!({ "tool": invocation.tool }))
        }
    }

    fn executor(db: Arc<InMemoryDbClient>, bus: Arc<EventBus>) -> ControlledExecutor {
        ControlledExecutor::new(
            Arc::new(EchoTools),
            Arc::new(CapabilityRegistry::new()),
            Arc::new(ApprovalGateway::new(bus.clone())),
            bus,
            db,
            ExecutorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_run_persists_trace_and_reports_completion() {
        let db = Arc::new(InMemoryDbClient::new());
        let bus = Arc::new(EventBus::new(64));
        let mut events = bus.subscribe();
        let report = executor(db.clone(), bus)
            .execute_tasks(
                vec![
                    WorkflowTask::new("read", "fs:read"),
                    WorkflowTask::new("parse", "json:parse").depends_on(["read"]),
                ],
                Some("load config".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.status_of("parse"), Some(TaskStatus::Success));
        assert_eq!(report.result("read").unwrap().output, Some(json!({ "tool": "fs:read" })));
        assert!(report.trace.succeeded);
        assert_eq!(report.trace.transitions.len(), 1);
        assert_eq!(db.trace_count().await, 1);

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert_eq!(names.first(), Some(&"run_started"));
        assert_eq!(names.last(), Some(&"workflow_executed"));
    }

    #[tokio::test]
    async fn test_trace_save_failure_does_not_fail_run() {
        let db = Arc::new(InMemoryDbClient::new());
        db.set_failing(true);
        let report = executor(db, Arc::new(EventBus::new(64)))
            .execute_tasks(vec![WorkflowTask::new("a", "fs:read")], None)
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_invalid_dag_is_rejected() {
        let result = executor(Arc::new(InMemoryDbClient::new()), Arc::new(EventBus::new(8)))
            .execute_tasks(vec![WorkflowTask::new("a", "x").depends_on(["b"])], None)
            .await;
        assert!(matches!(result, Err(ExecutorError::InvalidDag(_))));
    }

    #[tokio::test]
    async fn test_abort_unknown_run() {
        let executor = executor(Arc::new(InMemoryDbClient::new()), Arc::new(EventBus::new(8)));
        assert!(matches!(
            executor.abort_run(RunId::new()),
            Err(ExecutorError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_heartbeats_while_layer_runs() {
        struct SlowTools;

        #[async_trait]
        impl ToolExecutor for SlowTools {
            async fn execute(&self, _: &ToolInvocation) -> Result<serde_json::Value, ToolError> {
                tokio::time::sleep(Duration::from_millis(120)).await;
                Ok(serde_json::Value::Null)
            }
        }

        let bus = Arc::new(EventBus::new(64));
        let mut events = bus.subscribe();
        let executor = ControlledExecutor::new(
            Arc::new(SlowTools),
            Arc::new(CapabilityRegistry::new()),
            Arc::new(ApprovalGateway::new(bus.clone())),
            bus,
            Arc::new(InMemoryDbClient::new()),
            ExecutorConfig {
                heartbeat_interval_ms: 20,
                ..Default::default()
            },
        );
        executor
            .execute_tasks(vec![WorkflowTask::new("a", "slow")], None)
            .await
            .unwrap();

        let mut heartbeats = 0;
        while let Ok(event) = events.try_recv() {
            if event.name() == "heartbeat" {
                heartbeats += 1;
            }
        }
        assert!(heartbeats >= 2);
    }
}
