// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Approval Gateway - Infrastructure for human-in-the-loop decisions
//!
//! Layer checkpoints and permission escalations both suspend a run branch
//! until an external approver answers. Requests never expire on their own;
//! they end by approval, rejection, or cancellation of the run.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::approval::{ApprovalDecision, ApprovalKind};
use crate::domain::events::WorkflowEvent;
use crate::domain::workflow::RunId;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug)]
struct PendingApproval {
    id: Uuid,
    run_id: RunId,
    approval: ApprovalKind,
    created_at: DateTime<Utc>,
    response_tx: oneshot::Sender<ApprovalDecision>,
}

impl PendingApproval {
    fn info(&self) -> PendingApprovalInfo {
        PendingApprovalInfo {
            id: self.id,
            run_id: self.run_id,
            approval: self.approval.clone(),
            created_at: self.created_at,
        }
    }
}

pub struct ApprovalGateway {
    pending: Arc<RwLock<HashMap<Uuid, PendingApproval>>>,
    event_bus: Arc<EventBus>,
}

impl ApprovalGateway {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            pending: Arc::new(RwLock::new(HashMap::new())),
            event_bus,
        }
    }

    /// Publish `decision_required` and wait for an answer.
    ///
    /// Returns [`ApprovalDecision::Cancelled`] when `cancel` fires first; the
    /// request is then withdrawn.
    pub async fn request(
        &self,
        run_id: RunId,
        approval: ApprovalKind,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let kind = approval.name();

        self.pending.write().await.insert(
            id,
            PendingApproval {
                id,
                run_id,
                approval: approval.clone(),
                created_at: Utc::now(),
                response_tx: tx,
            },
        );
        info!(request_id = %id, run_id = %run_id, kind, "Approval requested");
        metrics::counter!("strata_approval_requests_total", "kind" => kind).increment(1);
        self.event_bus
            .publish_workflow_event(WorkflowEvent::DecisionRequired {
                run_id,
                request_id: id,
                approval,
                requested_at: Utc::now(),
            });

        let decision = tokio::select! {
            response = rx => response.unwrap_or(ApprovalDecision::Cancelled),
            _ = cancel.cancelled() => {
                self.pending.write().await.remove(&id);
                debug!(request_id = %id, "Approval request withdrawn, run cancelled");
                ApprovalDecision::Cancelled
            }
        };

        self.event_bus
            .publish_workflow_event(WorkflowEvent::DecisionResolved {
                run_id,
                request_id: id,
                decision: decision.clone(),
                resolved_at: Utc::now(),
            });
        decision
    }

    pub async fn submit_approval(
        &self,
        request_id: Uuid,
        feedback: Option<String>,
        approved_by: Option<String>,
    ) -> Result<()> {
        let mut pending = self.pending.write().await;
        let Some(request) = pending.remove(&request_id) else {
            anyhow::bail!("Request {} not found or already completed", request_id)
        };
        info!(request_id = %request_id, approved_by = ?approved_by, "Approval granted");
        // Receiver may be gone if the run ended meanwhile.
        let _ = request.response_tx.send(ApprovalDecision::Approved {
            approved_by,
            feedback,
        });
        Ok(())
    }

    pub async fn submit_rejection(
        &self,
        request_id: Uuid,
        reason: String,
        rejected_by: Option<String>,
    ) -> Result<()> {
        let mut pending = self.pending.write().await;
        let Some(request) = pending.remove(&request_id) else {
            anyhow::bail!("Request {} not found or already completed", request_id)
        };
        info!(
            request_id = %request_id,
            rejected_by = ?rejected_by,
            reason = %reason,
            "Approval rejected"
        );
        let _ = request.response_tx.send(ApprovalDecision::Rejected {
            rejected_by,
            reason,
        });
        Ok(())
    }

    /// Oldest first.
    pub async fn list_pending(&self) -> Vec<PendingApprovalInfo> {
        let pending = self.pending.read().await;
        let mut infos: Vec<PendingApprovalInfo> = pending.values().map(|p| p.info()).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        infos
    }

    pub async fn pending_for_run(&self, run_id: RunId) -> Vec<PendingApprovalInfo> {
        self.list_pending()
            .await
            .into_iter()
            .filter(|p| p.run_id == run_id)
            .collect()
    }

    pub async fn get_pending(&self, request_id: Uuid) -> Option<PendingApprovalInfo> {
        self.pending.read().await.get(&request_id).map(|p| p.info())
    }

    pub async fn cancel_request(&self, request_id: Uuid) -> Result<()> {
        let Some(request) = self.pending.write().await.remove(&request_id) else {
            anyhow::bail!("Request {} not found", request_id)
        };
        debug!(request_id = %request_id, "Approval request cancelled");
        let _ = request.response_tx.send(ApprovalDecision::Cancelled);
        Ok(())
    }
}

/// Information about a pending request (for serialization/API)
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PendingApprovalInfo {
    pub id: Uuid,
    pub run_id: RunId,
    pub approval: ApprovalKind,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::approval::CheckpointSummary;
    use crate::infrastructure::event_bus::DomainEvent;

    fn checkpoint() -> ApprovalKind {
        ApprovalKind::checkpoint(CheckpointSummary {
            layer: 0,
            completed: 1,
            failed: 0,
            skipped: 0,
            next_layer: vec![],
        })
    }

    #[tokio::test]
    async fn test_approval_flow() {
        let gateway = Arc::new(ApprovalGateway::new(Arc::new(EventBus::new(16))));
        let run_id = RunId::new();

        let approver = gateway.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            let pending = approver.list_pending().await;
            if let Some(req) = pending.first() {
                approver
                    .submit_approval(req.id, Some("Looks good!".to_string()), Some("alice".to_string()))
                    .await
                    .unwrap();
            }
        });

        let decision = gateway
            .request(run_id, checkpoint(), &CancellationToken::new())
            .await;
        match decision {
            ApprovalDecision::Approved { feedback, approved_by } => {
                assert_eq!(feedback, Some("Looks good!".to_string()));
                assert_eq!(approved_by, Some("alice".to_string()));
            }
            other => panic!("Expected approval, got {:?}", other),
        }
        assert!(gateway.list_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejection_flow_publishes_events() {
        let bus = Arc::new(EventBus::new(16));
        let mut events = bus.subscribe();
        let gateway = Arc::new(ApprovalGateway::new(bus));
        let run_id = RunId::new();

        let approver = gateway.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            let pending = approver.pending_for_run(run_id).await;
            if let Some(req) = pending.first() {
                approver
                    .submit_rejection(req.id, "Security concerns".to_string(), Some("bob".to_string()))
                    .await
                    .unwrap();
            }
        });

        let decision = gateway
            .request(run_id, checkpoint(), &CancellationToken::new())
            .await;
        assert!(matches!(decision, ApprovalDecision::Rejected { ref reason, .. } if reason == "Security concerns"));

        let first = events.recv().await.unwrap();
        assert_eq!(first.name(), "decision_required");
        let second = events.recv().await.unwrap();
        assert!(matches!(
            second,
            DomainEvent::Workflow(WorkflowEvent::DecisionResolved { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_withdraws_request() {
        let gateway = Arc::new(ApprovalGateway::new(Arc::new(EventBus::new(16))));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let decision = gateway.request(RunId::new(), checkpoint(), &cancel).await;
        assert_eq!(decision, ApprovalDecision::Cancelled);
        assert!(gateway.list_pending().await.is_empty());
    }

    #[test]
    fn test_unknown_request_is_an_error() {
        let gateway = ApprovalGateway::new(Arc::new(EventBus::new(16)));
        tokio_test::assert_err!(tokio_test::block_on(gateway.submit_approval(
            Uuid::new_v4(),
            None,
            None
        )));
        tokio_test::assert_err!(tokio_test::block_on(gateway.submit_rejection(
            Uuid::new_v4(),
            "no".to_string(),
            None
        )));
        tokio_test::assert_err!(tokio_test::block_on(gateway.cancel_request(Uuid::new_v4())));
    }
}
