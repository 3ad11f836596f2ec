// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// One tokio broadcast channel carries both run lifecycle events and Cortex
// graph/learning events. Subscribers register explicitly; nothing is
// delivered to a receiver created after the event was sent.
//
// In-memory only: events are lost on restart.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_cortex::domain::events::{CortexEvent, EventSink};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::WorkflowEvent;
use crate::domain::workflow::RunId;

/// Unified domain event type for the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Workflow(WorkflowEvent),
    Cortex(CortexEvent),
}

impl DomainEvent {
    /// Wire name, e.g. `workflow_executed` or `graph_synced`.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::Workflow(event) => event.name(),
            DomainEvent::Cortex(event) => event.name(),
        }
    }
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Capacity is the number of events buffered per receiver before the
    /// slowest one starts lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_workflow_event(&self, event: WorkflowEvent) {
        self.publish(DomainEvent::Workflow(event));
    }

    pub fn publish_cortex_event(&self, event: CortexEvent) {
        self.publish(DomainEvent::Cortex(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!(event = event.name(), "Publishing event");
        // send() fails only when nobody is subscribed.
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the workflow events of one run.
    pub fn subscribe_run(&self, run_id: RunId) -> RunEventReceiver {
        RunEventReceiver {
            receiver: self.sender.subscribe(),
            run_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for EventBus {
    fn publish_cortex(&self, event: CortexEvent) {
        self.publish_cortex_event(event);
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for one run's workflow events (filtered)
pub struct RunEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    run_id: RunId,
}

impl RunEventReceiver {
    /// Skips Cortex events and events of other runs.
    pub async fn recv(&mut self) -> Result<WorkflowEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Workflow(workflow_event) = event {
                if workflow_event.run_id() == self.run_id {
                    return Ok(workflow_event);
                }
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::RunStatus;
    use chrono::Utc;

    fn executed(run_id: RunId) -> WorkflowEvent {
        WorkflowEvent::WorkflowExecuted {
            run_id,
            status: RunStatus::Completed,
            succeeded: 1,
            failed: 0,
            skipped: 0,
            duration_ms: 5,
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        let run_id = RunId::new();

        event_bus.publish_workflow_event(executed(run_id));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.name(), "workflow_executed");
        match received {
            DomainEvent::Workflow(WorkflowEvent::WorkflowExecuted { run_id: id, .. }) => {
                assert_eq!(id, run_id);
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_run_event_filtering() {
        let event_bus = EventBus::new(10);
        let run_id = RunId::new();
        let mut receiver = event_bus.subscribe_run(run_id);

        event_bus.publish_workflow_event(executed(RunId::new()));
        event_bus.publish_cortex_event(CortexEvent::ModelTrained {
            owner: "batch-retrain".to_string(),
            examples: 1,
            mean_loss: 0.5,
            timestamp: Utc::now(),
        });
        event_bus.publish_workflow_event(executed(run_id));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.run_id(), run_id);
    }

    #[tokio::test]
    async fn test_cortex_events_flow_through_sink() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        let sink: Arc<dyn EventSink> = Arc::new(event_bus.clone());

        sink.publish_cortex(CortexEvent::GraphSynced {
            node_count: 2,
            edge_count: 1,
            hyperedge_count: 0,
            duration_ms: 1,
            timestamp: Utc::now(),
        });

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.name(), "graph_synced");
        assert!(matches!(received, DomainEvent::Cortex(_)));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_workflow_event(executed(RunId::new()));

        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
        assert!(matches!(receiver1.try_recv(), Err(EventBusError::Empty)));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_value(DomainEvent::Workflow(executed(RunId::new()))).unwrap();
        assert_eq!(json["domain"], "workflow");
        assert_eq!(json["event"]["type"], "workflow_executed");
    }
}
