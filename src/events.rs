//! Engine events and notification dispatch
//!
//! Delivery is fire-and-forget: a failed or absent listener never affects the
//! state transition that produced the event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{ApprovalStatus, Decision, EntityType};
use crate::sla::Escalation;

/// Events emitted by the approval engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A step became the current step of its instance
    StepActivated {
        instance_id: Uuid,
        step_id: Uuid,
        step_number: u32,
        step_name: String,
        entity_type: EntityType,
        entity_id: String,
        assignees: Vec<String>,
        due_at: DateTime<Utc>,
    },
    /// A decision was recorded on a step
    StepDecided {
        instance_id: Uuid,
        step_id: Uuid,
        step_number: u32,
        decision: Decision,
        decided_by: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        on_behalf_of: Option<String>,
    },
    /// The instance reached a terminal status
    InstanceCompleted {
        instance_id: Uuid,
        entity_type: EntityType,
        entity_id: String,
        status: ApprovalStatus,
    },
    /// A step exceeded its SLA
    Escalated { escalation: Escalation },
}

impl EngineEvent {
    /// People this event is addressed to; empty means broadcast-only
    pub fn recipients(&self) -> Vec<&str> {
        match self {
            EngineEvent::StepActivated { assignees, .. } => {
                assignees.iter().map(String::as_str).collect()
            }
            EngineEvent::Escalated { escalation } => {
                escalation.assignees.iter().map(String::as_str).collect()
            }
            EngineEvent::StepDecided { .. } | EngineEvent::InstanceCompleted { .. } => Vec::new(),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        match self {
            EngineEvent::StepActivated { instance_id, .. }
            | EngineEvent::StepDecided { instance_id, .. }
            | EngineEvent::InstanceCompleted { instance_id, .. } => *instance_id,
            EngineEvent::Escalated { escalation } => escalation.instance_id,
        }
    }
}

/// Notification dispatch collaborator
pub trait Notifier: Send + Sync {
    fn notify(&self, event: EngineEvent);
}

/// Publishes events on a broadcast channel for WebSocket subscribers
pub struct BroadcastNotifier {
    event_tx: broadcast::Sender<EngineEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self { event_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: EngineEvent) {
        tracing::debug!(instance_id = %event.instance_id(), ?event, "Dispatching engine event");
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activated() -> EngineEvent {
        EngineEvent::StepActivated {
            instance_id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            step_number: 1,
            step_name: "Hiring manager review".into(),
            entity_type: EntityType::Offer,
            entity_id: "offer-1".into(),
            assignees: vec!["alice".into(), "bob".into()],
            due_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let notifier = BroadcastNotifier::new();
        let mut rx = notifier.subscribe();

        let event = activated();
        let id = event.instance_id();
        notifier.notify(event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.instance_id(), id);
        assert_eq!(received.recipients(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_notify_without_subscribers_is_silent() {
        let notifier = BroadcastNotifier::new();
        notifier.notify(activated());
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(activated()).unwrap();
        assert_eq!(json["event"], "step_activated");
        assert_eq!(json["entity_type"], "offer");
    }
}
