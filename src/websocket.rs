//! WebSocket server handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::catalog::WorkflowTemplate;
use crate::delegation::{Delegation, DelegationScope, NewDelegation};
use crate::error::{AppError, Result};
use crate::events::EngineEvent;
use crate::models::{
    Actor, AuditEntry, Context, Decision, EntityAnalytics, EntityType, InstanceSummary,
    PendingApproval, SlaOverview,
};
use crate::sla::Escalation;
use crate::AppState;

/// WebSocket handler
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Replies and subscribed events share one outbound queue
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(64);
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(text)).await {
                tracing::debug!("WebSocket send failed: {}", e);
                break;
            }
        }
    });

    let mut forwarder: Option<JoinHandle<()>> = None;

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
        };

        // Parse client message
        let reply = match serde_json::from_str::<ClientMessage>(&msg) {
            Ok(ClientMessage::Subscribe { person_id }) => {
                if let Some(previous) = forwarder.take() {
                    previous.abort();
                }
                forwarder = Some(spawn_forwarder(
                    state.events.subscribe(),
                    person_id.clone(),
                    out_tx.clone(),
                ));
                ServerMessage::Subscribed { person_id }
            }
            Ok(command) => dispatch(&state, command)
                .await
                .unwrap_or_else(ServerMessage::from_error),
            Err(e) => ServerMessage::Error {
                code: "bad_request".to_string(),
                message: format!("Invalid message: {}", e),
            },
        };

        if out_tx.send(reply).await.is_err() {
            break;
        }
    }

    if let Some(forwarder) = forwarder {
        forwarder.abort();
    }
    drop(out_tx);
    let _ = writer.await;
}

/// Relay engine events to one connection, optionally only those addressed
/// to `person_id`
fn spawn_forwarder(
    mut events: broadcast::Receiver<EngineEvent>,
    person_id: Option<String>,
    out_tx: mpsc::Sender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Subscriber lagged; events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            if let Some(person) = &person_id {
                if !event.recipients().contains(&person.as_str()) {
                    continue;
                }
            }

            if out_tx.send(ServerMessage::Event { event }).await.is_err() {
                break;
            }
        }
    })
}

async fn dispatch(state: &AppState, command: ClientMessage) -> Result<ServerMessage> {
    let engine = &state.engine;

    let reply = match command {
        ClientMessage::Initiate {
            entity_type,
            entity_id,
            context,
            acting_person_id,
            acting_role,
        } => {
            let actor = actor(acting_person_id, acting_role);
            let instance_id = engine
                .initiate(&actor, entity_type, &entity_id, context)
                .await?;
            let instance = engine.describe_instance(instance_id).await?;
            ServerMessage::InstanceInitiated { instance }
        }
        ClientMessage::ProcessApproval {
            step_id,
            decision,
            comments,
            acting_person_id,
            acting_role,
        } => {
            let actor = actor(acting_person_id, acting_role);
            let instance = engine
                .process_approval(&actor, step_id, decision, comments)
                .await?;
            ServerMessage::Instance { instance }
        }
        ClientMessage::ListPending {
            acting_person_id,
            acting_role,
        } => {
            let actor = actor(acting_person_id, acting_role);
            let approvals = engine.get_pending_approvals(&actor).await?;
            ServerMessage::PendingApprovals { approvals }
        }
        ClientMessage::GetInstance { instance_id } => {
            let instance = engine.describe_instance(instance_id).await?;
            ServerMessage::Instance { instance }
        }
        ClientMessage::GetAuditTrail { instance_id } => {
            let entries = engine.get_audit_trail(instance_id).await?;
            ServerMessage::AuditTrail {
                instance_id,
                entries,
            }
        }
        ClientMessage::GetAnalytics => ServerMessage::Analytics {
            analytics: engine.get_approval_analytics().await?,
        },
        ClientMessage::GetSlaOverview => ServerMessage::SlaOverview {
            overview: engine.get_sla_overview(Utc::now()).await?,
        },
        ClientMessage::CheckEscalations => ServerMessage::Escalations {
            escalations: engine.check_escalations(Utc::now()).await?,
        },
        ClientMessage::ListTemplates => ServerMessage::Templates {
            templates: engine.list_templates().await?,
        },
        ClientMessage::ListDelegations { delegator } => ServerMessage::Delegations {
            delegations: engine.list_delegations(delegator.as_deref()).await?,
        },
        ClientMessage::CreateDelegation {
            delegator,
            delegate,
            scope,
            starts_at,
            ends_at,
            reason,
            acting_person_id,
            acting_role,
        } => {
            let actor = actor(acting_person_id, acting_role);
            if actor.person_id != delegator && !engine.has_admin_override(&actor).await? {
                return Err(AppError::NotAuthorized(format!(
                    "{} cannot delegate on behalf of {}",
                    actor.person_id, delegator
                )));
            }
            let request = NewDelegation {
                delegator,
                delegate,
                scope,
                starts_at: starts_at.unwrap_or_else(Utc::now),
                ends_at,
                reason: reason.unwrap_or_default(),
            };
            ServerMessage::DelegationCreated {
                delegation: engine.create_delegation(request).await?,
            }
        }
        ClientMessage::RevokeDelegation {
            delegation_id,
            acting_person_id,
            acting_role,
        } => {
            let actor = actor(acting_person_id, acting_role);
            let delegation = engine.store().get_delegation(delegation_id).await?;
            if actor.person_id != delegation.delegator && !engine.has_admin_override(&actor).await? {
                return Err(AppError::NotAuthorized(format!(
                    "{} cannot revoke delegation {}",
                    actor.person_id, delegation_id
                )));
            }
            engine.revoke_delegation(delegation_id).await?;
            ServerMessage::DelegationRevoked { delegation_id }
        }
        ClientMessage::Subscribe { .. } => {
            return Err(AppError::Internal(
                "subscribe is handled by the connection loop".to_string(),
            ))
        }
    };

    Ok(reply)
}

fn actor(person_id: String, role: Option<String>) -> Actor {
    match role {
        Some(role) => Actor::new(person_id).with_role(role),
        None => Actor::new(person_id),
    }
}

/// Messages from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start an approval for an entity
    Initiate {
        entity_type: EntityType,
        entity_id: String,
        #[serde(default)]
        context: Context,
        acting_person_id: String,
        #[serde(default)]
        acting_role: Option<String>,
    },
    /// Approve or reject the current step of an instance
    ProcessApproval {
        step_id: Uuid,
        decision: Decision,
        #[serde(default)]
        comments: Option<String>,
        acting_person_id: String,
        #[serde(default)]
        acting_role: Option<String>,
    },
    /// Worklist for the acting person
    ListPending {
        acting_person_id: String,
        #[serde(default)]
        acting_role: Option<String>,
    },
    /// Instance progress
    GetInstance { instance_id: Uuid },
    /// Decision history of an instance
    GetAuditTrail { instance_id: Uuid },
    GetAnalytics,
    GetSlaOverview,
    /// Run an escalation pass now
    CheckEscalations,
    ListTemplates,
    ListDelegations {
        #[serde(default)]
        delegator: Option<String>,
    },
    CreateDelegation {
        delegator: String,
        delegate: String,
        scope: DelegationScope,
        #[serde(default)]
        starts_at: Option<DateTime<Utc>>,
        #[serde(default)]
        ends_at: Option<DateTime<Utc>>,
        #[serde(default)]
        reason: Option<String>,
        acting_person_id: String,
        #[serde(default)]
        acting_role: Option<String>,
    },
    RevokeDelegation {
        delegation_id: Uuid,
        acting_person_id: String,
        #[serde(default)]
        acting_role: Option<String>,
    },
    /// Receive engine events on this connection
    Subscribe {
        #[serde(default)]
        person_id: Option<String>,
    },
}

/// Messages from server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    InstanceInitiated { instance: InstanceSummary },
    Instance { instance: InstanceSummary },
    PendingApprovals { approvals: Vec<PendingApproval> },
    AuditTrail {
        instance_id: Uuid,
        entries: Vec<AuditEntry>,
    },
    Analytics { analytics: Vec<EntityAnalytics> },
    SlaOverview { overview: SlaOverview },
    Escalations { escalations: Vec<Escalation> },
    Templates { templates: Vec<WorkflowTemplate> },
    Delegations { delegations: Vec<Delegation> },
    DelegationCreated { delegation: Delegation },
    DelegationRevoked { delegation_id: Uuid },
    Subscribed {
        #[serde(skip_serializing_if = "Option::is_none")]
        person_id: Option<String>,
    },
    /// Engine event for a subscribed connection
    Event { event: EngineEvent },
    /// Error occurred
    Error { code: String, message: String },
}

impl ServerMessage {
    fn from_error(err: AppError) -> Self {
        if matches!(err, AppError::Database(_) | AppError::Internal(_)) {
            tracing::error!("Command failed: {}", err);
        } else {
            tracing::debug!(code = err.code(), "Command rejected: {}", err);
        }
        let message = match &err {
            AppError::StaleApproval(_) => {
                "This item was already processed, please refresh".to_string()
            }
            other => other.to_string(),
        };
        ServerMessage::Error {
            code: err.code().to_string(),
            message,
        }
    }
}
