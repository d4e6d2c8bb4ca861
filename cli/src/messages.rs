//! Message types for WebSocket communication with the server
//!
//! Server payloads are mirrored only as far as the CLI prints them; unknown
//! fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Messages from client to server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Initiate {
        entity_type: String,
        entity_id: String,
        context: Map<String, Value>,
        acting_person_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        acting_role: Option<String>,
    },
    ProcessApproval {
        step_id: Uuid,
        decision: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        comments: Option<String>,
        acting_person_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        acting_role: Option<String>,
    },
    ListPending {
        acting_person_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        acting_role: Option<String>,
    },
    GetInstance {
        instance_id: Uuid,
    },
    GetAuditTrail {
        instance_id: Uuid,
    },
    GetAnalytics,
    GetSlaOverview,
    CheckEscalations,
    ListTemplates,
    ListDelegations {
        #[serde(skip_serializing_if = "Option::is_none")]
        delegator: Option<String>,
    },
    CreateDelegation {
        delegator: String,
        delegate: String,
        scope: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        ends_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        acting_person_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        acting_role: Option<String>,
    },
    Subscribe {
        #[serde(skip_serializing_if = "Option::is_none")]
        person_id: Option<String>,
    },
}

/// Messages from server to client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    InstanceInitiated {
        instance: InstanceSummary,
    },
    Instance {
        instance: InstanceSummary,
    },
    PendingApprovals {
        approvals: Vec<PendingApproval>,
    },
    AuditTrail {
        instance_id: Uuid,
        entries: Vec<AuditEntry>,
    },
    Analytics {
        analytics: Vec<EntityAnalytics>,
    },
    SlaOverview {
        overview: SlaOverview,
    },
    Escalations {
        escalations: Vec<Escalation>,
    },
    Templates {
        templates: Vec<Template>,
    },
    Delegations {
        delegations: Vec<Delegation>,
    },
    DelegationCreated {
        delegation: Delegation,
    },
    DelegationRevoked {
        delegation_id: Uuid,
    },
    Subscribed {
        #[serde(default)]
        person_id: Option<String>,
    },
    Event {
        event: Value,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub template_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub status: String,
    pub current_step: u32,
    pub step_count: u32,
    pub initiated_by: String,
    pub initiated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Approver {
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub step_number: u32,
    pub name: String,
    pub status: String,
    pub approver: Approver,
    #[serde(default)]
    pub delegated_to: Option<String>,
    #[serde(default)]
    pub decided_by: Option<String>,
    pub due_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sla {
    pub target_hours: u32,
    pub status: String,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub escalated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepView {
    #[serde(flatten)]
    pub step: Step,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub sla: Option<Sla>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayInfo {
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceSummary {
    pub instance: Instance,
    pub template_name: String,
    #[serde(default)]
    pub entity: Option<DisplayInfo>,
    pub overall_due_at: DateTime<Utc>,
    pub past_escalation_threshold: bool,
    pub steps: Vec<StepView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PendingApproval {
    pub step: Step,
    pub instance: Instance,
    pub entity: DisplayInfo,
    pub due_at: DateTime<Utc>,
    pub sla_status: String,
    pub escalated: bool,
    #[serde(default)]
    pub on_behalf_of: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditEntry {
    #[serde(default)]
    pub step_number: Option<u32>,
    pub action: String,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityAnalytics {
    pub entity_type: String,
    pub total: u64,
    pub approved: u64,
    pub rejected: u64,
    pub in_flight: u64,
    #[serde(default)]
    pub avg_duration_hours: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlaOverview {
    pub on_track: u64,
    pub warning: u64,
    pub overdue: u64,
    pub escalated: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Escalation {
    pub instance_id: Uuid,
    pub step_number: u32,
    pub step_name: String,
    pub target_hours: u32,
    #[serde(default)]
    pub assignees: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Routing {
    pub attribute: String,
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateStep {
    pub step_number: u32,
    pub name: String,
    pub approver: Approver,
    pub sla_hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub routing: Option<Routing>,
    pub steps: Vec<TemplateStep>,
    pub overall_sla_hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Delegation {
    pub id: Uuid,
    pub delegator: String,
    pub delegate: String,
    pub scope: Value,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub active: bool,
}

/// Parse `key=value`; numeric values are sent as numbers
pub fn parse_context_pair(pair: &str) -> Result<(String, Value), String> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", pair))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", pair));
    }
    let value = match value.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => serde_json::json!(n),
        _ => Value::String(value.trim().to_string()),
    };
    Ok((key.to_string(), value))
}

/// Parse `blanket`, `workflow:<template>` or `department:<name>`
pub fn parse_scope(raw: &str) -> Result<Value, String> {
    match raw.split_once(':') {
        None if raw == "blanket" => Ok(serde_json::json!({"kind": "blanket"})),
        Some((kind @ ("workflow" | "department"), value)) if !value.is_empty() => {
            Ok(serde_json::json!({"kind": kind, "value": value}))
        }
        _ => Err(format!(
            "invalid scope '{}': use blanket, workflow:<id> or department:<name>",
            raw
        )),
    }
}
