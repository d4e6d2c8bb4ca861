//! Data models for approval instances, steps and their read views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::directory::DisplayInfo;
use crate::sla::SlaStatus;

/// Role that may act on any step regardless of assignment
pub const HR_ADMIN_ROLE: &str = "hr_admin";

/// Kind of business entity an approval runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Offer,
    Interview,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Offer => "offer",
            EntityType::Interview => "interview",
        }
    }

    pub fn all() -> [EntityType; 2] {
        [EntityType::Offer, EntityType::Interview]
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(EntityType::Offer),
            "interview" => Ok(EntityType::Interview),
            _ => Err(format!("Invalid entity type: {}", s)),
        }
    }
}

/// Status shared by instances and steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            _ => Err(format!("Invalid approval status: {}", s)),
        }
    }
}

/// A decision submitted against the current step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }

    pub fn status(&self) -> ApprovalStatus {
        match self {
            Decision::Approved => ApprovalStatus::Approved,
            Decision::Rejected => ApprovalStatus::Rejected,
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" | "approve" => Ok(Decision::Approved),
            "rejected" | "reject" => Ok(Decision::Rejected),
            _ => Err(format!("Invalid decision: {}", s)),
        }
    }
}

/// Who a step is nominally assigned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Approver {
    /// Anyone currently holding the role
    Role(String),
    /// One specific person
    Person(String),
}

impl Approver {
    pub fn kind(&self) -> &'static str {
        match self {
            Approver::Role(_) => "role",
            Approver::Person(_) => "person",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Approver::Role(v) | Approver::Person(v) => v,
        }
    }

    pub fn from_parts(kind: &str, value: String) -> Result<Self, String> {
        match kind {
            "role" => Ok(Approver::Role(value)),
            "person" => Ok(Approver::Person(value)),
            _ => Err(format!("Invalid approver kind: {}", kind)),
        }
    }
}

/// A routing attribute value supplied at initiation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Number(f64),
    Text(String),
}

impl ContextValue {
    /// Numeric view; text values are parsed so "95000" routes like 95000
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ContextValue::Number(n) => Some(*n),
            ContextValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextValue::Text(s) => Some(s),
            ContextValue::Number(_) => None,
        }
    }
}

impl From<f64> for ContextValue {
    fn from(n: f64) -> Self {
        ContextValue::Number(n)
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        ContextValue::Text(s.to_string())
    }
}

/// Named attributes used to route and scope an approval
pub type Context = BTreeMap<String, ContextValue>;

/// The person on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub person_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Actor {
    pub fn new(person_id: impl Into<String>) -> Self {
        Self {
            person_id: person_id.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Whether the caller claims the HR administrator role. The claim still
    /// has to be confirmed against the person directory before it grants
    /// anything.
    pub fn claims_hr_admin(&self) -> bool {
        self.role.as_deref() == Some(HR_ADMIN_ROLE)
    }
}

/// One running execution of a template against one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalInstance {
    pub id: Uuid,
    pub template_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub context: Context,
    pub status: ApprovalStatus,
    /// Step awaiting a decision, or one past the last step once terminal
    pub current_step: u32,
    pub step_count: u32,
    pub initiated_by: String,
    pub initiated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ApprovalInstance {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn department(&self) -> Option<&str> {
        self.context.get("department").and_then(|v| v.as_text())
    }
}

/// One node in an instance's sequential chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub step_number: u32,
    pub name: String,
    pub status: ApprovalStatus,
    pub approver: Approver,
    /// Written only when a delegate actually decides the step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    pub due_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// Timer view attached to a step in read models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaSnapshot {
    pub target_hours: u32,
    pub started_at: DateTime<Utc>,
    /// When the timer runs out
    pub deadline: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
    pub status: SlaStatus,
}

/// A step as rendered on a progress dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepView {
    #[serde(flatten)]
    pub step: ApprovalStep,
    /// People who may act right now; empty unless this is the current step
    pub assignees: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla: Option<SlaSnapshot>,
}

/// Full state of one instance, for dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub instance: ApprovalInstance,
    pub template_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<DisplayInfo>,
    pub overall_due_at: DateTime<Utc>,
    pub past_escalation_threshold: bool,
    pub steps: Vec<StepView>,
}

impl InstanceSummary {
    pub fn current(&self) -> Option<&StepView> {
        self.steps
            .iter()
            .find(|s| s.step.step_number == self.instance.current_step)
    }
}

/// One worklist row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub step: ApprovalStep,
    pub instance: ApprovalInstance,
    pub entity: DisplayInfo,
    pub due_at: DateTime<Utc>,
    pub sla_status: SlaStatus,
    pub escalated: bool,
    /// Nominal assignee when the row reached this person through a delegation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_behalf_of: Option<String>,
}

/// Completed-instance statistics for one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAnalytics {
    pub entity_type: EntityType,
    pub total: u64,
    pub approved: u64,
    pub rejected: u64,
    pub in_flight: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_duration_hours: Option<f64>,
}

impl EntityAnalytics {
    pub fn empty(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            total: 0,
            approved: 0,
            rejected: 0,
            in_flight: 0,
            avg_duration_hours: None,
        }
    }
}

/// Counts of current steps by SLA status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaOverview {
    pub on_track: u64,
    pub warning: u64,
    pub overdue: u64,
    pub escalated: u64,
}

/// Kind of audit trail entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Initiated,
    Approved,
    Rejected,
    Escalated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Initiated => "initiated",
            AuditAction::Approved => "approved",
            AuditAction::Rejected => "rejected",
            AuditAction::Escalated => "escalated",
        }
    }
}

impl From<Decision> for AuditAction {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Approved => AuditAction::Approved,
            Decision::Rejected => AuditAction::Rejected,
        }
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(AuditAction::Initiated),
            "approved" => Ok(AuditAction::Approved),
            "rejected" => Ok(AuditAction::Rejected),
            "escalated" => Ok(AuditAction::Escalated),
            _ => Err(format!("Invalid audit action: {}", s)),
        }
    }
}

/// One row of an instance's decision history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub instance_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_number: Option<u32>,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
