//! Database store for templates, instances, trackers, delegations and audit
//!
//! Every mutation of an instance aggregate (instance row + step rows + tracker
//! + audit) happens inside one transaction. Decisions and escalations are
//! compare-and-set updates, so a racing writer observes zero affected rows
//! instead of overwriting a decision.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use crate::catalog::{RoutingPredicate, StepDefinition, WorkflowTemplate};
use crate::delegation::{Delegation, DelegationScope};
use crate::error::{AppError, Result};
use crate::models::{
    ApprovalInstance, ApprovalStatus, ApprovalStep, Approver, AuditAction, AuditEntry, Context,
    Decision, EntityType,
};
use crate::sla::SlaTracker;

/// Database store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Everything written when an instance is created
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub instance: ApprovalInstance,
    pub steps: Vec<ApprovalStep>,
    pub first_tracker: SlaTracker,
}

/// A decision ready to be applied to the current step
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub step_id: Uuid,
    pub instance_id: Uuid,
    pub step_number: u32,
    pub decision: Decision,
    pub decided_by: String,
    pub delegated_to: Option<String>,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
    /// Tracker for the step that becomes current; `None` when the chain ends
    pub next_tracker: Option<SlaTracker>,
}

/// The current step of a pending instance with its timer
#[derive(Debug, Clone)]
pub struct ActiveStep {
    pub instance: ApprovalInstance,
    pub step: ApprovalStep,
    pub tracker: Option<SlaTracker>,
}

/// Minimal instance facts used for analytics
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InstanceStatRow {
    pub entity_type: String,
    pub status: String,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Migration failed: {}", e)))
    }

    // Template operations

    pub async fn insert_template(&self, template: &WorkflowTemplate) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO workflow_templates
                (id, name, entity_type, routing_attribute, routing_min, routing_max,
                 overall_sla_hours, escalation_threshold_hours, active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&template.id)
        .bind(&template.name)
        .bind(template.entity_type.as_str())
        .bind(template.routing.as_ref().map(|r| r.attribute.clone()))
        .bind(template.routing.as_ref().map(|r| r.min))
        .bind(template.routing.as_ref().and_then(|r| r.max))
        .bind(i64::from(template.overall_sla_hours))
        .bind(i64::from(template.escalation_threshold_hours))
        .bind(template.active)
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(db)) = &inserted {
            if db.is_unique_violation() {
                return Err(AppError::InvalidTemplate(format!(
                    "template {} already exists",
                    template.id
                )));
            }
        }
        inserted?;

        for step in &template.steps {
            sqlx::query(
                r#"
                INSERT INTO workflow_template_steps
                    (template_id, step_number, name, approver_kind, approver, sla_hours)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&template.id)
            .bind(i64::from(step.step_number))
            .bind(&step.name)
            .bind(step.approver.kind())
            .bind(step.approver.value())
            .bind(i64::from(step.sla_hours))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_template(&self, id: &str) -> Result<WorkflowTemplate> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, name, entity_type, routing_attribute, routing_min, routing_max,
                   overall_sla_hours, escalation_threshold_hours, active
            FROM workflow_templates
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Template {} not found", id)))?;

        let steps = sqlx::query_as::<_, TemplateStepRow>(
            r#"
            SELECT template_id, step_number, name, approver_kind, approver, sla_hours
            FROM workflow_template_steps
            WHERE template_id = ?
            ORDER BY step_number ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        row.into_template(steps)
    }

    pub async fn list_templates(&self, include_retired: bool) -> Result<Vec<WorkflowTemplate>> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, name, entity_type, routing_attribute, routing_min, routing_max,
                   overall_sla_hours, escalation_threshold_hours, active
            FROM workflow_templates
            WHERE active = 1 OR ?
            ORDER BY entity_type ASC, id ASC
            "#,
        )
        .bind(include_retired)
        .fetch_all(&self.pool)
        .await?;

        let step_rows = sqlx::query_as::<_, TemplateStepRow>(
            r#"
            SELECT template_id, step_number, name, approver_kind, approver, sla_hours
            FROM workflow_template_steps
            ORDER BY template_id ASC, step_number ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut steps_by_template: HashMap<String, Vec<TemplateStepRow>> = HashMap::new();
        for step in step_rows {
            steps_by_template
                .entry(step.template_id.clone())
                .or_default()
                .push(step);
        }

        rows.into_iter()
            .map(|row| {
                let steps = steps_by_template.remove(&row.id).unwrap_or_default();
                row.into_template(steps)
            })
            .collect()
    }

    pub async fn retire_template(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_templates SET active = 0 WHERE id = ?
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Template {} not found", id)));
        }
        Ok(())
    }

    pub async fn count_templates(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM workflow_templates")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // Instance operations

    /// Write an instance, its full step chain, the first tracker and the
    /// initiation audit row atomically
    pub async fn create_instance(&self, new: &NewInstance) -> Result<()> {
        let instance = &new.instance;
        let mut tx = self.pool.begin().await?;

        let context = serde_json::to_string(&instance.context)
            .map_err(|e| AppError::Internal(format!("Failed to encode context: {}", e)))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO approval_instances
                (id, template_id, entity_type, entity_id, context, status, current_step,
                 step_count, initiated_by, initiated_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(instance.id.to_string())
        .bind(&instance.template_id)
        .bind(instance.entity_type.as_str())
        .bind(&instance.entity_id)
        .bind(context)
        .bind(instance.status.as_str())
        .bind(i64::from(instance.current_step))
        .bind(i64::from(instance.step_count))
        .bind(&instance.initiated_by)
        .bind(instance.initiated_at)
        .bind(instance.completed_at)
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(db)) = &inserted {
            if db.is_unique_violation() {
                drop(tx);
                let existing = self
                    .find_pending_instance(instance.entity_type, &instance.entity_id)
                    .await?;
                return Err(AppError::DuplicateInstance {
                    entity_type: instance.entity_type,
                    entity_id: instance.entity_id.clone(),
                    existing_id: existing.map(|i| i.id),
                });
            }
        }
        inserted?;

        for step in &new.steps {
            insert_step(&mut tx, step).await?;
        }
        insert_tracker(&mut tx, &new.first_tracker).await?;
        insert_audit(
            &mut tx,
            instance.id,
            None,
            AuditAction::Initiated,
            Some(&instance.initiated_by),
            None,
            instance.initiated_at,
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_instance(&self, id: Uuid) -> Result<ApprovalInstance> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {} FROM approval_instances WHERE id = ?",
            INSTANCE_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Instance {} not found", id)))?;

        row.try_into()
    }

    pub async fn find_pending_instance(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<ApprovalInstance>> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {} FROM approval_instances \
             WHERE entity_type = ? AND entity_id = ? AND status = 'pending'",
            INSTANCE_COLUMNS
        ))
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    pub async fn get_steps(&self, instance_id: Uuid) -> Result<Vec<ApprovalStep>> {
        let rows = sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {} FROM approval_steps WHERE instance_id = ? ORDER BY step_number ASC",
            STEP_COLUMNS
        ))
        .bind(instance_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn get_step(&self, step_id: Uuid) -> Result<ApprovalStep> {
        let row = sqlx::query_as::<_, StepRow>(&format!(
            "SELECT {} FROM approval_steps WHERE id = ?",
            STEP_COLUMNS
        ))
        .bind(step_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Step {} not found", step_id)))?;

        row.try_into()
    }

    /// Apply a decision to the current step.
    ///
    /// The step update is conditioned on the step still being `pending` and
    /// still the instance's current step; if that no longer holds nothing is
    /// written and `StaleApproval` is returned.
    pub async fn apply_decision(&self, record: &DecisionRecord) -> Result<ApprovalInstance> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE approval_steps
            SET status = ?, decided_by = ?, delegated_to = ?, decided_at = ?, comments = ?
            WHERE id = ?
              AND status = 'pending'
              AND step_number = (
                  SELECT current_step FROM approval_instances
                  WHERE approval_instances.id = approval_steps.instance_id
                    AND approval_instances.status = 'pending'
              )
            "#,
        )
        .bind(record.decision.status().as_str())
        .bind(&record.decided_by)
        .bind(&record.delegated_to)
        .bind(record.decided_at)
        .bind(&record.comments)
        .bind(record.step_id.to_string())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::StaleApproval(record.step_id));
        }

        let step_count: i64 =
            sqlx::query_scalar("SELECT step_count FROM approval_instances WHERE id = ?")
                .bind(record.instance_id.to_string())
                .fetch_one(&mut *tx)
                .await?;
        let past_last = step_count + 1;

        let (status, next_step, completed_at) = match (record.decision, &record.next_tracker) {
            (Decision::Rejected, _) => {
                (ApprovalStatus::Rejected, past_last, Some(record.decided_at))
            }
            (Decision::Approved, None) => {
                (ApprovalStatus::Approved, past_last, Some(record.decided_at))
            }
            (Decision::Approved, Some(next)) => {
                (ApprovalStatus::Pending, i64::from(next.step_number), None)
            }
        };

        let advanced = sqlx::query(
            r#"
            UPDATE approval_instances
            SET status = ?, current_step = ?, completed_at = ?
            WHERE id = ? AND status = 'pending' AND current_step = ?
            "#,
        )
        .bind(status.as_str())
        .bind(next_step)
        .bind(completed_at)
        .bind(record.instance_id.to_string())
        .bind(i64::from(record.step_number))
        .execute(&mut *tx)
        .await?;

        if advanced.rows_affected() == 0 {
            return Err(AppError::StaleApproval(record.step_id));
        }

        if let (Decision::Approved, Some(next)) = (record.decision, &record.next_tracker) {
            insert_tracker(&mut tx, next).await?;
        }

        insert_audit(
            &mut tx,
            record.instance_id,
            Some(record.step_number),
            record.decision.into(),
            Some(&record.decided_by),
            record.comments.as_deref(),
            record.decided_at,
        )
        .await?;

        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {} FROM approval_instances WHERE id = ?",
            INSTANCE_COLUMNS
        ))
        .bind(record.instance_id.to_string())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    /// Current steps of every pending instance, read from one snapshot
    pub async fn active_steps(&self) -> Result<Vec<ActiveStep>> {
        let mut tx = self.pool.begin().await?;

        let instance_rows = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {} FROM approval_instances WHERE status = 'pending' ORDER BY initiated_at ASC",
            INSTANCE_COLUMNS
        ))
        .fetch_all(&mut *tx)
        .await?;

        let step_rows = sqlx::query_as::<_, StepRow>(
            r#"
            SELECT s.id, s.instance_id, s.step_number, s.name, s.status, s.approver_kind,
                   s.approver, s.delegated_to, s.decided_by, s.due_at, s.decided_at, s.comments
            FROM approval_steps s
            JOIN approval_instances i ON i.id = s.instance_id
            WHERE i.status = 'pending' AND s.step_number = i.current_step AND s.status = 'pending'
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let tracker_rows = sqlx::query_as::<_, TrackerRow>(
            r#"
            SELECT t.instance_id, t.step_number, t.target_hours, t.started_at, t.escalated_at
            FROM sla_trackers t
            JOIN approval_instances i ON i.id = t.instance_id
            WHERE i.status = 'pending' AND t.step_number = i.current_step
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut steps: HashMap<Uuid, ApprovalStep> = HashMap::new();
        for row in step_rows {
            let step: ApprovalStep = row.try_into()?;
            steps.insert(step.instance_id, step);
        }
        let mut trackers: HashMap<Uuid, SlaTracker> = HashMap::new();
        for row in tracker_rows {
            let tracker: SlaTracker = row.try_into()?;
            trackers.insert(tracker.instance_id, tracker);
        }

        let mut active = Vec::with_capacity(instance_rows.len());
        for row in instance_rows {
            let instance: ApprovalInstance = row.try_into()?;
            if let Some(step) = steps.remove(&instance.id) {
                let tracker = trackers.remove(&instance.id);
                active.push(ActiveStep {
                    instance,
                    step,
                    tracker,
                });
            }
        }
        Ok(active)
    }

    pub async fn get_trackers(&self, instance_id: Uuid) -> Result<Vec<SlaTracker>> {
        let rows = sqlx::query_as::<_, TrackerRow>(
            r#"
            SELECT instance_id, step_number, target_hours, started_at, escalated_at
            FROM sla_trackers
            WHERE instance_id = ?
            ORDER BY step_number ASC
            "#,
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Stamp `escalated_at` if the tracker is unescalated and its step is
    /// still current and pending. Returns whether this call did the stamping.
    pub async fn mark_escalated(
        &self,
        instance_id: Uuid,
        step_number: u32,
        escalated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE sla_trackers
            SET escalated_at = ?
            WHERE instance_id = ?
              AND step_number = ?
              AND escalated_at IS NULL
              AND EXISTS (
                  SELECT 1 FROM approval_instances i
                  JOIN approval_steps s ON s.instance_id = i.id
                  WHERE i.id = sla_trackers.instance_id
                    AND i.status = 'pending'
                    AND i.current_step = sla_trackers.step_number
                    AND s.step_number = sla_trackers.step_number
                    AND s.status = 'pending'
              )
            "#,
        )
        .bind(escalated_at)
        .bind(instance_id.to_string())
        .bind(i64::from(step_number))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        insert_audit(
            &mut tx,
            instance_id,
            Some(step_number),
            AuditAction::Escalated,
            None,
            None,
            escalated_at,
        )
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn instance_stats(&self) -> Result<Vec<InstanceStatRow>> {
        let rows = sqlx::query_as::<_, InstanceStatRow>(
            r#"
            SELECT entity_type, status, initiated_at, completed_at
            FROM approval_instances
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn audit_trail(&self, instance_id: Uuid) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT instance_id, step_number, action, actor, comments, recorded_at
            FROM approval_audit
            WHERE instance_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    // Delegation operations

    pub async fn insert_delegation(&self, delegation: &Delegation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delegations
                (id, delegator, delegate, scope_kind, scope_value, starts_at, ends_at, reason, active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(delegation.id.to_string())
        .bind(&delegation.delegator)
        .bind(&delegation.delegate)
        .bind(delegation.scope.kind())
        .bind(delegation.scope.value())
        .bind(delegation.starts_at)
        .bind(delegation.ends_at)
        .bind(&delegation.reason)
        .bind(delegation.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn revoke_delegation(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE delegations SET active = 0 WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Delegation {} not found", id)));
        }
        Ok(())
    }

    pub async fn get_delegation(&self, id: Uuid) -> Result<Delegation> {
        let row = sqlx::query_as::<_, DelegationRow>(&format!(
            "SELECT {} FROM delegations WHERE id = ?",
            DELEGATION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Delegation {} not found", id)))?;

        row.try_into()
    }

    /// Delegations, optionally only those handed over by `delegator`
    pub async fn list_delegations(&self, delegator: Option<&str>) -> Result<Vec<Delegation>> {
        let rows = sqlx::query_as::<_, DelegationRow>(&format!(
            "SELECT {} FROM delegations WHERE (? IS NULL OR delegator = ?) ORDER BY starts_at ASC",
            DELEGATION_COLUMNS
        ))
        .bind(delegator)
        .bind(delegator)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    pub async fn active_delegations(&self) -> Result<Vec<Delegation>> {
        let rows = sqlx::query_as::<_, DelegationRow>(&format!(
            "SELECT {} FROM delegations WHERE active = 1",
            DELEGATION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }
}

async fn insert_step(tx: &mut Transaction<'_, Sqlite>, step: &ApprovalStep) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO approval_steps
            (id, instance_id, step_number, name, status, approver_kind, approver,
             delegated_to, decided_by, due_at, decided_at, comments)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(step.id.to_string())
    .bind(step.instance_id.to_string())
    .bind(i64::from(step.step_number))
    .bind(&step.name)
    .bind(step.status.as_str())
    .bind(step.approver.kind())
    .bind(step.approver.value())
    .bind(&step.delegated_to)
    .bind(&step.decided_by)
    .bind(step.due_at)
    .bind(step.decided_at)
    .bind(&step.comments)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_tracker(tx: &mut Transaction<'_, Sqlite>, tracker: &SlaTracker) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sla_trackers (instance_id, step_number, target_hours, started_at, escalated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(tracker.instance_id.to_string())
    .bind(i64::from(tracker.step_number))
    .bind(i64::from(tracker.target_hours))
    .bind(tracker.started_at)
    .bind(tracker.escalated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_audit(
    tx: &mut Transaction<'_, Sqlite>,
    instance_id: Uuid,
    step_number: Option<u32>,
    action: AuditAction,
    actor: Option<&str>,
    comments: Option<&str>,
    recorded_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO approval_audit (instance_id, step_number, action, actor, comments, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(instance_id.to_string())
    .bind(step_number.map(i64::from))
    .bind(action.as_str())
    .bind(actor)
    .bind(comments)
    .bind(recorded_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// Internal row types for sqlx

const INSTANCE_COLUMNS: &str = "id, template_id, entity_type, entity_id, context, status, \
     current_step, step_count, initiated_by, initiated_at, completed_at";

const STEP_COLUMNS: &str = "id, instance_id, step_number, name, status, approver_kind, approver, \
     delegated_to, decided_by, due_at, decided_at, comments";

const DELEGATION_COLUMNS: &str =
    "id, delegator, delegate, scope_kind, scope_value, starts_at, ends_at, reason, active";

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| AppError::Internal(format!("Invalid UUID: {}", e)))
}

fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| AppError::Internal(format!("Invalid {}: {}", field, value)))
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    entity_type: String,
    routing_attribute: Option<String>,
    routing_min: Option<f64>,
    routing_max: Option<f64>,
    overall_sla_hours: i64,
    escalation_threshold_hours: i64,
    active: bool,
}

#[derive(sqlx::FromRow)]
struct TemplateStepRow {
    template_id: String,
    step_number: i64,
    name: String,
    approver_kind: String,
    approver: String,
    sla_hours: i64,
}

impl TemplateRow {
    fn into_template(self, steps: Vec<TemplateStepRow>) -> Result<WorkflowTemplate> {
        let steps = steps
            .into_iter()
            .map(|s| {
                Ok(StepDefinition {
                    step_number: to_u32(s.step_number, "step_number")?,
                    name: s.name,
                    approver: Approver::from_parts(&s.approver_kind, s.approver)
                        .map_err(AppError::Internal)?,
                    sla_hours: to_u32(s.sla_hours, "sla_hours")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let routing = match self.routing_attribute {
            Some(attribute) => Some(RoutingPredicate {
                attribute,
                min: self.routing_min.unwrap_or(f64::NEG_INFINITY),
                max: self.routing_max,
            }),
            None => None,
        };

        Ok(WorkflowTemplate {
            id: self.id,
            name: self.name,
            entity_type: self.entity_type.parse().map_err(AppError::Internal)?,
            routing,
            steps,
            overall_sla_hours: to_u32(self.overall_sla_hours, "overall_sla_hours")?,
            escalation_threshold_hours: to_u32(
                self.escalation_threshold_hours,
                "escalation_threshold_hours",
            )?,
            active: self.active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: String,
    template_id: String,
    entity_type: String,
    entity_id: String,
    context: String,
    status: String,
    current_step: i64,
    step_count: i64,
    initiated_by: String,
    initiated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<InstanceRow> for ApprovalInstance {
    type Error = AppError;

    fn try_from(row: InstanceRow) -> Result<Self> {
        let context: Context = serde_json::from_str(&row.context)
            .map_err(|e| AppError::Internal(format!("Invalid context: {}", e)))?;

        Ok(ApprovalInstance {
            id: parse_uuid(&row.id)?,
            template_id: row.template_id,
            entity_type: row.entity_type.parse().map_err(AppError::Internal)?,
            entity_id: row.entity_id,
            context,
            status: row.status.parse().map_err(AppError::Internal)?,
            current_step: to_u32(row.current_step, "current_step")?,
            step_count: to_u32(row.step_count, "step_count")?,
            initiated_by: row.initiated_by,
            initiated_at: row.initiated_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StepRow {
    id: String,
    instance_id: String,
    step_number: i64,
    name: String,
    status: String,
    approver_kind: String,
    approver: String,
    delegated_to: Option<String>,
    decided_by: Option<String>,
    due_at: DateTime<Utc>,
    decided_at: Option<DateTime<Utc>>,
    comments: Option<String>,
}

impl TryFrom<StepRow> for ApprovalStep {
    type Error = AppError;

    fn try_from(row: StepRow) -> Result<Self> {
        Ok(ApprovalStep {
            id: parse_uuid(&row.id)?,
            instance_id: parse_uuid(&row.instance_id)?,
            step_number: to_u32(row.step_number, "step_number")?,
            name: row.name,
            status: row.status.parse().map_err(AppError::Internal)?,
            approver: Approver::from_parts(&row.approver_kind, row.approver)
                .map_err(AppError::Internal)?,
            delegated_to: row.delegated_to,
            decided_by: row.decided_by,
            due_at: row.due_at,
            decided_at: row.decided_at,
            comments: row.comments,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrackerRow {
    instance_id: String,
    step_number: i64,
    target_hours: i64,
    started_at: DateTime<Utc>,
    escalated_at: Option<DateTime<Utc>>,
}

impl TryFrom<TrackerRow> for SlaTracker {
    type Error = AppError;

    fn try_from(row: TrackerRow) -> Result<Self> {
        Ok(SlaTracker {
            instance_id: parse_uuid(&row.instance_id)?,
            step_number: to_u32(row.step_number, "step_number")?,
            target_hours: to_u32(row.target_hours, "target_hours")?,
            started_at: row.started_at,
            escalated_at: row.escalated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DelegationRow {
    id: String,
    delegator: String,
    delegate: String,
    scope_kind: String,
    scope_value: Option<String>,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
    reason: String,
    active: bool,
}

impl TryFrom<DelegationRow> for Delegation {
    type Error = AppError;

    fn try_from(row: DelegationRow) -> Result<Self> {
        Ok(Delegation {
            id: parse_uuid(&row.id)?,
            delegator: row.delegator,
            delegate: row.delegate,
            scope: DelegationScope::from_parts(&row.scope_kind, row.scope_value)
                .map_err(AppError::Internal)?,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            reason: row.reason,
            active: row.active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    instance_id: String,
    step_number: Option<i64>,
    action: String,
    actor: Option<String>,
    comments: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = AppError;

    fn try_from(row: AuditRow) -> Result<Self> {
        Ok(AuditEntry {
            instance_id: parse_uuid(&row.instance_id)?,
            step_number: row
                .step_number
                .map(|n| to_u32(n, "step_number"))
                .transpose()?,
            action: row.action.parse().map_err(AppError::Internal)?,
            actor: row.actor,
            comments: row.comments,
            recorded_at: row.recorded_at,
        })
    }
}
