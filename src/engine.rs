//! Approval engine: the orchestrator over catalog, store, delegations and SLA
//!
//! The engine owns every state transition of an approval instance:
//! - initiation (template selection, step chain creation, first SLA timer)
//! - decisions on the current step (advance, complete or reject)
//! - the escalation pass over overdue timers
//! - read models: worklists, instance progress, analytics and SLA overview

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::catalog::{select_template, validate_catalog, WorkflowTemplate};
use crate::delegation::{resolve_assignee, Delegation, NewDelegation, StepScope};
use crate::directory::{DisplayInfo, EntityDirectory, PersonDirectory};
use crate::error::{AppError, Result};
use crate::events::{EngineEvent, Notifier};
use crate::models::{
    Actor, ApprovalInstance, ApprovalStatus, ApprovalStep, Approver, AuditEntry, Context, Decision,
    EntityAnalytics, EntityType, InstanceSummary, PendingApproval, SlaOverview, SlaSnapshot,
    StepView, HR_ADMIN_ROLE,
};
use crate::sla::{Escalation, SlaStatus, SlaTracker};
use crate::store::{DecisionRecord, NewInstance, Store};

/// Who may act on a step, before and after delegation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// Person the step is nominally routed to
    pub nominal: String,
    /// Person who should act, after applying any in-effect delegation
    pub acting: String,
}

impl Assignment {
    pub fn is_delegated(&self) -> bool {
        self.nominal != self.acting
    }
}

/// Approval workflow engine
#[derive(Clone)]
pub struct ApprovalEngine {
    store: Store,
    entities: Arc<dyn EntityDirectory>,
    persons: Arc<dyn PersonDirectory>,
    notifier: Arc<dyn Notifier>,
}

impl ApprovalEngine {
    pub fn new(
        store: Store,
        entities: Arc<dyn EntityDirectory>,
        persons: Arc<dyn PersonDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            entities,
            persons,
            notifier,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // Catalog

    /// Validate a template against the active catalog and persist it
    pub async fn register_template(&self, template: WorkflowTemplate) -> Result<()> {
        let mut catalog = self.store.list_templates(false).await?;
        catalog.push(template.clone());
        validate_catalog(&catalog)?;

        self.store.insert_template(&template).await?;
        tracing::info!(
            template_id = %template.id,
            entity_type = %template.entity_type,
            steps = template.steps.len(),
            "Workflow template registered"
        );
        Ok(())
    }

    /// Register every template not already present; existing ids are left
    /// untouched since templates are immutable once stored
    pub async fn install_catalog(&self, templates: Vec<WorkflowTemplate>) -> Result<usize> {
        let known: Vec<String> = self
            .store
            .list_templates(true)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let mut installed = 0;
        for template in templates {
            if known.contains(&template.id) {
                tracing::debug!(template_id = %template.id, "Template already installed");
                continue;
            }
            self.register_template(template).await?;
            installed += 1;
        }
        Ok(installed)
    }

    pub async fn retire_template(&self, template_id: &str) -> Result<()> {
        self.store.retire_template(template_id).await?;
        tracing::info!(template_id, "Workflow template retired");
        Ok(())
    }

    pub async fn list_templates(&self) -> Result<Vec<WorkflowTemplate>> {
        self.store.list_templates(false).await
    }

    /// Template that would govern `(entity_type, context)` right now
    pub async fn select_template(
        &self,
        entity_type: EntityType,
        context: &Context,
    ) -> Result<WorkflowTemplate> {
        let catalog = self.store.list_templates(false).await?;
        select_template(&catalog, entity_type, context).cloned()
    }

    // Instance lifecycle

    pub async fn initiate(
        &self,
        actor: &Actor,
        entity_type: EntityType,
        entity_id: &str,
        context: Context,
    ) -> Result<Uuid> {
        self.initiate_at(actor, entity_type, entity_id, context, Utc::now())
            .await
    }

    /// Start an approval for an entity.
    ///
    /// Creates the instance, one pending step per template step (due dates
    /// accumulate step SLAs from `now`) and a timer for step 1 only.
    pub async fn initiate_at(
        &self,
        actor: &Actor,
        entity_type: EntityType,
        entity_id: &str,
        context: Context,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        if entity_id.trim().is_empty() {
            return Err(AppError::BadRequest("entity id is required".to_string()));
        }

        if let Some(existing) = self.store.find_pending_instance(entity_type, entity_id).await? {
            return Err(AppError::DuplicateInstance {
                entity_type,
                entity_id: entity_id.to_string(),
                existing_id: Some(existing.id),
            });
        }

        // Owner-supplied attributes fill gaps; the caller's context wins
        let mut context = context;
        if let Some(info) = self.entities.describe(entity_type, entity_id).await? {
            for (key, value) in info.attributes {
                context.entry(key).or_insert(value);
            }
        }

        let template = self.select_template(entity_type, &context).await?;

        let instance_id = Uuid::new_v4();
        let instance = ApprovalInstance {
            id: instance_id,
            template_id: template.id.clone(),
            entity_type,
            entity_id: entity_id.to_string(),
            context,
            status: ApprovalStatus::Pending,
            current_step: 1,
            step_count: template.steps.len() as u32,
            initiated_by: actor.person_id.clone(),
            initiated_at: now,
            completed_at: None,
        };

        let steps: Vec<ApprovalStep> = template
            .steps
            .iter()
            .zip(template.cumulative_due_hours()?)
            .map(|(def, due_hours)| ApprovalStep {
                id: Uuid::new_v4(),
                instance_id,
                step_number: def.step_number,
                name: def.name.clone(),
                status: ApprovalStatus::Pending,
                approver: def.approver.clone(),
                delegated_to: None,
                decided_by: None,
                due_at: now + Duration::hours(i64::from(due_hours)),
                decided_at: None,
                comments: None,
            })
            .collect();

        let first_tracker = SlaTracker::new(instance_id, 1, template.steps[0].sla_hours, now);

        let new = NewInstance {
            instance,
            steps,
            first_tracker,
        };
        self.store.create_instance(&new).await?;

        tracing::info!(
            instance_id = %instance_id,
            template_id = %template.id,
            entity_type = %entity_type,
            entity_id,
            initiated_by = %actor.person_id,
            "Approval workflow initiated"
        );

        if let Err(e) = self
            .entities
            .attach_instance(entity_type, entity_id, instance_id)
            .await
        {
            tracing::warn!(
                instance_id = %instance_id,
                entity_type = %entity_type,
                entity_id,
                "Failed to link instance to owning record: {}",
                e
            );
        }

        self.announce_activation(&new.instance, &new.steps[0], now)
            .await;

        Ok(instance_id)
    }

    /// Whether `actor` may act as an HR administrator. The claimed role only
    /// counts when the person directory confirms the person holds it.
    pub async fn has_admin_override(&self, actor: &Actor) -> Result<bool> {
        if !actor.claims_hr_admin() {
            return Ok(false);
        }
        let confirmed = self
            .persons
            .get_person(&actor.person_id)
            .await?
            .map_or(false, |person| person.holds(HR_ADMIN_ROLE));
        if !confirmed {
            tracing::warn!(
                person_id = %actor.person_id,
                "Claimed hr_admin role is not held in the person directory"
            );
        }
        Ok(confirmed)
    }

    pub async fn process_approval(
        &self,
        actor: &Actor,
        step_id: Uuid,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<InstanceSummary> {
        self.process_approval_at(actor, step_id, decision, comments, Utc::now())
            .await
    }

    /// Record a decision on the current step of an instance.
    ///
    /// Fails with `StaleApproval` when the step was already decided or is not
    /// the instance's current step, including when a concurrent decision wins
    /// the race between the checks below and the write.
    pub async fn process_approval_at(
        &self,
        actor: &Actor,
        step_id: Uuid,
        decision: Decision,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<InstanceSummary> {
        let step = self.store.get_step(step_id).await?;
        let instance = self.store.get_instance(step.instance_id).await?;

        if step.status != ApprovalStatus::Pending
            || instance.is_terminal()
            || instance.current_step != step.step_number
        {
            return Err(AppError::StaleApproval(step_id));
        }

        let delegations = self.store.active_delegations().await?;
        let assignments = self
            .assignments(&instance, &step, &delegations, now)
            .await?;
        let acting_for = assignments
            .iter()
            .find(|a| a.acting == actor.person_id)
            .cloned();

        let delegated_to = match &acting_for {
            Some(assignment) if assignment.is_delegated() => Some(assignment.acting.clone()),
            Some(_) => None,
            None => {
                if !self.has_admin_override(actor).await? {
                    return Err(AppError::NotAuthorized(format!(
                        "{} is not an approver for step {} of instance {}",
                        actor.person_id, step.step_number, instance.id
                    )));
                }
                None
            }
        };

        let next_tracker = match decision {
            Decision::Approved if step.step_number < instance.step_count => {
                let template = self.store.get_template(&instance.template_id).await?;
                let next_number = step.step_number + 1;
                let next = template.step(next_number).ok_or_else(|| {
                    AppError::Internal(format!(
                        "template {} has no step {}",
                        template.id, next_number
                    ))
                })?;
                Some(SlaTracker::new(instance.id, next_number, next.sla_hours, now))
            }
            _ => None,
        };

        let record = DecisionRecord {
            step_id,
            instance_id: instance.id,
            step_number: step.step_number,
            decision,
            decided_by: actor.person_id.clone(),
            delegated_to,
            comments: comments.filter(|c| !c.trim().is_empty()),
            decided_at: now,
            next_tracker,
        };

        let updated = match self.store.apply_decision(&record).await {
            Ok(updated) => updated,
            Err(AppError::StaleApproval(id)) => {
                tracing::info!(step_id = %id, "Decision lost a race; step already processed");
                return Err(AppError::StaleApproval(id));
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            instance_id = %updated.id,
            step_id = %step_id,
            step_number = step.step_number,
            decision = decision.as_str(),
            decided_by = %actor.person_id,
            status = updated.status.as_str(),
            "Approval decision recorded"
        );

        self.notifier.notify(EngineEvent::StepDecided {
            instance_id: updated.id,
            step_id,
            step_number: step.step_number,
            decision,
            decided_by: actor.person_id.clone(),
            on_behalf_of: acting_for
                .filter(Assignment::is_delegated)
                .map(|a| a.nominal),
        });

        if updated.is_terminal() {
            self.notifier.notify(EngineEvent::InstanceCompleted {
                instance_id: updated.id,
                entity_type: updated.entity_type,
                entity_id: updated.entity_id.clone(),
                status: updated.status,
            });
        } else {
            let steps = self.store.get_steps(updated.id).await?;
            if let Some(next) = steps.iter().find(|s| s.step_number == updated.current_step) {
                self.announce_activation(&updated, next, now).await;
            }
        }

        self.describe_instance_at(updated.id, now).await
    }

    pub async fn describe_instance(&self, instance_id: Uuid) -> Result<InstanceSummary> {
        self.describe_instance_at(instance_id, Utc::now()).await
    }

    /// Step-by-step progress of one instance as of `now`
    pub async fn describe_instance_at(
        &self,
        instance_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<InstanceSummary> {
        let instance = self.store.get_instance(instance_id).await?;
        let template = self.store.get_template(&instance.template_id).await?;
        let steps = self.store.get_steps(instance_id).await?;
        let trackers: HashMap<u32, SlaTracker> = self
            .store
            .get_trackers(instance_id)
            .await?
            .into_iter()
            .map(|t| (t.step_number, t))
            .collect();
        let entity = self
            .entities
            .describe(instance.entity_type, &instance.entity_id)
            .await?;

        let delegations = if instance.is_terminal() {
            Vec::new()
        } else {
            self.store.active_delegations().await?
        };

        let mut views = Vec::with_capacity(steps.len());
        for step in steps {
            let is_current =
                !instance.is_terminal() && step.step_number == instance.current_step;
            let assignees = if is_current {
                unique_acting(&self.assignments(&instance, &step, &delegations, now).await?)
            } else {
                Vec::new()
            };
            let sla = trackers.get(&step.step_number).map(|t| {
                let at = step.decided_at.unwrap_or(now);
                SlaSnapshot {
                    target_hours: t.target_hours,
                    started_at: t.started_at,
                    deadline: t.deadline(),
                    escalated_at: t.escalated_at,
                    status: t.status(at),
                }
            });
            views.push(StepView {
                step,
                assignees,
                sla,
            });
        }

        let threshold =
            instance.initiated_at + Duration::hours(i64::from(template.escalation_threshold_hours));
        let reference = instance.completed_at.unwrap_or(now);

        Ok(InstanceSummary {
            overall_due_at: instance.initiated_at
                + Duration::hours(i64::from(template.overall_sla_hours)),
            past_escalation_threshold: reference > threshold,
            template_name: template.name,
            entity,
            instance,
            steps: views,
        })
    }

    pub async fn get_audit_trail(&self, instance_id: Uuid) -> Result<Vec<AuditEntry>> {
        // Surface NotFound for unknown ids rather than an empty trail
        self.store.get_instance(instance_id).await?;
        self.store.audit_trail(instance_id).await
    }

    // Worklists and assignment

    pub async fn get_pending_approvals(&self, actor: &Actor) -> Result<Vec<PendingApproval>> {
        self.get_pending_approvals_at(&actor.person_id, Utc::now())
            .await
    }

    /// Every current pending step that resolves to `person_id` at `now`
    pub async fn get_pending_approvals_at(
        &self,
        person_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingApproval>> {
        let active = self.store.active_steps().await?;
        let delegations = self.store.active_delegations().await?;

        let mut pending = Vec::new();
        for entry in active {
            let assignments = self
                .assignments(&entry.instance, &entry.step, &delegations, now)
                .await?;
            let Some(assignment) = assignments.iter().find(|a| a.acting == person_id) else {
                continue;
            };

            let entity = self
                .entities
                .describe(entry.instance.entity_type, &entry.instance.entity_id)
                .await?
                .unwrap_or_else(|| {
                    DisplayInfo::unknown(entry.instance.entity_type, &entry.instance.entity_id)
                });

            let (sla_status, escalated) = match &entry.tracker {
                Some(tracker) => (tracker.status(now), tracker.escalated_at.is_some()),
                None => (SlaStatus::OnTrack, false),
            };

            pending.push(PendingApproval {
                due_at: entry.step.due_at,
                on_behalf_of: assignment
                    .is_delegated()
                    .then(|| assignment.nominal.clone()),
                step: entry.step,
                instance: entry.instance,
                entity,
                sla_status,
                escalated,
            });
        }

        pending.sort_by(|a, b| a.due_at.cmp(&b.due_at));
        Ok(pending)
    }

    /// Resolve who may act on a step at `at`
    pub async fn resolve_assignees(
        &self,
        step_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Assignment>> {
        let step = self.store.get_step(step_id).await?;
        let instance = self.store.get_instance(step.instance_id).await?;
        let delegations = self.store.active_delegations().await?;
        self.assignments(&instance, &step, &delegations, at).await
    }

    async fn assignments(
        &self,
        instance: &ApprovalInstance,
        step: &ApprovalStep,
        delegations: &[Delegation],
        at: DateTime<Utc>,
    ) -> Result<Vec<Assignment>> {
        let nominal: Vec<String> = match &step.approver {
            Approver::Person(id) => vec![id.clone()],
            Approver::Role(role) => self
                .persons
                .persons_with_role(role)
                .await?
                .into_iter()
                .map(|p| p.id)
                .collect(),
        };

        let scope = StepScope {
            template_id: &instance.template_id,
            department: instance.department(),
        };

        Ok(nominal
            .into_iter()
            .map(|person| {
                let acting = resolve_assignee(&person, delegations, scope, at).to_string();
                Assignment {
                    nominal: person,
                    acting,
                }
            })
            .collect())
    }

    async fn announce_activation(
        &self,
        instance: &ApprovalInstance,
        step: &ApprovalStep,
        now: DateTime<Utc>,
    ) {
        // Notification is best effort; resolution failures only cost the alert
        let assignees = match self.store.active_delegations().await {
            Ok(delegations) => match self.assignments(instance, step, &delegations, now).await {
                Ok(assignments) => unique_acting(&assignments),
                Err(e) => {
                    tracing::warn!(step_id = %step.id, "Failed to resolve assignees: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::warn!(step_id = %step.id, "Failed to load delegations: {}", e);
                Vec::new()
            }
        };

        if assignees.is_empty() {
            tracing::warn!(
                instance_id = %instance.id,
                step_number = step.step_number,
                approver = step.approver.value(),
                "Activated step has no resolvable approver"
            );
        }

        self.notifier.notify(EngineEvent::StepActivated {
            instance_id: instance.id,
            step_id: step.id,
            step_number: step.step_number,
            step_name: step.name.clone(),
            entity_type: instance.entity_type,
            entity_id: instance.entity_id.clone(),
            assignees,
            due_at: step.due_at,
        });
    }

    // SLA

    /// Escalate every current step whose timer is overdue and not yet
    /// escalated. Safe to repeat: a step is escalated at most once.
    pub async fn check_escalations(&self, now: DateTime<Utc>) -> Result<Vec<Escalation>> {
        let active = self.store.active_steps().await?;
        let delegations = self.store.active_delegations().await?;

        let mut escalations = Vec::new();
        for entry in active {
            let Some(tracker) = entry.tracker else {
                continue;
            };
            if tracker.escalated_at.is_some() || tracker.status(now) != SlaStatus::Overdue {
                continue;
            }

            if !self
                .store
                .mark_escalated(entry.instance.id, tracker.step_number, now)
                .await?
            {
                // Decided or escalated by someone else since the snapshot
                continue;
            }

            let assignees = match self
                .assignments(&entry.instance, &entry.step, &delegations, now)
                .await
            {
                Ok(assignments) => unique_acting(&assignments),
                Err(e) => {
                    tracing::warn!(step_id = %entry.step.id, "Failed to resolve assignees: {}", e);
                    Vec::new()
                }
            };

            let escalation = Escalation {
                instance_id: entry.instance.id,
                step_id: entry.step.id,
                step_number: entry.step.step_number,
                step_name: entry.step.name.clone(),
                target_hours: tracker.target_hours,
                started_at: tracker.started_at,
                escalated_at: now,
                assignees,
            };

            tracing::warn!(
                instance_id = %escalation.instance_id,
                step_number = escalation.step_number,
                target_hours = escalation.target_hours,
                "Approval step escalated"
            );

            self.notifier.notify(EngineEvent::Escalated {
                escalation: escalation.clone(),
            });
            escalations.push(escalation);
        }

        Ok(escalations)
    }

    /// Current steps bucketed by SLA status at `now`
    pub async fn get_sla_overview(&self, now: DateTime<Utc>) -> Result<SlaOverview> {
        let mut overview = SlaOverview::default();
        for entry in self.store.active_steps().await? {
            let Some(tracker) = entry.tracker else {
                continue;
            };
            match tracker.status(now) {
                SlaStatus::OnTrack => overview.on_track += 1,
                SlaStatus::Warning => overview.warning += 1,
                SlaStatus::Overdue => overview.overdue += 1,
            }
            if tracker.escalated_at.is_some() {
                overview.escalated += 1;
            }
        }
        Ok(overview)
    }

    // Analytics

    /// Completed-instance statistics per entity type.
    ///
    /// Every known entity type is reported, with zero counts when nothing has
    /// completed. Pending instances only contribute to `in_flight`.
    pub async fn get_approval_analytics(&self) -> Result<Vec<EntityAnalytics>> {
        let mut by_type: BTreeMap<EntityType, EntityAnalytics> = EntityType::all()
            .into_iter()
            .map(|t| (t, EntityAnalytics::empty(t)))
            .collect();
        let mut durations: BTreeMap<EntityType, (f64, u64)> = BTreeMap::new();

        for row in self.store.instance_stats().await? {
            let (Ok(entity_type), Ok(status)) = (
                row.entity_type.parse::<EntityType>(),
                row.status.parse::<ApprovalStatus>(),
            ) else {
                tracing::warn!(entity_type = %row.entity_type, status = %row.status, "Skipping unrecognised instance row");
                continue;
            };
            let stats = by_type
                .entry(entity_type)
                .or_insert_with(|| EntityAnalytics::empty(entity_type));

            match status {
                ApprovalStatus::Pending => {
                    stats.in_flight += 1;
                    continue;
                }
                ApprovalStatus::Approved => stats.approved += 1,
                ApprovalStatus::Rejected => stats.rejected += 1,
            }
            stats.total += 1;

            if let Some(completed_at) = row.completed_at {
                let hours = (completed_at - row.initiated_at).num_seconds() as f64 / 3600.0;
                let entry = durations.entry(entity_type).or_insert((0.0, 0));
                entry.0 += hours;
                entry.1 += 1;
            }
        }

        for (entity_type, (sum, count)) in durations {
            if let Some(stats) = by_type.get_mut(&entity_type) {
                stats.avg_duration_hours = Some(sum / count as f64);
            }
        }

        Ok(by_type.into_values().collect())
    }

    // Delegation administration

    pub async fn create_delegation(&self, request: NewDelegation) -> Result<Delegation> {
        request.validate()?;
        let delegation = request.into_delegation();
        self.store.insert_delegation(&delegation).await?;
        tracing::info!(
            delegation_id = %delegation.id,
            delegator = %delegation.delegator,
            delegate = %delegation.delegate,
            scope = delegation.scope.kind(),
            "Delegation recorded"
        );
        Ok(delegation)
    }

    pub async fn revoke_delegation(&self, delegation_id: Uuid) -> Result<()> {
        self.store.revoke_delegation(delegation_id).await?;
        tracing::info!(delegation_id = %delegation_id, "Delegation revoked");
        Ok(())
    }

    pub async fn list_delegations(&self, delegator: Option<&str>) -> Result<Vec<Delegation>> {
        self.store.list_delegations(delegator).await
    }
}

fn unique_acting(assignments: &[Assignment]) -> Vec<String> {
    let mut acting: Vec<String> = Vec::with_capacity(assignments.len());
    for a in assignments {
        if !acting.contains(&a.acting) {
            acting.push(a.acting.clone());
        }
    }
    acting
}
