//! Workflow catalog: immutable templates and context-based selection
//!
//! A template applies to one entity type and optionally carries a routing band
//! over a numeric context attribute (typically `salary`). Selection picks the
//! narrowest band containing the context value and never falls back to a
//! default when nothing matches.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{AppError, Result};
use crate::models::{Approver, Context, EntityType};

/// One step of a template's chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step_number: u32,
    pub name: String,
    pub approver: Approver,
    pub sla_hours: u32,
}

impl StepDefinition {
    pub fn new(step_number: u32, name: impl Into<String>, approver: Approver, sla_hours: u32) -> Self {
        Self {
            step_number,
            name: name.into(),
            approver,
            sla_hours,
        }
    }
}

/// Closed band `[min, max]` over a named numeric attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPredicate {
    pub attribute: String,
    pub min: f64,
    /// `None` leaves the band open at the top
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl RoutingPredicate {
    pub fn new(attribute: impl Into<String>, min: f64, max: Option<f64>) -> Self {
        Self {
            attribute: attribute.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && self.max.map_or(true, |max| value <= max)
    }

    /// True when `value` sits on the band's upper edge, where the next tier's
    /// minimum takes precedence
    pub fn at_upper_edge(&self, value: f64) -> bool {
        self.max == Some(value)
    }

    pub fn width(&self) -> f64 {
        self.max.map_or(f64::INFINITY, |max| max - self.min)
    }
}

/// A reusable approval policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TemplateSpec")]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingPredicate>,
    pub steps: Vec<StepDefinition>,
    pub overall_sla_hours: u32,
    pub escalation_threshold_hours: u32,
    pub active: bool,
}

/// Unvalidated template shape as it appears in catalog files
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSpec {
    pub id: String,
    pub name: String,
    pub entity_type: EntityType,
    #[serde(default)]
    pub routing: Option<RoutingPredicate>,
    pub steps: Vec<StepDefinition>,
    /// Defaults to the sum of step SLAs
    #[serde(default)]
    pub overall_sla_hours: Option<u32>,
    /// Defaults to the overall SLA
    #[serde(default)]
    pub escalation_threshold_hours: Option<u32>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl TryFrom<TemplateSpec> for WorkflowTemplate {
    type Error = AppError;

    fn try_from(spec: TemplateSpec) -> Result<Self> {
        let step_total = spec
            .steps
            .iter()
            .try_fold(0u32, |acc, s| acc.checked_add(s.sla_hours))
            .ok_or_else(|| {
                AppError::InvalidTemplate(format!("template {}: step SLAs overflow", spec.id))
            })?;
        let overall = spec.overall_sla_hours.unwrap_or(step_total);
        let template = WorkflowTemplate {
            id: spec.id,
            name: spec.name,
            entity_type: spec.entity_type,
            routing: spec.routing,
            steps: spec.steps,
            overall_sla_hours: overall,
            escalation_threshold_hours: spec.escalation_threshold_hours.unwrap_or(overall),
            active: spec.active,
        };
        template.validate()?;
        Ok(template)
    }
}

impl WorkflowTemplate {
    /// Build and validate a template whose overall SLA is the sum of its steps
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        entity_type: EntityType,
        routing: Option<RoutingPredicate>,
        steps: Vec<StepDefinition>,
    ) -> Result<Self> {
        TemplateSpec {
            id: id.into(),
            name: name.into(),
            entity_type,
            routing,
            steps,
            overall_sla_hours: None,
            escalation_threshold_hours: None,
            active: true,
        }
        .try_into()
    }

    pub fn with_escalation_threshold(mut self, hours: u32) -> Self {
        self.escalation_threshold_hours = hours;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(AppError::InvalidTemplate("template id is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(AppError::InvalidTemplate(format!(
                "template {} has no steps",
                self.id
            )));
        }
        for (idx, step) in self.steps.iter().enumerate() {
            let expected = idx as u32 + 1;
            if step.step_number != expected {
                return Err(AppError::InvalidTemplate(format!(
                    "template {}: expected step {} but found step {}",
                    self.id, expected, step.step_number
                )));
            }
            if step.sla_hours == 0 {
                return Err(AppError::InvalidTemplate(format!(
                    "template {}: step {} has a zero SLA",
                    self.id, step.step_number
                )));
            }
            if step.approver.value().trim().is_empty() {
                return Err(AppError::InvalidTemplate(format!(
                    "template {}: step {} has no approver",
                    self.id, step.step_number
                )));
            }
        }
        self.cumulative_due_hours()?;
        if let Some(routing) = &self.routing {
            if !routing.min.is_finite() || routing.max.map_or(false, |max| max < routing.min) {
                return Err(AppError::InvalidTemplate(format!(
                    "template {}: routing band on {} is empty",
                    self.id, routing.attribute
                )));
            }
        }
        Ok(())
    }

    pub fn step(&self, step_number: u32) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    /// Hours from initiation to each step's due date, in step order
    pub fn cumulative_due_hours(&self) -> Result<Vec<u32>> {
        let mut total = 0u32;
        self.steps
            .iter()
            .map(|step| {
                total = total.checked_add(step.sla_hours).ok_or_else(|| {
                    AppError::InvalidTemplate(format!("template {}: step SLAs overflow", self.id))
                })?;
                Ok(total)
            })
            .collect()
    }

    /// Order templates matching their routed values: bands a value sits
    /// inside come before bands it only touches at the top, then narrowest,
    /// then higher minimum, then id
    fn specificity_cmp(
        &self,
        value: Option<f64>,
        other: &Self,
        other_value: Option<f64>,
    ) -> Ordering {
        let (e1, w1, m1) = band(self, value);
        let (e2, w2, m2) = band(other, other_value);
        e1.cmp(&e2)
            .then_with(|| w1.total_cmp(&w2))
            .then_with(|| m2.total_cmp(&m1))
            .then_with(|| self.id.cmp(&other.id))
    }
}

fn band(template: &WorkflowTemplate, value: Option<f64>) -> (bool, f64, f64) {
    match (&template.routing, value) {
        (Some(r), Some(v)) => (r.at_upper_edge(v), r.width(), r.min),
        (Some(r), None) => (false, r.width(), r.min),
        (None, _) => (false, f64::INFINITY, f64::NEG_INFINITY),
    }
}

/// Pick the single template that governs `(entity_type, context)`.
///
/// Every attribute referenced by a candidate's routing band must be present
/// and numeric. Bands are closed, so adjacent tiers share their boundary; a
/// value on the boundary goes to the tier whose minimum it is. Otherwise the
/// narrowest matching band wins and equal widths prefer the higher tier.
pub fn select_template<'a>(
    templates: &'a [WorkflowTemplate],
    entity_type: EntityType,
    context: &Context,
) -> Result<&'a WorkflowTemplate> {
    let candidates: Vec<&WorkflowTemplate> = templates
        .iter()
        .filter(|t| t.active && t.entity_type == entity_type)
        .collect();

    if candidates.is_empty() {
        return Err(AppError::NoApplicableWorkflow(format!(
            "no active workflow for {}",
            entity_type
        )));
    }

    let mut matching = Vec::new();
    for template in candidates {
        let Some(routing) = &template.routing else {
            matching.push((template, None));
            continue;
        };
        let value = context.get(&routing.attribute).ok_or_else(|| {
            AppError::InvalidContext(format!("missing routing attribute `{}`", routing.attribute))
        })?;
        let value = value.as_number().ok_or_else(|| {
            AppError::InvalidContext(format!("routing attribute `{}` is not numeric", routing.attribute))
        })?;
        if routing.contains(value) {
            matching.push((template, Some(value)));
        }
    }

    matching
        .into_iter()
        .min_by(|(a, va), (b, vb)| a.specificity_cmp(*va, b, *vb))
        .map(|(template, _)| template)
        .ok_or_else(|| {
            AppError::NoApplicableWorkflow(format!(
                "no {} workflow matches the supplied context",
                entity_type
            ))
        })
}

/// Reject catalogs where two active templates would be indistinguishable
pub fn validate_catalog(templates: &[WorkflowTemplate]) -> Result<()> {
    for (i, a) in templates.iter().enumerate() {
        a.validate()?;
        for b in &templates[i + 1..] {
            if a.id == b.id {
                return Err(AppError::InvalidTemplate(format!("duplicate template id {}", a.id)));
            }
            if a.active && b.active && a.entity_type == b.entity_type && a.routing == b.routing {
                return Err(AppError::InvalidTemplate(format!(
                    "templates {} and {} route the same {} band",
                    a.id, b.id, a.entity_type
                )));
            }
        }
    }
    Ok(())
}

/// Catalog installed when none is configured
pub fn default_catalog() -> Result<Vec<WorkflowTemplate>> {
    let role = |r: &str| Approver::Role(r.to_string());
    Ok(vec![
        WorkflowTemplate::new(
            "entry_offer",
            "Entry-level offer approval",
            EntityType::Offer,
            Some(RoutingPredicate::new("salary", 0.0, Some(60_000.0))),
            vec![StepDefinition::new(1, "Hiring manager review", role("hiring_manager"), 24)],
        )?,
        WorkflowTemplate::new(
            "standard_offer",
            "Standard offer approval",
            EntityType::Offer,
            Some(RoutingPredicate::new("salary", 60_000.0, Some(90_000.0))),
            vec![
                StepDefinition::new(1, "Hiring manager review", role("hiring_manager"), 24),
                StepDefinition::new(2, "HR business partner review", role("hr_business_partner"), 24),
            ],
        )?,
        WorkflowTemplate::new(
            "senior_offer",
            "Senior offer approval",
            EntityType::Offer,
            Some(RoutingPredicate::new("salary", 90_000.0, Some(999_999_999.0))),
            vec![
                StepDefinition::new(1, "Hiring manager review", role("hiring_manager"), 24),
                StepDefinition::new(2, "Department head review", role("department_head"), 24),
                StepDefinition::new(3, "VP People sign-off", role("vp_people"), 48),
            ],
        )?
        .with_escalation_threshold(120),
        WorkflowTemplate::new(
            "interview_committee",
            "Interview committee sign-off",
            EntityType::Interview,
            None,
            vec![
                StepDefinition::new(1, "Interview lead review", role("interview_lead"), 24),
                StepDefinition::new(2, "Committee chair sign-off", role("committee_chair"), 48),
            ],
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContextValue;

    fn salary(value: f64) -> Context {
        let mut ctx = Context::new();
        ctx.insert("salary".into(), ContextValue::Number(value));
        ctx
    }

    #[test]
    fn test_default_catalog_is_valid() {
        let catalog = default_catalog().unwrap();
        validate_catalog(&catalog).unwrap();
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn test_select_by_salary_band() {
        let catalog = default_catalog().unwrap();
        let t = select_template(&catalog, EntityType::Offer, &salary(45_000.0)).unwrap();
        assert_eq!(t.id, "entry_offer");
        let t = select_template(&catalog, EntityType::Offer, &salary(75_000.0)).unwrap();
        assert_eq!(t.id, "standard_offer");
        let t = select_template(&catalog, EntityType::Offer, &salary(95_000.0)).unwrap();
        assert_eq!(t.id, "senior_offer");
    }

    #[test]
    fn test_boundary_routes_to_higher_tier() {
        let catalog = default_catalog().unwrap();
        let t = select_template(&catalog, EntityType::Offer, &salary(90_000.0)).unwrap();
        assert_eq!(t.id, "senior_offer");
        let t = select_template(&catalog, EntityType::Offer, &salary(60_000.0)).unwrap();
        assert_eq!(t.id, "standard_offer");
    }

    #[test]
    fn test_band_upper_edge_is_inclusive() {
        let catalog = default_catalog().unwrap();
        let t = select_template(&catalog, EntityType::Offer, &salary(999_999_999.0)).unwrap();
        assert_eq!(t.id, "senior_offer");
        let err = select_template(&catalog, EntityType::Offer, &salary(1_000_000_000.0)).unwrap_err();
        assert!(matches!(err, AppError::NoApplicableWorkflow(_)));

        let band = RoutingPredicate::new("salary", 60_000.0, Some(90_000.0));
        assert!(band.contains(90_000.0));
        assert!(band.at_upper_edge(90_000.0));
        assert!(!band.at_upper_edge(89_999.0));
    }

    #[test]
    fn test_single_point_band_is_valid() {
        let t = WorkflowTemplate::new(
            "exact",
            "Exact",
            EntityType::Offer,
            Some(RoutingPredicate::new("salary", 50_000.0, Some(50_000.0))),
            vec![StepDefinition::new(1, "Review", Approver::Role("r".into()), 24)],
        )
        .unwrap();
        let catalog = vec![t];
        let t = select_template(&catalog, EntityType::Offer, &salary(50_000.0)).unwrap();
        assert_eq!(t.id, "exact");
    }

    #[test]
    fn test_sla_overflow_rejected() {
        let role = Approver::Role("hiring_manager".into());
        let err = WorkflowTemplate::new(
            "endless",
            "Endless",
            EntityType::Offer,
            None,
            vec![
                StepDefinition::new(1, "One", role.clone(), u32::MAX),
                StepDefinition::new(2, "Two", role, 1),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidTemplate(_)));

        let json = r#"{
            "id": "endless", "name": "Endless", "entity_type": "interview",
            "steps": [
                {"step_number": 1, "name": "One", "approver": {"kind": "role", "id": "r"}, "sla_hours": 4294967295},
                {"step_number": 2, "name": "Two", "approver": {"kind": "role", "id": "r"}, "sla_hours": 2}
            ]
        }"#;
        assert!(serde_json::from_str::<WorkflowTemplate>(json).is_err());
    }

    #[test]
    fn test_narrowest_overlapping_band_wins() {
        let role = Approver::Role("hiring_manager".into());
        let wide = WorkflowTemplate::new(
            "wide",
            "Wide",
            EntityType::Offer,
            Some(RoutingPredicate::new("salary", 0.0, None)),
            vec![StepDefinition::new(1, "Review", role.clone(), 24)],
        )
        .unwrap();
        let narrow = WorkflowTemplate::new(
            "narrow",
            "Narrow",
            EntityType::Offer,
            Some(RoutingPredicate::new("salary", 100_000.0, Some(150_000.0))),
            vec![StepDefinition::new(1, "Review", role, 24)],
        )
        .unwrap();
        let catalog = vec![wide, narrow];
        let t = select_template(&catalog, EntityType::Offer, &salary(120_000.0)).unwrap();
        assert_eq!(t.id, "narrow");
        let t = select_template(&catalog, EntityType::Offer, &salary(20_000.0)).unwrap();
        assert_eq!(t.id, "wide");
    }

    #[test]
    fn test_no_match_is_an_error() {
        let catalog = default_catalog().unwrap();
        let err = select_template(&catalog, EntityType::Offer, &salary(-5.0)).unwrap_err();
        assert!(matches!(err, AppError::NoApplicableWorkflow(_)));
    }

    #[test]
    fn test_missing_attribute_is_invalid_context() {
        let catalog = default_catalog().unwrap();
        let err = select_template(&catalog, EntityType::Offer, &Context::new()).unwrap_err();
        assert!(matches!(err, AppError::InvalidContext(_)));

        let mut ctx = Context::new();
        ctx.insert("salary".into(), ContextValue::from("a lot"));
        let err = select_template(&catalog, EntityType::Offer, &ctx).unwrap_err();
        assert!(matches!(err, AppError::InvalidContext(_)));
    }

    #[test]
    fn test_unrouted_template_needs_no_context() {
        let catalog = default_catalog().unwrap();
        let t = select_template(&catalog, EntityType::Interview, &Context::new()).unwrap();
        assert_eq!(t.id, "interview_committee");
    }

    #[test]
    fn test_retired_templates_are_skipped() {
        let mut catalog = default_catalog().unwrap();
        for t in catalog.iter_mut().filter(|t| t.entity_type == EntityType::Interview) {
            t.active = false;
        }
        let err = select_template(&catalog, EntityType::Interview, &Context::new()).unwrap_err();
        assert!(matches!(err, AppError::NoApplicableWorkflow(_)));
    }

    #[test]
    fn test_non_contiguous_steps_rejected() {
        let role = Approver::Role("hiring_manager".into());
        let err = WorkflowTemplate::new(
            "gappy",
            "Gappy",
            EntityType::Offer,
            None,
            vec![
                StepDefinition::new(1, "One", role.clone(), 24),
                StepDefinition::new(3, "Three", role, 24),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidTemplate(_)));
    }

    #[test]
    fn test_empty_band_rejected() {
        let err = WorkflowTemplate::new(
            "inverted",
            "Inverted",
            EntityType::Offer,
            Some(RoutingPredicate::new("salary", 10.0, Some(5.0))),
            vec![StepDefinition::new(1, "One", Approver::Role("r".into()), 24)],
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidTemplate(_)));
    }

    #[test]
    fn test_identical_active_bands_rejected() {
        let mut catalog = default_catalog().unwrap();
        let mut copy = catalog[0].clone();
        copy.id = "entry_offer_v2".into();
        catalog.push(copy);
        assert!(validate_catalog(&catalog).is_err());

        catalog[0].active = false;
        assert!(validate_catalog(&catalog).is_ok());
    }

    #[test]
    fn test_cumulative_due_hours() {
        let catalog = default_catalog().unwrap();
        let senior = catalog.iter().find(|t| t.id == "senior_offer").unwrap();
        assert_eq!(senior.cumulative_due_hours().unwrap(), vec![24, 48, 96]);
        assert_eq!(senior.overall_sla_hours, 96);
        assert_eq!(senior.escalation_threshold_hours, 120);
    }

    #[test]
    fn test_template_spec_deserialization_validates() {
        let json = r#"{
            "id": "offer_fast",
            "name": "Fast",
            "entity_type": "offer",
            "routing": {"attribute": "salary", "min": 0},
            "steps": [{"step_number": 1, "name": "Review",
                       "approver": {"kind": "person", "id": "p-9"}, "sla_hours": 8}]
        }"#;
        let t: WorkflowTemplate = serde_json::from_str(json).unwrap();
        assert_eq!(t.overall_sla_hours, 8);
        assert!(t.active);
        assert_eq!(t.routing.as_ref().unwrap().max, None);

        let bad = r#"{"id": "x", "name": "X", "entity_type": "offer", "steps": []}"#;
        assert!(serde_json::from_str::<WorkflowTemplate>(bad).is_err());
    }
}
