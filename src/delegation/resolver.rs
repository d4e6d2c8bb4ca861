//! Read-time assignee resolution through the delegation directory

use chrono::{DateTime, Utc};

use super::record::{Delegation, DelegationScope};

/// What a step belongs to, for matching delegation scopes
#[derive(Debug, Clone, Copy)]
pub struct StepScope<'a> {
    pub template_id: &'a str,
    pub department: Option<&'a str>,
}

impl StepScope<'_> {
    fn covers(&self, scope: &DelegationScope) -> bool {
        match scope {
            DelegationScope::Workflow(template_id) => template_id == self.template_id,
            DelegationScope::Department(department) => {
                self.department == Some(department.as_str())
            }
            DelegationScope::Blanket => true,
        }
    }
}

/// The delegation that redirects `person` for this step at `at`, if any.
///
/// Narrowest scope wins; among equally specific delegations the most recently
/// started one wins.
pub fn winning_delegation<'a>(
    person: &str,
    delegations: &'a [Delegation],
    scope: StepScope<'_>,
    at: DateTime<Utc>,
) -> Option<&'a Delegation> {
    delegations
        .iter()
        .filter(|d| d.delegator == person && d.in_effect(at) && scope.covers(&d.scope))
        .max_by(|a, b| {
            a.scope
                .specificity()
                .cmp(&b.scope.specificity())
                .then_with(|| a.starts_at.cmp(&b.starts_at))
                .then_with(|| b.id.cmp(&a.id))
        })
}

/// Person who should act on a step nominally assigned to `person`
pub fn resolve_assignee<'a>(
    person: &'a str,
    delegations: &'a [Delegation],
    scope: StepScope<'_>,
    at: DateTime<Utc>,
) -> &'a str {
    winning_delegation(person, delegations, scope, at)
        .map(|d| d.delegate.as_str())
        .unwrap_or(person)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::NewDelegation;
    use chrono::Duration;

    const SCOPE: StepScope<'static> = StepScope {
        template_id: "senior_offer",
        department: Some("engineering"),
    };

    #[test]
    fn test_no_delegation_returns_original() {
        let now = Utc::now();
        assert_eq!(resolve_assignee("alice", &[], SCOPE, now), "alice");
    }

    #[test]
    fn test_department_delegation_applies() {
        let now = Utc::now();
        let delegations = vec![NewDelegation::new(
            "alice",
            "bob",
            DelegationScope::Department("engineering".into()),
            now,
        )
        .into_delegation()];
        assert_eq!(resolve_assignee("alice", &delegations, SCOPE, now), "bob");
        assert_eq!(resolve_assignee("carol", &delegations, SCOPE, now), "carol");
    }

    #[test]
    fn test_out_of_scope_delegation_ignored() {
        let now = Utc::now();
        let delegations = vec![
            NewDelegation::new("alice", "bob", DelegationScope::Department("sales".into()), now)
                .into_delegation(),
            NewDelegation::new(
                "alice",
                "dan",
                DelegationScope::Workflow("standard_offer".into()),
                now,
            )
            .into_delegation(),
        ];
        assert_eq!(resolve_assignee("alice", &delegations, SCOPE, now), "alice");
    }

    #[test]
    fn test_workflow_scope_beats_department_scope() {
        let now = Utc::now();
        let delegations = vec![
            NewDelegation::new(
                "alice",
                "bob",
                DelegationScope::Department("engineering".into()),
                now - Duration::hours(1),
            )
            .into_delegation(),
            NewDelegation::new(
                "alice",
                "wendy",
                DelegationScope::Workflow("senior_offer".into()),
                now - Duration::days(3),
            )
            .into_delegation(),
            NewDelegation::new("alice", "bea", DelegationScope::Blanket, now - Duration::hours(1))
                .into_delegation(),
        ];
        assert_eq!(resolve_assignee("alice", &delegations, SCOPE, now), "wendy");
    }

    #[test]
    fn test_department_beats_blanket() {
        let now = Utc::now();
        let delegations = vec![
            NewDelegation::new("alice", "bea", DelegationScope::Blanket, now).into_delegation(),
            NewDelegation::new(
                "alice",
                "bob",
                DelegationScope::Department("engineering".into()),
                now - Duration::days(1),
            )
            .into_delegation(),
        ];
        assert_eq!(resolve_assignee("alice", &delegations, SCOPE, now), "bob");
    }

    #[test]
    fn test_expired_delegation_ignored() {
        let now = Utc::now();
        let delegations = vec![NewDelegation::new(
            "alice",
            "bob",
            DelegationScope::Blanket,
            now - Duration::days(10),
        )
        .until(now - Duration::days(1))
        .into_delegation()];
        assert_eq!(resolve_assignee("alice", &delegations, SCOPE, now), "alice");
    }

    #[test]
    fn test_most_recent_of_equal_scope_wins() {
        let now = Utc::now();
        let delegations = vec![
            NewDelegation::new("alice", "old", DelegationScope::Blanket, now - Duration::days(5))
                .into_delegation(),
            NewDelegation::new("alice", "new", DelegationScope::Blanket, now - Duration::days(1))
                .into_delegation(),
        ];
        assert_eq!(resolve_assignee("alice", &delegations, SCOPE, now), "new");
    }
}
