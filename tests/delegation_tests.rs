//! Delegation integration tests
//!
//! Delegations redirect who acts on a step at read time: worklists, decision
//! authorization and escalation recipients all resolve through them.

use approvals::catalog::default_catalog;
use approvals::delegation::{DelegationScope, NewDelegation};
use approvals::directory::{DirectorySeed, InMemoryDirectory, Person};
use approvals::engine::ApprovalEngine;
use approvals::error::AppError;
use approvals::events::BroadcastNotifier;
use approvals::models::{Actor, Context, ContextValue, Decision, EntityType};
use approvals::store::Store;
use chrono::{Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use uuid::Uuid;

fn person(id: &str, roles: &[&str]) -> Person {
    Person {
        id: id.to_string(),
        name: id.to_string(),
        email: format!("{}@example.com", id),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        active: true,
    }
}

async fn setup() -> ApprovalEngine {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    let store = Store::new(pool);
    store.migrate().await.expect("Failed to run migrations");

    let directory = Arc::new(InMemoryDirectory::from_seed(DirectorySeed {
        persons: vec![
            person("alice", &["hiring_manager"]),
            person("bob", &[]),
            person("carol", &[]),
            person("dave", &["vp_people"]),
        ],
        entities: Vec::new(),
    }));
    let engine = ApprovalEngine::new(
        store,
        directory.clone(),
        directory,
        Arc::new(BroadcastNotifier::new()),
    );
    engine
        .install_catalog(default_catalog().unwrap())
        .await
        .expect("Failed to install catalog");
    engine
}

fn offer_context(salary: f64, department: &str) -> Context {
    let mut ctx = Context::new();
    ctx.insert("salary".into(), ContextValue::Number(salary));
    ctx.insert("department".into(), ContextValue::from(department));
    ctx
}

async fn first_step(engine: &ApprovalEngine, instance_id: Uuid) -> Uuid {
    engine.store().get_steps(instance_id).await.unwrap()[0].id
}

#[tokio::test]
async fn test_department_delegation_reaches_delegate_worklist() {
    let engine = setup().await;
    let now = Utc::now();

    engine
        .create_delegation(NewDelegation::new(
            "alice",
            "bob",
            DelegationScope::Department("engineering".into()),
            now - Duration::hours(1),
        ))
        .await
        .unwrap();

    let id = engine
        .initiate_at(
            &Actor::new("recruiter"),
            EntityType::Offer,
            "offer-1",
            offer_context(95_000.0, "engineering"),
            now,
        )
        .await
        .unwrap();

    let bob = engine.get_pending_approvals_at("bob", now).await.unwrap();
    assert_eq!(bob.len(), 1);
    assert_eq!(bob[0].instance.id, id);
    assert_eq!(bob[0].on_behalf_of.as_deref(), Some("alice"));

    // The delegator no longer sees it while the delegation is in effect
    assert!(engine
        .get_pending_approvals_at("alice", now)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_department_delegation_does_not_cover_other_departments() {
    let engine = setup().await;
    let now = Utc::now();

    engine
        .create_delegation(NewDelegation::new(
            "alice",
            "bob",
            DelegationScope::Department("engineering".into()),
            now - Duration::hours(1),
        ))
        .await
        .unwrap();
    engine
        .initiate_at(
            &Actor::new("recruiter"),
            EntityType::Offer,
            "offer-1",
            offer_context(95_000.0, "sales"),
            now,
        )
        .await
        .unwrap();

    assert!(engine
        .get_pending_approvals_at("bob", now)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        engine.get_pending_approvals_at("alice", now).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_workflow_delegation_beats_department_delegation() {
    let engine = setup().await;
    let now = Utc::now();

    // Department delegation is the more recent one; scope still wins
    engine
        .create_delegation(NewDelegation::new(
            "alice",
            "carol",
            DelegationScope::Workflow("senior_offer".into()),
            now - Duration::days(2),
        ))
        .await
        .unwrap();
    engine
        .create_delegation(NewDelegation::new(
            "alice",
            "bob",
            DelegationScope::Department("engineering".into()),
            now - Duration::days(1),
        ))
        .await
        .unwrap();

    let id = engine
        .initiate_at(
            &Actor::new("recruiter"),
            EntityType::Offer,
            "offer-1",
            offer_context(95_000.0, "engineering"),
            now,
        )
        .await
        .unwrap();

    let assignments = engine
        .resolve_assignees(first_step(&engine, id).await, now)
        .await
        .unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].nominal, "alice");
    assert_eq!(assignments[0].acting, "carol");
}

#[tokio::test]
async fn test_delegate_decision_records_delegation() {
    let engine = setup().await;
    let now = Utc::now();

    engine
        .create_delegation(NewDelegation::new(
            "alice",
            "bob",
            DelegationScope::Blanket,
            now - Duration::hours(1),
        ))
        .await
        .unwrap();
    let id = engine
        .initiate_at(
            &Actor::new("recruiter"),
            EntityType::Offer,
            "offer-1",
            offer_context(45_000.0, "engineering"),
            now,
        )
        .await
        .unwrap();
    let step = first_step(&engine, id).await;

    // The delegator is not the resolved assignee while delegated away
    let err = engine
        .process_approval_at(&Actor::new("alice"), step, Decision::Approved, None, now)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotAuthorized(_)));

    let summary = engine
        .process_approval_at(&Actor::new("bob"), step, Decision::Approved, None, now)
        .await
        .unwrap();
    let decided = &summary.steps[0].step;
    assert_eq!(decided.decided_by.as_deref(), Some("bob"));
    assert_eq!(decided.delegated_to.as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_expired_and_revoked_delegations_are_ignored() {
    let engine = setup().await;
    let now = Utc::now();

    engine
        .create_delegation(
            NewDelegation::new(
                "alice",
                "bob",
                DelegationScope::Blanket,
                now - Duration::days(10),
            )
            .until(now - Duration::days(3)),
        )
        .await
        .unwrap();
    let revoked = engine
        .create_delegation(NewDelegation::new(
            "alice",
            "carol",
            DelegationScope::Blanket,
            now - Duration::days(1),
        ))
        .await
        .unwrap();
    engine.revoke_delegation(revoked.id).await.unwrap();

    let id = engine
        .initiate_at(
            &Actor::new("recruiter"),
            EntityType::Offer,
            "offer-1",
            offer_context(45_000.0, "engineering"),
            now,
        )
        .await
        .unwrap();

    let assignments = engine
        .resolve_assignees(first_step(&engine, id).await, now)
        .await
        .unwrap();
    assert_eq!(assignments[0].acting, "alice");
    assert!(!assignments[0].is_delegated());

    let listed = engine.list_delegations(Some("alice")).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|d| d.id == revoked.id && !d.active));
}

#[tokio::test]
async fn test_delegation_applies_at_read_time() {
    let engine = setup().await;
    let now = Utc::now();

    // Instance exists before the delegation is created
    let id = engine
        .initiate_at(
            &Actor::new("recruiter"),
            EntityType::Offer,
            "offer-1",
            offer_context(45_000.0, "engineering"),
            now - Duration::hours(2),
        )
        .await
        .unwrap();
    engine
        .create_delegation(NewDelegation::new(
            "alice",
            "bob",
            DelegationScope::Blanket,
            now - Duration::hours(1),
        ))
        .await
        .unwrap();

    let bob = engine.get_pending_approvals_at("bob", now).await.unwrap();
    assert_eq!(bob.len(), 1);
    assert_eq!(bob[0].instance.id, id);
}

#[tokio::test]
async fn test_invalid_delegations_rejected() {
    let engine = setup().await;
    let now = Utc::now();

    let err = engine
        .create_delegation(NewDelegation::new(
            "alice",
            "alice",
            DelegationScope::Blanket,
            now,
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = engine
        .create_delegation(
            NewDelegation::new("alice", "bob", DelegationScope::Blanket, now)
                .until(now - Duration::hours(1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = engine.revoke_delegation(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
