//! Approvals server - multi-step approval workflows for HR records

pub mod catalog;
pub mod config;
pub mod delegation;
pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod sla;
pub mod store;
pub mod websocket;

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::directory::InMemoryDirectory;
use crate::engine::ApprovalEngine;
use crate::events::BroadcastNotifier;

/// Application state shared across handlers
pub struct AppState {
    pub engine: ApprovalEngine,
    pub events: Arc<BroadcastNotifier>,
}

impl AppState {
    pub fn new(pool: SqlitePool, directory: Arc<InMemoryDirectory>) -> Arc<Self> {
        let events = Arc::new(BroadcastNotifier::new());
        let engine = ApprovalEngine::new(
            store::Store::new(pool),
            directory.clone(),
            directory,
            events.clone(),
        );
        Arc::new(Self { engine, events })
    }
}

/// Router with every server route and the shared middleware
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket::handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Run `check_escalations` on a fixed interval until the task is aborted
pub fn spawn_escalation_task(engine: ApprovalEngine, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match engine.check_escalations(chrono::Utc::now()).await {
                Ok(escalated) if !escalated.is_empty() => {
                    tracing::info!(count = escalated.len(), "Escalation pass complete");
                }
                Ok(_) => tracing::debug!("Escalation pass found nothing overdue"),
                Err(e) => tracing::error!("Escalation pass failed: {}", e),
            }
        }
    })
}
