//! Approvals server - multi-step approval workflows for HR records

use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use approvals::catalog::{default_catalog, WorkflowTemplate};
use approvals::config::ServerConfig;
use approvals::directory::InMemoryDirectory;
use approvals::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "approvals=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();

    // Database connection
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    let directory = match &config.directory {
        Some(path) => {
            tracing::info!("Loading directory seed from {}", path.display());
            InMemoryDirectory::load(path).await?
        }
        None => InMemoryDirectory::new(),
    };

    let state = AppState::new(pool, Arc::new(directory));

    // Install workflow templates
    match &config.catalog {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            let templates: Vec<WorkflowTemplate> = serde_json::from_str(&raw)?;
            let installed = state.engine.install_catalog(templates).await?;
            tracing::info!(installed, "Catalog loaded from {}", path.display());
        }
        None if state.engine.store().count_templates().await? == 0 => {
            let installed = state.engine.install_catalog(default_catalog()?).await?;
            tracing::info!(installed, "Installed default catalog");
        }
        None => {}
    }

    if let Some(every) = config.escalation_interval() {
        approvals::spawn_escalation_task(state.engine.clone(), every);
        tracing::info!("Escalation pass every {}s", every.as_secs());
    }

    let app = approvals::app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
