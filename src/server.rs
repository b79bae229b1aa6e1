/// Server setup and initialization
///
/// Wires together all components: workflow store, definition registry,
/// engine, orphan recovery and HTTP routes. Provides the main application
/// factory function for creating the Axum app.

use crate::{
    api::workflows::{create_workflow_routes, AppState},
    config::Config,
    runtime::{
        engine::WorkflowEngine, manager::WorkflowManager, oracle::DeploymentOracle,
        recovery::recover_orphaned_workflows,
    },
    workflow::{registry::WorkflowRegistry, storage::SqliteWorkflowStore},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::filter::LevelFilter;

/// Build the workflow manager: open the store, close orphaned runs and bind
/// the engine to the given registry and deployment oracle
pub async fn create_manager(
    config: &Config,
    registry: Arc<WorkflowRegistry>,
    oracle: Arc<dyn DeploymentOracle>,
) -> Result<Arc<WorkflowManager>> {
    ensure_database_dir(&config.database.url)?;

    tracing::info!("📋 Initializing workflow store at {}", config.database.url);
    let store = SqliteWorkflowStore::connect(&config.database.url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open workflow store: {}", e))?;

    tracing::info!("♻️ Closing workflows orphaned by a previous process");
    let recovered = recover_orphaned_workflows(&store)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to recover orphaned workflows: {}", e))?;
    if !recovered.is_empty() {
        tracing::warn!("Closed {} orphaned workflows", recovered.len());
    }

    tracing::info!("🚀 Initializing workflow engine");
    let engine = WorkflowEngine::new(Arc::new(store), oracle, config.engine.settings());
    Ok(Arc::new(WorkflowManager::new(registry, engine)))
}

/// Create the main Axum application with all routes
pub fn create_app(manager: Arc<WorkflowManager>) -> Router {
    tracing::info!("📡 Creating HTTP router with all endpoints");
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Workflow inspection API routes
        .merge(create_workflow_routes().with_state(AppState { manager }))
}

/// Start the HTTP server with the given configuration
///
/// Business workflows are registered on `registry` by the embedding binary
/// before the server starts; `oracle` is the deployment subsystem client.
pub async fn start_server(
    config: Config,
    registry: Arc<WorkflowRegistry>,
    oracle: Arc<dyn DeploymentOracle>,
) -> Result<()> {
    init_tracing(&config.log_level);

    tracing::info!("Starting flowwork server...");
    let manager = create_manager(&config, registry, oracle).await?;
    let app = create_app(Arc::clone(&manager));

    // Bind to the configured address
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("⏹️ Stopping background workflows");
    manager.engine().runner().shutdown().await;
    Ok(())
}

/// Initialize the tracing subscriber for logging
fn init_tracing(level: &str) {
    let level = level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_max_level(level)
        .try_init();
}

/// Create the parent directory of a file-backed SQLite URL
fn ensure_database_dir(url: &str) -> Result<()> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    if path.starts_with(":memory:") || path.is_empty() {
        return Ok(());
    }
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tracing::info!("📁 Ensuring data directory exists: {}", parent.display());
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
    }
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
