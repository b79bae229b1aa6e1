/// flowwork server
///
/// Main entry point. Initializes configuration and starts the HTTP server
/// exposing workflow inspection and cancellation.

use flowwork::{
    config::Config, runtime::InMemoryDeploymentOracle, server::start_server, WorkflowRegistry,
};
use std::sync::Arc;

/// Application entry point
///
/// The server provides:
/// - Workflow listing and detail at /api/workflows/*
/// - Cancellation of live runs at /api/workflows/{id}/cancel
/// - Health check at /healthz
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (defaults to 0.0.0.0:3004 and a SQLite file under data/)
    let config = Config::default();

    // Business workflows and the deployment client are registered by the
    // embedding service; the standalone binary serves inspection only
    let registry = Arc::new(WorkflowRegistry::new());
    let oracle = Arc::new(InMemoryDeploymentOracle::new());

    start_server(config, registry, oracle).await?;

    Ok(())
}
