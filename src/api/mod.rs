/// HTTP API Layer
///
/// This module provides the REST endpoints for inspecting workflow runs:
/// - Listing persisted runs with filters and paging
/// - Run detail with the node history
/// - Cancellation of runs executing in this process

// Workflow inspection endpoints
pub mod workflows;

// Re-export router builder
pub use workflows::{create_workflow_routes, AppState};
