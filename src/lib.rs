/// flowwork: durable workflow engine for cluster lifecycle operations
///
/// This library runs multi-step operational procedures (create, scale,
/// backup, import/export...) as persisted, inspectable workflows whose nodes
/// either complete synchronously or hand work to the deployment subsystem
/// and poll it until done.

// Core configuration and setup
pub mod config;

// Error types shared across the engine
pub mod error;

// Workflow definitions, run records, persistence and registry
pub mod workflow;

// Runtime execution engine - per-run aggregation, polling and cancellation
pub mod runtime;

// HTTP API layer - inspection and cancellation endpoints
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{NodeError, WorkflowError};
pub use runtime::{
    DeploymentOracle, EngineSettings, FlowContext, PersistencePolicy, RequestMeta,
    WorkflowAggregation, WorkflowEngine, WorkflowHandle, WorkflowManager,
};
pub use server::start_server;
pub use workflow::{NodeDefinition, WorkflowDefinition, WorkflowRegistry, WorkflowStatus};
