/// Runtime Execution Engine
///
/// This module drives workflow runs. It handles:
/// - The per-run aggregation walking the node graph
/// - Polling the deployment oracle for long-running operations
/// - Background task launching and cancellation
/// - Startup recovery of runs orphaned by a restart

// Flow context and cancellation signal shared by the nodes of a run
pub mod context;

// Per-run execution engine
pub mod aggregation;

// Engine settings and run factory
pub mod engine;

// Name-based facade over the engine with live-run tracking
pub mod manager;

// Backtraces recorded at the panic site of node executors
mod panics;

// Deployment status oracle consumed by polling nodes
pub mod oracle;

// Startup sweep for unfinished runs
pub mod recovery;

// Fire-and-forget task launcher
pub mod tasks;

// Re-export main types
pub use aggregation::{WorkflowAggregation, WorkflowHandle};
pub use context::{CancelSignal, ContextError, FlowContext};
pub use engine::{EngineSettings, PersistencePolicy, RequestMeta, WorkflowEngine};
pub use manager::WorkflowManager;
pub use oracle::{DeploymentOracle, InMemoryDeploymentOracle, Operation, OperationStatus, OracleError};
pub use recovery::recover_orphaned_workflows;
pub use tasks::BackgroundTaskRunner;
