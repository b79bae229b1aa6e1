/// Workflow Management Layer
///
/// This module handles workflow definitions, run records and persistence.
/// It provides:
/// - Node and workflow definitions validated into an acyclic graph
/// - Persisted workflow and node records
/// - SQLite persistence with sqlx, plus an in-memory store
/// - Lock-free definition registry using ArcSwap

// Node graph definitions
pub mod types;

// Persisted workflow and node records
pub mod records;

// Persistence gateway and its SQLite implementation
pub mod storage;

// In-memory persistence gateway
pub mod memory;

// Definition registry using ArcSwap
pub mod registry;

// Re-export commonly used types
pub use memory::InMemoryWorkflowStore;
pub use records::{
    NodeReturnType, WorkflowDetail, WorkflowInstance, WorkflowNode, WorkflowQuery, WorkflowStatus,
};
pub use registry::WorkflowRegistry;
pub use storage::{SqliteWorkflowStore, WorkflowStore};
pub use types::{
    ExecutorResult, NodeDefinition, NodeExecutor, WorkflowDefinition, WorkflowDefinitionBuilder,
    START_NODE,
};
