/// Error types shared across the engine.
///
/// `WorkflowError` covers definition, storage and lifecycle failures that are
/// surfaced to callers. `NodeError` is the reason a single node failed; its
/// display string is what ends up in the persisted node `result`.

use std::time::Duration;
use thiserror::Error;

/// Crate-level error returned by definition building, storage and the
/// workflow lifecycle entry points.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// No definition was supplied (or none is registered under the name)
    #[error("workflow definition not found: {0}")]
    DefinitionNotFound(String),

    /// The definition graph is malformed (dangling successor, cycle, ...)
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// Workflow or node record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Persistence gateway failure
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The background task driving a workflow did not return normally
    #[error("workflow task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<sqlx::Error> for WorkflowError {
    fn from(err: sqlx::Error) -> Self {
        WorkflowError::Storage(err.to_string())
    }
}

/// Why a workflow node failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// External operation failed, either the oracle call itself or the
    /// operation it reports on
    #[error("task failed: {0}")]
    TaskFailed(String),

    /// The executor panicked; payload is the panic message
    #[error("panic: {0}")]
    Panic(String),

    #[error("polling timed out after {0} attempts")]
    PollingTimeout(u32),

    #[error("task canceled: {0}")]
    Canceled(String),

    #[error("executor timed out after {0:?}")]
    ExecutorTimeout(Duration),

    /// Error returned by the node executor
    #[error("{0}")]
    Executor(String),

    /// Bookkeeping write failed under the strict persistence policy
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl NodeError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, NodeError::Canceled(_))
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_error_messages_are_stable() {
        assert_eq!(
            NodeError::TaskFailed("disk full".into()).to_string(),
            "task failed: disk full"
        );
        assert_eq!(
            NodeError::PollingTimeout(3).to_string(),
            "polling timed out after 3 attempts"
        );
        assert_eq!(
            NodeError::Canceled("user request".into()).to_string(),
            "task canceled: user request"
        );
        assert_eq!(NodeError::Executor("boom".into()).to_string(), "boom");
    }

    #[test]
    fn only_canceled_reports_cancellation() {
        assert!(NodeError::Canceled("x".into()).is_canceled());
        assert!(!NodeError::Panic("x".into()).is_canceled());
    }
}
