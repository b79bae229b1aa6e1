/// Deployment status oracle
///
/// Polling nodes hand long-running infrastructure work (deploy, scale,
/// backup...) to the deployment subsystem and get back an operation ID. The
/// engine then asks the oracle for that operation's status on every polling
/// tick.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Running,
    Finished,
    Error,
}

/// Status report for one external operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub status: OperationStatus,
    /// Payload produced by a finished operation, may be empty
    pub result: String,
    /// Failure description when `status` is `Error`
    pub error_str: String,
}

impl Operation {
    pub fn running() -> Self {
        Self {
            status: OperationStatus::Running,
            result: String::new(),
            error_str: String::new(),
        }
    }

    pub fn finished(result: &str) -> Self {
        Self {
            status: OperationStatus::Finished,
            result: result.to_string(),
            error_str: String::new(),
        }
    }

    pub fn failed(error_str: &str) -> Self {
        Self {
            status: OperationStatus::Error,
            result: String::new(),
            error_str: error_str.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("unknown operation {0}")]
    UnknownOperation(String),

    #[error("deployment service unavailable: {0}")]
    Unavailable(String),
}

/// Answers "is operation X still running?"
#[async_trait]
pub trait DeploymentOracle: Send + Sync {
    async fn get_status(&self, operation_id: &str) -> Result<Operation, OracleError>;
}

/// Scripted oracle for tests and local runs
///
/// Each operation owns a queue of reports. Every `get_status` call pops the
/// front report; the last one is repeated forever.
#[derive(Debug, Default)]
pub struct InMemoryDeploymentOracle {
    operations: RwLock<HashMap<String, VecDeque<Result<Operation, String>>>>,
}

impl InMemoryDeploymentOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the scripted reports for an operation
    pub async fn script(&self, operation_id: &str, reports: Vec<Operation>) {
        let queue = reports.into_iter().map(Ok).collect();
        self.operations
            .write()
            .await
            .insert(operation_id.to_string(), queue);
    }

    /// Make every query for the operation fail at the call level
    pub async fn script_unavailable(&self, operation_id: &str, message: &str) {
        let mut queue = VecDeque::new();
        queue.push_back(Err(message.to_string()));
        self.operations
            .write()
            .await
            .insert(operation_id.to_string(), queue);
    }
}

#[async_trait]
impl DeploymentOracle for InMemoryDeploymentOracle {
    async fn get_status(&self, operation_id: &str) -> Result<Operation, OracleError> {
        let mut operations = self.operations.write().await;
        let queue = operations
            .get_mut(operation_id)
            .ok_or_else(|| OracleError::UnknownOperation(operation_id.to_string()))?;

        let report = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };

        match report {
            Some(Ok(op)) => Ok(op),
            Some(Err(message)) => Err(OracleError::Unavailable(message)),
            None => Err(OracleError::UnknownOperation(operation_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_script_and_repeats_last_report() {
        let oracle = InMemoryDeploymentOracle::new();
        oracle
            .script("op-1", vec![Operation::running(), Operation::finished("done")])
            .await;

        assert_eq!(oracle.get_status("op-1").await.unwrap(), Operation::running());
        assert_eq!(oracle.get_status("op-1").await.unwrap(), Operation::finished("done"));
        assert_eq!(oracle.get_status("op-1").await.unwrap(), Operation::finished("done"));
    }

    #[tokio::test]
    async fn unknown_and_unavailable_operations_error() {
        let oracle = InMemoryDeploymentOracle::new();
        assert!(matches!(
            oracle.get_status("nope").await,
            Err(OracleError::UnknownOperation(_))
        ));

        oracle.script_unavailable("op-2", "connection refused").await;
        let err = oracle.get_status("op-2").await.unwrap_err();
        assert_eq!(err.to_string(), "deployment service unavailable: connection refused");
    }
}
