/// Workflow engine entry point
///
/// Bundles the collaborators every run needs (persistence gateway,
/// deployment oracle, background task runner) together with the engine
/// settings, and hands out new `WorkflowAggregation`s bound to them.

use crate::error::Result;
use crate::runtime::aggregation::WorkflowAggregation;
use crate::runtime::oracle::DeploymentOracle;
use crate::runtime::tasks::BackgroundTaskRunner;
use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::WorkflowDefinition;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// What happens when a bookkeeping write fails mid-run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersistencePolicy {
    /// Log the failure and keep running
    #[default]
    BestEffort,
    /// Fail the current node and end the run in `Error`
    Strict,
}

impl FromStr for PersistencePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "best-effort" | "besteffort" | "best_effort" => Ok(PersistencePolicy::BestEffort),
            "strict" => Ok(PersistencePolicy::Strict),
            other => Err(format!("unknown persistence policy: {}", other)),
        }
    }
}

/// Tunables shared by every run of an engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Wait between two deployment status queries
    pub poll_interval: Duration,
    /// Polling attempts before a node fails with a timeout
    pub max_poll_sequence: u32,
    pub persistence: PersistencePolicy,
    /// Service name used in background operation names
    pub service: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            max_poll_sequence: 1200,
            persistence: PersistencePolicy::BestEffort,
            service: "flowwork".to_string(),
        }
    }
}

/// Caller identity attached to a run
///
/// `service` and `endpoint` name the operation a background run is traced
/// under; an empty `service` falls back to the engine's configured one.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub service: String,
    pub endpoint: String,
    pub tenant_id: String,
}

impl RequestMeta {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    pub fn with_service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.tenant_id = tenant_id.to_string();
        self
    }
}

#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    oracle: Arc<dyn DeploymentOracle>,
    runner: BackgroundTaskRunner,
    settings: EngineSettings,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        oracle: Arc<dyn DeploymentOracle>,
        settings: EngineSettings,
    ) -> Self {
        Self::with_runner(store, oracle, BackgroundTaskRunner::new(), settings)
    }

    pub fn with_runner(
        store: Arc<dyn WorkflowStore>,
        oracle: Arc<dyn DeploymentOracle>,
        runner: BackgroundTaskRunner,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            oracle,
            runner,
            settings,
        }
    }

    /// Create and persist a new run. Fails with `DefinitionNotFound` when
    /// no definition is supplied.
    pub async fn create_flow_work(
        &self,
        meta: RequestMeta,
        biz_id: &str,
        biz_type: &str,
        define: Option<Arc<WorkflowDefinition>>,
    ) -> Result<WorkflowAggregation> {
        WorkflowAggregation::create(self, meta, biz_id, biz_type, define).await
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn oracle(&self) -> &Arc<dyn DeploymentOracle> {
        &self.oracle
    }

    pub fn runner(&self) -> &BackgroundTaskRunner {
        &self.runner
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}
