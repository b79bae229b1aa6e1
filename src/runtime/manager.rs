/// Workflow manager
///
/// Business-facing facade over the engine: runs are created by workflow
/// name (resolved through the registry), started in the background and
/// remembered while they are live so they can be canceled by ID. Reads of
/// persisted runs go straight to the store.

use crate::error::{Result, WorkflowError};
use crate::runtime::aggregation::{WorkflowAggregation, WorkflowHandle};
use crate::runtime::engine::{RequestMeta, WorkflowEngine};
use crate::workflow::records::{WorkflowDetail, WorkflowInstance, WorkflowQuery};
use crate::workflow::registry::WorkflowRegistry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug)]
pub struct WorkflowManager {
    registry: Arc<WorkflowRegistry>,
    engine: WorkflowEngine,
    /// Workflow ID -> handle of a run started by this process
    live: RwLock<HashMap<String, WorkflowHandle>>,
}

impl WorkflowManager {
    pub fn new(registry: Arc<WorkflowRegistry>, engine: WorkflowEngine) -> Self {
        Self {
            registry,
            engine,
            live: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Create a run of the workflow registered under `name`
    pub async fn create_flow_work(
        &self,
        meta: RequestMeta,
        name: &str,
        biz_id: &str,
        biz_type: &str,
    ) -> Result<WorkflowAggregation> {
        let define = self
            .registry
            .get(name)
            .ok_or_else(|| WorkflowError::DefinitionNotFound(name.to_string()))?;
        self.engine
            .create_flow_work(meta, biz_id, biz_type, Some(define))
            .await
    }

    /// Start `flow` in the background and track it. Returns the workflow ID.
    pub async fn start(&self, flow: WorkflowAggregation) -> String {
        let handle = flow.async_start().await;
        let id = handle.workflow_id().to_string();

        let mut live = self.live.write().await;
        prune_finished(&mut live);
        live.insert(id.clone(), handle);
        id
    }

    /// Create and start in one call
    pub async fn run(
        &self,
        meta: RequestMeta,
        name: &str,
        biz_id: &str,
        biz_type: &str,
    ) -> Result<String> {
        let flow = self.create_flow_work(meta, name, biz_id, biz_type).await?;
        Ok(self.start(flow).await)
    }

    /// Cancel a live run. Returns `false` when no live run has this ID.
    pub async fn cancel(&self, id: &str, reason: &str) -> bool {
        let mut live = self.live.write().await;
        prune_finished(&mut live);
        match live.get(id) {
            Some(handle) if !handle.is_finished() => {
                handle.destroy(reason);
                true
            }
            _ => false,
        }
    }

    /// IDs of runs still executing in this process. Finished runs are
    /// released here, so `wait` only finds runs that were still live.
    pub async fn running(&self) -> Vec<String> {
        let mut live = self.live.write().await;
        prune_finished(&mut live);
        let mut ids: Vec<String> = live.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wait for a live run to end and take back its aggregation
    pub async fn wait(&self, id: &str) -> Result<WorkflowAggregation> {
        let handle = self
            .live
            .write()
            .await
            .remove(id)
            .ok_or_else(|| WorkflowError::NotFound(format!("live workflow {}", id)))?;
        handle.join().await
    }

    pub async fn list_workflows(&self, query: &WorkflowQuery) -> Result<(Vec<WorkflowInstance>, u64)> {
        self.engine.store().list_workflows(query).await
    }

    /// Persisted run plus the success-path node names of its definition
    pub async fn detail(&self, id: &str) -> Result<WorkflowDetail> {
        let mut detail = self
            .engine
            .store()
            .get_workflow_detail(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("workflow {}", id)))?;

        if let Some(define) = self.registry.get(&detail.flow.name) {
            detail.node_names = define.node_names();
        }
        Ok(detail)
    }
}

/// Drop handles of runs that ended; each one holds a whole aggregation
fn prune_finished(live: &mut HashMap<String, WorkflowHandle>) {
    live.retain(|_, handle| !handle.is_finished());
}
