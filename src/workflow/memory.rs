/// In-memory workflow store
///
/// Same contract as the SQLite store, backed by maps behind a tokio
/// `RwLock`. Used by tests and by embedders that only need the audit trail
/// for the lifetime of the process. Write failures can be injected to
/// exercise the persistence policies.

use crate::error::{Result, WorkflowError};
use crate::workflow::records::{WorkflowDetail, WorkflowInstance, WorkflowNode, WorkflowQuery};
use crate::workflow::storage::WorkflowStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    /// Insertion order of workflow IDs
    order: Vec<String>,
    workflows: HashMap<String, WorkflowInstance>,
    /// Parent workflow ID -> node history in insertion order
    nodes: HashMap<String, Vec<WorkflowNode>>,
}

#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
    detail_updates: AtomicUsize,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make node creation and detail updates fail until switched off
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `update_workflow_detail` calls
    pub fn detail_updates(&self) -> usize {
        self.detail_updates.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WorkflowError::Storage("store is read-only".to_string()));
        }
        Ok(())
    }
}

fn upsert_node(history: &mut Vec<WorkflowNode>, node: &WorkflowNode) {
    match history.iter_mut().find(|n| n.id == node.id) {
        Some(existing) => *existing = node.clone(),
        None => history.push(node.clone()),
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create_workflow(&self, flow: &WorkflowInstance) -> Result<WorkflowInstance> {
        let mut tables = self.tables.write().await;
        if tables.workflows.contains_key(&flow.id) {
            return Err(WorkflowError::Storage(format!(
                "workflow {} already exists",
                flow.id
            )));
        }
        tables.order.push(flow.id.clone());
        tables.workflows.insert(flow.id.clone(), flow.clone());
        Ok(flow.clone())
    }

    async fn create_workflow_node(&self, node: &WorkflowNode) -> Result<WorkflowNode> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        if !tables.workflows.contains_key(&node.parent_id) {
            return Err(WorkflowError::NotFound(format!("workflow {}", node.parent_id)));
        }
        let history = tables.nodes.entry(node.parent_id.clone()).or_default();
        if history.iter().any(|n| n.id == node.id) {
            return Err(WorkflowError::Storage(format!("node {} already exists", node.id)));
        }
        history.push(node.clone());
        Ok(node.clone())
    }

    async fn update_workflow_detail(
        &self,
        flow: &WorkflowInstance,
        nodes: &[WorkflowNode],
    ) -> Result<()> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        if !tables.workflows.contains_key(&flow.id) {
            tables.order.push(flow.id.clone());
        }
        tables.workflows.insert(flow.id.clone(), flow.clone());
        let history = tables.nodes.entry(flow.id.clone()).or_default();
        for node in nodes {
            upsert_node(history, node);
        }
        self.detail_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowInstance>> {
        Ok(self.tables.read().await.workflows.get(id).cloned())
    }

    async fn get_workflow_detail(&self, id: &str) -> Result<Option<WorkflowDetail>> {
        let tables = self.tables.read().await;
        Ok(tables.workflows.get(id).map(|flow| WorkflowDetail {
            flow: flow.clone(),
            nodes: tables.nodes.get(id).cloned().unwrap_or_default(),
            node_names: Vec::new(),
        }))
    }

    async fn list_workflows(&self, query: &WorkflowQuery) -> Result<(Vec<WorkflowInstance>, u64)> {
        let tables = self.tables.read().await;
        let matching: Vec<&WorkflowInstance> = tables
            .order
            .iter()
            .rev()
            .filter_map(|id| tables.workflows.get(id))
            .filter(|flow| query.matches(flow))
            .collect();

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.page_size() as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn list_unfinished_workflows(&self) -> Result<Vec<WorkflowInstance>> {
        let tables = self.tables.read().await;
        Ok(tables
            .order
            .iter()
            .filter_map(|id| tables.workflows.get(id))
            .filter(|flow| !flow.status.is_terminal())
            .cloned()
            .collect())
    }
}
