/// Persisted workflow and node records
///
/// These are the rows the persistence gateway stores: one `WorkflowInstance`
/// per run plus an append-only history of `WorkflowNode` records.

use crate::error::NodeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status shared by workflow runs and individual nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowStatus {
    Initializing,
    Processing,
    Finished,
    Error,
    Canceled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Initializing => "Initializing",
            WorkflowStatus::Processing => "Processing",
            WorkflowStatus::Finished => "Finished",
            WorkflowStatus::Error => "Error",
            WorkflowStatus::Canceled => "Canceled",
        }
    }

    /// Finished, Error and Canceled never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Finished | WorkflowStatus::Error | WorkflowStatus::Canceled
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Initializing" => Ok(WorkflowStatus::Initializing),
            "Processing" => Ok(WorkflowStatus::Processing),
            "Finished" => Ok(WorkflowStatus::Finished),
            "Error" => Ok(WorkflowStatus::Error),
            "Canceled" => Ok(WorkflowStatus::Canceled),
            other => Err(format!("unknown workflow status: {}", other)),
        }
    }
}

/// How a node reports completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeReturnType {
    /// Executor return value is the final outcome
    SyncFuncNode,
    /// Executor starts an external operation; completion is learned by
    /// polling the deployment oracle with the node's operation ID
    PollingNode,
}

impl NodeReturnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeReturnType::SyncFuncNode => "SyncFuncNode",
            NodeReturnType::PollingNode => "PollingNode",
        }
    }
}

impl fmt::Display for NodeReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeReturnType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SyncFuncNode" => Ok(NodeReturnType::SyncFuncNode),
            "PollingNode" => Ok(NodeReturnType::PollingNode),
            other => Err(format!("unknown node return type: {}", other)),
        }
    }
}

/// One run of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    /// Definition name (e.g. "ExportData")
    pub name: String,
    /// Business object the run acts on (e.g. a cluster ID)
    pub biz_id: String,
    pub biz_type: String,
    pub tenant_id: String,
    pub status: WorkflowStatus,
    /// JSON snapshot of the flow context mapping
    pub context: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(name: &str, biz_id: &str, biz_type: &str, tenant_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            biz_id: biz_id.to_string(),
            biz_type: biz_type.to_string(),
            tenant_id: tenant_id.to_string(),
            status: WorkflowStatus::Initializing,
            context: "{}".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One executed step of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    /// Owning workflow ID
    pub parent_id: String,
    pub biz_id: String,
    pub tenant_id: String,
    /// Matches a node definition name
    pub name: String,
    pub status: WorkflowStatus,
    /// Success payload or failure message
    pub result: String,
    pub return_type: NodeReturnType,
    /// External operation tracked by polling nodes
    pub operation_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowNode {
    pub fn new(flow: &WorkflowInstance, name: &str, return_type: NodeReturnType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: flow.id.clone(),
            biz_id: flow.biz_id.clone(),
            tenant_id: flow.tenant_id.clone(),
            name: name.to_string(),
            status: WorkflowStatus::Initializing,
            result: String::new(),
            return_type,
            operation_id: String::new(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn processing(&mut self) {
        self.status = WorkflowStatus::Processing;
    }

    /// Mark the node finished. A payload replaces whatever the executor
    /// left in `result`; `None` keeps it.
    pub fn success(&mut self, result: Option<String>) {
        self.status = WorkflowStatus::Finished;
        if let Some(result) = result {
            self.result = result;
        }
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self, err: &NodeError) {
        self.status = WorkflowStatus::Error;
        self.result = err.to_string();
        self.end_time = Some(Utc::now());
    }

    /// Still running or not yet started
    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Full view of a run for inspection
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDetail {
    pub flow: WorkflowInstance,
    pub nodes: Vec<WorkflowNode>,
    /// Success-path node names of the definition, empty if unknown
    pub node_names: Vec<String>,
}

/// Filter for listing runs
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowQuery {
    pub biz_id: Option<String>,
    pub status: Option<WorkflowStatus>,
    pub name: Option<String>,
    /// 1-based
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl WorkflowQuery {
    pub const DEFAULT_PAGE_SIZE: u32 = 20;

    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(Self::DEFAULT_PAGE_SIZE).clamp(1, 500)
    }

    /// Rows to skip. Computed in `u64` so any `page` from the query string fits.
    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1).saturating_mul(u64::from(self.page_size()))
    }

    /// Whether a record passes the biz/status/name filters
    pub fn matches(&self, flow: &WorkflowInstance) -> bool {
        self.biz_id.as_deref().map_or(true, |b| b == flow.biz_id)
            && self.status.map_or(true, |s| s == flow.status)
            && self.name.as_deref().map_or(true, |n| n == flow.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            WorkflowStatus::Initializing,
            WorkflowStatus::Processing,
            WorkflowStatus::Finished,
            WorkflowStatus::Error,
            WorkflowStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<WorkflowStatus>(), Ok(status));
        }
        assert!("Done".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn node_success_keeps_executor_result_without_payload() {
        let flow = WorkflowInstance::new("ExportData", "cluster-1", "cluster", "tenant");
        let mut node = WorkflowNode::new(&flow, "start", NodeReturnType::SyncFuncNode);
        node.result = "written by executor".into();
        node.success(None);
        assert_eq!(node.status, WorkflowStatus::Finished);
        assert_eq!(node.result, "written by executor");
        assert!(node.end_time.is_some());

        node.success(Some("payload".into()));
        assert_eq!(node.result, "payload");
    }

    #[test]
    fn node_fail_records_message() {
        let flow = WorkflowInstance::new("ExportData", "cluster-1", "cluster", "tenant");
        let mut node = WorkflowNode::new(&flow, "start", NodeReturnType::PollingNode);
        assert_eq!(node.parent_id, flow.id);
        node.fail(&NodeError::PollingTimeout(3));
        assert_eq!(node.status, WorkflowStatus::Error);
        assert_eq!(node.result, "polling timed out after 3 attempts");
        assert!(!node.is_active());
    }

    #[test]
    fn query_paging_defaults() {
        let query = WorkflowQuery::default();
        assert_eq!(query.page(), 1);
        assert_eq!(query.page_size(), WorkflowQuery::DEFAULT_PAGE_SIZE);
        assert_eq!(query.offset(), 0);

        let query = WorkflowQuery {
            page: Some(3),
            page_size: Some(10),
            ..Default::default()
        };
        assert_eq!(query.offset(), 20);
    }

    #[test]
    fn query_offset_does_not_overflow_on_last_page() {
        let query = WorkflowQuery {
            page: Some(u32::MAX),
            page_size: Some(500),
            ..Default::default()
        };
        assert_eq!(query.offset(), u64::from(u32::MAX - 1) * 500);
    }
}
