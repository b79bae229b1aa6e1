/// Workflow and node definitions
///
/// A `WorkflowDefinition` is the static description of one class of procedure
/// ("export data", "scale out"): a set of named nodes wired together by
/// success/fail events. Definitions are validated once when built and then
/// shared read-only (behind `Arc`) by every run of that procedure.

use crate::error::{Result, WorkflowError};
use crate::runtime::context::FlowContext;
use crate::workflow::records::{NodeReturnType, WorkflowNode};
use async_trait::async_trait;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Reserved name of the entry node of every workflow
pub const START_NODE: &str = "start";

/// Result of a node executor. Business code reports failures with any error
/// type; the engine stores the rendered message on the node.
pub type ExecutorResult = anyhow::Result<()>;

/// Business logic of a single node
///
/// Executors receive the node record (polling nodes set `operation_id`
/// here, or may finish the node themselves) and the flow context shared by
/// the run. Long async work should watch `ctx.cancellation()`.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, node: &mut WorkflowNode, ctx: &mut FlowContext) -> ExecutorResult;
}

/// Adapter turning a plain closure into a `NodeExecutor`
struct FnExecutor<F>(F);

#[async_trait]
impl<F> NodeExecutor for FnExecutor<F>
where
    F: Fn(&mut WorkflowNode, &mut FlowContext) -> ExecutorResult + Send + Sync,
{
    async fn execute(&self, node: &mut WorkflowNode, ctx: &mut FlowContext) -> ExecutorResult {
        (self.0)(node, ctx)
    }
}

/// Immutable descriptor of one workflow step
#[derive(Clone)]
pub struct NodeDefinition {
    pub name: String,
    pub return_type: NodeReturnType,
    pub executor: Arc<dyn NodeExecutor>,
    /// Next node on success; `None` ends the workflow
    pub success_event: Option<String>,
    /// Next node on failure; `None` means no recovery path
    pub fail_event: Option<String>,
    /// Upper bound for a single executor call
    pub timeout: Option<Duration>,
}

impl NodeDefinition {
    pub fn new(
        name: &str,
        return_type: NodeReturnType,
        executor: impl NodeExecutor + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            return_type,
            executor: Arc::new(executor),
            success_event: None,
            fail_event: None,
            timeout: None,
        }
    }

    /// Synchronous node backed by a closure
    pub fn sync_fn<F>(name: &str, f: F) -> Self
    where
        F: Fn(&mut WorkflowNode, &mut FlowContext) -> ExecutorResult + Send + Sync + 'static,
    {
        Self::new(name, NodeReturnType::SyncFuncNode, FnExecutor(f))
    }

    /// Polling node backed by a closure that records the operation ID
    pub fn polling_fn<F>(name: &str, f: F) -> Self
    where
        F: Fn(&mut WorkflowNode, &mut FlowContext) -> ExecutorResult + Send + Sync + 'static,
    {
        Self::new(name, NodeReturnType::PollingNode, FnExecutor(f))
    }

    /// Set the success successor. An empty name means terminal.
    pub fn on_success(mut self, next: &str) -> Self {
        self.success_event = non_empty(next);
        self
    }

    /// Set the failure successor. An empty name means no recovery path.
    pub fn on_fail(mut self, next: &str) -> Self {
        self.fail_event = non_empty(next);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for NodeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDefinition")
            .field("name", &self.name)
            .field("return_type", &self.return_type)
            .field("success_event", &self.success_event)
            .field("fail_event", &self.fail_event)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn non_empty(name: &str) -> Option<String> {
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// A validated node graph for one class of procedure
///
/// Only constructible through [`WorkflowDefinition::builder`], so every
/// instance satisfies: a `start` node exists, every successor name resolves
/// to a node of this definition, and the success/fail graph is acyclic.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    name: String,
    task_nodes: HashMap<String, Arc<NodeDefinition>>,
}

impl WorkflowDefinition {
    pub fn builder(name: &str) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder {
            name: name.to_string(),
            nodes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, name: &str) -> Option<Arc<NodeDefinition>> {
        self.task_nodes.get(name).cloned()
    }

    pub fn start_node(&self) -> Option<Arc<NodeDefinition>> {
        self.node(START_NODE)
    }

    pub fn task_nodes(&self) -> &HashMap<String, Arc<NodeDefinition>> {
        &self.task_nodes
    }

    /// Node names along the success path starting at `start`
    pub fn node_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = self.start_node();
        while let Some(node) = current {
            names.push(node.name.clone());
            current = node.success_event.as_deref().and_then(|next| self.node(next));
        }
        names
    }
}

/// Collects node definitions and validates them into a `WorkflowDefinition`
pub struct WorkflowDefinitionBuilder {
    name: String,
    nodes: Vec<NodeDefinition>,
}

impl WorkflowDefinitionBuilder {
    pub fn node(mut self, node: NodeDefinition) -> Self {
        self.nodes.push(node);
        self
    }

    /// Validate the graph and freeze it
    pub fn build(self) -> Result<WorkflowDefinition> {
        if self.name.is_empty() {
            return Err(WorkflowError::InvalidDefinition(
                "workflow name must not be empty".to_string(),
            ));
        }

        let mut task_nodes = HashMap::new();
        for node in self.nodes {
            if node.name.is_empty() {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "workflow {} has a node without a name",
                    self.name
                )));
            }
            if task_nodes.contains_key(&node.name) {
                return Err(WorkflowError::InvalidDefinition(format!(
                    "workflow {} defines node {} twice",
                    self.name, node.name
                )));
            }
            task_nodes.insert(node.name.clone(), Arc::new(node));
        }

        if !task_nodes.contains_key(START_NODE) {
            return Err(WorkflowError::InvalidDefinition(format!(
                "workflow {} has no {} node",
                self.name, START_NODE
            )));
        }

        validate_graph(&self.name, &task_nodes)?;

        Ok(WorkflowDefinition {
            name: self.name,
            task_nodes,
        })
    }
}

/// Check successor references and reject cycles
fn validate_graph(workflow: &str, nodes: &HashMap<String, Arc<NodeDefinition>>) -> Result<()> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for name in nodes.keys() {
        index.insert(name.as_str(), graph.add_node(name.as_str()));
    }

    for node in nodes.values() {
        let from = index[node.name.as_str()];
        for (event, target) in [("success", &node.success_event), ("fail", &node.fail_event)] {
            let Some(target) = target else { continue };
            let to = index.get(target.as_str()).ok_or_else(|| {
                WorkflowError::InvalidDefinition(format!(
                    "node {} of workflow {} has {} event to unknown node {}",
                    node.name, workflow, event, target
                ))
            })?;
            graph.add_edge(from, *to, ());
        }
    }

    if is_cyclic_directed(&graph) {
        return Err(WorkflowError::InvalidDefinition(format!(
            "workflow {} contains a cycle",
            workflow
        )));
    }

    let mut reachable = HashSet::new();
    let mut dfs = Dfs::new(&graph, index[START_NODE]);
    while let Some(visited) = dfs.next(&graph) {
        reachable.insert(visited);
    }
    for (name, idx) in &index {
        if !reachable.contains(idx) {
            tracing::warn!("node {} of workflow {} is unreachable from start", name, workflow);
        }
    }

    Ok(())
}
