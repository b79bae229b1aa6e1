/// Workflow aggregation: the execution engine of one in-flight run
///
/// An aggregation owns the persisted workflow record, the node history, the
/// flow context and a reference to the shared definition. `start` walks the
/// node graph from `start` until a node without successor is reached (or a
/// failure without a fail successor), persisting at every transition so the
/// run can be inspected at any point.

use crate::error::{NodeError, Result, WorkflowError};
use crate::runtime::context::{CancelSignal, FlowContext};
use crate::runtime::engine::{EngineSettings, PersistencePolicy, RequestMeta, WorkflowEngine};
use crate::runtime::oracle::{DeploymentOracle, OperationStatus};
use crate::runtime::panics;
use crate::runtime::tasks::BackgroundTaskRunner;
use crate::workflow::records::{NodeReturnType, WorkflowInstance, WorkflowNode, WorkflowStatus};
use crate::workflow::storage::WorkflowStore;
use crate::workflow::types::{NodeDefinition, WorkflowDefinition};
use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// What the walk does after a node has been handled
enum Step {
    /// Node succeeded, follow its success event
    Continue,
    /// Node failed, follow its fail event if any
    Recover,
    /// Run stops here (canceled, or a strict persistence failure)
    Abort,
}

pub struct WorkflowAggregation {
    flow: WorkflowInstance,
    define: Arc<WorkflowDefinition>,
    /// Index into `nodes` of the node executing (or executed last)
    current_node: Option<usize>,
    nodes: Vec<WorkflowNode>,
    context: FlowContext,
    /// Result of the most recent failed node
    flow_error: Option<String>,
    store: Arc<dyn WorkflowStore>,
    oracle: Arc<dyn DeploymentOracle>,
    runner: BackgroundTaskRunner,
    settings: EngineSettings,
    meta: RequestMeta,
}

impl std::fmt::Debug for WorkflowAggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowAggregation")
            .field("flow", &self.flow)
            .field("define", &self.define.name())
            .field("current_node", &self.current_node)
            .field("nodes", &self.nodes)
            .field("flow_error", &self.flow_error)
            .finish_non_exhaustive()
    }
}

impl WorkflowAggregation {
    /// Create and persist a new run of `define` for a business object
    pub async fn create(
        engine: &WorkflowEngine,
        meta: RequestMeta,
        biz_id: &str,
        biz_type: &str,
        define: Option<Arc<WorkflowDefinition>>,
    ) -> Result<Self> {
        let define = define.ok_or_else(|| {
            WorkflowError::DefinitionNotFound("empty workflow definition".to_string())
        })?;
        tracing::info!("📝 Creating workflow {} for bizId {}", define.name(), biz_id);

        let flow = WorkflowInstance::new(define.name(), biz_id, biz_type, &meta.tenant_id);
        let flow = engine.store().create_workflow(&flow).await.map_err(|e| {
            tracing::error!("create workflow {} for bizId {} failed: {}", flow.name, biz_id, e);
            e
        })?;

        Ok(Self {
            flow,
            define,
            current_node: None,
            nodes: Vec::new(),
            context: FlowContext::new(),
            flow_error: None,
            store: Arc::clone(engine.store()),
            oracle: Arc::clone(engine.oracle()),
            runner: engine.runner().clone(),
            settings: engine.settings().clone(),
            meta,
        })
    }

    pub fn flow(&self) -> &WorkflowInstance {
        &self.flow
    }

    pub fn define(&self) -> &Arc<WorkflowDefinition> {
        &self.define
    }

    pub fn nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    pub fn current_node(&self) -> Option<&WorkflowNode> {
        self.current_node.and_then(|idx| self.nodes.get(idx))
    }

    pub fn context(&self) -> &FlowContext {
        &self.context
    }

    /// Result string of the last node that failed
    pub fn last_error(&self) -> Option<&str> {
        self.flow_error.as_deref()
    }

    /// Signal that cancels this run when fired
    pub fn cancel_signal(&self) -> CancelSignal {
        self.context.signal().clone()
    }

    /// Operation name the run is tracked under when started in the background
    pub fn operation_name(&self) -> String {
        let service = if self.meta.service.is_empty() {
            self.settings.service.as_str()
        } else {
            self.meta.service.as_str()
        };
        format!("{}.{} workflow.{}", service, self.meta.endpoint, self.flow.id)
    }

    /// Store a value in the flow context and refresh the record's snapshot
    pub fn add_context(&mut self, key: &str, value: Value) {
        self.context.set(key, value);
        self.snapshot_context();
    }

    /// Run the whole walk on the calling task. Returns whether every node on
    /// the path taken succeeded.
    pub async fn start(&mut self) -> bool {
        tracing::info!(
            "🚀 Starting workflow {} ({}) for bizId {}",
            self.flow.id,
            self.flow.name,
            self.flow.biz_id
        );
        let started = std::time::Instant::now();

        self.flow.status = WorkflowStatus::Processing;
        let start = self.define.start_node();
        let result = self.handle(start).await;
        if self.context.is_cancelled() && self.flow.status != WorkflowStatus::Canceled {
            self.mark_canceled();
        }
        self.complete(result);

        self.flow.updated_at = Utc::now();
        if let Err(err) = self.store.update_workflow_detail(&self.flow, &self.nodes).await {
            tracing::warn!("update workflow {} detail failed: {}", self.flow.id, err);
        }

        tracing::info!(
            "🏁 Workflow {} ended with status {} in {:?}",
            self.flow.id,
            self.flow.status,
            started.elapsed()
        );
        result
    }

    /// Start the run on the background task runner and return immediately
    pub async fn async_start(self) -> WorkflowHandle {
        let operation_name = self.operation_name();
        let workflow_id = self.flow.id.clone();
        let signal = self.cancel_signal();
        let runner = self.runner.clone();

        let mut flow = self;
        let join = runner
            .spawn(&operation_name, async move {
                flow.start().await;
                flow
            })
            .await;

        WorkflowHandle {
            workflow_id,
            signal,
            join,
        }
    }

    /// Cancel the run: status `Canceled`, the current node (if still
    /// executing) failed with `reason`, then persisted.
    pub async fn destroy(&mut self, reason: &str) {
        tracing::info!("🛑 Destroying workflow {}: {}", self.flow.id, reason);
        self.context.signal().cancel(reason);
        self.mark_canceled();
        self.flow.updated_at = Utc::now();
        if let Err(err) = self.store.update_workflow_detail(&self.flow, &self.nodes).await {
            tracing::warn!("update workflow {} detail failed: {}", self.flow.id, err);
        }
    }

    /// Final status from the walk result. A canceled run stays canceled.
    pub fn complete(&mut self, success: bool) {
        if self.flow.status == WorkflowStatus::Canceled {
            return;
        }
        self.flow.status = if success {
            WorkflowStatus::Finished
        } else {
            WorkflowStatus::Error
        };
    }

    /// Walk the graph from `first`. Once any node fails the result is
    /// `false`, even if the fail path then runs to its end.
    async fn handle(&mut self, first: Option<Arc<NodeDefinition>>) -> bool {
        let mut succeeded = true;
        let mut next = first;

        while let Some(define) = next {
            if self.context.is_cancelled() {
                self.mark_canceled();
                self.persist_best_effort().await;
                return false;
            }

            next = match self.step(&define).await {
                Step::Continue => self.successor(define.success_event.as_deref()),
                Step::Recover => {
                    succeeded = false;
                    self.handle_task_error(&define)
                }
                Step::Abort => return false,
            };
        }

        // A blocking executor can finish the last node after the signal fired
        if self.context.is_cancelled() {
            self.mark_canceled();
            return false;
        }
        if self.flow.status != WorkflowStatus::Canceled {
            self.flow.status = WorkflowStatus::Finished;
        }
        succeeded
    }

    /// Create, execute and (for polling nodes) await one node
    async fn step(&mut self, define: &NodeDefinition) -> Step {
        let node = WorkflowNode::new(&self.flow, &define.name, define.return_type);
        if let Err(err) = self.store.create_workflow_node(&node).await {
            tracing::warn!("create workflow node {} failed: {}", node.name, err);
            if self.settings.persistence == PersistencePolicy::Strict {
                self.nodes.push(node);
                self.current_node = Some(self.nodes.len() - 1);
                return self.abort_on_persistence(NodeError::Persistence(err.to_string()));
            }
        }

        let idx = match self.execute_task(node, define).await {
            Ok(idx) => idx,
            Err(err) => return self.after_failure(err).await,
        };

        match define.return_type {
            NodeReturnType::SyncFuncNode => {
                self.nodes[idx].success(None);
                Step::Continue
            }
            NodeReturnType::PollingNode => {
                if self.nodes[idx].status == WorkflowStatus::Finished {
                    return Step::Continue;
                }
                match self.poll_operation(idx).await {
                    Ok(payload) => {
                        self.nodes[idx].success(payload);
                        Step::Continue
                    }
                    Err(err) => {
                        self.nodes[idx].fail(&err);
                        self.after_failure(err).await
                    }
                }
            }
        }
    }

    /// Classify a node failure that has already been recorded on the node
    async fn after_failure(&mut self, err: NodeError) -> Step {
        match err {
            NodeError::Canceled(_) => {
                self.mark_canceled();
                self.persist_best_effort().await;
                Step::Abort
            }
            NodeError::Persistence(_) => self.abort_on_persistence(err),
            _ => Step::Recover,
        }
    }

    /// Append `node` to the history, persist it as `Processing` and invoke
    /// its executor inside a panic boundary. Returns the node's index.
    async fn execute_task(
        &mut self,
        node: WorkflowNode,
        define: &NodeDefinition,
    ) -> std::result::Result<usize, NodeError> {
        self.nodes.push(node);
        let idx = self.nodes.len() - 1;
        self.current_node = Some(idx);
        self.nodes[idx].processing();
        self.snapshot_context();

        if let Err(err) = self.checkpoint().await {
            self.nodes[idx].fail(&err);
            return Err(err);
        }

        let signal = self.context.signal().clone();
        let outcome = run_executor(define, &mut self.nodes[idx], &mut self.context, &signal).await;

        match outcome {
            Ok(()) => Ok(idx),
            Err(ExecutorFailure { err, backtrace }) => {
                if let NodeError::Panic(_) = &err {
                    let stacktrace = backtrace
                        .map(|trace| trace.to_string())
                        .unwrap_or_else(|| "unavailable".to_string());
                    tracing::error!(
                        "recover from workflow {}, node {}, stacktrace {}",
                        self.flow.name,
                        define.name,
                        stacktrace
                    );
                } else {
                    tracing::info!(
                        "workflow {} of bizId {} do node {} failed, {}",
                        self.flow.id,
                        self.flow.biz_id,
                        define.name,
                        err
                    );
                }
                self.nodes[idx].fail(&err);
                Err(err)
            }
        }
    }

    /// Poll the deployment oracle until the node's operation leaves
    /// `Running`. Returns the operation's payload, if any.
    async fn poll_operation(&mut self, idx: usize) -> std::result::Result<Option<String>, NodeError> {
        let node_id = self.nodes[idx].id.clone();
        let node_name = self.nodes[idx].name.clone();
        let operation_id = self.nodes[idx].operation_id.clone();
        if operation_id.is_empty() {
            return Err(NodeError::TaskFailed(format!(
                "polling node {} has no operation id",
                node_name
            )));
        }

        let signal = self.context.signal().clone();
        let period = self.settings.poll_interval;
        let max_sequence = self.settings.max_poll_sequence;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = signal.token().cancelled() => return Err(NodeError::Canceled(signal.reason())),
                _ = ticker.tick() => {}
            }

            sequence += 1;
            if sequence > max_sequence {
                return Err(NodeError::PollingTimeout(max_sequence));
            }
            tracing::debug!(
                "polling node waiting, sequence {}, nodeId {}, nodeName {}",
                sequence,
                node_id,
                node_name
            );

            let report = tokio::select! {
                biased;
                _ = signal.token().cancelled() => return Err(NodeError::Canceled(signal.reason())),
                report = self.oracle.get_status(&operation_id) => report,
            };

            let op = report.map_err(|err| {
                tracing::error!("call deployment GetStatus {} failed: {}", operation_id, err);
                NodeError::TaskFailed(err.to_string())
            })?;

            match op.status {
                OperationStatus::Running => continue,
                OperationStatus::Error => {
                    tracing::error!(
                        "call deployment GetStatus {}, response error {}",
                        operation_id,
                        op.error_str
                    );
                    return Err(NodeError::TaskFailed(op.error_str));
                }
                OperationStatus::Finished => {
                    let payload = if op.result.is_empty() {
                        None
                    } else {
                        Some(op.result)
                    };
                    return Ok(payload);
                }
            }
        }
    }

    /// Record the failed node's result as the run's last error and pick the
    /// fail successor, if the definition has one
    fn handle_task_error(&mut self, define: &NodeDefinition) -> Option<Arc<NodeDefinition>> {
        self.flow_error = self.current_node().map(|node| node.result.clone());
        match define.fail_event.as_deref() {
            Some(fail_event) => self.define.node(fail_event),
            None => {
                tracing::warn!("no fail event in flow definition, node {}", define.name);
                None
            }
        }
    }

    fn successor(&self, event: Option<&str>) -> Option<Arc<NodeDefinition>> {
        event.and_then(|name| self.define.node(name))
    }

    /// Status `Canceled`; fail the current node if it is still active
    fn mark_canceled(&mut self) {
        self.flow.status = WorkflowStatus::Canceled;
        let err = NodeError::Canceled(self.context.signal().reason());
        if let Some(idx) = self.current_node {
            if self.nodes[idx].is_active() {
                self.nodes[idx].fail(&err);
            }
        }
        self.flow_error = Some(err.to_string());
    }

    /// Strict policy: the current node carries the persistence error and the
    /// run ends in `Error` without fail-path routing
    fn abort_on_persistence(&mut self, err: NodeError) -> Step {
        tracing::error!("workflow {} aborted: {}", self.flow.id, err);
        if let Some(idx) = self.current_node {
            if self.nodes[idx].is_active() {
                self.nodes[idx].fail(&err);
            }
        }
        self.flow_error = Some(err.to_string());
        self.flow.status = WorkflowStatus::Error;
        Step::Abort
    }

    fn snapshot_context(&mut self) {
        match self.context.snapshot() {
            Ok(data) => self.flow.context = data,
            Err(err) => tracing::warn!("json marshal flow context data failed {}", err),
        }
    }

    /// Persist the workflow row and node history. Only a strict policy turns
    /// a write failure into an error.
    async fn checkpoint(&mut self) -> std::result::Result<(), NodeError> {
        self.flow.updated_at = Utc::now();
        match self.store.update_workflow_detail(&self.flow, &self.nodes).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(
                    "update workflow {} detail of bizId {} failed {}",
                    self.flow.id,
                    self.flow.biz_id,
                    err
                );
                match self.settings.persistence {
                    PersistencePolicy::BestEffort => Ok(()),
                    PersistencePolicy::Strict => Err(NodeError::Persistence(err.to_string())),
                }
            }
        }
    }

    async fn persist_best_effort(&mut self) {
        let _ = self.checkpoint().await;
    }
}

/// Why `run_executor` failed, plus the panic-site backtrace for panics
struct ExecutorFailure {
    err: NodeError,
    backtrace: Option<std::backtrace::Backtrace>,
}

impl From<NodeError> for ExecutorFailure {
    fn from(err: NodeError) -> Self {
        Self {
            err,
            backtrace: None,
        }
    }
}

/// Invoke a node executor, racing it against cancellation and the node's
/// optional timeout. Panics are caught and reported as `NodeError::Panic`.
/// A signal fired while the executor ran turns its outcome into
/// `NodeError::Canceled`, whatever the executor returned.
async fn run_executor(
    define: &NodeDefinition,
    node: &mut WorkflowNode,
    ctx: &mut FlowContext,
    signal: &CancelSignal,
) -> std::result::Result<(), ExecutorFailure> {
    panics::capture_backtraces();
    let run = AssertUnwindSafe(define.executor.execute(node, ctx)).catch_unwind();
    let bounded = async {
        match define.timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| NodeError::ExecutorTimeout(limit)),
            None => Ok(run.await),
        }
    };

    let outcome = tokio::select! {
        biased;
        _ = signal.token().cancelled() => return Err(NodeError::Canceled(signal.reason()).into()),
        outcome = bounded => outcome?,
    };

    match outcome {
        // Unwind was caught in this poll, so the hook's slot is on this thread
        Err(payload) => Err(ExecutorFailure {
            err: NodeError::Panic(panic_message(payload.as_ref())),
            backtrace: panics::take_backtrace(),
        }),
        Ok(_) if signal.is_cancelled() => Err(NodeError::Canceled(signal.reason()).into()),
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(NodeError::Executor(format!("{:#}", err)).into()),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a run started with [`WorkflowAggregation::async_start`]
#[derive(Debug)]
pub struct WorkflowHandle {
    workflow_id: String,
    signal: CancelSignal,
    join: JoinHandle<WorkflowAggregation>,
}

impl WorkflowHandle {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Ask the running walk to stop. The walk records the cancellation
    /// itself at its next cancellation point.
    pub fn destroy(&self, reason: &str) {
        tracing::info!("🛑 Cancel requested for workflow {}: {}", self.workflow_id, reason);
        self.signal.cancel(reason);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the walk to end and take back the aggregation
    pub async fn join(self) -> Result<WorkflowAggregation> {
        Ok(self.join.await?)
    }
}
