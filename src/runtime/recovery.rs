/// Startup sweep for runs orphaned by a previous process
///
/// A run is owned by the task that executes it, so anything still
/// `Initializing` or `Processing` in the store when the process starts was
/// interrupted by a crash or restart. Such runs are not resumed: they are
/// closed as `Error`, and their in-flight nodes are failed, so the audit
/// trail shows exactly where they stopped.

use crate::error::{NodeError, Result};
use crate::workflow::records::WorkflowStatus;
use crate::workflow::storage::WorkflowStore;
use chrono::Utc;

pub const ORPHANED_REASON: &str = "orphaned by restart";

/// Close every unfinished run. Returns the IDs that were closed.
pub async fn recover_orphaned_workflows(store: &dyn WorkflowStore) -> Result<Vec<String>> {
    let unfinished = store.list_unfinished_workflows().await?;
    let mut recovered = Vec::with_capacity(unfinished.len());

    for flow in unfinished {
        let Some(mut detail) = store.get_workflow_detail(&flow.id).await? else {
            continue;
        };

        let err = NodeError::TaskFailed(ORPHANED_REASON.to_string());
        for node in detail.nodes.iter_mut().filter(|node| node.is_active()) {
            node.fail(&err);
        }
        detail.flow.status = WorkflowStatus::Error;
        detail.flow.updated_at = Utc::now();

        store.update_workflow_detail(&detail.flow, &detail.nodes).await?;
        tracing::warn!(
            "♻️ Closed orphaned workflow {} ({}) of bizId {}",
            detail.flow.id,
            detail.flow.name,
            detail.flow.biz_id
        );
        recovered.push(detail.flow.id);
    }

    if !recovered.is_empty() {
        tracing::info!("Recovered {} orphaned workflows", recovered.len());
    }
    Ok(recovered)
}
