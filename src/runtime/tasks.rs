/// Background task runner
///
/// Fire-and-forget launcher for workflow runs. Each task is spawned on the
/// tokio runtime inside a tracing span named after its operation
/// (`"{service}.{endpoint} workflow.{id}"`), and tracked by name until it
/// finishes so operators can see what is in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::Instrument;

#[derive(Debug, Clone, Default)]
pub struct BackgroundTaskRunner {
    /// Operation name -> abort handle of the in-flight task
    active: Arc<RwLock<HashMap<String, AbortHandle>>>,
}

impl BackgroundTaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` under `operation_name` and return its join handle
    pub async fn spawn<F>(&self, operation_name: &str, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let span = tracing::info_span!("background_task", operation = %operation_name);
        let active = Arc::clone(&self.active);
        let name = operation_name.to_string();

        // Hold the write lock across spawn so the task cannot unregister
        // itself before it has been registered
        let mut registry = self.active.write().await;
        let handle = tokio::spawn(
            async move {
                tracing::debug!("background task started");
                let output = task.await;
                active.write().await.remove(&name);
                tracing::debug!("background task finished");
                output
            }
            .instrument(span),
        );
        registry.insert(operation_name.to_string(), handle.abort_handle());
        handle
    }

    /// Names of operations that have not finished yet
    pub async fn active_operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Abort every in-flight task
    pub async fn shutdown(&self) {
        let mut active = self.active.write().await;
        for (name, handle) in active.drain() {
            tracing::info!("⏹️ Aborting background task {}", name);
            handle.abort();
        }
    }
}
