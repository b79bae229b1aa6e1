/// Workflow inspection REST API endpoints
///
/// Read-only access to persisted runs (list with filters and paging,
/// detail with node history) plus cancellation of runs live in this process.

use crate::error::WorkflowError;
use crate::runtime::manager::WorkflowManager;
use crate::workflow::records::{WorkflowDetail, WorkflowInstance, WorkflowQuery};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<WorkflowManager>,
}

/// Paging information echoed back with list results
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListWorkflowsResponse {
    pub data: Vec<WorkflowInstance>,
    pub page: Page,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response for cancel operations
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Create workflow inspection routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}/cancel", post(cancel_workflow))
        .route("/api/definitions", get(list_definitions))
}

/// List persisted runs
///
/// GET /api/workflows?bizId=&status=&name=&page=&pageSize=
async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<WorkflowQuery>,
) -> Result<Json<ListWorkflowsResponse>, StatusCode> {
    match state.manager.list_workflows(&query).await {
        Ok((data, total)) => Ok(Json(ListWorkflowsResponse {
            data,
            page: Page {
                page: query.page(),
                page_size: query.page_size(),
                total,
            },
        })),
        Err(e) => {
            tracing::error!("Failed to list workflows: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Show one run with its node history
///
/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDetail>, StatusCode> {
    match state.manager.detail(&id).await {
        Ok(detail) => Ok(Json(detail)),
        Err(WorkflowError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to get workflow {}: {}", id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Cancel a run executing in this process
///
/// POST /api/workflows/{id}/cancel
/// Body: { "reason": "..." }
async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<WorkflowResponse>, StatusCode> {
    let reason = payload
        .reason
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "canceled by operator".to_string());

    if !state.manager.cancel(&id, &reason).await {
        return Err(StatusCode::NOT_FOUND);
    }

    tracing::info!("🛑 Cancel requested via API for workflow {}", id);
    Ok(Json(WorkflowResponse {
        id,
        message: "Workflow cancellation requested".to_string(),
    }))
}

/// Names of registered workflow definitions
///
/// GET /api/definitions
async fn list_definitions(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.manager.registry().names())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::engine::{EngineSettings, RequestMeta, WorkflowEngine};
    use crate::runtime::oracle::{InMemoryDeploymentOracle, Operation};
    use crate::workflow::memory::InMemoryWorkflowStore;
    use crate::workflow::records::WorkflowStatus;
    use crate::workflow::registry::WorkflowRegistry;
    use crate::workflow::types::{NodeDefinition, WorkflowDefinition};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn setup() -> (Router, Arc<WorkflowManager>, Arc<InMemoryDeploymentOracle>) {
        let registry = Arc::new(WorkflowRegistry::new());
        registry
            .register(
                WorkflowDefinition::builder("ScaleOut")
                    .node(NodeDefinition::sync_fn("start", |_, _| Ok(())).on_success("deploy"))
                    .node(NodeDefinition::polling_fn("deploy", |node, _| {
                        node.operation_id = "op-deploy".into();
                        Ok(())
                    }))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let oracle = Arc::new(InMemoryDeploymentOracle::new());
        let engine = WorkflowEngine::new(
            Arc::new(InMemoryWorkflowStore::new()),
            oracle.clone(),
            EngineSettings {
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
        );
        let manager = Arc::new(WorkflowManager::new(registry, engine));
        let app = create_workflow_routes().with_state(AppState {
            manager: manager.clone(),
        });
        (app, manager, oracle)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn list_and_detail_finished_run() {
        let (app, manager, oracle) = setup().await;
        oracle.script("op-deploy", vec![Operation::finished("")]).await;
        let id = manager
            .run(RequestMeta::new("Cluster.ScaleOut"), "ScaleOut", "cluster-1", "cluster")
            .await
            .unwrap();
        manager.wait(&id).await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/workflows?bizId=cluster-1&status=Finished")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list: ListWorkflowsResponse = body_json(response).await;
        assert_eq!(list.page.total, 1);
        assert_eq!(list.data[0].id, id);

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/workflows/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let detail: serde_json::Value = body_json(response).await;
        assert_eq!(detail["flow"]["status"], "Finished");
        assert_eq!(detail["node_names"], serde_json::json!(["start", "deploy"]));

        let response = app
            .oneshot(
                Request::get("/api/workflows/unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_past_the_last_page_is_empty() {
        let (app, _manager, _oracle) = setup().await;
        let response = app
            .oneshot(
                Request::get("/api/workflows?page=4294967295&pageSize=500")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list: ListWorkflowsResponse = body_json(response).await;
        assert!(list.data.is_empty());
        assert_eq!(list.page.page, u32::MAX);
        assert_eq!(list.page.total, 0);
    }

    #[tokio::test]
    async fn cancel_live_run() {
        let (app, manager, oracle) = setup().await;
        oracle.script("op-deploy", vec![Operation::running()]).await;
        let id = manager
            .run(RequestMeta::new("Cluster.ScaleOut"), "ScaleOut", "cluster-1", "cluster")
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::post(format!("/api/workflows/{}/cancel", id))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"reason":"maintenance window closed"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let flow = manager.wait(&id).await.unwrap();
        assert_eq!(flow.flow().status, WorkflowStatus::Canceled);
        assert_eq!(
            flow.last_error(),
            Some("task canceled: maintenance window closed")
        );

        let response = app
            .oneshot(
                Request::post(format!("/api/workflows/{}/cancel", id))
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
