/// SQLite workflow store against a private in-memory database

use flowwork::runtime::{
    recover_orphaned_workflows, EngineSettings, InMemoryDeploymentOracle, RequestMeta,
    WorkflowEngine,
};
use flowwork::workflow::{
    NodeDefinition, NodeReturnType, SqliteWorkflowStore, WorkflowDefinition, WorkflowInstance,
    WorkflowNode, WorkflowQuery, WorkflowStatus, WorkflowStore,
};
use std::sync::Arc;

#[tokio::test]
async fn create_and_read_back_workflow() {
    let store = SqliteWorkflowStore::in_memory().await.unwrap();
    let mut flow = WorkflowInstance::new("ExportData", "cluster-1", "cluster", "tenant-1");
    flow.context = r#"{"filePath":"/tmp/export"}"#.to_string();
    store.create_workflow(&flow).await.unwrap();

    let stored = store.get_workflow(&flow.id).await.unwrap().unwrap();
    assert_eq!(stored.id, flow.id);
    assert_eq!(stored.name, "ExportData");
    assert_eq!(stored.biz_id, "cluster-1");
    assert_eq!(stored.biz_type, "cluster");
    assert_eq!(stored.tenant_id, "tenant-1");
    assert_eq!(stored.status, WorkflowStatus::Initializing);
    assert_eq!(stored.context, flow.context);
    assert_eq!(
        stored.created_at.timestamp_micros(),
        flow.created_at.timestamp_micros()
    );

    assert!(store.get_workflow("missing").await.unwrap().is_none());
    assert!(store.get_workflow_detail("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn detail_update_upserts_workflow_and_nodes() {
    let store = SqliteWorkflowStore::in_memory().await.unwrap();
    let mut flow = WorkflowInstance::new("ScaleOut", "cluster-1", "cluster", "tenant-1");
    store.create_workflow(&flow).await.unwrap();

    let mut start = WorkflowNode::new(&flow, "start", NodeReturnType::SyncFuncNode);
    store.create_workflow_node(&start).await.unwrap();
    let mut deploy = WorkflowNode::new(&flow, "deploy", NodeReturnType::PollingNode);

    flow.status = WorkflowStatus::Processing;
    start.success(None);
    deploy.processing();
    deploy.operation_id = "op-9".to_string();
    store
        .update_workflow_detail(&flow, &[start.clone(), deploy.clone()])
        .await
        .unwrap();

    deploy.fail(&flowwork::NodeError::PollingTimeout(3));
    flow.status = WorkflowStatus::Error;
    store
        .update_workflow_detail(&flow, &[start.clone(), deploy.clone()])
        .await
        .unwrap();

    let detail = store.get_workflow_detail(&flow.id).await.unwrap().unwrap();
    assert_eq!(detail.flow.status, WorkflowStatus::Error);
    assert!(detail.node_names.is_empty());
    assert_eq!(detail.nodes.len(), 2);

    assert_eq!(detail.nodes[0].name, "start");
    assert_eq!(detail.nodes[0].status, WorkflowStatus::Finished);
    assert!(detail.nodes[0].end_time.is_some());

    let stored = &detail.nodes[1];
    assert_eq!(stored.name, "deploy");
    assert_eq!(stored.return_type, NodeReturnType::PollingNode);
    assert_eq!(stored.operation_id, "op-9");
    assert_eq!(stored.status, WorkflowStatus::Error);
    assert_eq!(stored.result, "polling timed out after 3 attempts");
}

#[tokio::test]
async fn list_filters_pages_and_counts() {
    let store = SqliteWorkflowStore::in_memory().await.unwrap();
    let mut ids = Vec::new();
    for i in 0..5 {
        let mut flow = WorkflowInstance::new(
            if i % 2 == 0 { "Backup" } else { "Restore" },
            "cluster-1",
            "cluster",
            "tenant-1",
        );
        if i == 4 {
            flow.status = WorkflowStatus::Finished;
        }
        store.create_workflow(&flow).await.unwrap();
        ids.push(flow.id);
    }

    let (rows, total) = store
        .list_workflows(&WorkflowQuery {
            name: Some("Backup".into()),
            page: Some(1),
            page_size: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(
        rows.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
        vec![ids[4].as_str(), ids[2].as_str()]
    );

    let (rows, total) = store
        .list_workflows(&WorkflowQuery {
            name: Some("Backup".into()),
            page: Some(2),
            page_size: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, ids[0]);

    let (rows, total) = store
        .list_workflows(&WorkflowQuery {
            status: Some(WorkflowStatus::Finished),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows[0].id, ids[4]);

    let (rows, total) = store
        .list_workflows(&WorkflowQuery {
            page: Some(u32::MAX),
            page_size: Some(500),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 5);
    assert!(rows.is_empty());

    let unfinished = store.list_unfinished_workflows().await.unwrap();
    assert_eq!(unfinished.len(), 4);
}

#[tokio::test]
async fn engine_run_is_fully_persisted() {
    let store = Arc::new(SqliteWorkflowStore::in_memory().await.unwrap());
    let engine = WorkflowEngine::new(
        store.clone(),
        Arc::new(InMemoryDeploymentOracle::new()),
        EngineSettings::default(),
    );
    let define = WorkflowDefinition::builder("Restart")
        .node(NodeDefinition::sync_fn("start", |_, _| Ok(())).on_success("stop"))
        .node(NodeDefinition::sync_fn("stop", |_, _| anyhow::bail!("host unreachable")).on_fail("rollback"))
        .node(NodeDefinition::sync_fn("rollback", |_, _| Ok(())))
        .build()
        .unwrap();

    let mut flow = engine
        .create_flow_work(
            RequestMeta::new("ClusterService.Restart"),
            "cluster-7",
            "cluster",
            Some(Arc::new(define)),
        )
        .await
        .unwrap();
    assert!(!flow.start().await);

    let detail = store.get_workflow_detail(&flow.flow().id).await.unwrap().unwrap();
    assert_eq!(detail.flow.status, WorkflowStatus::Error);
    let history: Vec<_> = detail
        .nodes
        .iter()
        .map(|n| (n.name.as_str(), n.status, n.result.as_str()))
        .collect();
    assert_eq!(
        history,
        vec![
            ("start", WorkflowStatus::Finished, ""),
            ("stop", WorkflowStatus::Error, "host unreachable"),
            ("rollback", WorkflowStatus::Finished, ""),
        ]
    );
}

#[tokio::test]
async fn recovery_closes_runs_left_processing() {
    let store = SqliteWorkflowStore::in_memory().await.unwrap();
    let mut flow = WorkflowInstance::new("ScaleOut", "cluster-1", "cluster", "tenant-1");
    store.create_workflow(&flow).await.unwrap();
    let mut deploy = WorkflowNode::new(&flow, "deploy", NodeReturnType::PollingNode);
    store.create_workflow_node(&deploy).await.unwrap();
    flow.status = WorkflowStatus::Processing;
    deploy.processing();
    store.update_workflow_detail(&flow, &[deploy]).await.unwrap();

    let recovered = recover_orphaned_workflows(&store).await.unwrap();
    assert_eq!(recovered, vec![flow.id.clone()]);

    let detail = store.get_workflow_detail(&flow.id).await.unwrap().unwrap();
    assert_eq!(detail.flow.status, WorkflowStatus::Error);
    assert_eq!(detail.nodes[0].result, "task failed: orphaned by restart");
    assert!(store.list_unfinished_workflows().await.unwrap().is_empty());
}
