/// Persistence gateway for workflow runs
///
/// `WorkflowStore` is the contract the engine writes through. The SQLite
/// implementation keeps one row per run in `workflows` and the node history
/// in `workflow_nodes`, keyed by the parent workflow ID. The flow context
/// snapshot is stored as JSON text on the workflow row.

use crate::error::{Result, WorkflowError};
use crate::workflow::records::{
    NodeReturnType, WorkflowDetail, WorkflowInstance, WorkflowNode, WorkflowQuery,
    WorkflowStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;

/// Storage contract consumed by the workflow engine and the inspection API
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a new run record
    async fn create_workflow(&self, flow: &WorkflowInstance) -> Result<WorkflowInstance>;

    /// Insert a node record before it executes
    async fn create_workflow_node(&self, node: &WorkflowNode) -> Result<WorkflowNode>;

    /// Atomically upsert the run row and its full node history
    async fn update_workflow_detail(
        &self,
        flow: &WorkflowInstance,
        nodes: &[WorkflowNode],
    ) -> Result<()>;

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowInstance>>;

    /// Run plus its ordered node history. `node_names` is left empty; the
    /// store knows nothing about definitions.
    async fn get_workflow_detail(&self, id: &str) -> Result<Option<WorkflowDetail>>;

    /// Page of runs matching the query, newest first, with the total count
    async fn list_workflows(&self, query: &WorkflowQuery) -> Result<(Vec<WorkflowInstance>, u64)>;

    /// Runs still `Initializing` or `Processing`
    async fn list_unfinished_workflows(&self) -> Result<Vec<WorkflowInstance>>;
}

/// SQLite-backed workflow store
#[derive(Debug, Clone)]
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
}

impl SqliteWorkflowStore {
    /// Wrap an existing pool. Call `init_schema` before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url` (e.g. "sqlite://data/flowwork.db"), creating the
    /// database file if needed, and initialise the schema
    pub async fn connect(url: &str) -> Result<Self> {
        if url.contains(":memory:") {
            return Self::in_memory().await;
        }
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool);
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                biz_id TEXT NOT NULL,
                biz_type TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                status TEXT NOT NULL,
                context TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_nodes (
                id TEXT PRIMARY KEY,
                parent_id TEXT NOT NULL REFERENCES workflows(id),
                biz_id TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                result TEXT NOT NULL DEFAULT '',
                return_type TEXT NOT NULL,
                operation_id TEXT NOT NULL DEFAULT '',
                start_time TEXT NOT NULL,
                end_time TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_biz_id ON workflows(biz_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_status ON workflows(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_workflow_nodes_parent ON workflow_nodes(parent_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_nodes(&self, parent_id: &str) -> Result<Vec<WorkflowNode>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_nodes WHERE parent_id = ? ORDER BY rowid",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(node_from_row).collect()
    }
}

const UPSERT_WORKFLOW: &str = r#"
    INSERT INTO workflows (id, name, biz_id, biz_type, tenant_id, status, context, created_at, updated_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        status = excluded.status,
        context = excluded.context,
        updated_at = excluded.updated_at
"#;

const UPSERT_NODE: &str = r#"
    INSERT INTO workflow_nodes (id, parent_id, biz_id, tenant_id, name, status, result, return_type, operation_id, start_time, end_time)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        status = excluded.status,
        result = excluded.result,
        operation_id = excluded.operation_id,
        end_time = excluded.end_time
"#;

fn bind_workflow<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    flow: &'q WorkflowInstance,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&flow.id)
        .bind(&flow.name)
        .bind(&flow.biz_id)
        .bind(&flow.biz_type)
        .bind(&flow.tenant_id)
        .bind(flow.status.as_str())
        .bind(&flow.context)
        .bind(format_time(&flow.created_at))
        .bind(format_time(&flow.updated_at))
}

fn bind_node<'q>(
    query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    node: &'q WorkflowNode,
) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&node.id)
        .bind(&node.parent_id)
        .bind(&node.biz_id)
        .bind(&node.tenant_id)
        .bind(&node.name)
        .bind(node.status.as_str())
        .bind(&node.result)
        .bind(node.return_type.as_str())
        .bind(&node.operation_id)
        .bind(format_time(&node.start_time))
        .bind(node.end_time.as_ref().map(format_time))
}

/// Fixed-width UTC timestamps so text ordering matches time ordering
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| WorkflowError::Storage(format!("invalid timestamp {}: {}", value, e)))
}

fn workflow_from_row(row: &SqliteRow) -> Result<WorkflowInstance> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(WorkflowInstance {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        biz_id: row.try_get("biz_id")?,
        biz_type: row.try_get("biz_type")?,
        tenant_id: row.try_get("tenant_id")?,
        status: status.parse().map_err(WorkflowError::Storage)?,
        context: row.try_get("context")?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn node_from_row(row: &SqliteRow) -> Result<WorkflowNode> {
    let status: String = row.try_get("status")?;
    let return_type: String = row.try_get("return_type")?;
    let start_time: String = row.try_get("start_time")?;
    let end_time: Option<String> = row.try_get("end_time")?;
    Ok(WorkflowNode {
        id: row.try_get("id")?,
        parent_id: row.try_get("parent_id")?,
        biz_id: row.try_get("biz_id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        status: status.parse().map_err(WorkflowError::Storage)?,
        result: row.try_get("result")?,
        return_type: return_type
            .parse::<NodeReturnType>()
            .map_err(WorkflowError::Storage)?,
        operation_id: row.try_get("operation_id")?,
        start_time: parse_time(&start_time)?,
        end_time: end_time.as_deref().map(parse_time).transpose()?,
    })
}

/// Append the biz/status/name filters of a query as a WHERE clause
fn push_filters<'q>(builder: &mut QueryBuilder<'q, Sqlite>, query: &'q WorkflowQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(biz_id) = &query.biz_id {
        builder.push(" AND biz_id = ").push_bind(biz_id);
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(name) = &query.name {
        builder.push(" AND name = ").push_bind(name);
    }
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn create_workflow(&self, flow: &WorkflowInstance) -> Result<WorkflowInstance> {
        bind_workflow(
            sqlx::query(
                r#"
                INSERT INTO workflows (id, name, biz_id, biz_type, tenant_id, status, context, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            ),
            flow,
        )
        .execute(&self.pool)
        .await?;

        Ok(flow.clone())
    }

    async fn create_workflow_node(&self, node: &WorkflowNode) -> Result<WorkflowNode> {
        bind_node(
            sqlx::query(
                r#"
                INSERT INTO workflow_nodes (id, parent_id, biz_id, tenant_id, name, status, result, return_type, operation_id, start_time, end_time)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            ),
            node,
        )
        .execute(&self.pool)
        .await?;

        Ok(node.clone())
    }

    async fn update_workflow_detail(
        &self,
        flow: &WorkflowInstance,
        nodes: &[WorkflowNode],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        bind_workflow(sqlx::query(UPSERT_WORKFLOW), flow)
            .execute(&mut *tx)
            .await?;
        for node in nodes {
            bind_node(sqlx::query(UPSERT_NODE), node)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowInstance>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    async fn get_workflow_detail(&self, id: &str) -> Result<Option<WorkflowDetail>> {
        let Some(flow) = self.get_workflow(id).await? else {
            return Ok(None);
        };
        let nodes = self.fetch_nodes(id).await?;
        Ok(Some(WorkflowDetail {
            flow,
            nodes,
            node_names: Vec::new(),
        }))
    }

    async fn list_workflows(&self, query: &WorkflowQuery) -> Result<(Vec<WorkflowInstance>, u64)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM workflows");
        push_filters(&mut count, query);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM workflows");
        push_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
            .push_bind(i64::from(query.page_size()))
            .push(" OFFSET ")
            .push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));
        let rows = select.build().fetch_all(&self.pool).await?;

        let flows = rows.iter().map(workflow_from_row).collect::<Result<Vec<_>>>()?;
        Ok((flows, total.max(0) as u64))
    }

    async fn list_unfinished_workflows(&self) -> Result<Vec<WorkflowInstance>> {
        let rows = sqlx::query(
            "SELECT * FROM workflows WHERE status IN (?, ?) ORDER BY created_at",
        )
        .bind(WorkflowStatus::Initializing.as_str())
        .bind(WorkflowStatus::Processing.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(workflow_from_row).collect()
    }
}
