//! LibsqlTreeStore - TreeStore Implementation for the libsql Backend
//!
//! # Design Principles
//!
//! 1. **One connection per write transaction**: `BEGIN IMMEDIATE` takes the
//!    database write lock up front, so concurrent structural mutations
//!    serialize in the storage layer even across service instances sharing
//!    the file. Dropping the connection before `COMMIT` rolls back.
//! 2. **Lock waits are bounded**: the connection busy timeout is the lock
//!    acquisition timeout; `SQLITE_BUSY` becomes `StoreError::Busy`.
//! 3. **Set-based SQL**: every `RangeUpdate` is one `UPDATE ... WHERE` over
//!    the `(namespace, lft)` / `(namespace, rgt)` indexes.
//!
//! # Examples
//!
//! ```rust,no_run
//! use canopy_core::config::DatabaseConfig;
//! use canopy_core::db::{LibsqlTreeStore, TreeStore};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LibsqlTreeStore::open(&DatabaseConfig::new("./data/canopy.db")).await?;
//! let node = store.get_node("taxonomy", "node-123").await?;
//! # Ok(())
//! # }
//! ```

use crate::config::DatabaseConfig;
use crate::db::error::is_lock_contention;
use crate::db::tree_store::{
    NodeRow, PayloadStore, RangePredicate, RangeUpdate, SpanColumn, SpanQuery, StoreError,
    StoreResult, TreeStore, TreeTransaction,
};
use crate::db::{DatabaseError, DatabaseService};
use crate::models::TreeNode;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use libsql::{Connection, Row, Value};
use std::sync::Arc;

/// Column list shared by every node SELECT (order matters for `row_to_node_row`)
const NODE_COLUMNS: &str =
    "id, parent_id, lft, rgt, depth, ordering, payload, created_at, modified_at";

/// SQLite primary result code for constraint violations
const SQLITE_CONSTRAINT: i32 = 19;

/// libsql-backed tree storage
#[derive(Debug, Clone)]
pub struct LibsqlTreeStore {
    db: Arc<DatabaseService>,
}

impl LibsqlTreeStore {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    /// Open (or create) the database described by `config`
    pub async fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let db = DatabaseService::new(config).await?;
        Ok(Self::new(Arc::new(db)))
    }

    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    /// Seed rows verbatim, bypassing the engine.
    ///
    /// Intended for loading legacy exports that lack nested-set numbers;
    /// run `rebuild_integrity` afterwards to derive them from `parent_id`.
    pub async fn import_rows(&self, namespace: &str, rows: Vec<NodeRow>) -> StoreResult<u64> {
        let conn = self.db.connect_with_timeout().await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| map_libsql("Failed to begin import", e))?;

        let mut imported = 0;
        for row in rows.into_iter().map(NodeRow::into_import) {
            if let Err(e) = insert_row(&conn, namespace, &row).await {
                let _rollback = conn.execute("ROLLBACK", ()).await;
                return Err(e);
            }
            imported += 1;
        }

        if let Err(e) = conn.execute("COMMIT", ()).await {
            let _rollback = conn.execute("ROLLBACK", ()).await;
            return Err(map_libsql("Failed to commit import", e));
        }

        Ok(imported)
    }
}

/// Parse timestamp from database - handles both SQLite and RFC3339 formats
///
/// SQLite CURRENT_TIMESTAMP returns: "YYYY-MM-DD HH:MM:SS"
/// Rows written by the store use RFC3339: "YYYY-MM-DDTHH:MM:SS.ffffff+00:00"
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert a libsql error, classifying lock contention as retryable
fn map_libsql(context: &str, error: libsql::Error) -> StoreError {
    if is_lock_contention(&error) {
        StoreError::busy(format!("{}: {}", context, error))
    } else {
        StoreError::Database(DatabaseError::sql_execution(format!(
            "{}: {}",
            context, error
        )))
    }
}

fn is_constraint_violation(error: &libsql::Error) -> bool {
    match error {
        libsql::Error::SqliteFailure(code, _) if code & 0xff == SQLITE_CONSTRAINT => true,
        other => other.to_string().contains("UNIQUE constraint failed"),
    }
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn optional_text(value: Option<&str>) -> Value {
    value.map(text).unwrap_or(Value::Null)
}

fn optional_integer(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

/// Convert libsql::Row to a storage row
///
/// Expected columns (in order): see `NODE_COLUMNS`.
fn row_to_node_row(row: &Row) -> StoreResult<NodeRow> {
    let field = |name: &str, e: libsql::Error| map_libsql(&format!("Failed to get {}", name), e);

    let id: String = row.get(0).map_err(|e| field("id", e))?;
    let parent_id: Option<String> = row.get(1).map_err(|e| field("parent_id", e))?;
    let lft: i64 = row.get(2).map_err(|e| field("lft", e))?;
    let rgt: i64 = row.get(3).map_err(|e| field("rgt", e))?;
    let depth: i64 = row.get(4).map_err(|e| field("depth", e))?;
    let ordering: Option<i64> = row.get(5).map_err(|e| field("ordering", e))?;
    let payload_json: String = row.get(6).map_err(|e| field("payload", e))?;
    let created_at_str: String = row.get(7).map_err(|e| field("created_at", e))?;
    let modified_at_str: String = row.get(8).map_err(|e| field("modified_at", e))?;

    let payload = serde_json::from_str(&payload_json)?;
    let created_at = parse_timestamp(&created_at_str)
        .ok_or_else(|| StoreError::corrupt_row(&id, format!("bad created_at '{}'", created_at_str)))?;
    let modified_at = parse_timestamp(&modified_at_str).ok_or_else(|| {
        StoreError::corrupt_row(&id, format!("bad modified_at '{}'", modified_at_str))
    })?;

    Ok(NodeRow {
        id,
        parent_id,
        lft,
        rgt,
        depth,
        ordering,
        payload,
        created_at,
        modified_at,
    })
}

async fn fetch_rows(conn: &Connection, sql: &str, params: Vec<Value>) -> StoreResult<Vec<NodeRow>> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| map_libsql("Failed to execute node query", e))?;

    let mut result = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| map_libsql("Failed to fetch row", e))?
    {
        result.push(row_to_node_row(&row)?);
    }
    Ok(result)
}

async fn fetch_attached(conn: &Connection, namespace: &str, id: &str) -> StoreResult<Option<TreeNode>> {
    let sql = format!(
        "SELECT {} FROM tree_nodes WHERE namespace = ? AND id = ? AND lft > 0",
        NODE_COLUMNS
    );
    let mut rows = fetch_rows(conn, &sql, vec![text(namespace), text(id)]).await?;
    rows.pop().map(NodeRow::into_node).transpose()
}

/// Every row of a namespace, numbering clamped for rebuild and verification
async fn load_all_rows(conn: &Connection, namespace: &str) -> StoreResult<Vec<TreeNode>> {
    let sql = format!(
        "SELECT {} FROM tree_nodes WHERE namespace = ? ORDER BY lft, id",
        NODE_COLUMNS
    );
    Ok(fetch_rows(conn, &sql, vec![text(namespace)])
        .await?
        .into_iter()
        .map(NodeRow::into_node_lossy)
        .collect())
}

async fn fetch_scalar(conn: &Connection, sql: &str, params: Vec<Value>) -> StoreResult<Option<i64>> {
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| map_libsql("Failed to execute scalar query", e))?;

    match rows
        .next()
        .await
        .map_err(|e| map_libsql("Failed to fetch scalar", e))?
    {
        Some(row) => row
            .get::<Option<i64>>(0)
            .map_err(|e| map_libsql("Failed to read scalar", e)),
        None => Ok(None),
    }
}

async fn insert_row(conn: &Connection, namespace: &str, row: &NodeRow) -> StoreResult<()> {
    let payload = serde_json::to_string(&row.payload)?;

    conn.execute(
        "INSERT INTO tree_nodes (namespace, id, parent_id, lft, rgt, depth, ordering, payload, created_at, modified_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        vec![
            text(namespace),
            text(&row.id),
            optional_text(row.parent_id.as_deref()),
            Value::Integer(row.lft),
            Value::Integer(row.rgt),
            Value::Integer(row.depth),
            optional_integer(row.ordering),
            Value::Text(payload),
            Value::Text(row.created_at.to_rfc3339()),
            Value::Text(row.modified_at.to_rfc3339()),
        ],
    )
    .await
    .map_err(|e| {
        if is_constraint_violation(&e) {
            StoreError::DuplicateId {
                namespace: namespace.to_string(),
                id: row.id.clone(),
            }
        } else {
            map_libsql("Failed to insert node", e)
        }
    })?;

    Ok(())
}

/// Build the SQL for one read query
fn span_query_sql(namespace: &str, query: &SpanQuery) -> (String, Vec<Value>) {
    let base = format!(
        "SELECT {} FROM tree_nodes WHERE namespace = ? AND lft > 0",
        NODE_COLUMNS
    );
    let mut params = vec![text(namespace)];

    let clause = match query {
        SpanQuery::Children { left, right, depth } => {
            params.extend([
                Value::Integer(depth + 1),
                Value::Integer(*left),
                Value::Integer(*right),
            ]);
            " AND depth = ? AND lft > ? AND lft < ? ORDER BY lft"
        }
        SpanQuery::Descendants { left, right } => {
            params.extend([Value::Integer(*left), Value::Integer(*right)]);
            " AND lft > ? AND rgt < ? ORDER BY lft"
        }
        SpanQuery::Ancestors { left, right } => {
            params.extend([Value::Integer(*left), Value::Integer(*right)]);
            " AND lft < ? AND rgt > ? ORDER BY lft"
        }
        SpanQuery::Siblings {
            parent_id: Some(parent_id),
            exclude_id,
        } => {
            params.extend([text(parent_id), text(exclude_id)]);
            " AND parent_id = ? AND id != ? ORDER BY ordering IS NULL, ordering, lft"
        }
        SpanQuery::Siblings {
            parent_id: None,
            exclude_id,
        } => {
            params.push(text(exclude_id));
            " AND parent_id IS NULL AND id != ? ORDER BY ordering IS NULL, ordering, lft"
        }
        SpanQuery::Roots => " AND parent_id IS NULL ORDER BY ordering IS NULL, ordering, lft",
        SpanQuery::All => " ORDER BY lft",
    };

    (format!("{}{}", base, clause), params)
}

#[async_trait]
impl TreeStore for LibsqlTreeStore {
    async fn begin(&self, namespace: &str) -> StoreResult<Box<dyn TreeTransaction>> {
        let conn = self.db.connect_with_timeout().await?;

        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| map_libsql("Failed to begin transaction", e))?;

        Ok(Box::new(LibsqlTransaction {
            conn,
            namespace: namespace.to_string(),
        }))
    }

    async fn get_node(&self, namespace: &str, id: &str) -> StoreResult<Option<TreeNode>> {
        let conn = self.db.connect_with_timeout().await?;
        fetch_attached(&conn, namespace, id).await
    }

    async fn query(&self, namespace: &str, query: SpanQuery) -> StoreResult<Vec<TreeNode>> {
        let conn = self.db.connect_with_timeout().await?;
        let (sql, params) = span_query_sql(namespace, &query);

        fetch_rows(&conn, &sql, params)
            .await?
            .into_iter()
            .map(NodeRow::into_node)
            .collect()
    }

    async fn load_all(&self, namespace: &str) -> StoreResult<Vec<TreeNode>> {
        let conn = self.db.connect_with_timeout().await?;
        load_all_rows(&conn, namespace).await
    }
}

#[async_trait]
impl PayloadStore for LibsqlTreeStore {
    async fn get_payload(&self, namespace: &str, id: &str) -> StoreResult<Option<serde_json::Value>> {
        let conn = self.db.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT payload FROM tree_nodes WHERE namespace = ? AND id = ? AND lft > 0",
                vec![text(namespace), text(id)],
            )
            .await
            .map_err(|e| map_libsql("Failed to query payload", e))?;

        match rows
            .next()
            .await
            .map_err(|e| map_libsql("Failed to fetch payload", e))?
        {
            Some(row) => {
                let json: String = row
                    .get(0)
                    .map_err(|e| map_libsql("Failed to get payload", e))?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn put_payload(
        &self,
        namespace: &str,
        id: &str,
        payload: serde_json::Value,
    ) -> StoreResult<bool> {
        let conn = self.db.connect_with_timeout().await?;
        let json = serde_json::to_string(&payload)?;

        let affected = conn
            .execute(
                "UPDATE tree_nodes SET payload = ?, modified_at = ? WHERE namespace = ? AND id = ? AND lft > 0",
                vec![
                    Value::Text(json),
                    Value::Text(Utc::now().to_rfc3339()),
                    text(namespace),
                    text(id),
                ],
            )
            .await
            .map_err(|e| map_libsql("Failed to update payload", e))?;

        Ok(affected > 0)
    }
}

/// Write transaction on a dedicated connection.
///
/// Holds the database write lock from `BEGIN IMMEDIATE` until commit or
/// rollback. If dropped early the connection closes and SQLite discards the
/// uncommitted changes.
pub struct LibsqlTransaction {
    conn: Connection,
    namespace: String,
}

#[async_trait]
impl TreeTransaction for LibsqlTransaction {
    async fn get_node(&mut self, id: &str) -> StoreResult<Option<TreeNode>> {
        fetch_attached(&self.conn, &self.namespace, id).await
    }

    async fn children(&mut self, parent_id: Option<&str>) -> StoreResult<Vec<TreeNode>> {
        let (sql, params) = match parent_id {
            Some(parent_id) => (
                format!(
                    "SELECT {} FROM tree_nodes WHERE namespace = ? AND parent_id = ? AND lft > 0 ORDER BY lft",
                    NODE_COLUMNS
                ),
                vec![text(&self.namespace), text(parent_id)],
            ),
            None => (
                format!(
                    "SELECT {} FROM tree_nodes WHERE namespace = ? AND parent_id IS NULL AND lft > 0 ORDER BY lft",
                    NODE_COLUMNS
                ),
                vec![text(&self.namespace)],
            ),
        };

        fetch_rows(&self.conn, &sql, params)
            .await?
            .into_iter()
            .map(NodeRow::into_node)
            .collect()
    }

    async fn max_right(&mut self) -> StoreResult<Option<i64>> {
        fetch_scalar(
            &self.conn,
            "SELECT MAX(rgt) FROM tree_nodes WHERE namespace = ? AND lft > 0",
            vec![text(&self.namespace)],
        )
        .await
    }

    async fn count_boundaries(&mut self, low: i64, high: i64) -> StoreResult<u64> {
        let count = fetch_scalar(
            &self.conn,
            "SELECT COUNT(*) FROM tree_nodes WHERE namespace = ? AND lft > 0
               AND ((lft BETWEEN ? AND ?) OR (rgt BETWEEN ? AND ?))",
            vec![
                text(&self.namespace),
                Value::Integer(low),
                Value::Integer(high),
                Value::Integer(low),
                Value::Integer(high),
            ],
        )
        .await?;

        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn bulk_update_range(&mut self, update: RangeUpdate) -> StoreResult<u64> {
        let sign = if update.delta.negate { "-" } else { "" };
        let mut assignments = Vec::new();
        let mut params = Vec::new();

        for column in [SpanColumn::Left, SpanColumn::Right] {
            if update.columns.includes(column) {
                let name = column.sql_name();
                assignments.push(format!("{name} = {sign}{name} + ?"));
                params.push(Value::Integer(update.delta.offset));
            }
        }

        if update.delta.depth_offset != 0 {
            assignments.push("depth = depth + ?".to_string());
            params.push(Value::Integer(update.delta.depth_offset));
        }

        let (condition, bounds) = update.predicate.to_sql();
        params.push(text(&self.namespace));
        params.extend(bounds.into_iter().map(Value::Integer));

        let sql = format!(
            "UPDATE tree_nodes SET {} WHERE namespace = ? AND {}",
            assignments.join(", "),
            condition
        );

        self.conn
            .execute(&sql, params)
            .await
            .map_err(|e| map_libsql("Failed to apply range update", e))
    }

    async fn insert(&mut self, node: &TreeNode) -> StoreResult<()> {
        insert_row(&self.conn, &self.namespace, &NodeRow::from(node)).await
    }

    async fn delete_range(&mut self, predicate: RangePredicate) -> StoreResult<u64> {
        let (condition, bounds) = predicate.to_sql();
        let mut params = vec![text(&self.namespace)];
        params.extend(bounds.into_iter().map(Value::Integer));

        self.conn
            .execute(
                &format!("DELETE FROM tree_nodes WHERE namespace = ? AND {}", condition),
                params,
            )
            .await
            .map_err(|e| map_libsql("Failed to delete range", e))
    }

    async fn set_parent(&mut self, id: &str, parent_id: Option<&str>) -> StoreResult<()> {
        self.conn
            .execute(
                "UPDATE tree_nodes SET parent_id = ?, modified_at = ? WHERE namespace = ? AND id = ?",
                vec![
                    optional_text(parent_id),
                    Value::Text(Utc::now().to_rfc3339()),
                    text(&self.namespace),
                    text(id),
                ],
            )
            .await
            .map_err(|e| map_libsql("Failed to update parent", e))?;
        Ok(())
    }

    async fn load_all(&mut self) -> StoreResult<Vec<TreeNode>> {
        load_all_rows(&self.conn, &self.namespace).await
    }

    async fn write_span(
        &mut self,
        id: &str,
        left: i64,
        right: i64,
        depth: i64,
    ) -> StoreResult<()> {
        self.conn
            .execute(
                "UPDATE tree_nodes SET lft = ?, rgt = ?, depth = ? WHERE namespace = ? AND id = ?",
                vec![
                    Value::Integer(left),
                    Value::Integer(right),
                    Value::Integer(depth),
                    text(&self.namespace),
                    text(id),
                ],
            )
            .await
            .map_err(|e| map_libsql("Failed to write span", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            let _rollback = self.conn.execute("ROLLBACK", ()).await;
            return Err(map_libsql("Failed to commit transaction", e));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.conn
            .execute("ROLLBACK", ())
            .await
            .map_err(|e| map_libsql("Failed to roll back transaction", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tree_store::{SpanDelta, SpanColumns};
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_store() -> (LibsqlTreeStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = DatabaseConfig::new(temp_dir.path().join("test.db")).with_busy_timeout_ms(50);
        let store = LibsqlTreeStore::open(&config).await.unwrap();
        (store, temp_dir)
    }

    fn node(id: &str, parent: Option<&str>, left: u64, right: u64, depth: u32) -> TreeNode {
        let now = Utc::now();
        TreeNode {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            left,
            right,
            depth,
            ordering: None,
            payload: json!({ "name": id }),
            created_at: now,
            modified_at: now,
        }
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2025-01-03 10:20:30").is_some());
        assert!(parse_timestamp("2025-01-03T10:20:30.123456+00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[tokio::test]
    async fn test_insert_commit_and_read_back() {
        let (store, _temp) = create_test_store().await;

        let mut tx = store.begin("taxonomy").await.unwrap();
        tx.insert(&node("root", None, 1, 4, 0)).await.unwrap();
        tx.insert(&node("a", Some("root"), 2, 3, 1)).await.unwrap();
        tx.commit().await.unwrap();

        let root = store.get_node("taxonomy", "root").await.unwrap().unwrap();
        assert_eq!((root.left, root.right, root.depth), (1, 4, 0));
        assert_eq!(root.payload, json!({ "name": "root" }));

        // Namespaces are isolated
        assert!(store.get_node("menu", "root").await.unwrap().is_none());

        let children = store
            .query(
                "taxonomy",
                SpanQuery::Children {
                    left: 1,
                    right: 4,
                    depth: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "a");
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let (store, _temp) = create_test_store().await;

        let mut tx = store.begin("menu").await.unwrap();
        tx.insert(&node("root", None, 1, 2, 0)).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.get_node("menu", "root").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_changes() {
        let (store, _temp) = create_test_store().await;

        {
            let mut tx = store.begin("menu").await.unwrap();
            tx.insert(&node("root", None, 1, 2, 0)).await.unwrap();
        }

        assert!(store.get_node("menu", "root").await.unwrap().is_none());
        // The write lock was released with the connection
        let tx = store.begin("menu").await.unwrap();
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_bulk_update_range_shift_and_detach() {
        let (store, _temp) = create_test_store().await;

        let mut tx = store.begin("taxonomy").await.unwrap();
        tx.insert(&node("root", None, 1, 6, 0)).await.unwrap();
        tx.insert(&node("a", Some("root"), 2, 3, 1)).await.unwrap();
        tx.insert(&node("b", Some("root"), 4, 5, 1)).await.unwrap();

        let shifted = tx
            .bulk_update_range(RangeUpdate::shift(
                RangePredicate::AtOrAbove {
                    column: SpanColumn::Right,
                    bound: 5,
                },
                SpanColumn::Right,
                2,
            ))
            .await
            .unwrap();
        assert_eq!(shifted, 2);

        let detached = tx
            .bulk_update_range(RangeUpdate::block(
                RangePredicate::Within { left: 2, right: 3 },
                SpanDelta::detach(),
            ))
            .await
            .unwrap();
        assert_eq!(detached, 1);
        assert!(tx.get_node("a").await.unwrap().is_none());

        let reattached = tx
            .bulk_update_range(RangeUpdate {
                predicate: RangePredicate::Detached,
                columns: SpanColumns::Both,
                delta: SpanDelta::reattach(3, 1),
            })
            .await
            .unwrap();
        assert_eq!(reattached, 1);

        let a = tx.get_node("a").await.unwrap().unwrap();
        assert_eq!((a.left, a.right, a.depth), (5, 6, 2));
        let root = tx.get_node("root").await.unwrap().unwrap();
        assert_eq!(root.right, 8);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_id_is_reported() {
        let (store, _temp) = create_test_store().await;

        let mut tx = store.begin("taxonomy").await.unwrap();
        tx.insert(&node("root", None, 1, 2, 0)).await.unwrap();
        let err = tx.insert(&node("root", None, 3, 4, 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_competing_writer_gets_busy() {
        let (store, _temp) = create_test_store().await;

        let holder = store.begin("taxonomy").await.unwrap();
        let result = store.begin("organization").await;

        match result {
            Err(err) => assert!(err.is_retryable(), "expected retryable error, got {err}"),
            Ok(_) => panic!("second writer should not acquire the lock"),
        }

        holder.rollback().await.unwrap();
        let tx = store.begin("organization").await.unwrap();
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_payload_store_round_trip() {
        let (store, _temp) = create_test_store().await;

        let mut tx = store.begin("menu").await.unwrap();
        tx.insert(&node("home", None, 1, 2, 0)).await.unwrap();
        tx.commit().await.unwrap();

        let updated = store
            .put_payload("menu", "home", json!({ "title": "Home" }))
            .await
            .unwrap();
        assert!(updated);
        assert_eq!(
            store.get_payload("menu", "home").await.unwrap(),
            Some(json!({ "title": "Home" }))
        );

        assert!(!store.put_payload("menu", "missing", json!({})).await.unwrap());
        assert!(store.get_payload("menu", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_import_rows_and_load_all() {
        let (store, _temp) = create_test_store().await;
        let now = Utc::now();

        let rows = vec![NodeRow {
            id: "legacy".to_string(),
            parent_id: None,
            lft: 0,
            rgt: 0,
            depth: 0,
            ordering: None,
            payload: json!({}),
            created_at: now,
            modified_at: now,
        }];
        assert_eq!(store.import_rows("taxonomy", rows).await.unwrap(), 1);

        let mut tx = store.begin("taxonomy").await.unwrap();
        let all = tx.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!((all[0].left, all[0].right), (0, 0));
        // Unnumbered rows are not attached
        assert!(tx.get_node("legacy").await.unwrap().is_none());
        tx.rollback().await.unwrap();
    }
}
