//! In-Memory TreeStore
//!
//! A `TreeStore` kept entirely in process memory, used by tests and by
//! embedders that do not need persistence. It honours the same contract as
//! the libsql backend:
//!
//! - one writer at a time, waiting at most `lock_timeout` for the lock
//! - a transaction works on a private snapshot of its namespace, so
//!   readers only ever see committed state
//! - dropping a transaction without committing discards the snapshot

use crate::db::tree_store::{
    NodeRow, PayloadStore, RangePredicate, RangeUpdate, SpanColumn, SpanQuery, StoreError,
    StoreResult, TreeStore, TreeTransaction,
};
use crate::models::{ordering_key, TreeNode};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

type Namespaces = HashMap<String, Vec<NodeRow>>;

#[derive(Debug, Clone)]
pub struct MemoryTreeStore {
    writer: Arc<Mutex<()>>,
    committed: Arc<RwLock<Namespaces>>,
    lock_timeout: Duration,
}

impl Default for MemoryTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self {
            writer: Arc::new(Mutex::new(())),
            committed: Arc::new(RwLock::new(HashMap::new())),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Maximum time `begin` waits for a competing writer
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Seed rows verbatim, bypassing the engine (see `LibsqlTreeStore::import_rows`)
    pub async fn import_rows(&self, namespace: &str, rows: Vec<NodeRow>) -> StoreResult<u64> {
        let _guard = self.acquire_writer().await?;
        let mut committed = self.write_committed()?;
        let existing = committed.entry(namespace.to_string()).or_default();

        for row in &rows {
            if existing.iter().any(|r| r.id == row.id) {
                return Err(StoreError::DuplicateId {
                    namespace: namespace.to_string(),
                    id: row.id.clone(),
                });
            }
        }

        let imported = rows.len() as u64;
        existing.extend(rows.into_iter().map(NodeRow::into_import));
        Ok(imported)
    }

    /// Number of committed rows in a namespace
    pub fn row_count(&self, namespace: &str) -> StoreResult<usize> {
        Ok(self
            .read_committed()?
            .get(namespace)
            .map(Vec::len)
            .unwrap_or(0))
    }

    async fn acquire_writer(&self) -> StoreResult<OwnedMutexGuard<()>> {
        tokio::time::timeout(self.lock_timeout, self.writer.clone().lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout {
                waited_ms: self.lock_timeout.as_millis() as u64,
            })
    }

    fn read_committed(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Namespaces>> {
        self.committed
            .read()
            .map_err(|e| StoreError::Unavailable(format!("committed state poisoned: {}", e)))
    }

    fn write_committed(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Namespaces>> {
        self.committed
            .write()
            .map_err(|e| StoreError::Unavailable(format!("committed state poisoned: {}", e)))
    }

    fn snapshot(&self, namespace: &str) -> StoreResult<Vec<NodeRow>> {
        Ok(self
            .read_committed()?
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

fn attached(rows: &[NodeRow]) -> impl Iterator<Item = &NodeRow> {
    rows.iter().filter(|r| r.lft > 0)
}

fn to_nodes<'a>(rows: impl Iterator<Item = &'a NodeRow>) -> StoreResult<Vec<TreeNode>> {
    rows.cloned().map(NodeRow::into_node).collect()
}

fn lossy_by_left(rows: Vec<NodeRow>) -> Vec<TreeNode> {
    let mut nodes: Vec<TreeNode> = rows.into_iter().map(NodeRow::into_node_lossy).collect();
    nodes.sort_by(|a, b| a.left.cmp(&b.left).then_with(|| a.id.cmp(&b.id)));
    nodes
}

fn sort_by_left(nodes: &mut [TreeNode]) {
    nodes.sort_by_key(|n| n.left);
}

fn sort_by_ordering(nodes: &mut [TreeNode]) {
    nodes.sort_by_key(|n| (ordering_key(n.ordering), n.left));
}

#[async_trait]
impl TreeStore for MemoryTreeStore {
    async fn begin(&self, namespace: &str) -> StoreResult<Box<dyn TreeTransaction>> {
        let guard = self.acquire_writer().await?;
        let rows = self.snapshot(namespace)?;

        Ok(Box::new(MemoryTransaction {
            _guard: guard,
            committed: self.committed.clone(),
            namespace: namespace.to_string(),
            rows,
        }))
    }

    async fn get_node(&self, namespace: &str, id: &str) -> StoreResult<Option<TreeNode>> {
        let committed = self.read_committed()?;
        committed
            .get(namespace)
            .and_then(|rows| attached(rows).find(|r| r.id == id))
            .cloned()
            .map(NodeRow::into_node)
            .transpose()
    }

    async fn query(&self, namespace: &str, query: SpanQuery) -> StoreResult<Vec<TreeNode>> {
        let committed = self.read_committed()?;
        let Some(rows) = committed.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut nodes = match &query {
            SpanQuery::Children { left, right, depth } => to_nodes(
                attached(rows).filter(|r| r.depth == depth + 1 && r.lft > *left && r.lft < *right),
            )?,
            SpanQuery::Descendants { left, right } => {
                to_nodes(attached(rows).filter(|r| r.lft > *left && r.rgt < *right))?
            }
            SpanQuery::Ancestors { left, right } => {
                to_nodes(attached(rows).filter(|r| r.lft < *left && r.rgt > *right))?
            }
            SpanQuery::Siblings {
                parent_id,
                exclude_id,
            } => to_nodes(
                attached(rows).filter(|r| r.parent_id == *parent_id && r.id != *exclude_id),
            )?,
            SpanQuery::Roots => to_nodes(attached(rows).filter(|r| r.parent_id.is_none()))?,
            SpanQuery::All => to_nodes(attached(rows))?,
        };

        match query {
            SpanQuery::Siblings { .. } | SpanQuery::Roots => sort_by_ordering(&mut nodes),
            _ => sort_by_left(&mut nodes),
        }

        Ok(nodes)
    }

    async fn load_all(&self, namespace: &str) -> StoreResult<Vec<TreeNode>> {
        Ok(lossy_by_left(self.snapshot(namespace)?))
    }
}

#[async_trait]
impl PayloadStore for MemoryTreeStore {
    async fn get_payload(&self, namespace: &str, id: &str) -> StoreResult<Option<serde_json::Value>> {
        let committed = self.read_committed()?;
        Ok(committed
            .get(namespace)
            .and_then(|rows| attached(rows).find(|r| r.id == id))
            .map(|r| r.payload.clone()))
    }

    async fn put_payload(
        &self,
        namespace: &str,
        id: &str,
        payload: serde_json::Value,
    ) -> StoreResult<bool> {
        // Payload writes still serialize with structural writers
        let _guard = self.acquire_writer().await?;
        let mut committed = self.write_committed()?;

        let Some(row) = committed
            .get_mut(namespace)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id && r.lft > 0))
        else {
            return Ok(false);
        };

        row.payload = payload;
        row.modified_at = Utc::now();
        Ok(true)
    }
}

/// Snapshot transaction; holds the writer lock until committed or dropped
pub struct MemoryTransaction {
    _guard: OwnedMutexGuard<()>,
    committed: Arc<RwLock<Namespaces>>,
    namespace: String,
    rows: Vec<NodeRow>,
}

impl MemoryTransaction {
    fn find_mut(&mut self, id: &str) -> Option<&mut NodeRow> {
        self.rows.iter_mut().find(|r| r.id == id)
    }
}

#[async_trait]
impl TreeTransaction for MemoryTransaction {
    async fn get_node(&mut self, id: &str) -> StoreResult<Option<TreeNode>> {
        attached(&self.rows)
            .find(|r| r.id == id)
            .cloned()
            .map(NodeRow::into_node)
            .transpose()
    }

    async fn children(&mut self, parent_id: Option<&str>) -> StoreResult<Vec<TreeNode>> {
        let mut nodes =
            to_nodes(attached(&self.rows).filter(|r| r.parent_id.as_deref() == parent_id))?;
        sort_by_left(&mut nodes);
        Ok(nodes)
    }

    async fn max_right(&mut self) -> StoreResult<Option<i64>> {
        Ok(attached(&self.rows).map(|r| r.rgt).max())
    }

    async fn count_boundaries(&mut self, low: i64, high: i64) -> StoreResult<u64> {
        let in_range = |v: i64| v >= low && v <= high;
        Ok(attached(&self.rows)
            .filter(|r| in_range(r.lft) || in_range(r.rgt))
            .count() as u64)
    }

    async fn bulk_update_range(&mut self, update: RangeUpdate) -> StoreResult<u64> {
        let mut affected = 0;

        for row in self.rows.iter_mut() {
            if !update.predicate.matches(row.lft, row.rgt) {
                continue;
            }

            if update.columns.includes(SpanColumn::Left) {
                row.lft = update.delta.apply(row.lft);
            }
            if update.columns.includes(SpanColumn::Right) {
                row.rgt = update.delta.apply(row.rgt);
            }
            row.depth += update.delta.depth_offset;
            affected += 1;
        }

        Ok(affected)
    }

    async fn insert(&mut self, node: &TreeNode) -> StoreResult<()> {
        if self.rows.iter().any(|r| r.id == node.id) {
            return Err(StoreError::DuplicateId {
                namespace: self.namespace.clone(),
                id: node.id.clone(),
            });
        }

        self.rows.push(NodeRow::from(node));
        Ok(())
    }

    async fn delete_range(&mut self, predicate: RangePredicate) -> StoreResult<u64> {
        let before = self.rows.len();
        self.rows.retain(|r| !predicate.matches(r.lft, r.rgt));
        Ok((before - self.rows.len()) as u64)
    }

    async fn set_parent(&mut self, id: &str, parent_id: Option<&str>) -> StoreResult<()> {
        if let Some(row) = self.find_mut(id) {
            row.parent_id = parent_id.map(str::to_string);
            row.modified_at = Utc::now();
        }
        Ok(())
    }

    async fn load_all(&mut self) -> StoreResult<Vec<TreeNode>> {
        Ok(lossy_by_left(self.rows.clone()))
    }

    async fn write_span(
        &mut self,
        id: &str,
        left: i64,
        right: i64,
        depth: i64,
    ) -> StoreResult<()> {
        if let Some(row) = self.find_mut(id) {
            row.lft = left;
            row.rgt = right;
            row.depth = depth;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            _guard,
            committed,
            namespace,
            rows,
        } = *self;

        let mut committed = committed
            .write()
            .map_err(|e| StoreError::Unavailable(format!("committed state poisoned: {}", e)))?;
        committed.insert(namespace, rows);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tree_store::SpanDelta;
    use serde_json::json;

    fn node(id: &str, parent: Option<&str>, left: u64, right: u64, depth: u32) -> TreeNode {
        let now = Utc::now();
        TreeNode {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            left,
            right,
            depth,
            ordering: None,
            payload: json!({}),
            created_at: now,
            modified_at: now,
        }
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_invisible() {
        let store = MemoryTreeStore::new();

        let mut tx = store.begin("menu").await.unwrap();
        tx.insert(&node("home", None, 1, 2, 0)).await.unwrap();
        assert!(tx.get_node("home").await.unwrap().is_some());
        assert!(store.get_node("menu", "home").await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert!(store.get_node("menu", "home").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drop_discards_snapshot() {
        let store = MemoryTreeStore::new();

        {
            let mut tx = store.begin("menu").await.unwrap();
            tx.insert(&node("home", None, 1, 2, 0)).await.unwrap();
        }

        assert_eq!(store.row_count("menu").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_writer_times_out() {
        let store = MemoryTreeStore::new().with_lock_timeout(Duration::from_millis(20));

        let holder = store.begin("taxonomy").await.unwrap();
        let err = match store.begin("taxonomy").await {
            Err(err) => err,
            Ok(_) => panic!("second writer should wait for the lock"),
        };
        assert!(matches!(err, StoreError::LockTimeout { waited_ms: 20 }));
        assert!(err.is_retryable());

        holder.rollback().await.unwrap();
        assert!(store.begin("taxonomy").await.is_ok());
    }

    #[tokio::test]
    async fn test_range_update_reads_original_values() {
        let store = MemoryTreeStore::new();

        let mut tx = store.begin("org").await.unwrap();
        tx.insert(&node("ceo", None, 1, 4, 0)).await.unwrap();
        tx.insert(&node("cto", Some("ceo"), 2, 3, 1)).await.unwrap();

        tx.bulk_update_range(RangeUpdate::block(
            RangePredicate::Within { left: 2, right: 3 },
            SpanDelta::detach(),
        ))
        .await
        .unwrap();
        assert_eq!(tx.count_boundaries(2, 3).await.unwrap(), 0);
        assert_eq!(tx.max_right().await.unwrap(), Some(4));

        let moved = tx
            .bulk_update_range(RangeUpdate::block(
                RangePredicate::Detached,
                SpanDelta::reattach(5, 0),
            ))
            .await
            .unwrap();
        assert_eq!(moved, 1);

        let cto = tx.get_node("cto").await.unwrap().unwrap();
        assert_eq!((cto.left, cto.right), (7, 8));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_query_orders_siblings_by_ordering_then_left() {
        let store = MemoryTreeStore::new();

        let mut tx = store.begin("menu").await.unwrap();
        let mut a = node("a", None, 1, 2, 0);
        a.ordering = None;
        let mut b = node("b", None, 3, 4, 0);
        b.ordering = Some(5);
        let mut c = node("c", None, 5, 6, 0);
        c.ordering = Some(1);
        for n in [&a, &b, &c] {
            tx.insert(n).await.unwrap();
        }
        tx.commit().await.unwrap();

        let roots = store.query("menu", SpanQuery::Roots).await.unwrap();
        let ids: Vec<_> = roots.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);

        let siblings = store
            .query(
                "menu",
                SpanQuery::Siblings {
                    parent_id: None,
                    exclude_id: "b".to_string(),
                },
            )
            .await
            .unwrap();
        let ids: Vec<_> = siblings.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_import_rows_rejects_duplicates() {
        let store = MemoryTreeStore::new();
        let row = NodeRow::from(&node("x", None, 1, 2, 0));

        assert_eq!(store.import_rows("menu", vec![row.clone()]).await.unwrap(), 1);
        let err = store.import_rows("menu", vec![row]).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
    }

    #[tokio::test]
    async fn test_put_payload() {
        let store = MemoryTreeStore::new();
        let mut tx = store.begin("taxonomy").await.unwrap();
        tx.insert(&node("mammals", None, 1, 2, 0)).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store
            .put_payload("taxonomy", "mammals", json!({ "name": "Mammalia" }))
            .await
            .unwrap());
        assert_eq!(
            store.get_payload("taxonomy", "mammals").await.unwrap(),
            Some(json!({ "name": "Mammalia" }))
        );
        assert!(!store
            .put_payload("taxonomy", "birds", json!({}))
            .await
            .unwrap());

        // Unnumbered rows are invisible until rebuilt
        store
            .import_rows("taxonomy", vec![NodeRow::unnumbered("fish", None, json!({}))])
            .await
            .unwrap();
        assert!(!store
            .put_payload("taxonomy", "fish", json!({ "name": "Pisces" }))
            .await
            .unwrap());
        assert!(store.get_payload("taxonomy", "fish").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_all_reads_past_an_open_writer() {
        let store = MemoryTreeStore::new().with_lock_timeout(Duration::from_millis(20));
        store
            .import_rows("menu", vec![NodeRow::unnumbered("home", None, json!({}))])
            .await
            .unwrap();

        let holder = store.begin("menu").await.unwrap();
        let all = store.load_all("menu").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!((all[0].left, all[0].right), (0, 0));
        holder.rollback().await.unwrap();
    }
}
