//! Nested Set Engine
//!
//! The only component that writes `left`, `right` and `depth`. Every
//! structural mutation runs inside exactly one storage transaction and is
//! expressed as a short batch of bulk range updates:
//!
//! - **create**: open a 2-wide gap at the insertion point, insert
//! - **move**: detach the subtree (negated numbers), close its old gap,
//!   open a gap at the new insertion point, re-attach with the net
//!   position and depth delta
//! - **delete**: remove the span, close the gap
//!
//! Serialization between writers comes from the store's transactions, not
//! from an in-process lock, so several engines (or processes) may share one
//! database. Any failure before commit rolls the transaction back.

use crate::config::EngineConfig;
use crate::db::{
    HierarchyEvent, RangePredicate, RangeUpdate, SpanColumn, SpanDelta, TreeStore,
    TreeTransaction,
};
use crate::models::{ordering_key, NewTreeNode, TreeNode};
use crate::services::cancellation::{run_guarded, Checkpoint};
use crate::services::error::{HierarchyError, HierarchyResult};
use crate::services::integrity::{
    check_invariants, plan_rebuild, IntegrityReport, RepairReport,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Result of `delete_subtree`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub id: String,

    /// Rows removed, the node itself included
    pub deleted: u64,
}

/// Generic nested-set engine for one namespace
#[derive(Clone)]
pub struct NestedSetEngine {
    store: Arc<dyn TreeStore>,
    config: EngineConfig,
    event_tx: broadcast::Sender<HierarchyEvent>,
}

impl NestedSetEngine {
    /// Create an engine over `store` for the namespace in `config`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use canopy_core::config::EngineConfig;
    /// # use canopy_core::db::MemoryTreeStore;
    /// # use canopy_core::models::NewTreeNode;
    /// # use canopy_core::services::NestedSetEngine;
    /// # use std::sync::Arc;
    /// # use tokio_util::sync::CancellationToken;
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let engine = NestedSetEngine::new(
    ///     Arc::new(MemoryTreeStore::new()),
    ///     EngineConfig::for_namespace("taxonomy"),
    /// )?;
    /// let cancel = CancellationToken::new();
    /// let root = engine
    ///     .create_node(None, NewTreeNode::new(serde_json::json!({"name": "Root"})), &cancel)
    ///     .await?;
    /// assert_eq!((root.left, root.right), (1, 2));
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(store: Arc<dyn TreeStore>, config: EngineConfig) -> HierarchyResult<Self> {
        config.validate().map_err(HierarchyError::InvalidConfig)?;
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);

        Ok(Self {
            store,
            config,
            event_tx,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    /// Subscribe to events for committed structural changes
    pub fn subscribe(&self) -> broadcast::Receiver<HierarchyEvent> {
        self.event_tx.subscribe()
    }

    /// Ignores send errors when nobody is subscribed
    fn emit_event(&self, event: HierarchyEvent) {
        tracing::debug!(event = event.event_type(), namespace = %self.namespace(), "emitting hierarchy event");
        let _ = self.event_tx.send(event);
    }

    /// Insert a node under `parent_id`, or as a new root when None.
    ///
    /// The node is placed before the first sibling whose ordering key is
    /// strictly greater than its own, otherwise as the right-most child.
    pub async fn create_node(
        &self,
        parent_id: Option<&str>,
        new_node: NewTreeNode,
        cancel: &CancellationToken,
    ) -> HierarchyResult<TreeNode> {
        let timeout = self.config.operation_timeout();

        let node = run_guarded("create_node", cancel, timeout, async {
            let checkpoint = Checkpoint::new("create_node", cancel, timeout);
            let mut tx = self.store.begin(self.namespace()).await?;
            let result = self
                .create_in_tx(tx.as_mut(), parent_id, new_node, &checkpoint)
                .await;
            self.finish("create_node", tx, result, &checkpoint).await
        })
        .await?;

        tracing::info!(
            namespace = %self.namespace(),
            id = %node.id,
            left = node.left,
            right = node.right,
            depth = node.depth,
            "created node"
        );
        self.emit_event(HierarchyEvent::NodeCreated {
            namespace: self.namespace().to_string(),
            node: node.clone(),
        });

        Ok(node)
    }

    /// Re-parent a whole subtree, renumbering everything in one transaction.
    ///
    /// Fails with `Cyclic` when `new_parent_id` is the node itself or one of
    /// its descendants.
    pub async fn move_subtree(
        &self,
        node_id: &str,
        new_parent_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> HierarchyResult<TreeNode> {
        let timeout = self.config.operation_timeout();

        let (node, previous_parent_id) = run_guarded("move_subtree", cancel, timeout, async {
            let checkpoint = Checkpoint::new("move_subtree", cancel, timeout);
            let mut tx = self.store.begin(self.namespace()).await?;
            let result = self
                .move_in_tx(tx.as_mut(), node_id, new_parent_id, &checkpoint)
                .await;
            self.finish("move_subtree", tx, result, &checkpoint).await
        })
        .await?;

        tracing::info!(
            namespace = %self.namespace(),
            id = %node.id,
            new_parent = ?new_parent_id,
            left = node.left,
            right = node.right,
            "moved subtree"
        );
        self.emit_event(HierarchyEvent::SubtreeMoved {
            namespace: self.namespace().to_string(),
            node: node.clone(),
            previous_parent_id,
        });

        Ok(node)
    }

    /// Remove a node and, when `cascade` is set, its whole subtree
    pub async fn delete_subtree(
        &self,
        node_id: &str,
        cascade: bool,
        cancel: &CancellationToken,
    ) -> HierarchyResult<DeleteReport> {
        let timeout = self.config.operation_timeout();

        let report = run_guarded("delete_subtree", cancel, timeout, async {
            let checkpoint = Checkpoint::new("delete_subtree", cancel, timeout);
            let mut tx = self.store.begin(self.namespace()).await?;
            let result = self
                .delete_in_tx(tx.as_mut(), node_id, cascade, &checkpoint)
                .await;
            self.finish("delete_subtree", tx, result, &checkpoint).await
        })
        .await?;

        tracing::info!(
            namespace = %self.namespace(),
            id = %report.id,
            deleted = report.deleted,
            "deleted subtree"
        );
        self.emit_event(HierarchyEvent::SubtreeDeleted {
            namespace: self.namespace().to_string(),
            root_id: report.id.clone(),
            deleted: report.deleted,
        });

        Ok(report)
    }

    /// Recompute every node's numbers from `parent_id` references
    pub async fn rebuild_integrity(&self, cancel: &CancellationToken) -> HierarchyResult<RepairReport> {
        let timeout = self.config.operation_timeout();

        let report = run_guarded("rebuild_integrity", cancel, timeout, async {
            let checkpoint = Checkpoint::new("rebuild_integrity", cancel, timeout);
            let mut tx = self.store.begin(self.namespace()).await?;
            let result = self.rebuild_in_tx(tx.as_mut(), &checkpoint).await;
            self.finish("rebuild_integrity", tx, result, &checkpoint).await
        })
        .await?;

        tracing::info!(
            namespace = %report.namespace,
            total = report.total_nodes,
            corrected = report.corrected,
            orphans_promoted = report.orphans_promoted,
            cycles_broken = report.cycles_broken,
            "rebuilt nested set numbering"
        );
        self.emit_event(HierarchyEvent::IntegrityRebuilt {
            namespace: self.namespace().to_string(),
            corrected: report.corrected,
        });

        Ok(report)
    }

    /// Check every invariant against committed state.
    ///
    /// Reads a snapshot without taking the write lock, so it neither waits
    /// for nor blocks writers.
    pub async fn verify_integrity(
        &self,
        cancel: &CancellationToken,
    ) -> HierarchyResult<IntegrityReport> {
        let timeout = self.config.operation_timeout();

        let report = run_guarded("verify_integrity", cancel, timeout, async {
            let nodes = self.store.load_all(self.namespace()).await?;
            Ok(check_invariants(self.namespace(), &nodes))
        })
        .await?;

        if !report.is_valid() {
            tracing::warn!(
                namespace = %report.namespace,
                violations = report.violations.len(),
                "integrity check found violations"
            );
        }

        Ok(report)
    }

    /// Commit on success; roll back on failure or if cancelled before commit
    async fn finish<T>(
        &self,
        operation: &'static str,
        tx: Box<dyn TreeTransaction>,
        result: HierarchyResult<T>,
        checkpoint: &Checkpoint<'_>,
    ) -> HierarchyResult<T> {
        match result.and_then(|value| checkpoint.check().map(|()| value)) {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(error) => {
                tracing::warn!(
                    operation,
                    namespace = %self.namespace(),
                    error = %error,
                    "rolling back"
                );
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::warn!(operation, error = %rollback_error, "rollback failed");
                }
                Err(error)
            }
        }
    }

    /// Position where a node with `key` goes among the children of `parent`
    async fn insertion_point(
        &self,
        tx: &mut dyn TreeTransaction,
        parent: Option<&TreeNode>,
        key: (bool, i64),
    ) -> HierarchyResult<i64> {
        let siblings = tx.children(parent.map(|p| p.id.as_str())).await?;

        if let Some(next) = siblings.iter().find(|s| ordering_key(s.ordering) > key) {
            return Ok(next.left as i64);
        }

        Ok(match parent {
            Some(parent) => parent.right as i64,
            None => tx.max_right().await?.map_or(1, |max| max + 1),
        })
    }

    /// Shift every boundary at or after `point` by `width`
    async fn open_gap(
        &self,
        tx: &mut dyn TreeTransaction,
        point: i64,
        width: i64,
    ) -> HierarchyResult<()> {
        for column in [SpanColumn::Left, SpanColumn::Right] {
            let shifted = tx
                .bulk_update_range(RangeUpdate::shift(
                    RangePredicate::AtOrAbove {
                        column,
                        bound: point,
                    },
                    column,
                    width,
                ))
                .await?;
            tracing::debug!(?column, point, width, shifted, "opened gap");
        }
        Ok(())
    }

    /// Shift every boundary after `right` back by `width`
    async fn close_gap(
        &self,
        tx: &mut dyn TreeTransaction,
        right: i64,
        width: i64,
    ) -> HierarchyResult<()> {
        for column in [SpanColumn::Left, SpanColumn::Right] {
            let shifted = tx
                .bulk_update_range(RangeUpdate::shift(
                    RangePredicate::Above {
                        column,
                        bound: right,
                    },
                    column,
                    -width,
                ))
                .await?;
            tracing::debug!(?column, right, width, shifted, "closed gap");
        }
        Ok(())
    }

    /// Defensive probe: the freshly opened gap must be empty
    async fn ensure_gap_free(
        &self,
        tx: &mut dyn TreeTransaction,
        low: i64,
        high: i64,
    ) -> HierarchyResult<()> {
        let occupied = tx.count_boundaries(low, high).await?;
        if occupied > 0 {
            return Err(HierarchyError::conflict(format!(
                "span [{}, {}] already holds {} boundaries",
                low, high, occupied
            )));
        }
        Ok(())
    }

    async fn create_in_tx(
        &self,
        tx: &mut dyn TreeTransaction,
        parent_id: Option<&str>,
        new_node: NewTreeNode,
        checkpoint: &Checkpoint<'_>,
    ) -> HierarchyResult<TreeNode> {
        checkpoint.check()?;

        let id = new_node.resolve_id();
        if tx.get_node(&id).await?.is_some() {
            return Err(HierarchyError::conflict(format!(
                "node id '{}' already exists in '{}'",
                id,
                self.namespace()
            )));
        }

        let parent = match parent_id {
            Some(parent_id) => Some(
                tx.get_node(parent_id)
                    .await?
                    .ok_or_else(|| HierarchyError::not_found(parent_id))?,
            ),
            None => None,
        };
        let depth = parent.as_ref().map_or(0, |p| p.depth + 1);

        let point = self
            .insertion_point(tx, parent.as_ref(), ordering_key(new_node.ordering))
            .await?;
        checkpoint.check()?;

        self.open_gap(tx, point, 2).await?;
        self.ensure_gap_free(tx, point, point + 1).await?;

        let now = Utc::now();
        let node = TreeNode {
            id,
            parent_id: parent.map(|p| p.id),
            left: point as u64,
            right: (point + 1) as u64,
            depth,
            ordering: new_node.ordering,
            payload: new_node.payload,
            created_at: now,
            modified_at: now,
        };
        tx.insert(&node).await?;

        Ok(node)
    }

    async fn move_in_tx(
        &self,
        tx: &mut dyn TreeTransaction,
        node_id: &str,
        new_parent_id: Option<&str>,
        checkpoint: &Checkpoint<'_>,
    ) -> HierarchyResult<(TreeNode, Option<String>)> {
        checkpoint.check()?;

        let node = tx
            .get_node(node_id)
            .await?
            .ok_or_else(|| HierarchyError::not_found(node_id))?;

        let target_depth = match new_parent_id {
            Some(parent_id) => {
                let parent = tx
                    .get_node(parent_id)
                    .await?
                    .ok_or_else(|| HierarchyError::not_found(parent_id))?;
                if node.span_contains(parent.left) {
                    return Err(HierarchyError::cyclic(node_id, parent_id));
                }
                i64::from(parent.depth) + 1
            }
            None => 0,
        };

        let left = node.left as i64;
        let right = node.right as i64;
        let width = right - left + 1;

        // Park the subtree outside the numbering, then close its gap
        let detached = tx
            .bulk_update_range(RangeUpdate::block(
                RangePredicate::Within { left, right },
                SpanDelta::detach(),
            ))
            .await?;
        tracing::debug!(node_id, detached, "detached subtree");
        self.close_gap(tx, right, width).await?;
        checkpoint.check()?;

        // The parent may have shifted while the gap closed
        let parent = match new_parent_id {
            Some(parent_id) => Some(
                tx.get_node(parent_id)
                    .await?
                    .ok_or_else(|| HierarchyError::not_found(parent_id))?,
            ),
            None => None,
        };
        let point = self
            .insertion_point(tx, parent.as_ref(), ordering_key(node.ordering))
            .await?;

        self.open_gap(tx, point, width).await?;
        self.ensure_gap_free(tx, point, point + width - 1).await?;
        checkpoint.check()?;

        let reattached = tx
            .bulk_update_range(RangeUpdate::block(
                RangePredicate::Detached,
                SpanDelta::reattach(point - left, target_depth - i64::from(node.depth)),
            ))
            .await?;
        tracing::debug!(node_id, reattached, point, "re-attached subtree");

        tx.set_parent(node_id, new_parent_id).await?;

        let moved = tx
            .get_node(node_id)
            .await?
            .ok_or_else(|| HierarchyError::not_found(node_id))?;

        Ok((moved, node.parent_id))
    }

    async fn delete_in_tx(
        &self,
        tx: &mut dyn TreeTransaction,
        node_id: &str,
        cascade: bool,
        checkpoint: &Checkpoint<'_>,
    ) -> HierarchyResult<DeleteReport> {
        checkpoint.check()?;

        let node = tx
            .get_node(node_id)
            .await?
            .ok_or_else(|| HierarchyError::not_found(node_id))?;

        if !cascade && !node.is_leaf() {
            let descendants = node.descendant_count();
            return Err(HierarchyError::NotEmpty {
                id: node.id,
                descendants,
            });
        }

        let left = node.left as i64;
        let right = node.right as i64;

        let deleted = tx
            .delete_range(RangePredicate::Within { left, right })
            .await?;
        self.close_gap(tx, right, right - left + 1).await?;

        Ok(DeleteReport {
            id: node.id,
            deleted,
        })
    }

    async fn rebuild_in_tx(
        &self,
        tx: &mut dyn TreeTransaction,
        checkpoint: &Checkpoint<'_>,
    ) -> HierarchyResult<RepairReport> {
        checkpoint.check()?;

        let nodes = tx.load_all().await?;
        let plan = plan_rebuild(&nodes);
        checkpoint.check()?;

        for assignment in &plan.assignments {
            tracing::debug!(
                id = %assignment.id,
                left = assignment.left,
                right = assignment.right,
                depth = assignment.depth,
                "correcting span"
            );
            tx.write_span(
                &assignment.id,
                assignment.left as i64,
                assignment.right as i64,
                i64::from(assignment.depth),
            )
            .await?;

            if assignment.parent_changed {
                tx.set_parent(&assignment.id, assignment.parent_id.as_deref())
                    .await?;
            }
        }

        Ok(RepairReport {
            namespace: self.namespace().to_string(),
            total_nodes: plan.total_nodes,
            corrected: plan.assignments.len() as u64,
            orphans_promoted: plan.orphans_promoted,
            cycles_broken: plan.cycles_broken,
        })
    }
}
