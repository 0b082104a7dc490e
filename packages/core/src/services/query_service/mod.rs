//! Hierarchy Query Service - Read-Side Range Queries
//!
//! Every query resolves its anchor node, then issues a single range scan over
//! `(left, right, depth)`. No recursion reaches storage; nested trees are
//! assembled in memory from one left-ordered scan.
//!
//! # Query Pattern Examples
//!
//! - Children: `depth = node.depth + 1 AND lft > node.lft AND lft < node.rgt`
//! - Descendants: `lft > node.lft AND rgt < node.rgt ORDER BY lft` (a preorder walk)
//! - Ancestors: `lft < node.lft AND rgt > node.rgt ORDER BY lft` (root first)
//!
//! # Examples
//!
//! ```rust,no_run
//! use canopy_core::db::MemoryTreeStore;
//! use canopy_core::services::HierarchyQueryService;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let queries = HierarchyQueryService::new(Arc::new(MemoryTreeStore::new()), "menu");
//! let cancel = CancellationToken::new();
//!
//! let breadcrumbs = queries.ancestors("settings", &cancel).await?;
//! # Ok(())
//! # }
//! ```

use crate::db::{SpanQuery, TreeStore};
use crate::models::{HierarchyTree, TreeNode};
use crate::services::cancellation::run_guarded;
use crate::services::error::{HierarchyError, HierarchyResult};
use crate::services::nested_set::NestedSetEngine;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Read-only queries over one namespace
#[derive(Clone)]
pub struct HierarchyQueryService {
    store: Arc<dyn TreeStore>,
    namespace: String,
}

impl HierarchyQueryService {
    pub fn new(store: Arc<dyn TreeStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    /// Query service over the same store and namespace as `engine`
    pub fn for_engine(engine: &NestedSetEngine) -> Self {
        Self::new(engine.store().clone(), engine.namespace())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn guarded<T, F>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        future: F,
    ) -> HierarchyResult<T>
    where
        F: Future<Output = HierarchyResult<T>>,
    {
        run_guarded(operation, cancel, None, future).await
    }

    async fn anchor(&self, id: &str) -> HierarchyResult<TreeNode> {
        self.store
            .get_node(&self.namespace, id)
            .await?
            .ok_or_else(|| HierarchyError::not_found(id))
    }

    async fn scan(&self, query: SpanQuery) -> HierarchyResult<Vec<TreeNode>> {
        tracing::debug!(namespace = %self.namespace, ?query, "range scan");
        Ok(self.store.query(&self.namespace, query).await?)
    }

    pub async fn get_node(&self, id: &str, cancel: &CancellationToken) -> HierarchyResult<TreeNode> {
        self.guarded("get_node", cancel, self.anchor(id)).await
    }

    /// The node's parent, None for a root
    pub async fn parent(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> HierarchyResult<Option<TreeNode>> {
        self.guarded("parent", cancel, async {
            let node = self.anchor(id).await?;
            match node.parent_id {
                Some(parent_id) => Ok(self.store.get_node(&self.namespace, &parent_id).await?),
                None => Ok(None),
            }
        })
        .await
    }

    /// Direct children, ordered by left
    pub async fn children(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> HierarchyResult<Vec<TreeNode>> {
        self.guarded("children", cancel, async {
            let node = self.anchor(id).await?;
            self.scan(SpanQuery::Children {
                left: node.left as i64,
                right: node.right as i64,
                depth: i64::from(node.depth),
            })
            .await
        })
        .await
    }

    /// Whole subtree below the node in preorder
    pub async fn descendants(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> HierarchyResult<Vec<TreeNode>> {
        self.guarded("descendants", cancel, async {
            let node = self.anchor(id).await?;
            if node.is_leaf() {
                return Ok(Vec::new());
            }
            self.scan(SpanQuery::Descendants {
                left: node.left as i64,
                right: node.right as i64,
            })
            .await
        })
        .await
    }

    /// Path from the root down to the node's parent
    pub async fn ancestors(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> HierarchyResult<Vec<TreeNode>> {
        self.guarded("ancestors", cancel, async {
            let node = self.anchor(id).await?;
            if node.is_root() {
                return Ok(Vec::new());
            }
            self.scan(SpanQuery::Ancestors {
                left: node.left as i64,
                right: node.right as i64,
            })
            .await
        })
        .await
    }

    /// Nodes with the same parent, excluding the node, ordered by ordering then left
    pub async fn siblings(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> HierarchyResult<Vec<TreeNode>> {
        self.guarded("siblings", cancel, async {
            let node = self.anchor(id).await?;
            self.scan(SpanQuery::Siblings {
                parent_id: node.parent_id,
                exclude_id: node.id,
            })
            .await
        })
        .await
    }

    pub async fn roots(&self, cancel: &CancellationToken) -> HierarchyResult<Vec<TreeNode>> {
        self.guarded("roots", cancel, self.scan(SpanQuery::Roots))
            .await
    }

    /// Whether `node_id` lies strictly inside `ancestor_id`'s span
    pub async fn is_descendant_of(
        &self,
        node_id: &str,
        ancestor_id: &str,
        cancel: &CancellationToken,
    ) -> HierarchyResult<bool> {
        self.guarded("is_descendant_of", cancel, async {
            let node = self.anchor(node_id).await?;
            let ancestor = self.anchor(ancestor_id).await?;
            Ok(node.is_descendant_of(&ancestor))
        })
        .await
    }

    /// The node and everything below it as a nested tree
    pub async fn subtree(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> HierarchyResult<HierarchyTree> {
        self.guarded("subtree", cancel, async {
            let node = self.anchor(id).await?;
            let mut nodes = vec![node.clone()];
            if !node.is_leaf() {
                nodes.extend(
                    self.scan(SpanQuery::Descendants {
                        left: node.left as i64,
                        right: node.right as i64,
                    })
                    .await?,
                );
            }

            HierarchyTree::from_preorder(nodes)
                .into_iter()
                .next()
                .ok_or_else(|| HierarchyError::not_found(id))
        })
        .await
    }

    /// The whole forest as nested trees, roots in numbering order
    pub async fn hierarchy(&self, cancel: &CancellationToken) -> HierarchyResult<Vec<HierarchyTree>> {
        self.guarded("hierarchy", cancel, async {
            let nodes = self.scan(SpanQuery::All).await?;
            Ok(HierarchyTree::from_preorder(nodes))
        })
        .await
    }
}
