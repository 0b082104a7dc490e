//! Tree Node Data Structures
//!
//! This module defines `TreeNode`, the unit of every hierarchy Canopy stores,
//! together with the request type used to create one and the nested view
//! returned by whole-tree reads.
//!
//! # Nested Set Encoding
//!
//! Every node carries a `(left, right, depth)` triple. A node's span
//! `[left, right]` encloses the spans of all of its descendants, so:
//!
//! - `a` is a descendant of `b` iff `b.left < a.left && a.right < b.right`
//! - a node's subtree is every row whose `left` lies inside its span
//! - a node with `right - left == 1` is a leaf
//!
//! Only the nested set engine writes `left`, `right` and `depth`.
//!
//! # Examples
//!
//! ```rust
//! use canopy_core::models::NewTreeNode;
//! use serde_json::json;
//!
//! let request = NewTreeNode::new(json!({ "name": "Electronics" })).with_ordering(10);
//! assert_eq!(request.ordering, Some(10));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque node identifier
pub type NodeId = String;

/// A node of a nested-set hierarchy.
///
/// # Fields
///
/// - `id`: Unique, immutable identifier (UUID unless supplied by the caller)
/// - `parent_id`: Parent node, `None` for roots
/// - `left` / `right`: Span boundaries, `left < right`, `right - left` odd
/// - `depth`: Number of ancestors (roots have depth 0)
/// - `ordering`: Optional tie-break key for left-to-right sibling order
/// - `payload`: Entity-specific fields, carried opaquely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: NodeId,

    pub parent_id: Option<NodeId>,

    pub left: u64,

    pub right: u64,

    pub depth: u32,

    #[serde(default)]
    pub ordering: Option<i64>,

    /// Entity-specific fields (name, slug, url, ...)
    #[serde(default)]
    pub payload: serde_json::Value,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,
}

impl TreeNode {
    /// Number of numbering units the subtree rooted here occupies
    pub fn width(&self) -> u64 {
        self.right.saturating_sub(self.left) + 1
    }

    /// Number of descendants, derived from the span alone
    pub fn descendant_count(&self) -> u64 {
        self.right.saturating_sub(self.left).saturating_sub(1) / 2
    }

    pub fn is_leaf(&self) -> bool {
        self.right.saturating_sub(self.left) <= 1
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether this node lies strictly inside `ancestor`'s span.
    ///
    /// O(1) once both spans are loaded; a node is never its own descendant.
    pub fn is_descendant_of(&self, ancestor: &TreeNode) -> bool {
        ancestor.left < self.left && self.right < ancestor.right
    }

    /// Whether `position` falls inside this node's span (inclusive)
    pub fn span_contains(&self, position: u64) -> bool {
        self.left <= position && position <= self.right
    }
}

/// Parameters for creating a node through the nested set engine.
///
/// The span and depth are never supplied by callers; the engine carves them
/// out of the parent's span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTreeNode {
    /// Optional caller-supplied id. If None, a UUID v4 is generated.
    #[serde(default)]
    pub id: Option<NodeId>,

    /// Optional sibling ordering key (None appends after all siblings)
    #[serde(default)]
    pub ordering: Option<i64>,

    #[serde(default)]
    pub payload: serde_json::Value,
}

impl NewTreeNode {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: None,
            ordering: None,
            payload,
        }
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_ordering(mut self, ordering: i64) -> Self {
        self.ordering = Some(ordering);
        self
    }

    /// Resolve the id the node will be stored under
    pub(crate) fn resolve_id(&self) -> NodeId {
        self.id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

/// Sort key that places siblings by `ordering`, unordered nodes last.
///
/// Two nodes with equal keys keep their relative (insertion) order.
pub fn ordering_key(ordering: Option<i64>) -> (bool, i64) {
    (ordering.is_none(), ordering.unwrap_or(0))
}

/// A node together with its nested children, in preorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyTree {
    pub node: TreeNode,
    pub children: Vec<HierarchyTree>,
}

impl HierarchyTree {
    pub fn leaf(node: TreeNode) -> Self {
        Self {
            node,
            children: Vec::new(),
        }
    }

    /// Total nodes in this tree, including the root
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(HierarchyTree::node_count).sum::<usize>()
    }

    /// Node ids in preorder (parent before children, siblings left to right)
    pub fn preorder_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(self.node_count());
        let mut stack = vec![self];
        while let Some(tree) = stack.pop() {
            ids.push(tree.node.id.clone());
            stack.extend(tree.children.iter().rev());
        }
        ids
    }

    /// Assemble nested trees from nodes sorted by `left`.
    ///
    /// Nodes whose span is not enclosed by any other node in the slice become
    /// top-level trees. Runs in a single pass with an explicit stack.
    pub fn from_preorder(nodes: Vec<TreeNode>) -> Vec<HierarchyTree> {
        let mut roots: Vec<HierarchyTree> = Vec::new();
        let mut open: Vec<HierarchyTree> = Vec::new();

        for node in nodes {
            while open.last().is_some_and(|top| top.node.right < node.left) {
                if let Some(finished) = open.pop() {
                    attach(&mut open, &mut roots, finished);
                }
            }
            open.push(HierarchyTree::leaf(node));
        }

        while let Some(finished) = open.pop() {
            attach(&mut open, &mut roots, finished);
        }

        roots
    }
}

fn attach(open: &mut [HierarchyTree], roots: &mut Vec<HierarchyTree>, finished: HierarchyTree) {
    match open.last_mut() {
        Some(parent) => parent.children.push(finished),
        None => roots.push(finished),
    }
}
