//! Data Models
//!
//! - `TreeNode` - A node of a nested-set hierarchy
//! - `NewTreeNode` - Creation request handed to the nested set engine
//! - `HierarchyTree` - Nested view assembled from a preorder scan

mod tree_node;

pub use tree_node::{ordering_key, HierarchyTree, NewTreeNode, NodeId, TreeNode};
