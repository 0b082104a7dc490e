//! Hierarchy Events
//!
//! Events emitted by the nested set engine after a structural change has
//! committed. They follow the observer pattern so that caches, search
//! indexes or UI layers can react to changes without coupling to the
//! engine.
//!
//! # Architecture
//!
//! Events are published on a tokio broadcast channel. Subscribers that fall
//! behind miss events (`RecvError::Lagged`) but never block a writer.
//!
//! # Event Flow
//!
//! 1. The engine commits a create, move, delete or rebuild
//! 2. The matching `HierarchyEvent` is sent on the channel
//! 3. Every subscriber receives it asynchronously

use crate::models::{NodeId, TreeNode};
use serde::{Deserialize, Serialize};

/// Structural change notifications, one per committed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HierarchyEvent {
    /// A node was inserted
    #[serde(rename = "nodeCreated")]
    NodeCreated { namespace: String, node: TreeNode },

    /// A subtree was relocated; `node` is the moved root after renumbering
    #[serde(rename = "subtreeMoved", rename_all = "camelCase")]
    SubtreeMoved {
        namespace: String,
        node: TreeNode,
        previous_parent_id: Option<NodeId>,
    },

    /// A subtree was removed
    #[serde(rename = "subtreeDeleted", rename_all = "camelCase")]
    SubtreeDeleted {
        namespace: String,
        root_id: NodeId,
        deleted: u64,
    },

    /// Numbering was recomputed from parent references
    #[serde(rename = "integrityRebuilt", rename_all = "camelCase")]
    IntegrityRebuilt { namespace: String, corrected: u64 },
}

impl HierarchyEvent {
    /// String representation of the event type, for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NodeCreated { .. } => "node:created",
            Self::SubtreeMoved { .. } => "subtree:moved",
            Self::SubtreeDeleted { .. } => "subtree:deleted",
            Self::IntegrityRebuilt { .. } => "integrity:rebuilt",
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::NodeCreated { namespace, .. }
            | Self::SubtreeMoved { namespace, .. }
            | Self::SubtreeDeleted { namespace, .. }
            | Self::IntegrityRebuilt { namespace, .. } => namespace,
        }
    }
}
