//! TreeStore Trait - Storage Contract for Nested-Set Hierarchies
//!
//! This module defines the storage transaction provider consumed by the
//! nested set engine, together with the range predicates and bulk deltas it
//! issues.
//!
//! # Architecture
//!
//! - **Abstraction Point**: Between the engine (renumbering logic) and the
//!   backend (`LibsqlTreeStore`, `MemoryTreeStore`)
//! - **Range Updates Only**: Structural mutations are expressed as a handful
//!   of `RangeUpdate`s, so their cost is proportional to the rows affected,
//!   never a per-row loop driven from Rust
//! - **Namespaced**: Every call names the numbering namespace it touches
//!
//! # Detached Rows
//!
//! While a subtree is being moved its rows are parked outside the numbering
//! by negating `left` and `right`. Committed state never contains a negative
//! boundary; `RangePredicate::Detached` selects the parked block again.
//!
//! # Examples
//!
//! ```rust
//! use canopy_core::db::{RangePredicate, RangeUpdate, SpanColumn, SpanDelta};
//!
//! // Make room for one node at position 4
//! let shift_lefts = RangeUpdate::shift(
//!     RangePredicate::AtOrAbove { column: SpanColumn::Left, bound: 4 },
//!     SpanColumn::Left,
//!     2,
//! );
//! assert_eq!(shift_lefts.delta, SpanDelta::offset(2));
//! ```

use crate::db::DatabaseError;
use crate::models::TreeNode;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// Storage-contract errors
///
/// `Busy` and `LockTimeout` are transient: the caller may retry the whole
/// operation. Everything else is permanent.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Another writer holds the store's write lock
    #[error("Storage busy: {context}")]
    Busy { context: String },

    /// Timed out waiting for the write lock
    #[error("Timed out after {waited_ms}ms waiting for the write lock")]
    LockTimeout { waited_ms: u64 },

    /// A node with the same id already exists in the namespace
    #[error("Duplicate node id '{id}' in namespace '{namespace}'")]
    DuplicateId { namespace: String, id: String },

    /// A stored row cannot be represented as a node
    #[error("Corrupt row for node '{id}': {reason}")]
    CorruptRow { id: String, reason: String },

    /// Payload could not be encoded or decoded
    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend state is unusable (e.g. a poisoned lock)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Database operation failed
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl StoreError {
    pub fn busy(context: impl Into<String>) -> Self {
        Self::Busy {
            context: context.into(),
        }
    }

    pub fn corrupt_row(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptRow {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::LockTimeout { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One of the two span boundary columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanColumn {
    Left,
    Right,
}

impl SpanColumn {
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Left => "lft",
            Self::Right => "rgt",
        }
    }

    fn read(self, left: i64, right: i64) -> i64 {
        match self {
            Self::Left => left,
            Self::Right => right,
        }
    }
}

/// Which boundary columns a `RangeUpdate` rewrites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanColumns {
    Only(SpanColumn),
    Both,
}

impl SpanColumns {
    pub fn includes(self, column: SpanColumn) -> bool {
        match self {
            Self::Only(c) => c == column,
            Self::Both => true,
        }
    }
}

/// Row selection for bulk updates and deletes
///
/// All predicates except `Detached` only match attached rows (positive
/// boundaries).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangePredicate {
    /// `column >= bound`
    AtOrAbove { column: SpanColumn, bound: i64 },

    /// `column > bound`
    Above { column: SpanColumn, bound: i64 },

    /// Rows whose whole span lies inside `[left, right]`
    Within { left: i64, right: i64 },

    /// Rows parked outside the numbering during a move
    Detached,
}

impl RangePredicate {
    /// Evaluate the predicate against a row's stored boundaries
    pub fn matches(&self, left: i64, right: i64) -> bool {
        match *self {
            Self::AtOrAbove { column, bound } => left > 0 && column.read(left, right) >= bound,
            Self::Above { column, bound } => left > 0 && column.read(left, right) > bound,
            Self::Within {
                left: lower,
                right: upper,
            } => left > 0 && left >= lower && right <= upper,
            Self::Detached => left < 0,
        }
    }

    /// SQL condition (without namespace) and its bound parameters
    pub fn to_sql(&self) -> (String, Vec<i64>) {
        match *self {
            Self::AtOrAbove { column, bound } => (
                format!("lft > 0 AND {} >= ?", column.sql_name()),
                vec![bound],
            ),
            Self::Above { column, bound } => (
                format!("lft > 0 AND {} > ?", column.sql_name()),
                vec![bound],
            ),
            Self::Within { left, right } => (
                "lft > 0 AND lft >= ? AND rgt <= ?".to_string(),
                vec![left, right],
            ),
            Self::Detached => ("lft < 0".to_string(), Vec::new()),
        }
    }
}

/// Linear transform applied to selected boundaries: `value' = ±value + offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpanDelta {
    /// Negate the stored value before adding `offset`
    pub negate: bool,

    pub offset: i64,

    /// Added to `depth` of every selected row
    pub depth_offset: i64,
}

impl SpanDelta {
    pub fn offset(offset: i64) -> Self {
        Self {
            negate: false,
            offset,
            depth_offset: 0,
        }
    }

    /// Park rows outside the numbering
    pub fn detach() -> Self {
        Self {
            negate: true,
            offset: 0,
            depth_offset: 0,
        }
    }

    /// Bring parked rows back, shifted by `offset` and `depth_offset`
    pub fn reattach(offset: i64, depth_offset: i64) -> Self {
        Self {
            negate: true,
            offset,
            depth_offset,
        }
    }

    pub fn apply(&self, value: i64) -> i64 {
        let base = if self.negate { -value } else { value };
        base + self.offset
    }
}

/// A bulk update over a contiguous range of rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeUpdate {
    pub predicate: RangePredicate,
    pub columns: SpanColumns,
    pub delta: SpanDelta,
}

impl RangeUpdate {
    /// Shift one boundary column of the selected rows by `offset`
    pub fn shift(predicate: RangePredicate, column: SpanColumn, offset: i64) -> Self {
        Self {
            predicate,
            columns: SpanColumns::Only(column),
            delta: SpanDelta::offset(offset),
        }
    }

    /// Transform both boundaries (and optionally depth) of the selected rows
    pub fn block(predicate: RangePredicate, delta: SpanDelta) -> Self {
        Self {
            predicate,
            columns: SpanColumns::Both,
            delta,
        }
    }
}

/// Read-side range queries used by the query service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanQuery {
    /// `depth = depth + 1` and `left` inside the span, ordered by left
    Children { left: i64, right: i64, depth: i64 },

    /// `left > node.left AND right < node.right`, ordered by left
    Descendants { left: i64, right: i64 },

    /// `left < node.left AND right > node.right`, ordered by left
    Ancestors { left: i64, right: i64 },

    /// Same `parent_id`, excluding `exclude_id`, ordered by ordering then left
    Siblings {
        parent_id: Option<String>,
        exclude_id: String,
    },

    /// `parent_id IS NULL`, ordered by ordering then left
    Roots,

    /// Every node of the namespace, ordered by left
    All,
}

/// Storage-level row, boundaries kept signed so detached rows are representable
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub lft: i64,
    pub rgt: i64,
    pub depth: i64,
    pub ordering: Option<i64>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl NodeRow {
    /// A row known only by its parent reference, as imported from adjacency-list
    /// data. Numbering is zeroed until a rebuild assigns it.
    pub fn unnumbered(id: impl Into<String>, parent_id: Option<&str>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            parent_id: parent_id.map(str::to_string),
            lft: 0,
            rgt: 0,
            depth: 0,
            ordering: None,
            payload,
            created_at: now,
            modified_at: now,
        }
    }

    /// Prepare a row for a verbatim import.
    ///
    /// Negative boundaries mark subtrees parked mid-move, so imported rows
    /// carrying them are stored unnumbered instead.
    pub fn into_import(mut self) -> Self {
        if self.lft < 0 || self.rgt < 0 {
            tracing::warn!(
                id = %self.id,
                lft = self.lft,
                rgt = self.rgt,
                "importing row with negative boundaries as unnumbered"
            );
            self.lft = 0;
            self.rgt = 0;
            self.depth = 0;
        }
        self
    }

    /// Convert to a node, rejecting rows that break the numeric domain
    pub fn into_node(self) -> StoreResult<TreeNode> {
        let left = u64::try_from(self.lft)
            .map_err(|_| StoreError::corrupt_row(&self.id, format!("negative left {}", self.lft)))?;
        let right = u64::try_from(self.rgt).map_err(|_| {
            StoreError::corrupt_row(&self.id, format!("negative right {}", self.rgt))
        })?;
        let depth = u32::try_from(self.depth)
            .map_err(|_| StoreError::corrupt_row(&self.id, format!("bad depth {}", self.depth)))?;
        if right <= left || (right - left) % 2 == 0 {
            return Err(StoreError::corrupt_row(
                &self.id,
                format!("malformed span [{}, {}]", left, right),
            ));
        }

        Ok(TreeNode {
            id: self.id,
            parent_id: self.parent_id,
            left,
            right,
            depth,
            ordering: self.ordering,
            payload: self.payload,
            created_at: self.created_at,
            modified_at: self.modified_at,
        })
    }

    /// Convert to a node, clamping out-of-domain numbers to zero.
    ///
    /// Used when loading rows for a rebuild, which recomputes them anyway.
    pub fn into_node_lossy(self) -> TreeNode {
        TreeNode {
            id: self.id,
            parent_id: self.parent_id,
            left: u64::try_from(self.lft).unwrap_or(0),
            right: u64::try_from(self.rgt).unwrap_or(0),
            depth: u32::try_from(self.depth).unwrap_or(0),
            ordering: self.ordering,
            payload: self.payload,
            created_at: self.created_at,
            modified_at: self.modified_at,
        }
    }
}

impl From<&TreeNode> for NodeRow {
    fn from(node: &TreeNode) -> Self {
        Self {
            id: node.id.clone(),
            parent_id: node.parent_id.clone(),
            lft: node.left as i64,
            rgt: node.right as i64,
            depth: i64::from(node.depth),
            ordering: node.ordering,
            payload: node.payload.clone(),
            created_at: node.created_at,
            modified_at: node.modified_at,
        }
    }
}

/// A write transaction scoped to one namespace.
///
/// Dropping a transaction without committing discards every change it made.
#[async_trait]
pub trait TreeTransaction: Send {
    /// Fetch an attached node by id
    async fn get_node(&mut self, id: &str) -> StoreResult<Option<TreeNode>>;

    /// Attached direct children of `parent_id` (roots when None), ordered by left
    async fn children(&mut self, parent_id: Option<&str>) -> StoreResult<Vec<TreeNode>>;

    /// Largest attached right boundary, None for an empty namespace
    async fn max_right(&mut self) -> StoreResult<Option<i64>>;

    /// Number of attached rows with a boundary in `[low, high]`
    async fn count_boundaries(&mut self, low: i64, high: i64) -> StoreResult<u64>;

    /// Apply a bulk delta to every row matching the predicate
    async fn bulk_update_range(&mut self, update: RangeUpdate) -> StoreResult<u64>;

    /// Insert a new row
    async fn insert(&mut self, node: &TreeNode) -> StoreResult<()>;

    /// Delete every row matching the predicate
    async fn delete_range(&mut self, predicate: RangePredicate) -> StoreResult<u64>;

    /// Re-point a node's parent reference
    async fn set_parent(&mut self, id: &str, parent_id: Option<&str>) -> StoreResult<()>;

    /// Every row of the namespace, boundaries clamped (see `NodeRow::into_node_lossy`)
    async fn load_all(&mut self) -> StoreResult<Vec<TreeNode>>;

    /// Overwrite one row's numbers. Only integrity rebuilds write per row.
    async fn write_span(&mut self, id: &str, left: i64, right: i64, depth: i64)
        -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

/// Storage transaction provider and read-side access for hierarchies
///
/// Implementations must be `Send + Sync`; writers of the same store
/// serialize in `begin`, readers only ever observe committed state.
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Open a write transaction on `namespace`
    async fn begin(&self, namespace: &str) -> StoreResult<Box<dyn TreeTransaction>>;

    /// Fetch a committed node by id
    async fn get_node(&self, namespace: &str, id: &str) -> StoreResult<Option<TreeNode>>;

    /// Run a single read query
    async fn query(&self, namespace: &str, query: SpanQuery) -> StoreResult<Vec<TreeNode>>;

    /// Every committed row of the namespace, attached or not, without taking
    /// the write lock. Boundaries are clamped as in `TreeTransaction::load_all`.
    async fn load_all(&self, namespace: &str) -> StoreResult<Vec<TreeNode>>;
}

/// Entity payload store: opaque association between a node id and its
/// entity-specific fields. The engine never writes through this trait.
///
/// Only attached nodes are visible; rows still waiting for a rebuild are
/// treated as missing.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    async fn get_payload(&self, namespace: &str, id: &str) -> StoreResult<Option<Value>>;

    /// Replace a node's payload. Returns false if no attached node has this id.
    async fn put_payload(&self, namespace: &str, id: &str, payload: Value) -> StoreResult<bool>;
}
