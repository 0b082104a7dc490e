//! Database Layer
//!
//! This module handles all storage for nested-set hierarchies:
//!
//! - Database initialization and connection management (libsql)
//! - The `TreeStore` storage contract consumed by the engine
//! - Two backends: `LibsqlTreeStore` (persistent) and `MemoryTreeStore`
//! - Hierarchy events published after committed changes
//!
//! # Architecture
//!
//! The engine never issues SQL itself. It expresses every structural change
//! as bulk range updates (`RangeUpdate`) against a `TreeTransaction`, so a
//! backend only has to evaluate a handful of predicates.

mod database;
mod error;
pub mod events;
mod libsql_store;
mod memory_store;
mod tree_store;

pub use database::DatabaseService;
pub use error::{is_lock_contention, DatabaseError};
pub use events::HierarchyEvent;
pub use libsql_store::{LibsqlTransaction, LibsqlTreeStore};
pub use memory_store::{MemoryTransaction, MemoryTreeStore};
pub use tree_store::{
    NodeRow, PayloadStore, RangePredicate, RangeUpdate, SpanColumn, SpanColumns, SpanDelta,
    SpanQuery, StoreError, StoreResult, TreeStore, TreeTransaction,
};
