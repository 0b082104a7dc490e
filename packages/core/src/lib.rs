//! Canopy Core Hierarchy Engine
//!
//! This crate stores tree-shaped entities (taxonomies, organizations,
//! navigation menus) as nested sets and keeps their numbering consistent
//! under concurrent structural edits.
//!
//! # Architecture
//!
//! - **Nested sets**: every node carries `(left, right, depth)`; subtree,
//!   ancestor and child queries are single range scans
//! - **One transaction per operation**: create/move/delete either fully
//!   apply or leave no trace
//! - **Namespaces**: each entity type owns an independent numbering
//! - **libsql**: embedded SQLite-compatible storage, plus an in-memory store
//!   for tests and tooling
//!
//! # Modules
//!
//! - [`config`] - Storage, engine and retry settings
//! - [`models`] - Data structures (TreeNode, HierarchyTree)
//! - [`db`] - Storage layer: `TreeStore` trait, libsql and memory backends, events
//! - [`services`] - Nested set engine, range queries, integrity, retry
//! - [`adapters`] - Entity-specific services over the generic engine

pub mod adapters;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use adapters::{EntityDraft, EntityService, EntityTree, HierarchyEntity};
pub use config::{DatabaseConfig, EngineConfig, HierarchyConfig, RetryPolicy};
pub use models::*;
pub use services::*;
