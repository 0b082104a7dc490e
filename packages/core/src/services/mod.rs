//! Hierarchy Services
//!
//! This module contains the core hierarchy logic:
//!
//! - `NestedSetEngine` - Structural mutations (create, move, delete, rebuild)
//! - `HierarchyQueryService` - Read-side range queries
//! - `integrity` - Invariant checks and rebuild planning
//! - `with_retry` - Caller-side retry for `Retryable` failures
//!
//! Services coordinate between the storage layer and the entity adapters,
//! owning transaction discipline and the error taxonomy.

mod cancellation;
pub mod error;
pub mod integrity;
pub mod nested_set;
pub mod query_service;
pub mod retry;

pub use error::{ErrorKind, HierarchyError, HierarchyResult};
pub use integrity::{IntegrityReport, IntegrityViolation, RepairReport};
pub use nested_set::{DeleteReport, NestedSetEngine};
pub use query_service::HierarchyQueryService;
pub use retry::with_retry;
