//! Service Layer Error Types
//!
//! This module defines the error taxonomy of the hierarchy services. Every
//! structural or query operation returns one of these kinds; callers are
//! expected to retry only `Retryable`, everything else is terminal.

use crate::db::{DatabaseError, StoreError};
use thiserror::Error;

/// Hierarchy operation errors
#[derive(Error, Debug)]
pub enum HierarchyError {
    /// Node id does not resolve in the namespace
    #[error("Node not found: {id}")]
    NotFound { id: String },

    /// Move would place a node under itself or one of its descendants
    #[error("Cannot move node {node_id} under {target_id}: target is inside the moved subtree")]
    Cyclic { node_id: String, target_id: String },

    /// Non-cascading delete of a node that still has descendants
    #[error("Node {id} has {descendants} descendants; use a cascading delete")]
    NotEmpty { id: String, descendants: u64 },

    /// Span or id uniqueness violation
    #[error("Conflict: {context}")]
    Conflict { context: String },

    /// Transient storage condition (lock contention, lock timeout, deadline);
    /// retrying the whole operation may succeed
    #[error("Retryable failure: {context}")]
    Retryable { context: String },

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// `with_retry` gave up
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// Entity payload could not be converted to or from JSON
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Permanent storage failure
    #[error("Storage failure: {0}")]
    Storage(#[source] StoreError),
}

/// User-visible classification of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Transient,
    Internal,
}

impl HierarchyError {
    /// Create a node not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a cyclic move error
    pub fn cyclic(node_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self::Cyclic {
            node_id: node_id.into(),
            target_id: target_id.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(context: impl Into<String>) -> Self {
        Self::Conflict {
            context: context.into(),
        }
    }

    /// Create a retryable error
    pub fn retryable(context: impl Into<String>) -> Self {
        Self::Retryable {
            context: context.into(),
        }
    }

    /// Create an invalid payload error
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }

    /// Whether the caller should retry the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Cyclic { .. }
            | Self::NotEmpty { .. }
            | Self::Conflict { .. }
            | Self::InvalidPayload(_)
            | Self::InvalidConfig(_) => ErrorKind::BadRequest,
            Self::Retryable { .. } | Self::Cancelled | Self::RetryExhausted { .. } => {
                ErrorKind::Transient
            }
            Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for HierarchyError {
    fn from(error: StoreError) -> Self {
        match error {
            e if e.is_retryable() => Self::Retryable {
                context: e.to_string(),
            },
            StoreError::DuplicateId { namespace, id } => Self::Conflict {
                context: format!("node id '{}' already exists in '{}'", id, namespace),
            },
            other => Self::Storage(other),
        }
    }
}

impl From<DatabaseError> for HierarchyError {
    fn from(error: DatabaseError) -> Self {
        Self::from(StoreError::Database(error))
    }
}

impl From<serde_json::Error> for HierarchyError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidPayload(error.to_string())
    }
}

pub type HierarchyResult<T> = Result<T, HierarchyError>;
