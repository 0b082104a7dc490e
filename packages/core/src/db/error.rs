//! Database Error Types
//!
//! This module defines error types for database operations, providing
//! clear error handling for connection, initialization, and query failures.

use std::path::PathBuf;
use thiserror::Error;

/// SQLite primary result code for a database file locked by another connection
const SQLITE_BUSY: i32 = 5;

/// SQLite primary result code for a table locked within a shared cache
const SQLITE_LOCKED: i32 = 6;

/// Database operation errors
///
/// Covers all error cases for database connection, initialization,
/// and basic operations. Storage-contract errors are handled by
/// [`StoreError`](crate::db::StoreError).
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }
}

/// Whether a libsql error means another writer holds the lock.
///
/// Extended result codes carry the primary code in the low byte. The message
/// check covers errors surfaced without a code.
pub fn is_lock_contention(error: &libsql::Error) -> bool {
    if let libsql::Error::SqliteFailure(code, _) = error {
        let primary = code & 0xff;
        if primary == SQLITE_BUSY || primary == SQLITE_LOCKED {
            return true;
        }
    }

    let message = error.to_string().to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
}
