//! Database Connection Management
//!
//! This module provides the database connection and schema initialization
//! for the libsql backend.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **WAL mode**: Readers never block on the single writer
//! - **Busy timeout**: Competing writers wait up to the configured timeout,
//!   then fail with a retryable lock error
//! - **One table**: `tree_nodes` holds every namespace's forest, keyed by
//!   `(namespace, id)`
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions**. Every write
//! transaction needs its own connection so that dropping the connection
//! mid-transaction rolls the transaction back.
//!
//! ```no_run
//! # use canopy_core::db::DatabaseService;
//! # use canopy_core::config::DatabaseConfig;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(&DatabaseConfig::new("./data/canopy.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::DatabaseConfig;
use crate::db::error::DatabaseError;
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Database service for managing the libsql connection and schema
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    /// Busy timeout applied to every connection
    busy_timeout_ms: u64,
}

impl DatabaseService {
    /// Create a new DatabaseService for the configured database path
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Enable WAL mode and the busy timeout
    /// 4. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - The configuration is invalid
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        config
            .validate()
            .map_err(DatabaseError::initialization_failed)?;

        let db_path = config.path.clone();
        let is_new_database = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms: config.busy_timeout_ms,
        };

        service.initialize_schema(is_new_database).await?;

        tracing::debug!(
            path = %service.db_path.display(),
            busy_timeout_ms = service.busy_timeout_ms,
            "database initialized"
        );

        Ok(service)
    }

    pub fn busy_timeout_ms(&self) -> u64 {
        self.busy_timeout_ms
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Idempotent: safe to call against an existing database.
    ///
    /// # Schema
    ///
    /// - `tree_nodes`: one row per node, `(lft, rgt, depth)` nested-set
    ///   numbers, `parent_id`, `ordering` and a JSON `payload`
    /// - Indexes on `(namespace, lft)`, `(namespace, rgt)`, `(namespace, parent_id)`
    ///
    /// Boundaries are not UNIQUE-indexed: SQLite checks uniqueness row by row
    /// during a bulk UPDATE, which would reject legitimate shifts. The engine
    /// probes for collisions itself before writing a span.
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tree_nodes (
                namespace TEXT NOT NULL,
                id TEXT NOT NULL,
                parent_id TEXT,
                lft INTEGER NOT NULL DEFAULT 0,
                rgt INTEGER NOT NULL DEFAULT 0,
                depth INTEGER NOT NULL DEFAULT 0,
                ordering INTEGER,
                payload JSON NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                modified_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (namespace, id)
            )",
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to create tree_nodes table: {}", e))
        })?;

        self.create_core_indexes(&conn).await?;

        // Flush schema for new files so a second handle sees the table at once
        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        Ok(())
    }

    /// Create the range-scan indexes for `tree_nodes`
    async fn create_core_indexes(&self, conn: &libsql::Connection) -> Result<(), DatabaseError> {
        let indexes = [
            (
                "idx_tree_nodes_left",
                "CREATE INDEX IF NOT EXISTS idx_tree_nodes_left ON tree_nodes(namespace, lft)",
            ),
            (
                "idx_tree_nodes_right",
                "CREATE INDEX IF NOT EXISTS idx_tree_nodes_right ON tree_nodes(namespace, rgt)",
            ),
            (
                "idx_tree_nodes_parent",
                "CREATE INDEX IF NOT EXISTS idx_tree_nodes_parent ON tree_nodes(namespace, parent_id)",
            ),
        ];

        for (name, sql) in indexes {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to create index '{}': {}", name, e))
            })?;
        }

        Ok(())
    }

    /// Get a synchronous connection to the database
    ///
    /// **⚠️ WARNING**: Only use this in synchronous, single-threaded contexts.
    /// In async functions use `connect_with_timeout()` instead.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get an async connection with busy timeout configured
    ///
    /// **✅ RECOMMENDED**: Use this for all async functions.
    ///
    /// The busy timeout is the lock-acquisition timeout for write
    /// transactions: a writer waits that long for a competing writer and then
    /// fails with `SQLITE_BUSY`.
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(
            &conn,
            &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms),
        )
        .await?;

        Ok(conn)
    }

    /// Flush the WAL into the main database file
    pub async fn checkpoint(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
            .await
    }
}
