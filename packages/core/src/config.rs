//! Configuration for the hierarchy engine and its storage
//!
//! All settings are plain serde structs with defaults, so they can be
//! embedded in a host application's configuration file. Structural
//! engines are configured per namespace: each entity type (taxonomy,
//! organization, menu) owns an independent numbering.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default time a writer waits for the store's write lock
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Broadcast channel capacity for hierarchy events.
///
/// 128 leaves headroom for bursts of structural edits; lagging
/// subscribers only lose notifications, never data.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Upper bound on lock waits; longer waits hide contention bugs
const MAX_BUSY_TIMEOUT_MS: u64 = 60_000;

/// Storage settings for the libsql backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path
    pub path: PathBuf,

    /// How long a connection waits for a competing writer before failing
    /// with a retryable lock error
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/canopy.db"),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl DatabaseConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("database path cannot be empty".to_string());
        }

        if self.busy_timeout_ms > MAX_BUSY_TIMEOUT_MS {
            return Err(format!(
                "busy_timeout_ms cannot exceed {}",
                MAX_BUSY_TIMEOUT_MS
            ));
        }

        Ok(())
    }
}

/// Settings for one nested set engine (one namespace)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Numbering namespace; every entity type gets its own forest
    pub namespace: String,

    /// Optional deadline for a whole structural operation. Expiry rolls the
    /// transaction back and reports a retryable error.
    pub operation_timeout_ms: Option<u64>,

    /// Capacity of the hierarchy event broadcast channel
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            operation_timeout_ms: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_operation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.operation_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.namespace.trim().is_empty() {
            return Err("namespace cannot be empty".to_string());
        }

        if self.operation_timeout_ms == Some(0) {
            return Err("operation_timeout_ms must be greater than 0".to_string());
        }

        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Backoff policy for retrying operations that failed with a retryable error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt)
    pub max_attempts: u32,

    /// Backoff before the first retry
    pub initial_backoff_ms: u64,

    /// Backoff cap
    pub max_backoff_ms: u64,

    /// Backoff multiplier for exponential increase
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 1000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }

        if self.multiplier < 1.0 {
            return Err("multiplier must be at least 1.0".to_string());
        }

        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("initial_backoff_ms cannot exceed max_backoff_ms".to_string());
        }

        Ok(())
    }
}

/// Top-level configuration gathering storage, engine and retry settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    pub database: DatabaseConfig,

    /// Operation deadline applied to every namespace's engine
    pub operation_timeout_ms: Option<u64>,

    pub event_channel_capacity: Option<usize>,

    pub retry: RetryPolicy,
}

impl HierarchyConfig {
    /// Build configuration from environment variables, falling back to defaults.
    ///
    /// - `CANOPY_DB_PATH`: database file path
    /// - `CANOPY_BUSY_TIMEOUT_MS`: lock wait in milliseconds
    /// - `CANOPY_OPERATION_TIMEOUT_MS`: structural operation deadline
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("CANOPY_DB_PATH") {
            config.database.path = PathBuf::from(path);
        }

        if let Some(timeout) = env_u64("CANOPY_BUSY_TIMEOUT_MS") {
            config.database.busy_timeout_ms = timeout;
        }

        config.operation_timeout_ms = env_u64("CANOPY_OPERATION_TIMEOUT_MS");

        config
    }

    /// Engine configuration for one namespace
    pub fn engine_config(&self, namespace: impl Into<String>) -> EngineConfig {
        let mut engine = EngineConfig::for_namespace(namespace);
        engine.operation_timeout_ms = self.operation_timeout_ms;
        if let Some(capacity) = self.event_channel_capacity {
            engine.event_channel_capacity = capacity;
        }
        engine
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.database.validate()?;
        self.retry.validate()?;
        self.engine_config("validation").validate()
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HierarchyConfig::default();
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.operation_timeout_ms, None);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_config_validation() {
        let mut config = EngineConfig::for_namespace("taxonomy");
        assert!(config.validate().is_ok());

        config.namespace = "  ".to_string();
        assert!(config.validate().is_err());

        let config = EngineConfig::for_namespace("menu").with_operation_timeout_ms(0);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::for_namespace("menu");
        config.event_channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert_eq!(RetryPolicy::no_retry().max_attempts, 1);

        let policy = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());

        let policy = RetryPolicy {
            initial_backoff_ms: 500,
            max_backoff_ms: 100,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_engine_config_inherits_hierarchy_settings() {
        let config = HierarchyConfig {
            operation_timeout_ms: Some(250),
            event_channel_capacity: Some(16),
            ..Default::default()
        };

        let engine = config.engine_config("organization");
        assert_eq!(engine.namespace, "organization");
        assert_eq!(engine.operation_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(engine.event_channel_capacity, 16);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: HierarchyConfig = serde_json::from_str(
            r#"{ "database": { "path": "/tmp/canopy.db" }, "retry": { "max_attempts": 2 } }"#,
        )
        .unwrap();

        assert_eq!(config.database.path, PathBuf::from("/tmp/canopy.db"));
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.multiplier, 2.0);
    }
}
