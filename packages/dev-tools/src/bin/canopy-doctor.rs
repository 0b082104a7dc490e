//! Canopy Doctor - Hierarchy Integrity Checker
//!
//! Opens the Canopy database, verifies the nested-set numbering of one
//! namespace and, on request, rebuilds it from `parent_id` references.
//!
//! # Usage
//!
//! ```bash
//! # Verify the taxonomy forest
//! CANOPY_DB_PATH=./data/canopy.db CANOPY_NAMESPACE=taxonomy cargo run --bin canopy-doctor
//!
//! # Verify and repair
//! CANOPY_NAMESPACE=menu CANOPY_REPAIR=1 cargo run --bin canopy-doctor
//! ```
//!
//! # Environment
//!
//! - `CANOPY_DB_PATH`, `CANOPY_BUSY_TIMEOUT_MS`, `CANOPY_OPERATION_TIMEOUT_MS`: see `HierarchyConfig::from_env`
//! - `CANOPY_NAMESPACE`: namespace to check, defaults to `taxonomy`
//! - `CANOPY_REPAIR=1`: run a rebuild when violations are found
//! - `RUST_LOG`: log filter, defaults to `canopy_doctor=info,canopy_core=info`
//!
//! Exits non-zero when violations remain.

use anyhow::Context;
use canopy_core::config::HierarchyConfig;
use canopy_core::db::LibsqlTreeStore;
use canopy_core::services::NestedSetEngine;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_NAMESPACE: &str = "taxonomy";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("canopy_doctor=info,canopy_core=info")),
        )
        .init();

    let config = HierarchyConfig::from_env();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    let namespace =
        std::env::var("CANOPY_NAMESPACE").unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
    let repair = std::env::var("CANOPY_REPAIR").is_ok_and(|v| v == "1");

    tracing::info!(
        path = %config.database.path.display(),
        namespace = %namespace,
        repair,
        "starting canopy-doctor"
    );

    let store = Arc::new(
        LibsqlTreeStore::open(&config.database)
            .await
            .with_context(|| format!("failed to open {}", config.database.path.display()))?,
    );
    let engine = NestedSetEngine::new(store.clone(), config.engine_config(namespace.as_str()))?;

    // Ctrl-C rolls back whatever is in flight
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    let report = engine.verify_integrity(&cancel).await?;
    if report.is_valid() {
        tracing::info!(total_nodes = report.total_nodes, "numbering is consistent");
        return Ok(());
    }

    for violation in &report.violations {
        tracing::warn!(?violation, "integrity violation");
    }
    tracing::warn!(
        total_nodes = report.total_nodes,
        violations = report.violations.len(),
        "integrity check failed"
    );

    if !repair {
        anyhow::bail!(
            "{} violation(s) in namespace '{}'; rerun with CANOPY_REPAIR=1 to rebuild",
            report.violations.len(),
            namespace
        );
    }

    let repaired = engine.rebuild_integrity(&cancel).await?;
    tracing::info!(
        total_nodes = repaired.total_nodes,
        corrected = repaired.corrected,
        orphans_promoted = repaired.orphans_promoted,
        cycles_broken = repaired.cycles_broken,
        "rebuild committed"
    );

    store.database().checkpoint().await?;

    let after = engine.verify_integrity(&cancel).await?;
    if !after.is_valid() {
        anyhow::bail!(
            "{} violation(s) remain after rebuild",
            after.violations.len()
        );
    }

    tracing::info!("numbering is consistent after rebuild");
    Ok(())
}
