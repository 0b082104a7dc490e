//! Concurrency Tests
//!
//! Competing writers must serialize through the store and surface lock
//! contention as retryable errors; readers must only ever observe committed,
//! fully consistent numbering.

#[cfg(test)]
mod concurrency_tests {
    use anyhow::Result;
    use canopy_core::config::{DatabaseConfig, EngineConfig, RetryPolicy};
    use canopy_core::db::{LibsqlTreeStore, MemoryTreeStore, SpanQuery, TreeStore};
    use canopy_core::models::NewTreeNode;
    use canopy_core::services::integrity::check_invariants;
    use canopy_core::services::{
        with_retry, HierarchyError, HierarchyQueryService, NestedSetEngine,
    };
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::time::{sleep, Duration};
    use tokio_util::sync::CancellationToken;

    fn patient_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 30,
            initial_backoff_ms: 2,
            max_backoff_ms: 50,
            multiplier: 2.0,
        }
    }

    async fn open_engine(config: &DatabaseConfig, namespace: &str) -> Result<NestedSetEngine> {
        let store = Arc::new(LibsqlTreeStore::open(config).await?);
        Ok(NestedSetEngine::new(store, EngineConfig::for_namespace(namespace))?)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_from_two_instances() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = DatabaseConfig::new(temp_dir.path().join("test.db")).with_busy_timeout_ms(100);

        // Two engines over separate database handles stand in for two service instances
        let first = open_engine(&config, "taxonomy").await?;
        let second = open_engine(&config, "taxonomy").await?;
        let cancel = CancellationToken::new();
        first
            .create_node(None, NewTreeNode::new(json!({})).with_id("root"), &cancel)
            .await?;

        let mut handles = Vec::new();
        for i in 0..16 {
            let engine = if i % 2 == 0 { first.clone() } else { second.clone() };
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let id = format!("child-{i}");
                with_retry(&patient_policy(), &cancel, "create_node", || {
                    engine.create_node(
                        Some("root"),
                        NewTreeNode::new(json!({ "i": i })).with_id(id.as_str()),
                        &cancel,
                    )
                })
                .await
            }));
        }

        for handle in handles {
            handle.await??;
        }

        let report = first.verify_integrity(&cancel).await?;
        assert!(report.is_valid(), "{:?}", report.violations);
        assert_eq!(report.total_nodes, 17);

        let queries = HierarchyQueryService::for_engine(&second);
        let root = queries.get_node("root", &cancel).await?;
        assert_eq!((root.left, root.right), (1, 34));
        assert_eq!(queries.children("root", &cancel).await?.len(), 16);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_moves_keep_invariants() -> Result<()> {
        let engine = NestedSetEngine::new(
            Arc::new(MemoryTreeStore::new()),
            EngineConfig::for_namespace("organization"),
        )?;
        let cancel = CancellationToken::new();

        for i in 0..12 {
            let parent = (i > 0).then(|| format!("n{}", (i - 1) / 3));
            engine
                .create_node(
                    parent.as_deref(),
                    NewTreeNode::new(json!({})).with_id(format!("n{i}")),
                    &cancel,
                )
                .await?;
        }

        let mut handles = Vec::new();
        for i in 1..12usize {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let node = format!("n{i}");
                let target = format!("n{}", (i * 5) % 12);
                engine.move_subtree(&node, Some(target.as_str()), &cancel).await
            }));
        }

        for handle in handles {
            match handle.await? {
                Ok(_) | Err(HierarchyError::Cyclic { .. }) => {}
                Err(e) => panic!("unexpected move failure: {e}"),
            }
        }

        let report = engine.verify_integrity(&cancel).await?;
        assert!(report.is_valid(), "{:?}", report.violations);
        assert_eq!(report.total_nodes, 12);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_only_see_consistent_numbering() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = DatabaseConfig::new(temp_dir.path().join("test.db"));
        let store = Arc::new(LibsqlTreeStore::open(&config).await?);
        let engine = NestedSetEngine::new(store.clone(), EngineConfig::for_namespace("menu"))?;
        let cancel = CancellationToken::new();
        engine
            .create_node(None, NewTreeNode::new(json!({})).with_id("main"), &cancel)
            .await?;

        let done = CancellationToken::new();
        let reader = {
            let store = store.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut scans = 0u32;
                loop {
                    let nodes = store.query("menu", SpanQuery::All).await?;
                    let report = check_invariants("menu", &nodes);
                    assert!(report.is_valid(), "{:?}", report.violations);
                    scans += 1;
                    if done.is_cancelled() {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                anyhow::Ok(scans)
            })
        };

        for i in 0..20 {
            let parent = if i % 4 == 0 { "main".to_string() } else { format!("item-{}", i - 1) };
            engine
                .create_node(
                    Some(parent.as_str()),
                    NewTreeNode::new(json!({})).with_id(format!("item-{i}")),
                    &cancel,
                )
                .await?;
            if i % 5 == 4 {
                engine.move_subtree(&format!("item-{i}"), Some("main"), &cancel).await?;
            }
        }
        done.cancel();

        let scans = reader.await??;
        assert!(scans > 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancel_while_waiting_for_writer_lock() -> Result<()> {
        let store = Arc::new(MemoryTreeStore::new());
        let engine =
            NestedSetEngine::new(store.clone(), EngineConfig::for_namespace("taxonomy"))?;

        // Another writer holds the lock
        let blocker = store.begin("taxonomy").await?;

        let cancel = CancellationToken::new();
        let pending = {
            let engine = engine.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                engine
                    .create_node(None, NewTreeNode::new(json!({})).with_id("late"), &cancel)
                    .await
            })
        };

        sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = pending.await?;
        assert!(matches!(result, Err(HierarchyError::Cancelled)));

        drop(blocker);
        assert_eq!(store.row_count("taxonomy")?, 0);
        Ok(())
    }
}
