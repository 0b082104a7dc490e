//! Retry with exponential backoff for `Retryable` hierarchy errors.
//!
//! Structural operations never retry internally: a `Retryable` failure has
//! already rolled back, and the caller decides whether to re-run the whole
//! operation against fresh state. This helper is that caller-side loop.

use crate::config::RetryPolicy;
use crate::services::error::{HierarchyError, HierarchyResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Execute an async operation, retrying while it fails with a retryable error.
///
/// # Retry Strategy
///
/// - **Exponential backoff**: `initial_backoff * multiplier^(attempt-1)`, capped at `max_backoff`
/// - **Termination**: after `max_attempts` attempts, returning `RetryExhausted`
/// - **Cancellation**: checked before every attempt and during backoff sleeps
///
/// Non-retryable errors are returned immediately.
///
/// # Example
///
/// ```no_run
/// # use canopy_core::config::{EngineConfig, RetryPolicy};
/// # use canopy_core::db::MemoryTreeStore;
/// # use canopy_core::models::NewTreeNode;
/// # use canopy_core::services::{with_retry, NestedSetEngine};
/// # use std::sync::Arc;
/// # use tokio_util::sync::CancellationToken;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # let engine = NestedSetEngine::new(Arc::new(MemoryTreeStore::new()), EngineConfig::default())?;
/// let cancel = CancellationToken::new();
/// let node = with_retry(&RetryPolicy::default(), &cancel, "create_node", || {
///     engine.create_node(None, NewTreeNode::new(serde_json::json!({})), &cancel)
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation_name: &str,
    mut operation: F,
) -> HierarchyResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HierarchyResult<T>>,
{
    let mut attempt: u32 = 0;
    let mut backoff = policy.initial_backoff();

    loop {
        if cancel.is_cancelled() {
            return Err(HierarchyError::Cancelled);
        }

        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() {
            return Err(error);
        }

        if attempt >= policy.max_attempts {
            tracing::warn!(
                operation = operation_name,
                attempts = attempt,
                error = %error,
                "retries exhausted"
            );
            return Err(HierarchyError::RetryExhausted {
                attempts: attempt,
                last_error: error.to_string(),
            });
        }

        tracing::debug!(
            operation = operation_name,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "retrying after backoff"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HierarchyError::Cancelled),
            () = tokio::time::sleep(backoff) => {}
        }

        backoff = std::cmp::min(
            Duration::from_nanos((backoff.as_nanos() as f64 * policy.multiplier) as u64),
            policy.max_backoff(),
        );
    }
}
