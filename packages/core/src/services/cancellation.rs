//! Cancellation and deadline handling shared by the hierarchy services
//!
//! Structural operations are guarded twice: the engine calls
//! `Checkpoint::check` between storage steps (rolling back on failure), and
//! the whole operation future is raced against the token and the deadline so
//! a blocked storage call cannot outlive either. Dropping an in-flight
//! transaction discards it.

use crate::services::error::{HierarchyError, HierarchyResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation state observed between storage steps
pub(crate) struct Checkpoint<'a> {
    cancel: &'a CancellationToken,
    deadline: Option<Instant>,
    operation: &'static str,
}

impl<'a> Checkpoint<'a> {
    pub(crate) fn new(
        operation: &'static str,
        cancel: &'a CancellationToken,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
            operation,
        }
    }

    pub(crate) fn check(&self) -> HierarchyResult<()> {
        if self.cancel.is_cancelled() {
            return Err(HierarchyError::Cancelled);
        }

        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(deadline_exceeded(self.operation));
        }

        Ok(())
    }
}

fn deadline_exceeded(operation: &str) -> HierarchyError {
    HierarchyError::retryable(format!("{} exceeded its operation deadline", operation))
}

/// Run `operation` until it completes, the token fires, or the deadline passes
pub(crate) async fn run_guarded<T, F>(
    operation: &'static str,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    future: F,
) -> HierarchyResult<T>
where
    F: Future<Output = HierarchyResult<T>>,
{
    if cancel.is_cancelled() {
        return Err(HierarchyError::Cancelled);
    }

    let bounded = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| deadline_exceeded(operation))?,
            None => future.await,
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            tracing::warn!(operation, "operation cancelled; in-flight work discarded");
            Err(HierarchyError::Cancelled)
        }
        result = bounded => result,
    }
}
