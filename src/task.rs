//! Spawn-and-forget primitive for background work.

use std::future::Future;

use color_eyre::Result;
use tracing::warn;

/// Spawn a detached background task.
///
/// The task's failure is logged under `label` and goes nowhere else: a
/// detached task must never throw into an unrelated caller's context.
/// Used for cache revalidation and sync-shadow pushes, where the caller's
/// contract is local completion only.
pub fn spawn_detached<F>(label: &'static str, fut: F)
where
  F: Future<Output = Result<()>> + Send + 'static,
{
  tokio::spawn(async move {
    if let Err(err) = fut.await {
      warn!(label, error = %err, "detached task failed");
    }
  });
}
