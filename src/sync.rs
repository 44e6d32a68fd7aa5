//! Fire-and-forget replication of local mutations to the remote store.
//!
//! The caller's completion contract is local durability: every shadow
//! push runs as a detached task that probes availability, pushes, and
//! logs failures without re-raising. There is no retry queue; the next
//! local mutation of the same record attempts again.

use std::sync::Arc;

use tracing::debug;

use crate::model::Entity;
use crate::remote::{DisabledRemote, RemoteStore};
use crate::task::spawn_detached;

pub struct SyncShadow {
  remote: Arc<dyn RemoteStore>,
}

impl SyncShadow {
  pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
    Self { remote }
  }

  /// Shadow for local-only mode: every push is a silent no-op.
  pub fn disabled() -> Self {
    Self::new(Arc::new(DisabledRemote))
  }

  /// Replicate a create/update (including tombstone write-backs) without
  /// blocking the caller.
  pub fn shadow_upsert<T: Entity>(&self, record: &T) {
    let payload = match serde_json::to_value(record) {
      Ok(value) => value,
      Err(err) => {
        // Serialization failing here is a programmer error; the local
        // write already succeeded, so just log.
        tracing::warn!(kind = T::kind(), error = %err, "could not serialize record for sync");
        return;
      }
    };

    let remote = Arc::clone(&self.remote);
    let kind = T::kind();
    let id = record.id().to_string();

    spawn_detached("sync-upsert", async move {
      if !remote.available().await {
        debug!(kind, id, "remote store unavailable; skipping push");
        return Ok(());
      }
      remote.push_upsert(kind, &id, payload).await
    });
  }

  /// Replicate a deletion marker without blocking the caller.
  pub fn shadow_delete(&self, kind: &'static str, id: &str) {
    let remote = Arc::clone(&self.remote);
    let id = id.to_string();

    spawn_detached("sync-delete", async move {
      if !remote.available().await {
        debug!(kind, id, "remote store unavailable; skipping delete push");
        return Ok(());
      }
      remote.push_delete(kind, &id).await
    });
  }
}
