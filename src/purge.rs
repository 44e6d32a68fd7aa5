//! Retention purge for tombstoned records.
//!
//! Invoked on a fixed schedule by an external scheduler (see the `purge`
//! binary); parameterized only by the retention window and identical
//! across all entity kinds.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use tracing::info;

use crate::store::RecordStore;

/// How long tombstoned records survive before physical deletion.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Records tombstoned before this instant are eligible for purging.
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: i64) -> DateTime<Utc> {
  now - Duration::days(retention_days)
}

/// Permanently delete records soft-deleted more than `retention_days`
/// ago. Irreversible. Returns the number of rows removed.
pub fn run_purge(store: &RecordStore, now: DateTime<Utc>, retention_days: i64) -> Result<usize> {
  let cutoff = retention_cutoff(now, retention_days);
  let removed = store.purge_before(cutoff)?;
  info!(removed, cutoff = %cutoff, "retention purge complete");
  Ok(removed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{Entity, Invoice};

  #[test]
  fn cutoff_is_window_before_now() {
    let now = Utc::now();
    assert_eq!(retention_cutoff(now, 30), now - Duration::days(30));
  }

  #[test]
  fn purge_removes_records_past_the_window() {
    let store = RecordStore::open_in_memory().unwrap();
    let mut invoice = Invoice::new("Acme");
    let id = invoice.id().to_string();
    store.save(&mut invoice).unwrap();
    store.soft_delete::<Invoice>(&id).unwrap();

    // Still inside the window: nothing happens.
    let removed = run_purge(&store, Utc::now(), DEFAULT_RETENTION_DAYS).unwrap();
    assert_eq!(removed, 0);
    assert!(store.get_by_id::<Invoice>(&id).unwrap().is_some());

    // Evaluate the same purge as if 31 days had passed.
    let removed = run_purge(
      &store,
      Utc::now() + Duration::days(31),
      DEFAULT_RETENTION_DAYS,
    )
    .unwrap();
    assert_eq!(removed, 1);
    assert!(store.get_by_id::<Invoice>(&id).unwrap().is_none());
  }

  #[test]
  fn active_records_never_purged() {
    let store = RecordStore::open_in_memory().unwrap();
    let mut invoice = Invoice::new("Acme");
    let id = invoice.id().to_string();
    store.save(&mut invoice).unwrap();

    let removed = run_purge(&store, Utc::now() + Duration::days(365), 30).unwrap();
    assert_eq!(removed, 0);
    assert!(store.get_by_id::<Invoice>(&id).unwrap().is_some());
  }
}
