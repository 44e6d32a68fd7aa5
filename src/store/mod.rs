//! Durable record store backed by SQLite.
//!
//! Entities are stored as JSON blobs partitioned by kind, with lifecycle
//! and timestamp columns hoisted out for querying. Within a single flow a
//! `save` followed by `get_by_id` observes the written value; there is no
//! write-behind buffering.

mod schema;
pub mod search;

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::model::{Entity, Lifecycle, PriceSnapshot};

/// Which lifecycle states a listing query should see.
///
/// `Active` is the default everywhere user-facing; `All` exists for the
/// reconciler's write-back path and for sync bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
  Active,
  All,
}

/// SQLite-backed store for quotes, invoices and custom line items, plus
/// the single persisted price snapshot.
pub struct RecordStore {
  conn: Mutex<Connection>,
}

impl RecordStore {
  /// Open or create the store at the default location.
  pub fn open_default() -> Result<Self> {
    let path = Self::default_path()?;
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }
    Self::open(&path)
  }

  /// Open or create the store at an explicit path.
  pub fn open(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// In-memory store, used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;
    Ok(data_dir.join("bidbook").join("records.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// List records of one kind in insertion order.
  pub fn list<T: Entity>(&self, visibility: Visibility) -> Result<Vec<T>> {
    let conn = self.lock()?;
    let sql = match visibility {
      Visibility::Active => {
        "SELECT data FROM records WHERE kind = ? AND state = 'active' ORDER BY rowid"
      }
      Visibility::All => "SELECT data FROM records WHERE kind = ? ORDER BY rowid",
    };

    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare list query: {}", e))?;

    let records: Vec<T> = stmt
      .query_map(params![T::kind()], |row| {
        let data: Vec<u8> = row.get(0)?;
        Ok(data)
      })
      .map_err(|e| eyre!("Failed to list {} records: {}", T::kind(), e))?
      .filter_map(|r| r.ok())
      .filter_map(|data| serde_json::from_slice(&data).ok())
      .collect();

    Ok(records)
  }

  /// Fetch a record by id. Tombstoned records stay addressable by id
  /// until purged, so no lifecycle filter here.
  pub fn get_by_id<T: Entity>(&self, id: &str) -> Result<Option<T>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT data FROM records WHERE kind = ? AND id = ?")
      .map_err(|e| eyre!("Failed to prepare get query: {}", e))?;

    let data: Option<Vec<u8>> = stmt
      .query_row(params![T::kind(), id], |row| row.get(0))
      .ok();

    match data {
      Some(data) => {
        let record: T = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize {} {}: {}", T::kind(), id, e))?;
        Ok(Some(record))
      }
      None => Ok(None),
    }
  }

  /// Upsert by id, stamping a new update timestamp.
  pub fn save<T: Entity>(&self, record: &mut T) -> Result<()> {
    record.meta_mut().touch();
    let conn = self.lock()?;
    upsert(&conn, record)
  }

  /// Upsert a batch as a single durable operation. A partial failure rolls
  /// the whole batch back; an empty batch is a no-op.
  pub fn save_batch<T: Entity>(&self, records: &mut [T]) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }

    for record in records.iter_mut() {
      record.meta_mut().touch();
    }

    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    for record in records.iter() {
      upsert(&tx, record)?;
    }
    tx
      .commit()
      .map_err(|e| eyre!("Failed to commit batch: {}", e))?;
    Ok(())
  }

  /// Stamp the delete timestamp without removing the row. Returns the
  /// newly tombstoned record so the caller can replicate the deletion.
  /// Absent ids and already-tombstoned rows are no-ops reported as
  /// `None`, so the retention clock never resets and repeat deletes
  /// trigger no replication.
  pub fn soft_delete<T: Entity>(&self, id: &str) -> Result<Option<T>> {
    let existing: Option<T> = self.get_by_id(id)?;
    let mut record = match existing {
      Some(r) => r,
      None => return Ok(None),
    };

    if !record.meta().lifecycle.is_visible() {
      return Ok(None);
    }

    record.meta_mut().tombstone();
    let conn = self.lock()?;
    upsert(&conn, &record)?;
    Ok(Some(record))
  }

  /// Physically remove tombstoned rows, across all kinds, whose delete
  /// timestamp predates the cutoff. Irreversible. Returns the row count.
  pub fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM records WHERE state = 'tombstoned' AND deleted_at < ?",
        params![fmt_ts(cutoff)],
      )
      .map_err(|e| eyre!("Failed to purge records: {}", e))?;
    Ok(removed)
  }

  /// Load the persisted price snapshot, whatever location it was taken
  /// for. At most one snapshot exists at a time.
  pub fn load_snapshot(&self) -> Result<Option<PriceSnapshot>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT data FROM price_snapshot WHERE slot = 0")
      .map_err(|e| eyre!("Failed to prepare snapshot query: {}", e))?;

    let data: Option<Vec<u8>> = stmt.query_row([], |row| row.get(0)).ok();
    match data {
      Some(data) => {
        let snapshot: PriceSnapshot = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to deserialize price snapshot: {}", e))?;
        Ok(Some(snapshot))
      }
      None => Ok(None),
    }
  }

  /// Persist a full-replacement price snapshot, overwriting any prior
  /// snapshot regardless of location.
  pub fn store_snapshot(&self, snapshot: &PriceSnapshot) -> Result<()> {
    let data = serde_json::to_vec(snapshot)
      .map_err(|e| eyre!("Failed to serialize price snapshot: {}", e))?;
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO price_snapshot (slot, location_id, last_sync, data)
         VALUES (0, ?, ?, ?)",
        params![
          snapshot.location_id,
          fmt_ts(snapshot.last_sync),
          data
        ],
      )
      .map_err(|e| eyre!("Failed to store price snapshot: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Upsert one record, preserving rowid (and therefore insertion order) on
/// conflict.
fn upsert<T: Entity>(conn: &Connection, record: &T) -> Result<()> {
  let meta = record.meta();
  let data = serde_json::to_vec(record)
    .map_err(|e| eyre!("Failed to serialize {}: {}", T::kind(), e))?;
  let (state, deleted_at) = match &meta.lifecycle {
    Lifecycle::Active => ("active", None),
    Lifecycle::Tombstoned { deleted_at } => ("tombstoned", Some(fmt_ts(*deleted_at))),
  };

  conn
    .execute(
      "INSERT INTO records (kind, id, data, state, created_at, updated_at, deleted_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
       ON CONFLICT (kind, id) DO UPDATE SET
         data = ?3, state = ?4, updated_at = ?6, deleted_at = ?7",
      params![
        T::kind(),
        meta.id,
        data,
        state,
        fmt_ts(meta.created_at),
        fmt_ts(meta.updated_at),
        deleted_at
      ],
    )
    .map_err(|e| eyre!("Failed to save {} {}: {}", T::kind(), meta.id, e))?;
  Ok(())
}

/// Fixed-precision RFC 3339 so column values compare lexicographically in
/// timestamp order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
