//! Location-scoped supplier price cache.
//!
//! One lookup lives in memory at a time, valid only for the location it
//! was built for. The persisted snapshot is full-replacement: syncing a
//! location overwrites whatever location was stored before. Lookups are
//! rebuilt into a fresh map and swapped in whole, never mutated in place.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use color_eyre::Result;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::model::{PriceRow, PriceSnapshot};
use crate::remote::{ApiPriceRow, PriceSource};
use crate::store::RecordStore;

/// Immutable `productId|supplierId` → price map for one location.
pub type PriceLookup = Arc<HashMap<String, Decimal>>;

fn price_key(product_id: &str, supplier_id: &str) -> String {
  format!("{}|{}", product_id, supplier_id)
}

/// O(1) price lookup. Absent when no supplier is given or no entry
/// exists; never an error.
pub fn price_for(
  lookup: &PriceLookup,
  product_id: &str,
  supplier_id: Option<&str>,
) -> Option<Decimal> {
  let supplier_id = supplier_id?;
  lookup.get(&price_key(product_id, supplier_id)).copied()
}

fn build_lookup(rows: &[PriceRow]) -> PriceLookup {
  let map: HashMap<String, Decimal> = rows
    .iter()
    .map(|row| (price_key(&row.product_id, &row.supplier_id), row.price))
    .collect();
  Arc::new(map)
}

/// Price cache backed by the persisted snapshot and mirrored into an
/// in-memory lookup.
pub struct PriceBook {
  store: Arc<RecordStore>,
  source: Arc<dyn PriceSource>,
  /// The one in-memory lookup, tagged with the location it serves.
  lookup: Mutex<Option<(String, PriceLookup)>>,
}

impl PriceBook {
  pub fn new(store: Arc<RecordStore>, source: Arc<dyn PriceSource>) -> Self {
    Self {
      store,
      source,
      lookup: Mutex::new(None),
    }
  }

  /// Lookup for a location, built from the most recent persisted snapshot.
  ///
  /// Same location as the in-memory lookup: returned directly, no I/O.
  /// Different location: the in-memory lookup is evicted and rebuilt from
  /// the snapshot if it matches; otherwise an empty lookup comes back.
  /// Cross-location data is never served.
  pub fn prices_for_location(&self, location_id: &str) -> Result<PriceLookup> {
    {
      let mut cached = self.lock();
      match cached.as_ref() {
        Some((loc, lookup)) if loc == location_id => return Ok(Arc::clone(lookup)),
        Some(_) => {
          // Location switch: the lookup is scoped to one location by
          // construction, so it goes even if otherwise valid.
          *cached = None;
        }
        None => {}
      }
    }

    match self.store.load_snapshot()? {
      Some(snapshot) if snapshot.location_id == location_id => {
        let lookup = build_lookup(&snapshot.rows);
        *self.lock() = Some((location_id.to_string(), Arc::clone(&lookup)));
        Ok(lookup)
      }
      _ => Ok(Arc::new(HashMap::new())),
    }
  }

  /// Fetch the authoritative price list for a location, persist it as the
  /// new snapshot and refresh the in-memory lookup.
  ///
  /// Returns `false` without erroring on any network/parse failure,
  /// leaving whatever was cached before untouched. Rows missing required
  /// fields are dropped silently rather than failing the batch.
  pub async fn sync_for_location(&self, location_id: &str) -> bool {
    let api_rows = match self.source.fetch_prices(location_id).await {
      Ok(rows) => rows,
      Err(err) => {
        warn!(location_id, error = %err, "price sync failed; keeping prior snapshot");
        return false;
      }
    };

    let total = api_rows.len();
    let rows: Vec<PriceRow> = api_rows
      .into_iter()
      .filter_map(ApiPriceRow::into_row)
      .collect();
    if rows.len() < total {
      debug!(
        location_id,
        dropped = total - rows.len(),
        "dropped incomplete price rows"
      );
    }

    let snapshot = PriceSnapshot {
      location_id: location_id.to_string(),
      rows,
      last_sync: Utc::now(),
    };

    if let Err(err) = self.store.store_snapshot(&snapshot) {
      warn!(location_id, error = %err, "failed to persist price snapshot");
      return false;
    }

    let lookup = build_lookup(&snapshot.rows);
    *self.lock() = Some((location_id.to_string(), lookup));
    true
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Option<(String, PriceLookup)>> {
    self.lookup.lock().unwrap_or_else(|p| p.into_inner())
  }
}
