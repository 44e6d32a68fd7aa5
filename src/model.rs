//! Domain records persisted by the durable store.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a stored record.
///
/// Tombstoned records stay out of default queries but remain addressable
/// by id until the retention purge removes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Lifecycle {
  Active,
  Tombstoned { deleted_at: DateTime<Utc> },
}

impl Lifecycle {
  /// Whether the record should appear in default listing/search queries.
  pub fn is_visible(&self) -> bool {
    matches!(self, Lifecycle::Active)
  }

  pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
    match self {
      Lifecycle::Active => None,
      Lifecycle::Tombstoned { deleted_at } => Some(*deleted_at),
    }
  }
}

/// Bookkeeping fields shared by every stored entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
  pub id: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(flatten)]
  pub lifecycle: Lifecycle,
}

impl RecordMeta {
  pub fn new() -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::new_v4().to_string(),
      created_at: now,
      updated_at: now,
      lifecycle: Lifecycle::Active,
    }
  }

  /// Stamp a new update timestamp. Every mutation goes through here.
  pub fn touch(&mut self) {
    self.updated_at = Utc::now();
  }

  /// Mark the record tombstoned. The row survives until purged.
  pub fn tombstone(&mut self) {
    let now = Utc::now();
    self.lifecycle = Lifecycle::Tombstoned { deleted_at: now };
    self.updated_at = now;
  }
}

impl Default for RecordMeta {
  fn default() -> Self {
    Self::new()
  }
}

/// Trait for entities the durable store can persist.
///
/// Implementors provide their stable kind name (used as the storage
/// partition) and access to the shared bookkeeping fields.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Entity kind name for storage organization (e.g., "invoice", "quote").
  fn kind() -> &'static str;

  fn meta(&self) -> &RecordMeta;

  fn meta_mut(&mut self) -> &mut RecordMeta;

  fn id(&self) -> &str {
    &self.meta().id
  }
}

/// A single line on a quote or invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
  pub description: String,
  pub quantity: Decimal,
  pub unit_price: Decimal,
}

impl LineItem {
  pub fn total(&self) -> Decimal {
    self.quantity * self.unit_price
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
  #[serde(flatten)]
  pub meta: RecordMeta,
  pub customer_name: String,
  pub line_items: Vec<LineItem>,
  pub notes: Option<String>,
}

impl Quote {
  pub fn new(customer_name: impl Into<String>) -> Self {
    Self {
      meta: RecordMeta::new(),
      customer_name: customer_name.into(),
      line_items: Vec::new(),
      notes: None,
    }
  }

  pub fn total(&self) -> Decimal {
    self.line_items.iter().map(LineItem::total).sum()
  }
}

impl Entity for Quote {
  fn kind() -> &'static str {
    "quote"
  }

  fn meta(&self) -> &RecordMeta {
    &self.meta
  }

  fn meta_mut(&mut self) -> &mut RecordMeta {
    &mut self.meta
  }
}

/// Stored invoice status.
///
/// `Overdue` is derived from `Unpaid`/`Partial` plus a past due date; the
/// reconciler recomputes it on every read and writes corrections back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
  Draft,
  Unpaid,
  Partial,
  Paid,
  Overdue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
  #[serde(flatten)]
  pub meta: RecordMeta,
  /// Quote this invoice was generated from, if any.
  pub quote_id: Option<String>,
  pub customer_name: String,
  pub line_items: Vec<LineItem>,
  pub status: InvoiceStatus,
  pub due_date: Option<NaiveDate>,
  pub amount_paid: Decimal,
}

impl Invoice {
  pub fn new(customer_name: impl Into<String>) -> Self {
    Self {
      meta: RecordMeta::new(),
      quote_id: None,
      customer_name: customer_name.into(),
      line_items: Vec::new(),
      status: InvoiceStatus::Draft,
      due_date: None,
      amount_paid: Decimal::ZERO,
    }
  }

  pub fn total(&self) -> Decimal {
    self.line_items.iter().map(LineItem::total).sum()
  }
}

impl Entity for Invoice {
  fn kind() -> &'static str {
    "invoice"
  }

  fn meta(&self) -> &RecordMeta {
    &self.meta
  }

  fn meta_mut(&mut self) -> &mut RecordMeta {
    &mut self.meta
  }
}

/// A reusable line item the user has saved for autocomplete.
///
/// `name` is a case-insensitive unique key for upsert purposes;
/// `times_used` is monotonically non-decreasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomLineItem {
  #[serde(flatten)]
  pub meta: RecordMeta,
  pub name: String,
  pub default_price: Decimal,
  pub times_used: u64,
  pub first_added: DateTime<Utc>,
  pub last_used: DateTime<Utc>,
}

impl CustomLineItem {
  pub fn new(name: impl Into<String>, default_price: Decimal) -> Self {
    let now = Utc::now();
    Self {
      meta: RecordMeta::new(),
      name: name.into(),
      default_price,
      times_used: 1,
      first_added: now,
      last_used: now,
    }
  }
}

impl Entity for CustomLineItem {
  fn kind() -> &'static str {
    "custom_line_item"
  }

  fn meta(&self) -> &RecordMeta {
    &self.meta
  }

  fn meta_mut(&mut self) -> &mut RecordMeta {
    &mut self.meta
  }
}

/// One supplier price for one product at one location.
///
/// Serialized field names are part of the persisted snapshot contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRow {
  pub product_id: String,
  pub supplier_id: String,
  pub location_id: String,
  pub price: Decimal,
  pub effective_at: DateTime<Utc>,
}

/// Full-replacement persisted price snapshot, scoped to one location.
///
/// This is the only persisted artifact whose JSON shape is a public
/// contract: `{locationId, rows, lastSync}` with ISO-8601 timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
  pub location_id: String,
  pub rows: Vec<PriceRow>,
  pub last_sync: DateTime<Utc>,
}
