//! Data service facade: the one object screens talk to.
//!
//! Reads flow Store → Reconciler → Cache → caller through `with_cache`,
//! so a warm cache answers without touching the database. Writes land in
//! the store first (local durability is the completion contract), then
//! invalidate the affected cache family and hand the record to the sync
//! shadow, which replicates in the background.

use std::sync::Arc;

use chrono::{Local, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use rust_decimal::Decimal;
use url::Url;

use crate::cache::{CacheConfig, TtlCache};
use crate::config::Config;
use crate::keys;
use crate::model::{CustomLineItem, Entity, Invoice, Quote};
use crate::prices::{PriceBook, PriceLookup};
use crate::reconcile;
use crate::remote::{
  DisabledRemote, HttpPriceSource, HttpRemoteStore, NoPriceSource, PriceSource, RemoteStore,
};
use crate::store::{search, RecordStore, Visibility};
use crate::sync::SyncShadow;

pub struct DataService {
  store: Arc<RecordStore>,
  shadow: Arc<SyncShadow>,
  prices: PriceBook,
  invoice_lists: Arc<TtlCache<Vec<Invoice>>>,
  invoice_details: Arc<TtlCache<Option<Invoice>>>,
  quote_lists: Arc<TtlCache<Vec<Quote>>>,
  quote_details: Arc<TtlCache<Option<Quote>>>,
  item_lists: Arc<TtlCache<Vec<CustomLineItem>>>,
}

impl DataService {
  pub fn new(
    store: Arc<RecordStore>,
    remote: Arc<dyn RemoteStore>,
    price_source: Arc<dyn PriceSource>,
    cache_config: CacheConfig,
  ) -> Self {
    Self {
      prices: PriceBook::new(Arc::clone(&store), price_source),
      shadow: Arc::new(SyncShadow::new(remote)),
      invoice_lists: Arc::new(TtlCache::new(cache_config)),
      invoice_details: Arc::new(TtlCache::new(cache_config)),
      quote_lists: Arc::new(TtlCache::new(cache_config)),
      quote_details: Arc::new(TtlCache::new(cache_config)),
      item_lists: Arc::new(TtlCache::new(cache_config)),
      store,
    }
  }

  /// Wire up the whole session from configuration. Missing remote URLs
  /// select the disabled collaborators (local-only mode).
  pub fn from_config(config: &Config) -> Result<Self> {
    let store = match &config.db_path {
      Some(path) => RecordStore::open(path)?,
      None => RecordStore::open_default()?,
    };

    let remote: Arc<dyn RemoteStore> = match &config.sync.remote_url {
      Some(url) => {
        let url = Url::parse(url).map_err(|e| eyre!("Invalid sync remote_url: {}", e))?;
        Arc::new(HttpRemoteStore::new(url, Config::api_token())?)
      }
      None => Arc::new(DisabledRemote),
    };

    let price_source: Arc<dyn PriceSource> = match &config.prices.source_url {
      Some(url) => {
        let url = Url::parse(url).map_err(|e| eyre!("Invalid price source_url: {}", e))?;
        Arc::new(HttpPriceSource::new(url)?)
      }
      None => Arc::new(NoPriceSource),
    };

    Ok(Self::new(
      Arc::new(store),
      remote,
      price_source,
      config.cache.cache_config(),
    ))
  }

  fn today() -> NaiveDate {
    Local::now().date_naive()
  }

  // ===== Invoices =====

  /// List active invoices with effective statuses.
  pub async fn invoices(&self) -> Result<Vec<Invoice>> {
    let store = Arc::clone(&self.store);
    let shadow = Arc::clone(&self.shadow);
    self
      .invoice_lists
      .with_cache(keys::INVOICE_LIST, move || async move {
        read_invoices(&store, &shadow, Self::today())
      })
      .await
  }

  /// Fetch one invoice. Soft-deleted invoices read as absent here even
  /// though the store still holds their tombstones.
  pub async fn invoice(&self, id: &str) -> Result<Option<Invoice>> {
    let store = Arc::clone(&self.store);
    let shadow = Arc::clone(&self.shadow);
    let id = id.to_string();
    self
      .invoice_details
      .with_cache(&keys::invoice_detail(&id), move || async move {
        let invoice = match store.get_by_id::<Invoice>(&id)? {
          Some(invoice) if invoice.meta.lifecycle.is_visible() => invoice,
          _ => return Ok(None),
        };
        let (invoice, corrected) =
          reconcile::reconcile_and_persist(&store, invoice, Self::today())?;
        if corrected {
          shadow.shadow_upsert(&invoice);
        }
        Ok(Some(invoice))
      })
      .await
  }

  pub fn save_invoice(&self, invoice: &mut Invoice) -> Result<()> {
    self.store.save(invoice)?;
    self.invalidate_invoices(invoice.id());
    self.shadow.shadow_upsert(invoice);
    Ok(())
  }

  pub fn save_invoices(&self, invoices: &mut [Invoice]) -> Result<()> {
    self.store.save_batch(invoices)?;
    self
      .invoice_details
      .invalidate_by_pattern(|k| k.starts_with("invoices:"));
    self.invoice_lists.invalidate(keys::INVOICE_LIST);
    for invoice in invoices.iter() {
      self.shadow.shadow_upsert(invoice);
    }
    Ok(())
  }

  /// Soft-delete an invoice. Returns whether a record was tombstoned.
  pub fn delete_invoice(&self, id: &str) -> Result<bool> {
    match self.store.soft_delete::<Invoice>(id)? {
      Some(_) => {
        self.invalidate_invoices(id);
        self.shadow.shadow_delete(Invoice::kind(), id);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn invalidate_invoices(&self, id: &str) {
    self.invoice_lists.invalidate(keys::INVOICE_LIST);
    self.invoice_details.invalidate(&keys::invoice_detail(id));
  }

  // ===== Quotes =====

  pub async fn quotes(&self) -> Result<Vec<Quote>> {
    let store = Arc::clone(&self.store);
    self
      .quote_lists
      .with_cache(keys::QUOTE_LIST, move || async move {
        store.list(Visibility::Active)
      })
      .await
  }

  pub async fn quote(&self, id: &str) -> Result<Option<Quote>> {
    let store = Arc::clone(&self.store);
    let id = id.to_string();
    self
      .quote_details
      .with_cache(&keys::quote_detail(&id), move || async move {
        Ok(
          store
            .get_by_id::<Quote>(&id)?
            .filter(|q| q.meta.lifecycle.is_visible()),
        )
      })
      .await
  }

  pub fn save_quote(&self, quote: &mut Quote) -> Result<()> {
    self.store.save(quote)?;
    self.invalidate_quotes(quote.id());
    self.shadow.shadow_upsert(quote);
    Ok(())
  }

  pub fn save_quotes(&self, quotes: &mut [Quote]) -> Result<()> {
    self.store.save_batch(quotes)?;
    self
      .quote_details
      .invalidate_by_pattern(|k| k.starts_with("quotes:"));
    self.quote_lists.invalidate(keys::QUOTE_LIST);
    for quote in quotes.iter() {
      self.shadow.shadow_upsert(quote);
    }
    Ok(())
  }

  pub fn delete_quote(&self, id: &str) -> Result<bool> {
    match self.store.soft_delete::<Quote>(id)? {
      Some(_) => {
        self.invalidate_quotes(id);
        self.shadow.shadow_delete(Quote::kind(), id);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  fn invalidate_quotes(&self, id: &str) {
    self.quote_lists.invalidate(keys::QUOTE_LIST);
    self.quote_details.invalidate(&keys::quote_detail(id));
  }

  // ===== Custom line items =====

  /// Upsert by case-insensitive name. A matching name bumps `times_used`
  /// exactly once, refreshes `last_used` and adopts the new default
  /// price; an unknown name inserts a fresh item.
  pub fn upsert_custom_item(&self, name: &str, default_price: Decimal) -> Result<CustomLineItem> {
    let items: Vec<CustomLineItem> = self.store.list(Visibility::Active)?;
    let wanted = name.trim().to_lowercase();

    let mut item = match items.into_iter().find(|i| i.name.to_lowercase() == wanted) {
      Some(mut existing) => {
        existing.times_used += 1;
        existing.last_used = Utc::now();
        existing.default_price = default_price;
        existing
      }
      None => CustomLineItem::new(name.trim(), default_price),
    };

    self.store.save(&mut item)?;
    self
      .item_lists
      .invalidate_by_pattern(|k| k.starts_with("items:"));
    self.shadow.shadow_upsert(&item);
    Ok(item)
  }

  pub async fn custom_items(&self) -> Result<Vec<CustomLineItem>> {
    let store = Arc::clone(&self.store);
    self
      .item_lists
      .with_cache(keys::ITEM_LIST, move || async move {
        store.list(Visibility::Active)
      })
      .await
  }

  /// Autocomplete search over saved items. Queries shorter than two
  /// characters return nothing without consulting the store.
  pub async fn search_custom_items(&self, query: &str) -> Result<Vec<CustomLineItem>> {
    if query.trim().chars().count() < 2 {
      return Ok(Vec::new());
    }

    let store = Arc::clone(&self.store);
    let owned_query = query.to_string();
    self
      .item_lists
      .with_cache(&keys::item_search(query), move || async move {
        let items: Vec<CustomLineItem> = store.list(Visibility::Active)?;
        Ok(search::fuzzy_search(&items, &owned_query))
      })
      .await
  }

  /// Soft-delete a saved item. Returns whether a record was tombstoned.
  pub fn delete_custom_item(&self, id: &str) -> Result<bool> {
    match self.store.soft_delete::<CustomLineItem>(id)? {
      Some(_) => {
        self
          .item_lists
          .invalidate_by_pattern(|k| k.starts_with("items:"));
        self.shadow.shadow_delete(CustomLineItem::kind(), id);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  // ===== Prices =====

  pub fn prices_for_location(&self, location_id: &str) -> Result<PriceLookup> {
    self.prices.prices_for_location(location_id)
  }

  pub async fn sync_prices_for_location(&self, location_id: &str) -> bool {
    self.prices.sync_for_location(location_id).await
  }
}

/// List + reconcile, persisting and replicating any status corrections
/// discovered along the way.
fn read_invoices(
  store: &Arc<RecordStore>,
  shadow: &Arc<SyncShadow>,
  today: NaiveDate,
) -> Result<Vec<Invoice>> {
  let raw: Vec<Invoice> = store.list(Visibility::Active)?;
  let mut invoices = Vec::with_capacity(raw.len());
  for invoice in raw {
    let (invoice, corrected) = reconcile::reconcile_and_persist(store, invoice, today)?;
    if corrected {
      shadow.shadow_upsert(&invoice);
    }
    invoices.push(invoice);
  }
  Ok(invoices)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::InvoiceStatus;
  use async_trait::async_trait;
  use chrono::NaiveDate;
  use serde_json::Value;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Mutex;
  use std::time::Duration;

  #[derive(Default)]
  struct RecordingRemote {
    available: AtomicBool,
    upserts: Mutex<Vec<(String, String)>>,
    deletes: Mutex<Vec<(String, String)>>,
  }

  #[async_trait]
  impl RemoteStore for RecordingRemote {
    async fn available(&self) -> bool {
      self.available.load(Ordering::SeqCst)
    }

    async fn push_upsert(&self, kind: &str, id: &str, _record: Value) -> Result<()> {
      self
        .upserts
        .lock()
        .unwrap()
        .push((kind.to_string(), id.to_string()));
      Ok(())
    }

    async fn push_delete(&self, kind: &str, id: &str) -> Result<()> {
      self
        .deletes
        .lock()
        .unwrap()
        .push((kind.to_string(), id.to_string()));
      Ok(())
    }
  }

  fn service_with_remote() -> (DataService, Arc<RecordingRemote>, Arc<RecordStore>) {
    let store = Arc::new(RecordStore::open_in_memory().unwrap());
    let remote = Arc::new(RecordingRemote::default());
    remote.available.store(true, Ordering::SeqCst);
    let service = DataService::new(
      Arc::clone(&store),
      remote.clone(),
      Arc::new(NoPriceSource),
      CacheConfig::default(),
    );
    (service, remote, store)
  }

  fn service() -> DataService {
    service_with_remote().0
  }

  async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
  }

  #[tokio::test]
  async fn overdue_invoice_corrected_on_read_and_persisted() {
    let (service, _remote, store) = service_with_remote();

    let mut invoice = Invoice::new("Acme");
    invoice.status = InvoiceStatus::Unpaid;
    invoice.due_date = Some(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
    service.save_invoice(&mut invoice).unwrap();
    let id = invoice.id().to_string();

    let listed = service.invoices().await.unwrap();
    assert_eq!(listed[0].status, InvoiceStatus::Overdue);

    // The correction reached storage, not just the returned copy.
    let stored: Invoice = store.get_by_id(&id).unwrap().unwrap();
    assert_eq!(stored.status, InvoiceStatus::Overdue);
  }

  #[tokio::test]
  async fn deleted_invoice_reads_as_absent() {
    let service = service();

    let mut invoice = Invoice::new("Acme");
    service.save_invoice(&mut invoice).unwrap();
    let id = invoice.id().to_string();

    assert!(service.invoice(&id).await.unwrap().is_some());
    assert!(service.delete_invoice(&id).unwrap());

    assert!(service.invoices().await.unwrap().is_empty());
    assert!(service.invoice(&id).await.unwrap().is_none());
    // Deleting again: nothing left to tombstone.
    assert!(!service.delete_invoice(&id).unwrap());
  }

  #[tokio::test]
  async fn repeat_delete_pushes_no_redundant_sync_marker() {
    let (service, remote, _store) = service_with_remote();

    let mut invoice = Invoice::new("Acme");
    service.save_invoice(&mut invoice).unwrap();
    let id = invoice.id().to_string();

    assert!(service.delete_invoice(&id).unwrap());
    assert!(!service.delete_invoice(&id).unwrap());
    settle().await;

    // Only the first delete crossed the shadow boundary.
    let deletes = remote.deletes.lock().unwrap();
    assert_eq!(
      deletes.as_slice(),
      &[("invoice".to_string(), id.clone())]
    );
  }

  #[tokio::test]
  async fn unknown_id_is_absent_not_an_error() {
    let service = service();
    assert!(service.invoice("nope").await.unwrap().is_none());
    assert!(!service.delete_invoice("nope").unwrap());
  }

  #[tokio::test]
  async fn save_invalidates_the_list_cache() {
    let service = service();

    let mut first = Quote::new("First");
    service.save_quote(&mut first).unwrap();
    assert_eq!(service.quotes().await.unwrap().len(), 1);

    // Without invalidation this would serve the cached single-element
    // list; the save must make the next read a cold miss.
    let mut second = Quote::new("Second");
    service.save_quote(&mut second).unwrap();
    assert_eq!(service.quotes().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn upsert_bumps_times_used_once_per_call() {
    let service = service();

    let first = service
      .upsert_custom_item("Ceiling Fan Installation", Decimal::new(12000, 2))
      .unwrap();
    assert_eq!(first.times_used, 1);

    let second = service
      .upsert_custom_item("ceiling fan installation", Decimal::new(15000, 2))
      .unwrap();
    assert_eq!(second.times_used, 2);
    assert_eq!(second.id(), first.id());
    assert_eq!(second.default_price, Decimal::new(15000, 2));
    assert!(second.last_used >= first.last_used);
  }

  #[tokio::test]
  async fn search_goes_through_the_service() {
    let service = service();
    service
      .upsert_custom_item("Ceiling Fan Installation", Decimal::new(12000, 2))
      .unwrap();

    let hits = service.search_custom_items("fan install").await.unwrap();
    assert_eq!(hits.len(), 1);

    assert!(service.search_custom_items("a").await.unwrap().is_empty());
    assert!(service.search_custom_items("xyz").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn upsert_invalidates_cached_search_results() {
    let service = service();
    service
      .upsert_custom_item("Fan Repair", Decimal::new(8000, 2))
      .unwrap();

    assert_eq!(service.search_custom_items("fan").await.unwrap().len(), 1);

    service
      .upsert_custom_item("Fan Balancing", Decimal::new(6000, 2))
      .unwrap();
    assert_eq!(service.search_custom_items("fan").await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn mutations_flow_to_the_sync_shadow() {
    let (service, remote, _store) = service_with_remote();

    let mut quote = Quote::new("Acme");
    service.save_quote(&mut quote).unwrap();
    let id = quote.id().to_string();
    service.delete_quote(&id).unwrap();
    settle().await;

    let upserts = remote.upserts.lock().unwrap();
    assert!(upserts.iter().any(|(kind, rid)| kind == "quote" && *rid == id));
    let deletes = remote.deletes.lock().unwrap();
    assert!(deletes.iter().any(|(kind, rid)| kind == "quote" && *rid == id));
  }

  #[tokio::test]
  async fn status_corrections_replicate_downstream() {
    let (service, remote, _store) = service_with_remote();

    let mut invoice = Invoice::new("Acme");
    invoice.status = InvoiceStatus::Unpaid;
    invoice.due_date = Some(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
    service.save_invoice(&mut invoice).unwrap();
    let id = invoice.id().to_string();
    settle().await;
    remote.upserts.lock().unwrap().clear();

    // Make the next read a cold miss so it hits the reconciler.
    service.invoice_lists.clear();
    let _ = service.invoices().await.unwrap();
    settle().await;

    let upserts = remote.upserts.lock().unwrap();
    assert!(upserts.iter().any(|(kind, rid)| kind == "invoice" && *rid == id));
  }

  #[tokio::test]
  async fn empty_batch_save_is_a_noop() {
    let service = service();
    service.save_invoices(&mut []).unwrap();
    assert!(service.invoices().await.unwrap().is_empty());
  }
}
