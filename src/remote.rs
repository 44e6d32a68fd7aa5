//! Remote collaborators: the price source and the record store mirror.
//!
//! Both sit behind traits so the sync paths can be exercised against
//! in-process fakes. HTTP implementations convert every transport failure
//! into an error at this boundary; callers above decide whether that
//! becomes a boolean, an absent value, or (on a cold cache miss) a
//! surfaced failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::model::PriceRow;

/// Price row as the remote source sends it. Every field is optional so
/// incomplete rows can be dropped instead of failing the whole batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPriceRow {
  pub product_id: Option<String>,
  pub supplier_id: Option<String>,
  pub location_id: Option<String>,
  pub price: Option<Decimal>,
  pub effective_at: Option<DateTime<Utc>>,
}

impl ApiPriceRow {
  /// Convert to a domain row; `None` when any required field is missing.
  pub fn into_row(self) -> Option<PriceRow> {
    Some(PriceRow {
      product_id: self.product_id?,
      supplier_id: self.supplier_id?,
      location_id: self.location_id?,
      price: self.price?,
      effective_at: self.effective_at?,
    })
  }
}

/// Authoritative supplier price list, queried by location.
#[async_trait]
pub trait PriceSource: Send + Sync {
  async fn fetch_prices(&self, location_id: &str) -> Result<Vec<ApiPriceRow>>;
}

/// Price source used when none is configured. Every fetch fails, which
/// the price book reports as an unsuccessful sync rather than an error.
pub struct NoPriceSource;

#[async_trait]
impl PriceSource for NoPriceSource {
  async fn fetch_prices(&self, _location_id: &str) -> Result<Vec<ApiPriceRow>> {
    Err(eyre!("no price source configured"))
  }
}

pub struct HttpPriceSource {
  client: Client,
  base_url: Url,
}

impl HttpPriceSource {
  pub fn new(base_url: Url) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
    Ok(Self { client, base_url })
  }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
  async fn fetch_prices(&self, location_id: &str) -> Result<Vec<ApiPriceRow>> {
    let url = self
      .base_url
      .join(&format!("locations/{}/prices", location_id))
      .map_err(|e| eyre!("Invalid price source URL: {}", e))?;

    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Price fetch for {} failed: {}", location_id, e))?
      .error_for_status()
      .map_err(|e| eyre!("Price fetch for {} rejected: {}", location_id, e))?;

    response
      .json::<Vec<ApiPriceRow>>()
      .await
      .map_err(|e| eyre!("Failed to parse price rows for {}: {}", location_id, e))
  }
}

/// Remote mirror of the durable store. Accepts upsert-by-id and
/// delete-by-id per entity kind; availability is probed before each push.
#[async_trait]
pub trait RemoteStore: Send + Sync {
  /// Reachability/configuration check. `false` means "skip this push";
  /// the next local mutation of the same record tries again.
  async fn available(&self) -> bool;

  async fn push_upsert(&self, kind: &str, id: &str, record: Value) -> Result<()>;

  async fn push_delete(&self, kind: &str, id: &str) -> Result<()>;
}

/// Remote store used when no sync endpoint is configured. Never
/// available; all pushes discard.
pub struct DisabledRemote;

#[async_trait]
impl RemoteStore for DisabledRemote {
  async fn available(&self) -> bool {
    false
  }

  async fn push_upsert(&self, _kind: &str, _id: &str, _record: Value) -> Result<()> {
    Ok(())
  }

  async fn push_delete(&self, _kind: &str, _id: &str) -> Result<()> {
    Ok(())
  }
}

pub struct HttpRemoteStore {
  client: Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpRemoteStore {
  pub fn new(base_url: Url, token: Option<String>) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(10))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;
    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  fn record_url(&self, kind: &str, id: &str) -> Result<Url> {
    self
      .base_url
      .join(&format!("records/{}/{}", kind, id))
      .map_err(|e| eyre!("Invalid remote store URL: {}", e))
  }

  fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match &self.token {
      Some(token) => req.bearer_auth(token),
      None => req,
    }
  }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
  async fn available(&self) -> bool {
    let url = match self.base_url.join("health") {
      Ok(url) => url,
      Err(_) => return false,
    };

    self
      .client
      .head(url)
      .timeout(Duration::from_secs(3))
      .send()
      .await
      .map(|r| r.status().is_success())
      .unwrap_or(false)
  }

  async fn push_upsert(&self, kind: &str, id: &str, record: Value) -> Result<()> {
    let url = self.record_url(kind, id)?;
    self
      .authorize(self.client.put(url).json(&record))
      .send()
      .await
      .map_err(|e| eyre!("Upsert push for {} {} failed: {}", kind, id, e))?
      .error_for_status()
      .map_err(|e| eyre!("Upsert push for {} {} rejected: {}", kind, id, e))?;
    Ok(())
  }

  async fn push_delete(&self, kind: &str, id: &str) -> Result<()> {
    let url = self.record_url(kind, id)?;
    self
      .authorize(self.client.delete(url))
      .send()
      .await
      .map_err(|e| eyre!("Delete push for {} {} failed: {}", kind, id, e))?
      .error_for_status()
      .map_err(|e| eyre!("Delete push for {} {} rejected: {}", kind, id, e))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn incomplete_api_rows_convert_to_none() {
    let row: ApiPriceRow = serde_json::from_str(
      r#"{"productId": "p1", "locationId": "loc-1", "price": "10.00"}"#,
    )
    .unwrap();
    // supplierId and effectiveAt missing: dropped, not an error.
    assert!(row.into_row().is_none());
  }

  #[test]
  fn complete_api_rows_convert() {
    let row: ApiPriceRow = serde_json::from_str(
      r#"{
        "productId": "p1",
        "supplierId": "s1",
        "locationId": "loc-1",
        "price": "10.00",
        "effectiveAt": "2024-01-01T00:00:00Z"
      }"#,
    )
    .unwrap();
    let row = row.into_row().unwrap();
    assert_eq!(row.product_id, "p1");
    assert_eq!(row.price, Decimal::new(1000, 2));
  }

  #[tokio::test]
  async fn disabled_remote_is_never_available() {
    let remote = DisabledRemote;
    assert!(!remote.available().await);
    assert!(remote.push_upsert("invoice", "i1", Value::Null).await.is_ok());
  }
}
