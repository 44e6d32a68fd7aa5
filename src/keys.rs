//! Cache key construction for data-service queries.
//!
//! Keys carry a `<family>:` prefix so pattern invalidation can sweep a
//! whole family. Free-form user input (search text) is normalized and
//! hashed for stable, fixed-length keys.

use sha2::{Digest, Sha256};

pub const INVOICE_LIST: &str = "invoices:all";
pub const QUOTE_LIST: &str = "quotes:all";
pub const ITEM_LIST: &str = "items:all";

pub fn invoice_detail(id: &str) -> String {
  format!("invoices:id:{}", id)
}

pub fn quote_detail(id: &str) -> String {
  format!("quotes:id:{}", id)
}

pub fn item_search(query: &str) -> String {
  let normalized = query.trim().to_lowercase();
  let mut hasher = Sha256::new();
  hasher.update(normalized.as_bytes());
  format!("items:search:{}", hex::encode(hasher.finalize()))
}
