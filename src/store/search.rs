//! Fuzzy matching for custom-line-item autocomplete.

use crate::model::CustomLineItem;

/// Minimum query length; anything shorter matches far too broadly.
const MIN_QUERY_LEN: usize = 2;

/// Token-based fuzzy match over saved line items.
///
/// A candidate matches iff every whitespace-separated query token is a
/// case-insensitive substring of its name. Matches are ranked by usage
/// frequency descending; ties keep the input (insertion) order. Pure
/// function so the ranking is testable without a store.
pub fn fuzzy_search(items: &[CustomLineItem], query: &str) -> Vec<CustomLineItem> {
  let query = query.trim();
  if query.chars().count() < MIN_QUERY_LEN {
    return Vec::new();
  }

  let tokens: Vec<String> = query
    .split_whitespace()
    .map(|t| t.to_lowercase())
    .collect();

  let mut matches: Vec<CustomLineItem> = items
    .iter()
    .filter(|item| {
      let name = item.name.to_lowercase();
      tokens.iter().all(|token| name.contains(token.as_str()))
    })
    .cloned()
    .collect();

  // Stable sort: ties stay in insertion order.
  matches.sort_by(|a, b| b.times_used.cmp(&a.times_used));
  matches
}
