//! Key→value cache with TTL expiry and a separate staleness threshold.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Cache timing configuration.
///
/// `ttl` is the hard expiry: entries older than this are unusable and get
/// removed on lookup. `stale_time` is the shorter threshold past which an
/// entry is still served but due for a background refresh. `ttl` must be
/// strictly greater than `stale_time`.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
  pub ttl: Duration,
  pub stale_time: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(30 * 60),
      stale_time: Duration::from_secs(5 * 60),
    }
  }
}

#[derive(Debug, Clone)]
pub(super) struct CacheEntry<T> {
  pub(super) value: T,
  pub(super) stored_at: Instant,
  pub(super) forced_stale: bool,
}

pub(super) struct CacheInner<T> {
  pub(super) entries: HashMap<String, CacheEntry<T>>,
  /// Last explicit invalidation per key; background refreshes that started
  /// before this mark must not write their result back.
  pub(super) invalidated: HashMap<String, Instant>,
  /// Last `clear()`; covers every key.
  pub(super) cleared_at: Option<Instant>,
  /// Cold-miss producers in flight, keyed by cache key. Waiters park on the
  /// `Notify` instead of issuing duplicate upstream work.
  pub(super) inflight: HashMap<String, Arc<Notify>>,
  /// Keys with a background refresh in flight.
  pub(super) refreshing: HashSet<String>,
}

/// Generic key→value cache with TTL and staleness semantics.
///
/// All operations here are synchronous; the async stale-while-revalidate
/// wrapper lives in [`super::revalidate`]. One instance is owned by the
/// data service for the lifetime of the session.
pub struct TtlCache<T> {
  pub(super) inner: Mutex<CacheInner<T>>,
  pub(super) config: CacheConfig,
}

impl<T: Clone> TtlCache<T> {
  pub fn new(config: CacheConfig) -> Self {
    assert!(
      config.ttl > config.stale_time,
      "cache ttl must exceed stale_time"
    );
    Self {
      inner: Mutex::new(CacheInner {
        entries: HashMap::new(),
        invalidated: HashMap::new(),
        cleared_at: None,
        inflight: HashMap::new(),
        refreshing: HashSet::new(),
      }),
      config,
    }
  }

  /// Look up a value. Entries past their TTL are removed as a side effect
  /// and reported as absent.
  pub fn get(&self, key: &str) -> Option<T> {
    let mut inner = self.lock();
    match inner.entries.get(key) {
      Some(entry) if entry.stored_at.elapsed() > self.config.ttl => {
        inner.entries.remove(key);
        None
      }
      Some(entry) => Some(entry.value.clone()),
      None => None,
    }
  }

  /// Whether a key is due for a refresh: absent, past the staleness
  /// threshold, or explicitly marked stale.
  pub fn is_stale(&self, key: &str) -> bool {
    let inner = self.lock();
    match inner.entries.get(key) {
      Some(entry) => entry.forced_stale || entry.stored_at.elapsed() > self.config.stale_time,
      None => true,
    }
  }

  /// Insert or overwrite with a fresh timestamp, clearing any forced-stale
  /// flag.
  pub fn set(&self, key: &str, value: T) {
    let mut inner = self.lock();
    inner.entries.insert(
      key.to_string(),
      CacheEntry {
        value,
        stored_at: Instant::now(),
        forced_stale: false,
      },
    );
  }

  /// Flip the forced-stale flag without touching data or timestamps.
  pub fn mark_stale(&self, key: &str) {
    let mut inner = self.lock();
    if let Some(entry) = inner.entries.get_mut(key) {
      entry.forced_stale = true;
    }
  }

  /// Remove a single entry outright.
  pub fn invalidate(&self, key: &str) {
    let mut inner = self.lock();
    inner.entries.remove(key);
    inner.invalidated.insert(key.to_string(), Instant::now());
  }

  /// Remove every entry whose key matches the predicate.
  pub fn invalidate_by_pattern(&self, matcher: impl Fn(&str) -> bool) {
    let mut inner = self.lock();
    let now = Instant::now();
    let matched: Vec<String> = inner
      .entries
      .keys()
      .filter(|k| matcher(k))
      .cloned()
      .collect();
    for key in matched {
      inner.entries.remove(&key);
      inner.invalidated.insert(key, now);
    }
  }

  /// Remove everything. Background refreshes that started before this call
  /// will not write their results back.
  pub fn clear(&self) {
    let mut inner = self.lock();
    inner.entries.clear();
    inner.invalidated.clear();
    inner.cleared_at = Some(Instant::now());
  }

  /// The most recent explicit invalidation affecting `key`, if any.
  pub(super) fn invalidation_mark(inner: &CacheInner<T>, key: &str) -> Option<Instant> {
    let per_key = inner.invalidated.get(key).copied();
    match (per_key, inner.cleared_at) {
      (Some(a), Some(b)) => Some(a.max(b)),
      (a, b) => a.or(b),
    }
  }

  pub(super) fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner<T>> {
    // Lock poisoning only happens if a holder panicked; the entry table is
    // still structurally sound, so keep serving.
    self.inner.lock().unwrap_or_else(|p| p.into_inner())
  }
}
