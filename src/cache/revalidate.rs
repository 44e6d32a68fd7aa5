//! Stale-while-revalidate wrapper over [`TtlCache`].

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use color_eyre::Result;
use tokio::sync::Notify;
use tracing::debug;

use crate::task::spawn_detached;

use super::ttl::{CacheEntry, TtlCache};

enum Plan<T> {
  /// Hit, not stale: return synchronously, no I/O.
  Fresh(T),
  /// Hit, stale: return the old value now; `refresh` is true when this
  /// caller won the right to launch the single background refresh.
  Stale { value: T, refresh: bool },
  /// Miss, another caller's producer is already in flight.
  Wait(Arc<Notify>),
  /// Miss, this caller runs the producer.
  Lead(Arc<Notify>),
}

impl<T: Clone + Send + 'static> TtlCache<T> {
  /// Read-through with stale-while-revalidate.
  ///
  /// - Fresh hit: returns the cached value with no awaits.
  /// - Stale hit: returns the cached value immediately and refreshes it in
  ///   the background; a failed refresh is logged and the stale value stays
  ///   authoritative. At most one refresh per key is in flight.
  /// - Miss: runs the producer inline (the only path that suspends the
  ///   caller and the only path that surfaces the producer's error).
  ///   Concurrent misses for the same key await the first producer instead
  ///   of issuing duplicate upstream work.
  ///
  /// A refresh result is discarded if the key was explicitly invalidated or
  /// the cache cleared after the refresh started, so late writes cannot
  /// resurrect deliberately removed entries.
  pub async fn with_cache<F, Fut>(self: &Arc<Self>, key: &str, producer: F) -> Result<T>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    loop {
      let plan = self.plan_for(key);

      match plan {
        Plan::Fresh(value) => return Ok(value),
        Plan::Stale { value, refresh } => {
          if refresh {
            self.spawn_refresh(key, producer());
          }
          return Ok(value);
        }
        Plan::Wait(notify) => {
          // Register interest before re-checking so a leader finishing
          // between the plan and the await cannot strand this caller.
          let notified = notify.notified();
          tokio::pin!(notified);
          notified.as_mut().enable();
          if self.still_inflight(key, &notify) {
            notified.await;
          }
          // Re-examine the table. On leader failure this caller becomes
          // the new leader with its own producer.
          continue;
        }
        Plan::Lead(notify) => {
          let started = Instant::now();
          let result = producer().await;

          let outcome = {
            let mut inner = self.lock();
            inner.inflight.remove(key);
            match result {
              Ok(value) => {
                if Self::invalidation_mark(&inner, key).is_none_or(|mark| started > mark) {
                  inner.entries.insert(
                    key.to_string(),
                    CacheEntry {
                      value: value.clone(),
                      stored_at: Instant::now(),
                      forced_stale: false,
                    },
                  );
                }
                Ok(value)
              }
              Err(err) => Err(err),
            }
          };

          notify.notify_waiters();
          return outcome;
        }
      }
    }
  }

  /// Whether `notify` is still the registered in-flight producer for
  /// `key`.
  fn still_inflight(&self, key: &str, notify: &Arc<Notify>) -> bool {
    let inner = self.lock();
    inner
      .inflight
      .get(key)
      .is_some_and(|n| Arc::ptr_eq(n, notify))
  }

  /// Classify one lookup under the table lock.
  fn plan_for(&self, key: &str) -> Plan<T> {
    let mut inner = self.lock();

    let expired = inner
      .entries
      .get(key)
      .is_some_and(|e| e.stored_at.elapsed() > self.config.ttl);
    if expired {
      inner.entries.remove(key);
    }

    match inner.entries.get(key) {
      Some(entry) => {
        let stale = entry.forced_stale || entry.stored_at.elapsed() > self.config.stale_time;
        if stale {
          let value = entry.value.clone();
          let refresh = inner.refreshing.insert(key.to_string());
          Plan::Stale { value, refresh }
        } else {
          Plan::Fresh(entry.value.clone())
        }
      }
      None => match inner.inflight.get(key) {
        Some(notify) => Plan::Wait(Arc::clone(notify)),
        None => {
          let notify = Arc::new(Notify::new());
          inner.inflight.insert(key.to_string(), Arc::clone(&notify));
          Plan::Lead(notify)
        }
      },
    }
  }

  fn spawn_refresh<Fut>(self: &Arc<Self>, key: &str, producing: Fut)
  where
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let cache = Arc::clone(self);
    let key = key.to_string();
    let started = Instant::now();

    spawn_detached("cache-refresh", async move {
      let result = producing.await;

      let mut inner = cache.lock();
      inner.refreshing.remove(&key);
      match result {
        Ok(value) => {
          if TtlCache::invalidation_mark(&inner, &key).is_none_or(|mark| started > mark) {
            inner.entries.insert(
              key.clone(),
              CacheEntry {
                value,
                stored_at: Instant::now(),
                forced_stale: false,
              },
            );
          } else {
            debug!(%key, "discarding refresh result; key invalidated mid-flight");
          }
          Ok(())
        }
        Err(err) => Err(err.wrap_err(format!("background refresh for '{key}' failed"))),
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheConfig;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  fn cache(ttl_ms: u64, stale_ms: u64) -> Arc<TtlCache<String>> {
    Arc::new(TtlCache::new(CacheConfig {
      ttl: Duration::from_millis(ttl_ms),
      stale_time: Duration::from_millis(stale_ms),
    }))
  }

  #[tokio::test]
  async fn cold_miss_runs_producer_once_and_blocks() {
    let cache = cache(10_000, 5_000);
    let calls = Arc::new(AtomicU32::new(0));

    let calls_clone = calls.clone();
    let value = cache
      .with_cache("k", move || async move {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        Ok("fresh".to_string())
      })
      .await
      .unwrap();
    assert_eq!(value, "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Fresh hit: producer not consulted again.
    let calls_clone = calls.clone();
    let value = cache
      .with_cache("k", move || async move {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        Ok("newer".to_string())
      })
      .await
      .unwrap();
    assert_eq!(value, "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn cold_miss_propagates_producer_error() {
    let cache = cache(10_000, 5_000);
    let result = cache
      .with_cache("k", || async { Err::<String, _>(eyre!("upstream down")) })
      .await;
    assert!(result.is_err());
    assert_eq!(cache.get("k"), None);
  }

  #[tokio::test]
  async fn stale_hit_returns_old_value_without_waiting() {
    // Zero stale time: every hit is a stale hit.
    let cache = cache(10_000, 0);
    cache.set("k", "old".to_string());

    let value = cache
      .with_cache("k", || async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok("new".to_string())
      })
      .await
      .unwrap();
    assert_eq!(value, "old");

    // The background refresh lands later.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.get("k"), Some("new".to_string()));
  }

  #[tokio::test]
  async fn failed_background_refresh_keeps_stale_value() {
    let cache = cache(10_000, 0);
    cache.set("k", "old".to_string());

    let value = cache
      .with_cache("k", || async { Err::<String, _>(eyre!("flaky network")) })
      .await
      .unwrap();
    assert_eq!(value, "old");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.get("k"), Some("old".to_string()));
  }

  #[tokio::test]
  async fn concurrent_cold_misses_share_one_producer() {
    let cache = cache(10_000, 5_000);
    let calls = Arc::new(AtomicU32::new(0));

    let a = {
      let cache = cache.clone();
      let calls = calls.clone();
      async move {
        cache
          .with_cache("k", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok("shared".to_string())
          })
          .await
      }
    };
    let b = {
      let cache = cache.clone();
      let calls = calls.clone();
      async move {
        // Give the first caller a head start so it becomes the leader.
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache
          .with_cache("k", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("duplicate".to_string())
          })
          .await
      }
    };

    let (ra, rb) = tokio::join!(a, b);
    assert_eq!(ra.unwrap(), "shared");
    assert_eq!(rb.unwrap(), "shared");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn concurrent_stale_hits_launch_one_refresh() {
    let cache = cache(10_000, 0);
    cache.set("k", "old".to_string());
    let calls = Arc::new(AtomicU32::new(0));

    let producer = |calls: Arc<AtomicU32>| {
      move || async move {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok("new".to_string())
      }
    };

    let (ra, rb) = tokio::join!(
      cache.with_cache("k", producer(calls.clone())),
      cache.with_cache("k", producer(calls.clone()))
    );
    assert_eq!(ra.unwrap(), "old");
    assert_eq!(rb.unwrap(), "old");

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("k"), Some("new".to_string()));
  }

  #[tokio::test]
  async fn refresh_does_not_resurrect_cleared_entry() {
    let cache = cache(10_000, 0);
    cache.set("k", "old".to_string());

    let value = cache
      .with_cache("k", || async {
        tokio::time::sleep(Duration::from_millis(40)).await;
        Ok("zombie".to_string())
      })
      .await
      .unwrap();
    assert_eq!(value, "old");

    // Deliberate clear while the refresh is mid-flight.
    tokio::time::sleep(Duration::from_millis(10)).await;
    cache.clear();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cache.get("k"), None);
  }

  #[tokio::test]
  async fn refresh_does_not_resurrect_invalidated_key() {
    let cache = cache(10_000, 0);
    cache.set("k", "old".to_string());

    let _ = cache
      .with_cache("k", || async {
        tokio::time::sleep(Duration::from_millis(40)).await;
        Ok("zombie".to_string())
      })
      .await
      .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    cache.invalidate("k");

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cache.get("k"), None);
  }
}
