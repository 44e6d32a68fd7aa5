//! In-process caching layer with TTL expiry and stale-while-revalidate.
//!
//! This module is schema-agnostic: it operates on opaque string keys and
//! cloneable values. Cache reads and writes are synchronous and never
//! suspend, which keeps the hit path safe to call from latency-sensitive
//! code. Only the cold-miss branch of `with_cache` awaits the producer.

mod revalidate;
mod ttl;

pub use ttl::{CacheConfig, TtlCache};
