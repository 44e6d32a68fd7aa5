//! Local-first data layer for a quoting/invoicing app.
//!
//! Reads are served from an in-process cache with TTL and staleness
//! semantics (stale values are returned immediately and refreshed in the
//! background); writes are durable locally first and replicated to a
//! remote store on a best-effort, fire-and-forget basis. Soft-deleted
//! records survive as tombstones for a retention window so deletions can
//! replicate conflict-free, then a scheduled purge removes them for good.

pub mod cache;
pub mod config;
pub mod keys;
pub mod model;
pub mod prices;
pub mod purge;
pub mod reconcile;
pub mod remote;
pub mod service;
pub mod store;
pub mod sync;
pub mod task;
