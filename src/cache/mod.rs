//! Cache Module
//!
//! Bounded in-memory TTL stores with tag indexes, the durable tier, and the
//! context object that groups the named tiers.

mod context;
mod durable;
mod entry;
mod fifo;
mod keys;
mod stats;
mod store;
mod tag_index;
mod tier;


// Re-export public types
pub use context::CacheContext;
pub use durable::{DurableStore, DurableWrite};
pub use entry::{current_timestamp_ms, expiry_deadline, CacheEntry, Expiry};
pub use fifo::InsertionOrder;
pub use keys::{cache_key, cached, path_pattern, tag_pattern, CacheDuration, CacheTags, CachedQuery};
pub use stats::CacheStats;
pub use store::TtlStore;
pub use tag_index::TagIndex;
pub use tier::{CacheTier, Sweep};
