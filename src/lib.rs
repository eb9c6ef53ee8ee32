//! Edge Cache - caching and admission control for HTTP backends
//!
//! Bounded TTL stores with tag invalidation, a durable tier, request
//! coalescing, idempotent replay and rate limiting.

pub mod api;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod idempotency;
pub mod invalidation;
pub mod models;
pub mod ratelimit;
pub mod tasks;

pub use api::{create_router, AppState};
pub use cache::CacheContext;
pub use config::Config;
pub use error::{CacheError, Result};
pub use invalidation::CacheInvalidator;
pub use tasks::spawn_sweep_task;
