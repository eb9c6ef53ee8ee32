//! Invalidation Module
//!
//! Fan-out invalidation across cache tiers, listeners and revalidation hooks,
//! plus the periodic expiry sweep.

mod hooks;
mod invalidator;
mod plan;

pub use hooks::{
    InvalidationKind, InvalidationReport, Listener, ListenerId, NoopRevalidator, PathKind,
    Revalidator,
};
pub use invalidator::{CacheInvalidator, SweepReport};
pub use plan::InvalidationPlan;
