//! Expiry Sweep Task
//!
//! Background task that periodically reclaims expired entries from every
//! cache tier, the durable tier, and any extra expirable state.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Sweep;
use crate::invalidation::CacheInvalidator;

/// Spawns a background task that sweeps expired entries every `interval`.
///
/// The task runs in an infinite loop, sleeping for the interval between
/// passes. Each pass sweeps the invalidator's tiers (the durable tier
/// included) and then each of `extras`. A failing durable sweep is logged
/// by the invalidator and the schedule carries on.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let handle = spawn_sweep_task(invalidator.clone(), vec![coalescer], Duration::from_secs(300));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_sweep_task(
    invalidator: Arc<CacheInvalidator>,
    extras: Vec<Arc<dyn Sweep>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting cache sweep task");

        loop {
            tokio::time::sleep(interval).await;

            let report = invalidator.sweep().await;
            let extra_removed: usize = extras
                .iter()
                .map(|extra| {
                    let removed = extra.sweep();
                    if removed > 0 {
                        debug!(target_name = extra.label(), removed, "Swept expired state");
                    }
                    removed
                })
                .sum();

            let total = report.memory_removed + report.durable_removed + extra_removed;
            if total > 0 {
                info!(
                    memory = report.memory_removed,
                    durable = report.durable_removed,
                    other = extra_removed,
                    "Cache sweep removed expired entries"
                );
            } else {
                debug!("Cache sweep: no expired entries found");
            }
        }
    })
}
