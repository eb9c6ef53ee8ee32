//! Cache Invalidator
//!
//! Fans one invalidation out to every registered tier, the durable tier,
//! the revalidation hook and the listeners for that event kind.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{path_pattern, tag_pattern, CacheContext, CacheTier, DurableStore, Sweep};
use crate::error::Result;
use crate::invalidation::{
    InvalidationKind, InvalidationPlan, InvalidationReport, Listener, ListenerId, NoopRevalidator,
    PathKind, Revalidator,
};
use crate::tasks::spawn_sweep_task;

/// Entries removed by one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub memory_removed: usize,
    pub durable_removed: usize,
}

// == Cache Invalidator ==
pub struct CacheInvalidator {
    tiers: Vec<Arc<dyn CacheTier>>,
    durable: Arc<DurableStore>,
    revalidator: Arc<dyn Revalidator>,
    listeners: RwLock<Vec<(ListenerId, InvalidationKind, Listener)>>,
    next_listener: AtomicU64,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheInvalidator {
    /// Creates an invalidator over the durable tier only; add in-memory
    /// tiers with [`CacheInvalidator::with_tier`].
    pub fn new(durable: Arc<DurableStore>) -> Self {
        Self {
            tiers: Vec::new(),
            durable,
            revalidator: Arc::new(NoopRevalidator),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            sweeper: Mutex::new(None),
        }
    }

    /// Registers every tier of the context.
    pub fn from_context(ctx: &CacheContext) -> Self {
        Self::new(Arc::clone(&ctx.durable))
            .with_tier(ctx.general.clone())
            .with_tier(ctx.api.clone())
            .with_tier(ctx.query.clone())
    }

    pub fn with_tier(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn with_revalidator(mut self, revalidator: Arc<dyn Revalidator>) -> Self {
        self.revalidator = revalidator;
        self
    }

    pub fn tiers(&self) -> &[Arc<dyn CacheTier>] {
        &self.tiers
    }

    // == Listeners ==
    /// Registers `listener` for events of `kind`.
    pub fn on<F>(&self, kind: InvalidationKind, listener: F) -> ListenerId
    where
        F: Fn(&InvalidationReport) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Arc::new(listener);
        self.listeners.write().push((id, kind, listener));
        id
    }

    /// Unregisters a listener. Returns false if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _, _)| *listener_id != id);
        listeners.len() != before
    }

    fn notify(&self, report: &InvalidationReport) {
        // snapshot so listeners may call on/off
        let matching: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|(_, kind, _)| *kind == report.kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in matching {
            match catch_unwind(AssertUnwindSafe(|| listener(report))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(kind = %report.kind, error = %err, "Invalidation listener failed")
                }
                Err(_) => warn!(kind = %report.kind, "Invalidation listener panicked"),
            }
        }
    }

    /// Runs one revalidation hook call. Errors and panics are logged only.
    fn revalidate<F>(&self, subject: &str, call: F)
    where
        F: FnOnce(&dyn Revalidator) -> anyhow::Result<bool>,
    {
        match catch_unwind(AssertUnwindSafe(|| call(self.revalidator.as_ref()))) {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(subject, error = %err, "Revalidation failed"),
            Err(_) => warn!(subject, "Revalidation hook panicked"),
        }
    }

    fn memory_delete_matching(&self, pattern: &Regex) -> usize {
        self.tiers.iter().map(|tier| tier.delete_by_pattern(pattern)).sum()
    }

    // == By Tag ==
    /// Removes every entry tagged `tag` or whose key embeds it, in every tier.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<InvalidationReport> {
        let mut report = InvalidationReport::new(InvalidationKind::Tag, Some(tag));
        let pattern = Regex::new(&tag_pattern(tag))?;

        report.memory_removed = self
            .tiers
            .iter()
            .map(|tier| tier.delete_by_pattern(&pattern) + tier.delete_by_tag(tag))
            .sum();

        report.durable_removed = match self.durable.delete_by_tag(tag).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(tag, error = %err, "Durable tier tag invalidation failed");
                0
            }
        };

        self.revalidate(tag, |hook| hook.revalidate_tag(tag));

        info!(
            tag,
            memory = report.memory_removed,
            durable = report.durable_removed,
            "Invalidated cache by tag"
        );
        self.notify(&report);
        Ok(report)
    }

    pub async fn invalidate_by_tags<I, S>(&self, tags: I) -> Result<Vec<InvalidationReport>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut reports = Vec::new();
        for tag in tags {
            reports.push(self.invalidate_by_tag(tag.as_ref()).await?);
        }
        Ok(reports)
    }

    // == By Key ==
    pub async fn invalidate_key(&self, key: &str) -> InvalidationReport {
        let mut report = InvalidationReport::new(InvalidationKind::Key, Some(key));
        report.memory_removed = self.tiers.iter().filter(|tier| tier.delete(key)).count();

        report.durable_removed = match self.durable.delete(key).await {
            Ok(removed) => usize::from(removed),
            Err(err) => {
                warn!(key, error = %err, "Durable tier key invalidation failed");
                0
            }
        };

        info!(key, removed = report.total_removed(), "Invalidated cache key");
        self.notify(&report);
        report
    }

    // == By Path ==
    /// Removes entries whose keys were derived from `path` and asks the
    /// revalidation hook to refresh the route.
    pub async fn invalidate_by_path(&self, path: &str, kind: PathKind) -> Result<InvalidationReport> {
        let mut report = InvalidationReport::new(InvalidationKind::Path, Some(path));
        let pattern = Regex::new(&path_pattern(path))?;

        report.memory_removed = self.memory_delete_matching(&pattern);
        // durable copies would otherwise refill the memory tiers on the next read
        report.durable_removed = match self.durable.delete_by_pattern(&pattern).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(path, error = %err, "Durable tier path invalidation failed");
                0
            }
        };

        self.revalidate(path, |hook| hook.revalidate_path(path, kind));

        info!(path, removed = report.total_removed(), "Invalidated cache by path");
        self.notify(&report);
        Ok(report)
    }

    // == By Pattern ==
    /// Raw regex deletion across every tier, durable included.
    pub async fn invalidate_by_pattern(&self, pattern: &str) -> Result<InvalidationReport> {
        let regex = Regex::new(pattern)?;
        let mut report = InvalidationReport::new(InvalidationKind::Pattern, Some(pattern));

        report.memory_removed = self.memory_delete_matching(&regex);
        report.durable_removed = match self.durable.delete_by_pattern(&regex).await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(pattern, error = %err, "Durable tier pattern invalidation failed");
                0
            }
        };

        info!(pattern, removed = report.total_removed(), "Invalidated cache by pattern");
        self.notify(&report);
        Ok(report)
    }

    // == Clear ==
    pub async fn clear_all(&self) -> InvalidationReport {
        let mut report = InvalidationReport::new(InvalidationKind::Clear, None);
        report.memory_removed = self.tiers.iter().map(|tier| tier.clear()).sum();

        report.durable_removed = match self.durable.clear().await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(error = %err, "Durable tier clear failed");
                0
            }
        };

        info!(removed = report.total_removed(), "Cleared all cache tiers");
        self.notify(&report);
        report
    }

    // == Plans ==
    /// Applies every part of `plan`: tags, then paths, patterns and keys.
    pub async fn apply(&self, plan: &InvalidationPlan) -> Result<Vec<InvalidationReport>> {
        let mut reports = self.invalidate_by_tags(&plan.tags).await?;
        for path in &plan.paths {
            reports.push(self.invalidate_by_path(path, PathKind::Page).await?);
        }
        for pattern in &plan.patterns {
            reports.push(self.invalidate_by_pattern(pattern).await?);
        }
        for key in &plan.keys {
            reports.push(self.invalidate_key(key).await);
        }
        Ok(reports)
    }

    /// Runs `mutation` and applies `plan` only if it succeeds.
    pub async fn run_mutation<T, F, Fut>(&self, plan: &InvalidationPlan, mutation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = mutation().await?;
        self.apply(plan).await?;
        Ok(result)
    }

    // == Sweep ==
    /// One expiry pass over every in-memory tier and the durable tier.
    pub async fn sweep(&self) -> SweepReport {
        let memory_removed = self.tiers.iter().map(|tier| tier.sweep()).sum();
        let durable_removed = match self.durable.cleanup().await {
            Ok(removed) => removed,
            Err(err) => {
                warn!(error = %err, "Durable tier sweep failed");
                0
            }
        };
        SweepReport {
            memory_removed,
            durable_removed,
        }
    }

    /// Starts the periodic sweep, replacing one already running.
    /// `extras` are swept alongside the tiers on every tick.
    pub fn start_auto_cleanup(self: &Arc<Self>, interval: Duration, extras: Vec<Arc<dyn Sweep>>) {
        let handle = spawn_sweep_task(Arc::clone(self), extras, interval);
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stops the periodic sweep. Returns false if none was running.
    pub fn stop_auto_cleanup(&self) -> bool {
        match self.sweeper.lock().take() {
            Some(handle) => {
                handle.abort();
                info!("Cache sweep stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl std::fmt::Debug for CacheInvalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInvalidator")
            .field("tiers", &self.tiers.iter().map(|t| t.name().to_string()).collect::<Vec<_>>())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
