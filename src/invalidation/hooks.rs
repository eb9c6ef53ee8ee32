//! Invalidation Hooks
//!
//! Collaborators the invalidator calls out to: listeners registered per
//! event kind, and the framework-level revalidation hook.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// == Event Kinds ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationKind {
    Tag,
    Key,
    Path,
    Pattern,
    Clear,
}

impl fmt::Display for InvalidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tag => "tag",
            Self::Key => "key",
            Self::Path => "path",
            Self::Pattern => "pattern",
            Self::Clear => "clear",
        };
        f.write_str(name)
    }
}

/// What a path revalidation refreshes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathKind {
    #[default]
    Page,
    Layout,
}

// == Invalidation Report ==
/// Outcome of one invalidation call. Listeners receive the same value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidationReport {
    pub kind: InvalidationKind,
    /// Tag, key, path or pattern; `None` for clear
    pub target: Option<String>,
    /// Entries removed from in-memory tiers
    pub memory_removed: usize,
    /// Entries removed from the durable tier
    pub durable_removed: usize,
    pub at: DateTime<Utc>,
}

impl InvalidationReport {
    pub(crate) fn new(kind: InvalidationKind, target: Option<&str>) -> Self {
        Self {
            kind,
            target: target.map(str::to_string),
            memory_removed: 0,
            durable_removed: 0,
            at: Utc::now(),
        }
    }

    pub fn total_removed(&self) -> usize {
        self.memory_removed + self.durable_removed
    }
}

// == Listeners ==
/// Handle returned by `CacheInvalidator::on`, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

pub type Listener = Arc<dyn Fn(&InvalidationReport) -> anyhow::Result<()> + Send + Sync>;

// == Revalidator ==
/// Framework-level revalidation for tags and routes, outside the cache tiers.
///
/// Returns whether anything was revalidated. Errors are logged by the
/// invalidator and never fail the invalidation.
pub trait Revalidator: Send + Sync {
    fn revalidate_tag(&self, tag: &str) -> anyhow::Result<bool>;
    fn revalidate_path(&self, path: &str, kind: PathKind) -> anyhow::Result<bool>;
}

/// Revalidator for deployments with nothing to revalidate.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRevalidator;

impl Revalidator for NoopRevalidator {
    fn revalidate_tag(&self, _tag: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn revalidate_path(&self, _path: &str, _kind: PathKind) -> anyhow::Result<bool> {
        Ok(false)
    }
}
