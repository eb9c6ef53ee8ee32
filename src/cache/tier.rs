//! Tier Traits
//!
//! Object-safe views over stores so the invalidator and the sweep task can
//! hold tiers of different value types side by side.

use regex::Regex;

use crate::cache::{CacheStats, TtlStore};

// == Sweep ==
/// Anything holding expirable state that a periodic sweep should reclaim.
pub trait Sweep: Send + Sync {
    /// Name used in logs
    fn label(&self) -> &str;

    /// Removes expired state and returns how many items were dropped.
    fn sweep(&self) -> usize;
}

// == Cache Tier ==
/// An in-memory tier that takes part in invalidation fan-out.
pub trait CacheTier: Sweep {
    fn name(&self) -> &str;
    fn delete(&self, key: &str) -> bool;
    fn delete_by_pattern(&self, pattern: &Regex) -> usize;
    fn delete_by_tag(&self, tag: &str) -> usize;
    fn clear(&self) -> usize;
    fn stats(&self) -> CacheStats;
}

impl<V: Send> Sweep for TtlStore<V> {
    fn label(&self) -> &str {
        TtlStore::name(self)
    }

    fn sweep(&self) -> usize {
        TtlStore::cleanup(self)
    }
}

impl<V: Send> CacheTier for TtlStore<V> {
    fn name(&self) -> &str {
        TtlStore::name(self)
    }

    fn delete(&self, key: &str) -> bool {
        TtlStore::delete(self, key)
    }

    fn delete_by_pattern(&self, pattern: &Regex) -> usize {
        TtlStore::delete_by_pattern(self, pattern)
    }

    fn delete_by_tag(&self, tag: &str) -> usize {
        TtlStore::delete_by_tag(self, tag)
    }

    fn clear(&self) -> usize {
        TtlStore::clear(self)
    }

    fn stats(&self) -> CacheStats {
        TtlStore::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Expiry;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_heterogeneous_tiers_behind_trait_objects() {
        let numbers: Arc<TtlStore<u64>> = Arc::new(TtlStore::new("numbers", 10, Duration::from_secs(60)));
        let words: Arc<TtlStore<String>> = Arc::new(TtlStore::new("words", 10, Duration::from_secs(60)));
        numbers.set("n:users:1", 1, Expiry::Default);
        words.set("w:users:1", "one".to_string(), Expiry::Default);

        let tiers: Vec<Arc<dyn CacheTier>> = vec![numbers.clone(), words.clone()];
        let pattern = Regex::new(".*:users:.*").unwrap();
        let removed: usize = tiers.iter().map(|t| t.delete_by_pattern(&pattern)).sum();

        assert_eq!(removed, 2);
        assert!(numbers.is_empty() && words.is_empty());
        assert_eq!(tiers[1].name(), "words");
    }
}
