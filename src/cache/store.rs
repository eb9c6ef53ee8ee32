//! TTL Store Module
//!
//! Bounded, time-expiring key/value container. Every other component builds on it.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tracing::debug;

use crate::cache::entry::current_timestamp_ms;
use crate::cache::{CacheEntry, CacheStats, Expiry, InsertionOrder, TagIndex};

// == TTL Store ==
/// Capacity-bounded store with TTL expiry and FIFO eviction.
///
/// Entries are evicted in insertion order once `max_size` is reached;
/// reads never change eviction order. Expired entries are removed lazily
/// on read and in bulk by [`TtlStore::cleanup`].
///
/// All operations take a short synchronous lock, so a single call is atomic
/// with respect to other tasks. Use [`TtlStore::update`] for
/// read-modify-write sequences.
#[derive(Debug)]
pub struct TtlStore<V> {
    name: String,
    max_size: usize,
    default_ttl: Option<Duration>,
    inner: Mutex<StoreInner<V>>,
}

#[derive(Debug)]
struct StoreInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    order: InsertionOrder,
    tags: TagIndex,
    stats: CacheStats,
}

impl<V> StoreInner<V> {
    fn is_live(entries: &HashMap<String, CacheEntry<V>>, key: &str, seq: u64) -> bool {
        entries.get(key).is_some_and(|entry| entry.seq == seq)
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.tags.untag(key);
        }
        removed
    }

    fn insert(&mut self, key: &str, mut entry: CacheEntry<V>, max_size: usize) {
        if let Some(existing) = self.entries.get_mut(key) {
            // overwrite keeps the original insertion slot
            entry.seq = existing.seq;
            *existing = entry;
            return;
        }

        while self.entries.len() >= max_size {
            let StoreInner { entries, order, .. } = &mut *self;
            let Some(oldest) = order.pop_oldest(|k, seq| Self::is_live(entries, k, seq)) else {
                break;
            };
            self.remove(&oldest);
            self.stats.record_eviction();
        }

        entry.seq = self.order.push(key);
        self.entries.insert(key.to_string(), entry);

        let StoreInner { entries, order, .. } = &mut *self;
        order.compact(entries.len(), |k, seq| Self::is_live(entries, k, seq));
    }

    fn remove_matching<F>(&mut self, mut matches: F) -> usize
    where
        F: FnMut(&str, &CacheEntry<V>) -> bool,
    {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, entry)| matches(key, entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }
}

impl<V> TtlStore<V> {
    // == Constructor ==
    /// Creates a new store.
    ///
    /// # Arguments
    /// * `name` - Tier name used in logs and statistics
    /// * `max_size` - Maximum number of entries (at least one)
    /// * `default_ttl` - TTL applied when a write passes [`Expiry::Default`];
    ///   a zero duration means entries never expire by default
    pub fn new(name: impl Into<String>, max_size: usize, default_ttl: Duration) -> Self {
        let name = name.into();
        let max_size = max_size.max(1);
        Self {
            inner: Mutex::new(StoreInner {
                entries: HashMap::new(),
                order: InsertionOrder::new(),
                tags: TagIndex::new(),
                stats: CacheStats::new(name.clone(), max_size),
            }),
            name,
            max_size,
            default_ttl: (!default_ttl.is_zero()).then_some(default_ttl),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    // == Set ==
    /// Stores a value, replacing any previous value and its tags.
    ///
    /// If the key is new and the store is full, the oldest-inserted entry
    /// is evicted first.
    pub fn set(&self, key: &str, value: V, expiry: impl Into<Expiry>) -> bool {
        self.set_tagged(key, value, expiry, std::iter::empty::<String>())
    }

    /// Stores a value and attaches invalidation tags to it.
    pub fn set_tagged<I, S>(&self, key: &str, value: V, expiry: impl Into<Expiry>, tags: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ttl = expiry.into().resolve(self.default_ttl);
        let entry = CacheEntry::new(value, ttl);

        let mut inner = self.inner.lock();
        inner.insert(key, entry, self.max_size);
        inner.tags.tag(key, tags);
        true
    }

    // == Has ==
    /// Returns true if a live entry exists. Expired entries are removed.
    pub fn has(&self, key: &str) -> bool {
        let now = current_timestamp_ms();
        let mut inner = self.inner.lock();
        match inner.entries.get(key).map(|entry| entry.is_expired_at(now)) {
            Some(false) => true,
            Some(true) => {
                inner.remove(key);
                inner.stats.record_expirations(1);
                false
            }
            None => false,
        }
    }

    /// Milliseconds left before `key` expires. `None` when the key is
    /// missing, already expired, or never expires.
    pub fn ttl_remaining_ms(&self, key: &str) -> Option<u64> {
        let now = current_timestamp_ms();
        let inner = self.inner.lock();
        let expires = inner.entries.get(key)?.expires_at?;
        (expires > now).then(|| expires - now)
    }

    // == Delete ==
    /// Removes an entry. Returns whether anything was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Removes every key whose string form matches `pattern`.
    pub fn delete_by_pattern(&self, pattern: &Regex) -> usize {
        let removed = self
            .inner
            .lock()
            .remove_matching(|key, _| pattern.is_match(key));
        if removed > 0 {
            debug!(tier = %self.name, %pattern, removed, "Deleted keys by pattern");
        }
        removed
    }

    /// Removes every key tagged with `tag`.
    pub fn delete_by_tag(&self, tag: &str) -> usize {
        let mut inner = self.inner.lock();
        let keys = inner.tags.take_tag(tag);
        keys.iter()
            .filter(|key| inner.entries.remove(key.as_str()).is_some())
            .count()
    }

    // == Cleanup ==
    /// Removes all expired entries and returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = current_timestamp_ms();
        let mut inner = self.inner.lock();
        let removed = inner.remove_matching(|_, entry| entry.is_expired_at(now));
        inner.stats.record_expirations(removed);

        let StoreInner { entries, order, .. } = &mut *inner;
        order.compact(entries.len(), |k, seq| StoreInner::is_live(entries, k, seq));
        removed
    }

    // == Clear ==
    /// Empties the store and returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.order.clear();
        inner.tags.clear();
        count
    }

    // == Length ==
    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently stored, oldest insertion first.
    pub fn keys(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut keys: Vec<(u64, String)> = inner
            .entries
            .iter()
            .map(|(key, entry)| (entry.seq, key.clone()))
            .collect();
        keys.sort_unstable();
        keys.into_iter().map(|(_, key)| key).collect()
    }

    /// Tags attached to a stored key.
    pub fn tags_for(&self, key: &str) -> Vec<String> {
        self.inner.lock().tags.tags_for(key)
    }

    // == Stats ==
    /// Returns a statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        let now = current_timestamp_ms();
        let inner = self.inner.lock();
        let expired = inner
            .entries
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .count();

        let mut stats = inner.stats.clone();
        stats.total_entries = inner.entries.len();
        stats.expired_entries = expired;
        stats.active_entries = inner.entries.len() - expired;
        stats
    }
}

impl<V: Clone> TtlStore<V> {
    // == Get ==
    /// Returns the value if present and not expired.
    ///
    /// An expired entry is removed and reported exactly like a missing one.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = current_timestamp_ms();
        let mut inner = self.inner.lock();
        let lookup = inner
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired_at(now)).then(|| entry.value.clone()));

        match lookup {
            Some(Some(value)) => {
                inner.stats.record_hit();
                Some(value)
            }
            Some(None) => {
                inner.remove(key);
                inner.stats.record_expirations(1);
                inner.stats.record_miss();
                None
            }
            None => {
                inner.stats.record_miss();
                None
            }
        }
    }

    // == Update ==
    /// Atomic read-modify-write of one key.
    ///
    /// `f` receives the current live value (if any) and returns the value to
    /// store plus a result handed back to the caller. The store lock is held
    /// for the whole call, so `f` must not block.
    pub fn update<R, F>(&self, key: &str, expiry: impl Into<Expiry>, f: F) -> R
    where
        F: FnOnce(Option<V>) -> (V, R),
    {
        let now = current_timestamp_ms();
        let ttl = expiry.into().resolve(self.default_ttl);

        let mut inner = self.inner.lock();
        let current = match inner.entries.get(key) {
            Some(entry) if entry.is_expired_at(now) => {
                inner.remove(key);
                inner.stats.record_expirations(1);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        };

        let (next, result) = f(current);
        inner.insert(key, CacheEntry::new(next, ttl), self.max_size);
        result
    }

    // == Get Or Set ==
    /// Returns the cached value, or awaits `compute` once and stores its result.
    ///
    /// Concurrent misses for the same key may each run `compute`; use the
    /// request coalescer when that matters.
    pub async fn get_or_set<F, Fut>(&self, key: &str, compute: F, expiry: impl Into<Expiry>) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = compute().await;
        self.set(key, value.clone(), expiry);
        value
    }

    /// Fallible variant of [`TtlStore::get_or_set`]; errors are returned and nothing is stored.
    pub async fn try_get_or_set<F, Fut, E>(
        &self,
        key: &str,
        compute: F,
        expiry: impl Into<Expiry>,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, value.clone(), expiry);
        Ok(value)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::sleep;

    fn store(max: usize) -> TtlStore<String> {
        TtlStore::new("test", max, Duration::from_secs(300))
    }

    #[test]
    fn test_store_set_and_get() {
        let store = store(100);

        assert!(store.set("key1", "value1".to_string(), Expiry::Default));
        assert_eq!(store.get("key1"), Some("value1".to_string()));
        assert_eq!(store.len(), 1);
        assert!(store.has("key1"));
    }

    #[test]
    fn test_store_get_nonexistent() {
        let store = store(100);
        assert_eq!(store.get("nonexistent"), None);
        assert!(!store.has("nonexistent"));
    }

    #[test]
    fn test_store_delete_is_idempotent() {
        let store = store(100);
        store.set("key1", "value1".to_string(), Expiry::Default);

        assert!(store.delete("key1"));
        assert!(!store.delete("key1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_ttl_expiration_without_cleanup() {
        let store = store(100);
        store.set("key1", "value1".to_string(), Duration::from_millis(50));
        assert!(store.get("key1").is_some());

        sleep(Duration::from_millis(80));

        assert_eq!(store.get("key1"), None);
        // lazy expiry removed it
        assert_eq!(store.len(), 0);
        assert_eq!(store.stats().expirations, 1);
    }

    #[test]
    fn test_store_zero_ttl_never_expires() {
        let store = TtlStore::new("test", 10, Duration::from_millis(10));
        store.set("forever", 1u32, Expiry::Never);
        store.set("default", 2u32, Expiry::Default);

        sleep(Duration::from_millis(30));

        assert_eq!(store.get("forever"), Some(1));
        assert_eq!(store.get("default"), None);
    }

    #[test]
    fn test_store_huge_ttl_is_kept_without_expiry() {
        let store = store(10);
        assert!(store.set("k", "v".to_string(), Duration::from_millis(u64::MAX)));

        assert_eq!(store.get("k"), Some("v".to_string()));
        assert_eq!(store.ttl_remaining_ms("k"), None);
        assert_eq!(store.cleanup(), 0);
    }

    #[test]
    fn test_store_ttl_remaining() {
        let store = store(10);
        store.set("short", "v".to_string(), Duration::from_secs(10));
        store.set("forever", "v".to_string(), Expiry::Never);

        let remaining = store.ttl_remaining_ms("short").unwrap();
        assert!(remaining > 9_000 && remaining <= 10_000);
        assert_eq!(store.ttl_remaining_ms("forever"), None);
        assert_eq!(store.ttl_remaining_ms("missing"), None);
    }

    #[test]
    fn test_store_fifo_eviction_ignores_reads() {
        let store = store(3);
        store.set("key1", "v1".to_string(), Expiry::Default);
        store.set("key2", "v2".to_string(), Expiry::Default);
        store.set("key3", "v3".to_string(), Expiry::Default);

        // reading key1 must not protect it
        assert!(store.get("key1").is_some());

        store.set("key4", "v4".to_string(), Expiry::Default);

        assert_eq!(store.len(), 3);
        assert_eq!(store.get("key1"), None);
        assert!(store.get("key2").is_some());
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_store_overwrite_keeps_insertion_slot() {
        let store = store(2);
        store.set("a", "1".to_string(), Expiry::Default);
        store.set("b", "2".to_string(), Expiry::Default);
        store.set("a", "3".to_string(), Expiry::Default);

        store.set("c", "4".to_string(), Expiry::Default);

        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), Some("2".to_string()));
        assert_eq!(store.keys(), vec!["b", "c"]);
    }

    #[test]
    fn test_store_delete_by_pattern() {
        let store = store(100);
        store.set("query:users:list", "a".to_string(), Expiry::Default);
        store.set("query:users:1", "b".to_string(), Expiry::Default);
        store.set("query:posts:1", "c".to_string(), Expiry::Default);

        let pattern = Regex::new(".*:users:.*").unwrap();
        assert_eq!(store.delete_by_pattern(&pattern), 2);
        assert_eq!(store.delete_by_pattern(&pattern), 0);
        assert_eq!(store.keys(), vec!["query:posts:1"]);
    }

    #[test]
    fn test_store_delete_by_tag() {
        let store = store(100);
        store.set_tagged("u1", "a".to_string(), Expiry::Default, ["users"]);
        store.set_tagged("u2", "b".to_string(), Expiry::Default, ["users", "admins"]);
        store.set_tagged("p1", "c".to_string(), Expiry::Default, ["posts"]);

        assert_eq!(store.delete_by_tag("users"), 2);
        assert_eq!(store.delete_by_tag("admins"), 0);
        assert_eq!(store.keys(), vec!["p1"]);
    }

    #[test]
    fn test_plain_set_drops_previous_tags() {
        let store = store(100);
        store.set_tagged("u1", "a".to_string(), Expiry::Default, ["users"]);
        store.set("u1", "b".to_string(), Expiry::Default);

        assert_eq!(store.delete_by_tag("users"), 0);
        assert_eq!(store.get("u1"), Some("b".to_string()));
    }

    #[test]
    fn test_store_cleanup_expired() {
        let store = store(100);
        store.set("short", "1".to_string(), Duration::from_millis(30));
        store.set("long", "2".to_string(), Duration::from_secs(10));

        sleep(Duration::from_millis(60));

        let stats = store.stats();
        assert_eq!(stats.expired_entries, 1);
        assert_eq!(stats.active_entries, 1);

        assert_eq!(store.cleanup(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long").is_some());
    }

    #[test]
    fn test_store_clear() {
        let store = store(100);
        store.set_tagged("a", "1".to_string(), Expiry::Default, ["t"]);
        store.set("b", "2".to_string(), Expiry::Default);

        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());
        assert_eq!(store.delete_by_tag("t"), 0);
    }

    #[test]
    fn test_store_update_is_read_modify_write() {
        let store: TtlStore<u32> = TtlStore::new("counter", 10, Duration::from_secs(60));

        let first = store.update("hits", Expiry::Default, |cur| {
            let next = cur.unwrap_or(0) + 1;
            (next, next)
        });
        let second = store.update("hits", Expiry::Default, |cur| {
            let next = cur.unwrap_or(0) + 1;
            (next, next)
        });

        assert_eq!((first, second), (1, 2));
        assert_eq!(store.get("hits"), Some(2));
    }

    #[test]
    fn test_store_stats_counts_hits_and_misses() {
        let store = store(100);
        store.set("key1", "value1".to_string(), Expiry::Default);
        store.get("key1");
        store.get("nonexistent");

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[tokio::test]
    async fn test_get_or_set_computes_once_on_miss() {
        let store = store(100);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = store
                .get_or_set(
                    "computed",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        "fresh".to_string()
                    },
                    Expiry::Default,
                )
                .await;
            assert_eq!(value, "fresh");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_try_get_or_set_does_not_store_errors() {
        let store = store(100);

        let failed: Result<String, &str> = store
            .try_get_or_set("k", || async { Err("backend down") }, Expiry::Default)
            .await;
        assert_eq!(failed, Err("backend down"));
        assert!(!store.has("k"));

        let ok: Result<String, &str> = store
            .try_get_or_set("k", || async { Ok("v".to_string()) }, Expiry::Default)
            .await;
        assert_eq!(ok, Ok("v".to_string()));
        assert!(store.has("k"));
    }
}
