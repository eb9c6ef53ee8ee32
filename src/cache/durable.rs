//! Durable Tier Module
//!
//! Slower, persistent key/value tier backed by a JSON snapshot on disk, with a
//! tag secondary index for bulk invalidation.
//!
//! The tier degrades instead of failing: when no storage directory is
//! configured, or the directory cannot be created or written, every
//! operation becomes a no-op that reports "unavailable" (`None`, `false`, `0`).
//! Opening is attempted once and memoized; concurrent first callers share the
//! same attempt.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::cache::entry::{current_timestamp_ms, expiry_deadline};
use crate::cache::TagIndex;
use crate::error::Result;

/// File name of the snapshot inside the storage directory
const SNAPSHOT_FILE: &str = "cache-store.json";

// == Write Options ==
/// TTL and tags for a durable write.
#[derive(Debug, Clone, Default)]
pub struct DurableWrite {
    /// Time to live, `None` = never expires
    pub ttl: Option<Duration>,
    /// Invalidation tags
    pub tags: Vec<String>,
}

impl DurableWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

// == Durable Record ==
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DurableRecord {
    value: Value,
    created_at: u64,
    expires_at: Option<u64>,
    #[serde(default)]
    tags: Vec<String>,
}

impl DurableRecord {
    fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|expires| now_ms >= expires)
    }
}

// == Durable State ==
#[derive(Debug, Default)]
struct DurableState {
    records: HashMap<String, DurableRecord>,
    tags: TagIndex,
}

impl DurableState {
    fn from_records(records: HashMap<String, DurableRecord>) -> Self {
        let mut tags = TagIndex::new();
        for (key, record) in &records {
            tags.tag(key, record.tags.iter().cloned());
        }
        Self { records, tags }
    }

    fn remove(&mut self, key: &str) -> bool {
        self.tags.untag(key);
        self.records.remove(key).is_some()
    }

    fn remove_where<F>(&mut self, mut matches: F) -> usize
    where
        F: FnMut(&str, &DurableRecord) -> bool,
    {
        let keys: Vec<String> = self
            .records
            .iter()
            .filter(|(key, record)| matches(key, record))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }
}

// == Durable Handle ==
/// An opened storage directory.
#[derive(Debug)]
struct DurableHandle {
    file: PathBuf,
    state: Mutex<DurableState>,
}

impl DurableHandle {
    async fn open(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let file = dir.join(SNAPSHOT_FILE);

        let records = match tokio::fs::read(&file).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, DurableRecord>>(&bytes) {
                Ok(records) => records,
                Err(err) => {
                    warn!(file = %file.display(), error = %err, "Durable snapshot unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };

        let mut state = DurableState::from_records(records);
        let now = current_timestamp_ms();
        state.remove_where(|_, record| record.is_expired_at(now));

        let handle = Self {
            file,
            state: Mutex::new(state),
        };
        // writing the snapshot once doubles as the writability check
        {
            let state = handle.state.lock().await;
            handle.persist(&state).await?;
        }
        Ok(handle)
    }

    async fn persist(&self, state: &DurableState) -> Result<()> {
        let bytes = serde_json::to_vec(&state.records)?;
        let tmp = self.file.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.file).await?;
        Ok(())
    }
}

// == Durable Store ==
/// Persistent cache tier with the same contract as the in-memory store plus
/// tag-scoped bulk delete.
#[derive(Debug)]
pub struct DurableStore {
    name: String,
    dir: Option<PathBuf>,
    handle: OnceCell<Option<DurableHandle>>,
}

impl DurableStore {
    // == Constructor ==
    /// Creates a tier stored under `dir`. Nothing touches the disk until the
    /// first operation.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            name: "durable".to_string(),
            dir: Some(dir.into()),
            handle: OnceCell::new(),
        }
    }

    /// Creates a tier with no storage behind it; every operation is a no-op.
    pub fn unavailable() -> Self {
        Self {
            name: "durable".to_string(),
            dir: None,
            handle: OnceCell::new(),
        }
    }

    /// Creates a tier from an optional directory.
    pub fn from_path(dir: Option<PathBuf>) -> Self {
        match dir {
            Some(dir) => Self::new(dir),
            None => Self::unavailable(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // == Init ==
    async fn handle(&self) -> Option<&DurableHandle> {
        self.handle
            .get_or_init(|| async {
                let Some(dir) = self.dir.as_deref() else {
                    warn!("Durable cache tier not configured, running without it");
                    return None;
                };
                match DurableHandle::open(dir).await {
                    Ok(handle) => {
                        info!(dir = %dir.display(), "Durable cache tier opened");
                        Some(handle)
                    }
                    Err(err) => {
                        warn!(dir = %dir.display(), error = %err, "Durable cache tier unavailable");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    /// Returns true once the tier has been opened successfully.
    pub async fn is_available(&self) -> bool {
        self.handle().await.is_some()
    }

    // == Get ==
    /// Returns the stored JSON value if present and not expired.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let Some(handle) = self.handle().await else {
            return Ok(None);
        };
        let mut state = handle.state.lock().await;
        let now = current_timestamp_ms();

        let lookup = state
            .records
            .get(key)
            .map(|record| (!record.is_expired_at(now)).then(|| record.value.clone()));

        match lookup {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                state.remove(key);
                handle.persist(&state).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Typed variant of [`DurableStore::get`]. A value that no longer decodes
    /// as `T` is treated as a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self
            .get(key)
            .await?
            .and_then(|value| serde_json::from_value(value).ok()))
    }

    pub async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    // == Set ==
    /// Stores a value. Returns `false` when the tier is unavailable.
    pub async fn set(&self, key: &str, value: Value, write: DurableWrite) -> Result<bool> {
        let Some(handle) = self.handle().await else {
            return Ok(false);
        };
        let now = current_timestamp_ms();
        let record = DurableRecord {
            value,
            created_at: now,
            expires_at: write.ttl.and_then(|ttl| expiry_deadline(now, ttl)),
            tags: write.tags,
        };

        let mut state = handle.state.lock().await;
        state.tags.tag(key, record.tags.iter().cloned());
        state.records.insert(key.to_string(), record);
        handle.persist(&state).await?;
        Ok(true)
    }

    /// Typed variant of [`DurableStore::set`].
    pub async fn set_as<T: Serialize>(&self, key: &str, value: &T, write: DurableWrite) -> Result<bool> {
        self.set(key, serde_json::to_value(value)?, write).await
    }

    // == Delete ==
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let Some(handle) = self.handle().await else {
            return Ok(false);
        };
        let mut state = handle.state.lock().await;
        if !state.remove(key) {
            return Ok(false);
        }
        handle.persist(&state).await?;
        Ok(true)
    }

    /// Deletes every record carrying `tag` using the secondary index.
    pub async fn delete_by_tag(&self, tag: &str) -> Result<usize> {
        let Some(handle) = self.handle().await else {
            return Ok(0);
        };
        let mut state = handle.state.lock().await;
        let keys = state.tags.take_tag(tag);
        let removed = keys
            .iter()
            .filter(|key| state.records.remove(key.as_str()).is_some())
            .count();
        if removed > 0 {
            handle.persist(&state).await?;
            debug!(tag, removed, "Durable tier deleted by tag");
        }
        Ok(removed)
    }

    pub async fn delete_by_pattern(&self, pattern: &Regex) -> Result<usize> {
        let Some(handle) = self.handle().await else {
            return Ok(0);
        };
        let mut state = handle.state.lock().await;
        let removed = state.remove_where(|key, _| pattern.is_match(key));
        if removed > 0 {
            handle.persist(&state).await?;
        }
        Ok(removed)
    }

    // == Clear ==
    pub async fn clear(&self) -> Result<usize> {
        let Some(handle) = self.handle().await else {
            return Ok(0);
        };
        let mut state = handle.state.lock().await;
        let count = state.records.len();
        *state = DurableState::default();
        handle.persist(&state).await?;
        Ok(count)
    }

    // == Cleanup ==
    /// Expiry sweep: removes every record whose TTL has passed.
    pub async fn cleanup(&self) -> Result<usize> {
        let Some(handle) = self.handle().await else {
            return Ok(0);
        };
        let mut state = handle.state.lock().await;
        let now = current_timestamp_ms();
        let removed = state.remove_where(|_, record| record.is_expired_at(now));
        if removed > 0 {
            handle.persist(&state).await?;
        }
        Ok(removed)
    }

    /// Number of stored records, 0 when unavailable.
    pub async fn len(&self) -> usize {
        match self.handle().await {
            Some(handle) => handle.state.lock().await.records.len(),
            None => 0,
        }
    }

    // == Get Or Set ==
    /// Returns the stored value or computes, stores and returns a fresh one.
    ///
    /// When the tier is unavailable this simply runs `compute`.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, compute: F, write: DurableWrite) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get_as::<T>(key).await? {
            return Ok(value);
        }
        let value = compute().await?;
        self.set_as(key, &value, write).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unavailable_tier_is_noop() {
        let store = DurableStore::unavailable();

        assert!(!store.is_available().await);
        assert!(!store.set("k", json!(1), DurableWrite::new()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.delete_by_tag("t").await.unwrap(), 0);
        assert_eq!(store.cleanup().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_directory_degrades() {
        let dir = tempfile::tempdir().unwrap();
        // a regular file where the directory should be
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();

        let store = DurableStore::new(blocker.join("nested"));
        assert!(!store.is_available().await);
        assert!(!store.set("k", json!(1), DurableWrite::new()).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::new(dir.path());

        assert!(store.set("k", json!({"a": 1}), DurableWrite::new()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"a": 1})));
        assert!(store.has("k").await.unwrap());
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DurableStore::new(dir.path());
            store
                .set_as("user:1", &vec!["ada"], DurableWrite::new().tags(["users"]))
                .await
                .unwrap();
        }

        let reopened = DurableStore::new(dir.path());
        let value: Option<Vec<String>> = reopened.get_as("user:1").await.unwrap();
        assert_eq!(value, Some(vec!["ada".to_string()]));
        // tag index is rebuilt from the snapshot
        assert_eq!(reopened.delete_by_tag("users").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_tag() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::new(dir.path());

        let users = DurableWrite::new().tags(["users"]);
        store.set("u1", json!(1), users.clone()).await.unwrap();
        store.set("u2", json!(2), users).await.unwrap();
        store.set("p1", json!(3), DurableWrite::new().tags(["posts"])).await.unwrap();

        assert_eq!(store.delete_by_tag("users").await.unwrap(), 2);
        assert_eq!(store.get("u1").await.unwrap(), None);
        assert_eq!(store.get("p1").await.unwrap(), Some(json!(3)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_expiry_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::new(dir.path());

        let short = DurableWrite::new().ttl(Duration::from_millis(30));
        store.set("a", json!(1), short.clone()).await.unwrap();
        store.set("b", json!(2), short).await.unwrap();
        store.set("c", json!(3), DurableWrite::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.cleanup().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_huge_ttl_is_kept_without_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::new(dir.path());

        let write = DurableWrite::new().ttl(Duration::from_millis(u64::MAX));
        assert!(store.set("k", json!(1), write).await.unwrap());

        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
        assert_eq!(store.cleanup().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_pattern_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::new(dir.path());
        store.set("query:users:1", json!(1), DurableWrite::new()).await.unwrap();
        store.set("query:posts:1", json!(2), DurableWrite::new()).await.unwrap();

        let pattern = Regex::new("^query:users:").unwrap();
        assert_eq!(store.delete_by_pattern(&pattern).await.unwrap(), 1);
        assert_eq!(store.clear().await.unwrap(), 1);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_callers_share_one_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DurableStore::new(dir.path()));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .set(&format!("k{}", i), json!(i), DurableWrite::new())
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }

        assert_eq!(store.len().await, 8);
    }

    #[tokio::test]
    async fn test_get_or_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableStore::new(dir.path());

        let first: u32 = store
            .get_or_set("n", || async { Ok(7) }, DurableWrite::new())
            .await
            .unwrap();
        let second: u32 = store
            .get_or_set("n", || async { Ok(9) }, DurableWrite::new())
            .await
            .unwrap();
        assert_eq!((first, second), (7, 7));
    }
}
