//! Key Conventions and Cached Queries
//!
//! Helpers for building convention-encoded keys, and an explicit
//! higher-order wrapper that caches the results of a fallible query.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Expiry, TtlStore};

// == Cache Tags ==
/// Well-known invalidation tags.
pub struct CacheTags;

impl CacheTags {
    pub const USERS: &'static str = "users";
    pub const POSTS: &'static str = "posts";
    pub const PRODUCTS: &'static str = "products";
    pub const CATEGORIES: &'static str = "categories";
    pub const SETTINGS: &'static str = "settings";
}

// == Cache Duration ==
/// Common TTLs.
pub struct CacheDuration;

impl CacheDuration {
    pub const NONE: Duration = Duration::ZERO;
    pub const SHORT: Duration = Duration::from_secs(60);
    pub const MEDIUM: Duration = Duration::from_secs(300);
    pub const LONG: Duration = Duration::from_secs(3600);
    pub const DAY: Duration = Duration::from_secs(86_400);
    pub const WEEK: Duration = Duration::from_secs(604_800);
}

// == Key Builders ==
/// Joins the non-empty parts with `:`.
///
/// Tag invalidation matches `.*:<tag>:.*`, so a key that should be covered by
/// a tag needs the tag as an inner segment, e.g. `cache_key(&["query", "users", "list"])`.
pub fn cache_key(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(":")
}

/// Key pattern matching every key with `tag` as an inner segment.
pub fn tag_pattern(tag: &str) -> String {
    format!(".*:{}:.*", regex::escape(tag))
}

/// Key pattern matching every key derived from a URL path.
pub fn path_pattern(path: &str) -> String {
    format!(".*{}.*", regex::escape(&path.replace('/', ":")))
}

// == Cached Query ==
/// A query whose results are cached in a [`TtlStore`].
///
/// Built with [`cached`]; call it with [`CachedQuery::call`].
pub struct CachedQuery<V, K, F> {
    store: Arc<TtlStore<V>>,
    key_fn: K,
    compute: F,
    expiry: Expiry,
    tags: Vec<String>,
}

/// Wraps `compute` so results are cached under the key derived by `key_fn`.
pub fn cached<V, K, F>(store: Arc<TtlStore<V>>, key_fn: K, compute: F) -> CachedQuery<V, K, F> {
    CachedQuery {
        store,
        key_fn,
        compute,
        expiry: Expiry::Default,
        tags: Vec::new(),
    }
}

impl<V, K, F> CachedQuery<V, K, F> {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.expiry = ttl.into();
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

impl<V: Clone, K, F> CachedQuery<V, K, F> {
    /// Returns the cached result for `args`, running the query on a miss.
    /// Errors are returned as-is and never cached.
    pub async fn call<A, Fut, E>(&self, args: A) -> Result<V, E>
    where
        K: Fn(&A) -> String,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = (self.key_fn)(&args);
        if let Some(value) = self.store.get(&key) {
            return Ok(value);
        }
        let value = (self.compute)(args).await?;
        self.store
            .set_tagged(&key, value.clone(), self.expiry, self.tags.iter().cloned());
        Ok(value)
    }
}
