//! Cache Context Module
//!
//! The set of named tiers built once at startup and handed to every
//! component that needs them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheStats, DurableStore, DurableWrite, TtlStore};
use crate::config::Config;
use crate::error::Result;
use crate::models::StoredResponse;

// == Cache Context ==
/// Named cache tiers.
///
/// * `general` - general-purpose values
/// * `api` - buffered API responses
/// * `query` - query results
/// * `durable` - persistent tier behind `general`/`query`
#[derive(Debug, Clone)]
pub struct CacheContext {
    pub general: Arc<TtlStore<Value>>,
    pub api: Arc<TtlStore<StoredResponse>>,
    pub query: Arc<TtlStore<Value>>,
    pub durable: Arc<DurableStore>,
}

impl CacheContext {
    /// Builds all tiers from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            general: Arc::new(TtlStore::new(
                "general",
                config.general_cache_size,
                config.general_cache_ttl,
            )),
            api: Arc::new(TtlStore::new("api", config.api_cache_size, config.api_cache_ttl)),
            query: Arc::new(TtlStore::new(
                "query",
                config.query_cache_size,
                config.query_cache_ttl,
            )),
            durable: Arc::new(DurableStore::from_path(config.durable_cache_path.clone())),
        }
    }

    /// Statistics for every in-memory tier.
    pub fn stats(&self) -> Vec<CacheStats> {
        vec![self.general.stats(), self.api.stats(), self.query.stats()]
    }

    // == Read Through ==
    /// Reads `key` from `tier`, then from the durable tier, and finally
    /// computes it. Fresh values are written to both tiers with `tags`.
    ///
    /// Durable tier failures are logged and treated as misses.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        tier: &TtlStore<Value>,
        key: &str,
        tags: &[&str],
        ttl: Duration,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = tier.get(key) {
            match serde_json::from_value(value) {
                Ok(hit) => {
                    debug!(tier = tier.name(), key, "Memory tier hit");
                    return Ok(hit);
                }
                Err(err) => {
                    warn!(tier = tier.name(), key, error = %err, "Dropping undecodable entry");
                    tier.delete(key);
                }
            }
        }

        match self.durable.get_as::<T>(key).await {
            Ok(Some(hit)) => {
                debug!(key, "Durable tier hit");
                tier.set_tagged(key, serde_json::to_value(&hit)?, ttl, tags.iter().copied());
                return Ok(hit);
            }
            Ok(None) => {}
            Err(err) => warn!(key, error = %err, "Durable tier read failed"),
        }

        let fresh = compute().await?;
        let value = serde_json::to_value(&fresh)?;
        tier.set_tagged(key, value.clone(), ttl, tags.iter().copied());

        let write = DurableWrite::new().ttl(ttl).tags(tags.iter().copied());
        if let Err(err) = self.durable.set(key, value, write).await {
            warn!(key, error = %err, "Durable tier write failed");
        }
        Ok(fresh)
    }
}
