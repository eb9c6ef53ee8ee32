//! Idempotency Replay Store
//!
//! Stores successful responses under a client-supplied idempotency key and
//! replays them verbatim on retry. Failed responses are never stored, so a
//! failed operation can be retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{Expiry, TtlStore};
use crate::error::Result;
use crate::models::StoredResponse;

/// Request header carrying the idempotency key
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Default lifetime of a stored response
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const DEFAULT_CAPACITY: usize = 10_000;

// == Idempotency Store ==
#[derive(Debug)]
pub struct IdempotencyStore {
    records: Arc<TtlStore<StoredResponse>>,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            records: Arc::new(TtlStore::new("idempotency", capacity, ttl)),
        }
    }

    /// Backing store, exposed so the sweep task can reclaim expired records.
    pub fn records(&self) -> &Arc<TtlStore<StoredResponse>> {
        &self.records
    }

    fn record_key(key: &str) -> String {
        format!("idempotency:{}", key)
    }

    pub fn lookup(&self, key: &str) -> Option<StoredResponse> {
        self.records.get(&Self::record_key(key))
    }

    // == Handle ==
    /// Replays the response stored under `key`, or runs `handler` and stores
    /// its response if it is a 2xx.
    ///
    /// Without a key the handler always runs and nothing is stored. Handler
    /// errors are returned unchanged.
    pub async fn handle<F, Fut>(&self, key: Option<&str>, handler: F) -> Result<StoredResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StoredResponse>>,
    {
        let Some(key) = key else {
            return handler().await;
        };

        if let Some(stored) = self.lookup(key) {
            debug!(key, "Replaying idempotent response");
            return Ok(stored);
        }

        let response = handler().await?;
        if response.is_success() {
            self.records
                .set(&Self::record_key(key), response.clone(), Expiry::Default);
        } else {
            debug!(key, status = %response.status, "Not storing unsuccessful response");
        }
        Ok(response)
    }
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDEMPOTENCY_TTL)
    }
}
