//! Token Bucket
//!
//! Per-identity `{tokens, last_refill}` kept in a TTL store. Refills are
//! granted only for whole elapsed intervals.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::warn;

use crate::cache::{current_timestamp_ms, Sweep, TtlStore};
use crate::error::CacheError;
use crate::ratelimit::{client_ip, period_ms, state_ttl, Admission, KeyGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketConfig {
    pub capacity: u64,
    /// Tokens added per elapsed interval
    pub refill_rate: u64,
    pub refill_interval: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_rate: 10,
            refill_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    pub tokens: u64,
    pub last_refill: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConsumeOutcome {
    pub allowed: bool,
    /// Tokens left after this call, reported on rejection too
    pub remaining: u64,
}

fn default_identity(req: &Request) -> String {
    client_ip(req.headers())
}

// == Token Bucket ==
pub struct TokenBucket {
    config: TokenBucketConfig,
    store: Arc<TtlStore<BucketState>>,
    key_generator: KeyGenerator,
}

impl TokenBucket {
    pub fn new(config: TokenBucketConfig, store_size: usize) -> Self {
        let store = TtlStore::new("tokenbucket", store_size, state_ttl(config.refill_interval));
        Self::with_store(config, Arc::new(store))
    }

    pub fn with_store(config: TokenBucketConfig, store: Arc<TtlStore<BucketState>>) -> Self {
        Self {
            config,
            store,
            key_generator: Arc::new(default_identity),
        }
    }

    /// Identity of an HTTP request, client IP by default.
    pub fn key_generator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_generator = Arc::new(f);
        self
    }

    pub fn config(&self) -> TokenBucketConfig {
        self.config
    }

    pub fn store(&self) -> &Arc<TtlStore<BucketState>> {
        &self.store
    }

    fn key(identity: &str) -> String {
        format!("tokenbucket:{}", identity)
    }

    pub fn consume(&self, identity: &str, tokens: u64) -> ConsumeOutcome {
        self.consume_at(identity, tokens, current_timestamp_ms())
    }

    /// Refills for whole intervals elapsed since the last refill, then
    /// takes `tokens` if enough are available.
    pub fn consume_at(&self, identity: &str, tokens: u64, now_ms: u64) -> ConsumeOutcome {
        let TokenBucketConfig {
            capacity,
            refill_rate,
            refill_interval,
        } = self.config;
        let interval_ms = period_ms(refill_interval);

        self.store.update(&Self::key(identity), state_ttl(refill_interval), |state| {
            let mut state = state.unwrap_or(BucketState {
                tokens: capacity,
                last_refill: now_ms,
            });

            let refills = now_ms.saturating_sub(state.last_refill) / interval_ms;
            state.tokens = capacity.min(state.tokens.saturating_add(refills.saturating_mul(refill_rate)));
            state.last_refill = now_ms;

            if state.tokens >= tokens {
                state.tokens -= tokens;
                let remaining = state.tokens;
                (state, ConsumeOutcome { allowed: true, remaining })
            } else {
                let remaining = state.tokens;
                (state, ConsumeOutcome { allowed: false, remaining })
            }
        })
    }

    /// Seconds until the next refill, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        period_ms(self.config.refill_interval).div_ceil(1000)
    }
}

impl Admission for TokenBucket {
    /// Takes one token per request.
    fn admit(&self, req: &Request) -> Option<Response> {
        let identity = (self.key_generator)(req);
        if self.consume(&identity, 1).allowed {
            return None;
        }

        warn!(identity = %identity, capacity = self.config.capacity, "Token bucket exhausted");
        Some(
            CacheError::RateLimited {
                retry_after: self.retry_after_secs(),
            }
            .into_response(),
        )
    }

    fn state(&self) -> Arc<dyn Sweep> {
        let store: Arc<dyn Sweep> = self.store.clone();
        store
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("config", &self.config)
            .field("tracked", &self.store.len())
            .finish()
    }
}
