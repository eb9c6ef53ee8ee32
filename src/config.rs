//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Admission strategy applied to `/api` routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitStrategy {
    /// Requests counted per window
    #[default]
    FixedWindow,
    /// One token per request, refilled per interval
    TokenBucket,
}

impl FromStr for RateLimitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" | "fixed-window" | "fixed_window" => Ok(Self::FixedWindow),
            "token" | "token-bucket" | "token_bucket" => Ok(Self::TokenBucket),
            other => Err(format!("unknown rate limit strategy: {}", other)),
        }
    }
}

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Capacity of the general-purpose tier
    pub general_cache_size: usize,
    /// Default TTL of the general-purpose tier
    pub general_cache_ttl: Duration,
    /// Capacity of the API response tier
    pub api_cache_size: usize,
    /// Default TTL of the API response tier
    pub api_cache_ttl: Duration,
    /// Capacity of the query result tier
    pub query_cache_size: usize,
    /// Default TTL of the query result tier
    pub query_cache_ttl: Duration,
    /// Directory of the durable tier; `None` runs without it
    pub durable_cache_path: Option<PathBuf>,
    /// Interval of the background expiry sweep
    pub sweep_interval: Duration,
    /// How long a coalesced request stays shareable
    pub dedup_ttl: Duration,
    /// How long successful idempotent responses are replayed
    pub idempotency_ttl: Duration,
    /// Requests allowed per window and identity
    pub rate_limit_max_requests: usize,
    /// Rate limit window
    pub rate_limit_window: Duration,
    /// Capacity of the rate limit state store
    pub rate_limit_store_size: usize,
    /// Which limiter guards the API
    pub rate_limit_strategy: RateLimitStrategy,
    /// Token bucket size per identity
    pub token_bucket_capacity: u64,
    /// Tokens added per refill interval
    pub token_bucket_refill_rate: u64,
    /// Token bucket refill interval
    pub token_bucket_refill_interval: Duration,
}

/// Reads and parses an environment variable, falling back to `default`.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_or(name, default_ms))
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` (default: 3000)
    /// - `GENERAL_CACHE_SIZE` / `GENERAL_CACHE_TTL_MS` (default: 200 / 300000)
    /// - `API_CACHE_SIZE` / `API_CACHE_TTL_MS` (default: 100 / 60000)
    /// - `QUERY_CACHE_SIZE` / `QUERY_CACHE_TTL_MS` (default: 150 / 120000)
    /// - `DURABLE_CACHE_PATH` (default: unset, durable tier disabled)
    /// - `SWEEP_INTERVAL_SECS` (default: 300)
    /// - `DEDUP_TTL_MS` (default: 5000)
    /// - `IDEMPOTENCY_TTL_MS` (default: 86400000)
    /// - `RATE_LIMIT_MAX_REQUESTS` / `RATE_LIMIT_WINDOW_MS` (default: 100 / 60000)
    /// - `RATE_LIMIT_STORE_SIZE` (default: 10000)
    /// - `RATE_LIMIT_STRATEGY` (`fixed-window` or `token-bucket`, default: fixed-window)
    /// - `TOKEN_BUCKET_CAPACITY` / `TOKEN_BUCKET_REFILL_RATE` (default: 100 / 10)
    /// - `TOKEN_BUCKET_REFILL_INTERVAL_MS` (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_port: env_or("SERVER_PORT", defaults.server_port),
            general_cache_size: env_or("GENERAL_CACHE_SIZE", defaults.general_cache_size),
            general_cache_ttl: env_millis("GENERAL_CACHE_TTL_MS", 300_000),
            api_cache_size: env_or("API_CACHE_SIZE", defaults.api_cache_size),
            api_cache_ttl: env_millis("API_CACHE_TTL_MS", 60_000),
            query_cache_size: env_or("QUERY_CACHE_SIZE", defaults.query_cache_size),
            query_cache_ttl: env_millis("QUERY_CACHE_TTL_MS", 120_000),
            durable_cache_path: env::var("DURABLE_CACHE_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            sweep_interval: Duration::from_secs(env_or("SWEEP_INTERVAL_SECS", 300)),
            dedup_ttl: env_millis("DEDUP_TTL_MS", 5_000),
            idempotency_ttl: env_millis("IDEMPOTENCY_TTL_MS", 86_400_000),
            rate_limit_max_requests: env_or(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            ),
            rate_limit_window: env_millis("RATE_LIMIT_WINDOW_MS", 60_000),
            rate_limit_store_size: env_or("RATE_LIMIT_STORE_SIZE", defaults.rate_limit_store_size),
            rate_limit_strategy: env_or("RATE_LIMIT_STRATEGY", defaults.rate_limit_strategy),
            token_bucket_capacity: env_or("TOKEN_BUCKET_CAPACITY", defaults.token_bucket_capacity),
            token_bucket_refill_rate: env_or(
                "TOKEN_BUCKET_REFILL_RATE",
                defaults.token_bucket_refill_rate,
            ),
            token_bucket_refill_interval: env_millis("TOKEN_BUCKET_REFILL_INTERVAL_MS", 1_000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            general_cache_size: 200,
            general_cache_ttl: Duration::from_millis(300_000),
            api_cache_size: 100,
            api_cache_ttl: Duration::from_millis(60_000),
            query_cache_size: 150,
            query_cache_ttl: Duration::from_millis(120_000),
            durable_cache_path: None,
            sweep_interval: Duration::from_secs(300),
            dedup_ttl: Duration::from_millis(5_000),
            idempotency_ttl: Duration::from_millis(86_400_000),
            rate_limit_max_requests: 100,
            rate_limit_window: Duration::from_millis(60_000),
            rate_limit_store_size: 10_000,
            rate_limit_strategy: RateLimitStrategy::FixedWindow,
            token_bucket_capacity: 100,
            token_bucket_refill_rate: 10,
            token_bucket_refill_interval: Duration::from_millis(1_000),
        }
    }
}
