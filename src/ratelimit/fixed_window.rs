//! Fixed Window Limiter
//!
//! Per-identity request timestamps kept in a TTL store. Timestamps older
//! than the window are pruned on every check.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::cache::{current_timestamp_ms, Sweep, TtlStore};
use crate::error::CacheError;
use crate::ratelimit::{client_ip, period_ms, state_ttl, Admission, RateLimitDecision};

pub type KeyGenerator = Arc<dyn Fn(&Request) -> String + Send + Sync>;
pub type SkipPredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;
pub type RejectionHandler = Arc<dyn Fn(&RateLimitRejection) -> Response + Send + Sync>;

// == Policy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: usize,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// 10 requests per minute.
    pub fn strict() -> Self {
        Self::new(10, Duration::from_secs(60))
    }

    /// 50 requests per minute.
    pub fn api() -> Self {
        Self::new(50, Duration::from_secs(60))
    }

    fn window_ms(&self) -> u64 {
        period_ms(self.window)
    }

    /// Seconds a rejected client should wait, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        self.window_ms().div_ceil(1000)
    }
}

/// 100 requests per minute.
impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

// == State ==
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowState {
    /// Accepted request timestamps, oldest first
    pub requests: VecDeque<u64>,
    pub window_start: u64,
}

/// Passed to the rejection handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRejection {
    pub key: String,
    pub limit: usize,
    pub retry_after: u64,
}

fn default_key(req: &Request) -> String {
    format!("ratelimit:{}", client_ip(req.headers()))
}

fn api_key(req: &Request) -> String {
    format!("ratelimit:api:{}:{}", req.uri().path(), client_ip(req.headers()))
}

fn default_rejection(rejection: &RateLimitRejection) -> Response {
    CacheError::RateLimited {
        retry_after: rejection.retry_after,
    }
    .into_response()
}

// == Rate Limiter ==
pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: Arc<TtlStore<WindowState>>,
    key_generator: KeyGenerator,
    skip: Option<SkipPredicate>,
    on_limited: RejectionHandler,
}

impl RateLimiter {
    /// Creates a limiter keyed by client IP with its own state store.
    pub fn new(policy: RateLimitPolicy, store_size: usize) -> Self {
        let store = TtlStore::new("ratelimit", store_size, state_ttl(policy.window));
        Self::with_store(policy, Arc::new(store))
    }

    /// Creates a limiter sharing an existing state store.
    pub fn with_store(policy: RateLimitPolicy, store: Arc<TtlStore<WindowState>>) -> Self {
        Self {
            policy,
            store,
            key_generator: Arc::new(default_key),
            skip: None,
            on_limited: Arc::new(default_rejection),
        }
    }

    /// 50 requests per minute per path and client IP.
    pub fn api(store_size: usize) -> Self {
        Self::new(RateLimitPolicy::api(), store_size).key_generator(api_key)
    }

    pub fn strict(store_size: usize) -> Self {
        Self::new(RateLimitPolicy::strict(), store_size)
    }

    pub fn key_generator<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_generator = Arc::new(f);
        self
    }

    /// Requests for which `f` returns true bypass the limiter.
    pub fn skip<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(f));
        self
    }

    pub fn on_limited<F>(mut self, f: F) -> Self
    where
        F: Fn(&RateLimitRejection) -> Response + Send + Sync + 'static,
    {
        self.on_limited = Arc::new(f);
        self
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<TtlStore<WindowState>> {
        &self.store
    }

    // == Check ==
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, current_timestamp_ms())
    }

    /// Records a request for `key` at `now_ms` unless the window is full.
    pub fn check_at(&self, key: &str, now_ms: u64) -> RateLimitDecision {
        let window_ms = self.policy.window_ms();
        let max = self.policy.max_requests;
        let retry_after = self.policy.retry_after_secs();

        self.store
            .update(key, state_ttl(self.policy.window), |state| {
                let mut state = state.unwrap_or_else(|| WindowState {
                    requests: VecDeque::new(),
                    window_start: now_ms,
                });
                while state
                    .requests
                    .front()
                    .is_some_and(|&ts| now_ms.saturating_sub(ts) >= window_ms)
                {
                    state.requests.pop_front();
                }

                if state.requests.len() >= max {
                    return (state, RateLimitDecision::Limited { retry_after });
                }

                if state.requests.is_empty() {
                    state.window_start = now_ms;
                }
                state.requests.push_back(now_ms);
                let remaining = max - state.requests.len();
                (state, RateLimitDecision::Allowed { remaining })
            })
    }

    // == Request Admission ==
    /// Checks an HTTP request. Returns the rejection response when the
    /// client is over its limit, `None` when the request may proceed.
    pub fn admit(&self, req: &Request) -> Option<Response> {
        if self.skip.as_ref().is_some_and(|skip| skip(req)) {
            return None;
        }

        let key = (self.key_generator)(req);
        match self.check(&key) {
            RateLimitDecision::Allowed { .. } => None,
            RateLimitDecision::Limited { retry_after } => {
                warn!(key = %key, limit = self.policy.max_requests, "Rate limit exceeded");
                let rejection = RateLimitRejection {
                    key,
                    limit: self.policy.max_requests,
                    retry_after,
                };
                Some((self.on_limited)(&rejection))
            }
        }
    }
}

impl Admission for RateLimiter {
    fn admit(&self, req: &Request) -> Option<Response> {
        RateLimiter::admit(self, req)
    }

    fn state(&self) -> Arc<dyn Sweep> {
        let store: Arc<dyn Sweep> = self.store.clone();
        store
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("tracked", &self.store.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, StatusCode};

    const T0: u64 = 1_700_000_000_000;

    fn limiter(max: usize, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitPolicy::new(max, Duration::from_millis(window_ms)), 100)
    }

    fn request(path: &str, forwarded: &str) -> Request {
        Request::builder()
            .uri(path)
            .header("x-forwarded-for", forwarded)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_fourth_call_rejected_and_fifth_after_window_accepted() {
        let limiter = limiter(3, 1000);

        assert_eq!(limiter.check_at("ip", T0), RateLimitDecision::Allowed { remaining: 2 });
        assert_eq!(limiter.check_at("ip", T0 + 100), RateLimitDecision::Allowed { remaining: 1 });
        assert_eq!(limiter.check_at("ip", T0 + 200), RateLimitDecision::Allowed { remaining: 0 });
        assert_eq!(limiter.check_at("ip", T0 + 300), RateLimitDecision::Limited { retry_after: 1 });

        // the first timestamp has left the window
        assert!(limiter.check_at("ip", T0 + 1000).is_allowed());
    }

    #[test]
    fn test_rejected_calls_are_not_recorded() {
        let limiter = limiter(1, 1000);
        assert!(limiter.check_at("ip", T0).is_allowed());
        assert!(!limiter.check_at("ip", T0 + 500).is_allowed());
        assert!(!limiter.check_at("ip", T0 + 900).is_allowed());

        // only the accepted request at T0 counted
        assert!(limiter.check_at("ip", T0 + 1000).is_allowed());
    }

    #[test]
    fn test_identities_are_independent() {
        let limiter = limiter(1, 1000);
        assert!(limiter.check_at("a", T0).is_allowed());
        assert!(limiter.check_at("b", T0).is_allowed());
        assert!(!limiter.check_at("a", T0 + 1).is_allowed());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(RateLimitPolicy::new(1, Duration::from_millis(1500)).retry_after_secs(), 2);
        assert_eq!(RateLimitPolicy::default().retry_after_secs(), 60);
        assert_eq!(RateLimitPolicy::strict().max_requests, 10);
        assert_eq!(RateLimitPolicy::api().max_requests, 50);
    }

    #[test]
    fn test_admit_returns_429_with_retry_after() {
        let limiter = limiter(1, 2000);
        let req = request("/api/v1/users", "10.0.0.1");

        assert!(limiter.admit(&req).is_none());
        let response = limiter.admit(&req).expect("second request should be limited");

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
        // other clients are unaffected
        assert!(limiter.admit(&request("/api/v1/users", "10.0.0.2")).is_none());
    }

    #[test]
    fn test_skip_predicate_bypasses_limit() {
        let limiter = limiter(1, 1000).skip(|req| req.uri().path() == "/health");

        for _ in 0..5 {
            assert!(limiter.admit(&request("/health", "10.0.0.1")).is_none());
        }
        assert!(limiter.store().is_empty());
    }

    #[test]
    fn test_api_preset_keys_by_path_and_ip() {
        let limiter = RateLimiter::api(100);
        limiter.admit(&request("/api/v1/users", "10.0.0.1, 10.0.0.9"));

        assert_eq!(limiter.store().keys(), vec!["ratelimit:api:/api/v1/users:10.0.0.1"]);
    }

    #[test]
    fn test_custom_rejection_handler() {
        let limiter = limiter(0, 1000).on_limited(|rejection| {
            (StatusCode::SERVICE_UNAVAILABLE, rejection.key.clone()).into_response()
        });

        let response = limiter.admit(&request("/", "1.2.3.4")).unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_state_outlives_the_window() {
        let limiter = limiter(3, 1000);
        assert_eq!(limiter.store().default_ttl(), Some(Duration::from_secs(10)));

        limiter.check_at("ip", T0);
        let ttl = limiter.store().ttl_remaining_ms("ip").unwrap();
        assert!(ttl > 9_000, "state ttl was {}ms", ttl);
    }

    #[test]
    fn test_usable_as_admission() {
        let limiter: Arc<dyn Admission> = Arc::new(limiter(1, 1000));
        let req = request("/api/v1/users", "10.0.0.1");

        assert!(limiter.admit(&req).is_none());
        assert!(limiter.admit(&req).is_some());
        assert_eq!(limiter.state().label(), "ratelimit");
        assert_eq!(limiter.state().sweep(), 0);
    }
}
