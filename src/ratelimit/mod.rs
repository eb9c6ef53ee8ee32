//! Rate Limiting Module
//!
//! Fixed-window and token-bucket admission control, both backed by TTL stores
//! so idle identities are reclaimed. Either strategy can sit behind the
//! rate limit middleware through [`Admission`].

mod fixed_window;
mod token_bucket;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::response::Response;

use crate::cache::Sweep;

pub use fixed_window::{
    KeyGenerator, RateLimitPolicy, RateLimitRejection, RateLimiter, RejectionHandler,
    SkipPredicate, WindowState,
};
pub use token_bucket::{BucketState, ConsumeOutcome, TokenBucket, TokenBucketConfig};

/// Limiter state lives for this many windows (or refill intervals) after
/// the identity's last request.
pub const STATE_TTL_FACTOR: u32 = 10;

/// TTL of per-identity limiter state for a window or refill interval.
pub fn state_ttl(period: Duration) -> Duration {
    period
        .max(Duration::from_millis(1))
        .saturating_mul(STATE_TTL_FACTOR)
}

/// Whole milliseconds of `period`, at least 1 and saturating at `u64::MAX`.
pub(crate) fn period_ms(period: Duration) -> u64 {
    u64::try_from(period.as_millis()).unwrap_or(u64::MAX).max(1)
}

// == Admission ==
/// Request admission shared by every limiting strategy.
pub trait Admission: Send + Sync {
    /// Returns the rejection response when the client is over its limit,
    /// `None` when the request may proceed.
    fn admit(&self, req: &Request) -> Option<Response>;

    /// Per-identity state, swept with the other expirable state.
    fn state(&self) -> Arc<dyn Sweep>;
}

/// Outcome of a fixed-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: usize },
    Limited { retry_after: u64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Client IP: first `x-forwarded-for` entry, else `x-real-ip`, else `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .unwrap_or("unknown")
        .to_string()
}
