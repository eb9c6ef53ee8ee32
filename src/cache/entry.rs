//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// == Expiry ==
/// How long an entry written to a store should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Use the store's configured default TTL
    #[default]
    Default,
    /// Never expire by time (capacity eviction still applies)
    Never,
    /// Expire after the given duration
    After(Duration),
}

impl Expiry {
    /// Expiry from a millisecond count, where zero means "no expiry".
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Expiry::Never
        } else {
            Expiry::After(Duration::from_millis(ms))
        }
    }

    /// Resolves against a store default into a concrete TTL, `None` = no expiry.
    pub fn resolve(self, default_ttl: Option<Duration>) -> Option<Duration> {
        match self {
            Expiry::Default => default_ttl,
            Expiry::Never => None,
            Expiry::After(ttl) if ttl.is_zero() => None,
            Expiry::After(ttl) => Some(ttl),
        }
    }
}

impl From<Duration> for Expiry {
    fn from(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Expiry::Never
        } else {
            Expiry::After(ttl)
        }
    }
}

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
    /// Insertion sequence number, used for FIFO eviction
    pub(crate) seq: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry with an optional TTL.
    pub fn new(value: V, ttl: Option<Duration>) -> Self {
        let now = current_timestamp_ms();
        Self {
            value,
            created_at: now,
            expires_at: ttl.and_then(|ttl| expiry_deadline(now, ttl)),
            seq: 0,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at the given instant.
    ///
    /// An entry is expired once the current time is greater than or equal
    /// to its expiration time.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }

    /// Checks if the entry has expired now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }
}

// == Utility Functions ==
/// Deadline `ttl` after `now_ms`. A TTL too large to represent never expires.
pub fn expiry_deadline(now_ms: u64, ttl: Duration) -> Option<u64> {
    u64::try_from(ttl.as_millis())
        .ok()
        .and_then(|ms| now_ms.checked_add(ms))
}

/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
