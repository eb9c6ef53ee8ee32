//! Response DTOs for the HTTP API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::coalesce::CoalescerStats;
use crate::invalidation::InvalidationReport;
use crate::models::User;

/// Response body for GET /cache/stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// One entry per in-memory tier
    pub tiers: Vec<CacheStats>,
    pub durable: DurableStatus,
    pub coalescer: CoalescerStats,
    /// Stored idempotent responses
    pub idempotency_records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DurableStatus {
    pub available: bool,
    pub entries: usize,
}

/// Response body for POST /cache/invalidate
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Total entries removed across all tiers
    pub removed: usize,
    pub reports: Vec<InvalidationReport>,
}

impl InvalidateResponse {
    pub fn new(reports: Vec<InvalidationReport>) -> Self {
        Self {
            removed: reports.iter().map(InvalidationReport::total_removed).sum(),
            reports,
        }
    }
}

/// Response body for GET /api/v1/users
#[derive(Debug, Clone, Serialize)]
pub struct UserListResponse {
    pub users: Vec<User>,
    pub count: usize,
}

impl UserListResponse {
    pub fn new(users: Vec<User>) -> Self {
        Self {
            count: users.len(),
            users,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::InvalidationKind;
    use chrono::Utc;

    #[test]
    fn test_invalidate_response_sums_reports() {
        let report = |memory, durable| InvalidationReport {
            kind: InvalidationKind::Tag,
            target: Some("users".to_string()),
            memory_removed: memory,
            durable_removed: durable,
            at: Utc::now(),
        };
        let resp = InvalidateResponse::new(vec![report(2, 1), report(0, 4)]);
        assert_eq!(resp.removed, 7);

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["reports"][0]["kind"], "tag");
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_user_list_counts() {
        let resp = UserListResponse::new(Vec::new());
        assert_eq!(resp.count, 0);
    }
}
