//! API Handlers
//!
//! HTTP request handlers for the cache administration and user endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;

use crate::cache::{cache_key, CacheContext, CacheDuration, CacheTags, Sweep};
use crate::coalesce::RequestCoalescer;
use crate::config::{Config, RateLimitStrategy};
use crate::error::{CacheError, Result};
use crate::idempotency::IdempotencyStore;
use crate::invalidation::{CacheInvalidator, InvalidationKind, InvalidationPlan};
use crate::models::{
    CreateUserRequest, DurableStatus, HealthResponse, InvalidateRequest, InvalidateResponse,
    StatsResponse, StoredResponse, User, UserDirectory, UserListResponse,
};
use crate::ratelimit::{Admission, RateLimitPolicy, RateLimiter, TokenBucket, TokenBucketConfig};

/// Coalescer over buffered HTTP responses
pub type ResponseCoalescer = RequestCoalescer<StoredResponse, CacheError>;

/// Application state shared across all handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub caches: CacheContext,
    pub invalidator: Arc<CacheInvalidator>,
    pub coalescer: Arc<ResponseCoalescer>,
    pub idempotency: Arc<IdempotencyStore>,
    pub limiter: Arc<dyn Admission>,
    pub users: Arc<UserDirectory>,
}

impl AppState {
    /// Creates a new AppState from configuration.
    ///
    /// Builds every cache tier and wires the invalidator so that any
    /// invalidation also drops settled coalesced responses.
    pub fn from_config(config: &Config) -> Self {
        let caches = CacheContext::from_config(config);
        let invalidator = Arc::new(CacheInvalidator::from_context(&caches));
        let coalescer = Arc::new(ResponseCoalescer::new(config.dedup_ttl));

        for kind in [
            InvalidationKind::Tag,
            InvalidationKind::Key,
            InvalidationKind::Path,
            InvalidationKind::Pattern,
            InvalidationKind::Clear,
        ] {
            let coalescer = Arc::clone(&coalescer);
            invalidator.on(kind, move |_| {
                coalescer.forget_settled();
                Ok(())
            });
        }

        Self {
            caches,
            invalidator,
            coalescer,
            idempotency: Arc::new(IdempotencyStore::new(config.idempotency_ttl)),
            limiter: build_limiter(config),
            users: Arc::new(UserDirectory::new()),
        }
    }

    /// Expirable state outside the cache tiers, swept alongside them.
    pub fn sweep_targets(&self) -> Vec<Arc<dyn Sweep>> {
        let coalescer: Arc<dyn Sweep> = self.coalescer.clone();
        let idempotency: Arc<dyn Sweep> = self.idempotency.records().clone();
        vec![coalescer, idempotency, self.limiter.state()]
    }
}

fn build_limiter(config: &Config) -> Arc<dyn Admission> {
    match config.rate_limit_strategy {
        RateLimitStrategy::FixedWindow => {
            let policy = RateLimitPolicy::new(config.rate_limit_max_requests, config.rate_limit_window);
            Arc::new(RateLimiter::new(policy, config.rate_limit_store_size))
        }
        RateLimitStrategy::TokenBucket => {
            let bucket = TokenBucketConfig {
                capacity: config.token_bucket_capacity,
                refill_rate: config.token_bucket_refill_rate,
                refill_interval: config.token_bucket_refill_interval,
            };
            Arc::new(TokenBucket::new(bucket, config.rate_limit_store_size))
        }
    }
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Handler for GET /cache/stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let durable = DurableStatus {
        available: state.caches.durable.is_available().await,
        entries: state.caches.durable.len().await,
    };

    Json(StatsResponse {
        tiers: state.caches.stats(),
        durable,
        coalescer: state.coalescer.stats(),
        idempotency_records: state.idempotency.records().len(),
    })
}

/// Handler for POST /cache/invalidate
///
/// Applies every target in the body; `all` clears everything first.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let invalidator = &state.invalidator;
    let mut reports = Vec::new();

    if req.all {
        reports.push(invalidator.clear_all().await);
    }
    if let Some(tag) = &req.tag {
        reports.push(invalidator.invalidate_by_tag(tag).await?);
    }
    reports.extend(invalidator.invalidate_by_tags(&req.tags).await?);
    if let Some(key) = &req.key {
        reports.push(invalidator.invalidate_key(key).await);
    }
    if let Some(path) = &req.path {
        reports.push(invalidator.invalidate_by_path(path, req.kind).await?);
    }
    if let Some(pattern) = &req.pattern {
        reports.push(invalidator.invalidate_by_pattern(pattern).await?);
    }

    Ok(Json(InvalidateResponse::new(reports)))
}

/// Handler for GET /api/v1/users
///
/// Read-through the query tier and the durable tier.
pub async fn list_users_handler(State(state): State<AppState>) -> Result<Json<UserListResponse>> {
    let key = cache_key(&["query", CacheTags::USERS, "list"]);
    let ttl = state.caches.query.default_ttl().unwrap_or(CacheDuration::MEDIUM);
    let users = Arc::clone(&state.users);

    let list: Vec<User> = state
        .caches
        .get_or_compute(&state.caches.query, &key, &[CacheTags::USERS], ttl, || async move {
            users.list().await
        })
        .await?;

    Ok(Json(UserListResponse::new(list)))
}

/// Handler for GET /api/v1/users/:id
pub async fn get_user_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>> {
    Ok(Json(state.users.find(id).await?))
}

/// Handler for POST /api/v1/users
///
/// Creates the user, then invalidates everything user-related.
pub async fn create_user_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>)> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let users = Arc::clone(&state.users);
    let user = state
        .invalidator
        .run_mutation(&InvalidationPlan::users(), || async move { users.create(req).await })
        .await?;

    info!(user_id = %user.id, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}
