//! API Routes
//!
//! Configures the Axum router with all endpoints and the middleware stack.

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    create_user_handler, get_user_handler, health_handler, invalidate_handler,
    list_users_handler, stats_handler, AppState,
};
use super::middleware::{cache_responses, coalesce_requests, enforce_rate_limit, idempotent_requests};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /health` - Health check endpoint
/// - `GET /cache/stats` - Per-tier cache statistics
/// - `POST /cache/invalidate` - Invalidate by tag, key, path, pattern or everything
/// - `GET /api/v1/users` - List users (query tier read-through)
/// - `POST /api/v1/users` - Create a user (idempotent, invalidates user caches)
/// - `GET /api/v1/users/:id` - Fetch a user (response cache)
///
/// # Middleware
/// Outermost first: tracing, CORS, then for `/api` only rate limiting,
/// GET coalescing and POST idempotency.
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let cached_user = get(get_user_handler).layer(from_fn_with_state(state.clone(), cache_responses));

    // layers added later wrap earlier ones
    let api = Router::new()
        .route("/users", get(list_users_handler).post(create_user_handler))
        .route("/users/:id", cached_user)
        .layer(from_fn_with_state(state.clone(), idempotent_requests))
        .layer(from_fn_with_state(state.clone(), coalesce_requests))
        .layer(from_fn_with_state(state.clone(), enforce_rate_limit));

    Router::new()
        .route("/health", get(health_handler))
        .route("/cache/stats", get(stats_handler))
        .route("/cache/invalidate", post(invalidate_handler))
        .nest("/api/v1", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
