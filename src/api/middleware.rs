//! API Middleware
//!
//! Admission control, request coalescing, idempotent replay and response
//! caching, each as an axum `from_fn_with_state` middleware over [`AppState`].

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::api::AppState;
use crate::cache::{cache_key, Expiry};
use crate::coalesce::fingerprint;
use crate::idempotency::IDEMPOTENCY_HEADER;
use crate::models::StoredResponse;

/// Response header reporting whether the response cache served the request
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Rejects clients over their rate limit before any other work happens.
pub async fn enforce_rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(rejection) = state.limiter.admit(&req) {
        return rejection;
    }
    next.run(req).await
}

/// Collapses concurrent identical GET requests into one execution.
pub async fn coalesce_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let key = fingerprint(req.method(), req.uri());
    let outcome = state
        .coalescer
        .execute(&key, move || async move {
            StoredResponse::from_response(next.run(req).await).await
        })
        .await;

    match outcome {
        Ok(stored) => stored.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Replays stored responses for POST requests carrying an idempotency key.
pub async fn idempotent_requests(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if req.method() != Method::POST {
        return next.run(req).await;
    }

    let key = req
        .headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let outcome = state
        .idempotency
        .handle(key.as_deref(), || async move {
            StoredResponse::from_response(next.run(req).await).await
        })
        .await;

    match outcome {
        Ok(stored) => stored.into_response(),
        Err(err) => err.into_response(),
    }
}

/// Key of a cached response: path segments joined with `:`, then the query.
///
/// `/users/42?fields=name` becomes `api:users:42:fields=name`, so tag and
/// path invalidation for `users` both cover it.
pub fn response_cache_key(uri: &Uri) -> String {
    let path = uri.path().trim_matches('/').replace('/', ":");
    cache_key(&["api", &path, uri.query().unwrap_or("")])
}

/// Serves GET responses from the api tier, storing successful ones.
pub async fn cache_responses(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if req.method() != Method::GET {
        return next.run(req).await;
    }

    let key = response_cache_key(req.uri());
    if let Some(hit) = state.caches.api.get(&key) {
        debug!(key, "Response cache hit");
        return hit
            .with_header(X_CACHE, HeaderValue::from_static("HIT"))
            .into_response();
    }

    let response = next.run(req).await;
    if !response.status().is_success() {
        return response;
    }

    match StoredResponse::from_response(response).await {
        Ok(stored) => {
            state.caches.api.set(&key, stored.clone(), Expiry::Default);
            stored
                .with_header(X_CACHE, HeaderValue::from_static("MISS"))
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_cache_key() {
        let uri: Uri = "/users/42".parse().unwrap();
        assert_eq!(response_cache_key(&uri), "api:users:42");

        let uri: Uri = "/users/42?fields=name".parse().unwrap();
        assert_eq!(response_cache_key(&uri), "api:users:42:fields=name");
    }
}
