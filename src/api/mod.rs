//! API Module
//!
//! HTTP handlers, middleware and routing for the caching service.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /cache/stats` - Cache statistics
//! - `POST /cache/invalidate` - Fan-out invalidation
//! - `GET|POST /api/v1/users`, `GET /api/v1/users/:id` - Cached user resources

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
