//! Request and Response models for the HTTP API
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies, plus the
//! buffered response type replayed by the caching middleware.

pub mod requests;
pub mod responses;
pub mod stored;
pub mod user;

// Re-export commonly used types
pub use requests::{CreateUserRequest, InvalidateRequest};
pub use responses::{
    DurableStatus, HealthResponse, InvalidateResponse, StatsResponse, UserListResponse,
};
pub use stored::StoredResponse;
pub use user::{User, UserDirectory};
