//! Buffered HTTP responses
//!
//! A fully-read response that can be cloned and replayed byte for byte.

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::error::{CacheError, Result};

/// Upper bound on bodies buffered for replay
pub const MAX_BUFFERED_BODY: usize = 4 * 1024 * 1024;

// == Stored Response ==
/// Status, headers and body of a response, detached from the connection.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl StoredResponse {
    /// Creates a JSON response.
    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    /// Reads the whole body of `response` into memory.
    pub async fn from_response(response: Response) -> Result<Self> {
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, MAX_BUFFERED_BODY)
            .await
            .map_err(|err| CacheError::Internal(format!("failed to buffer response: {}", err)))?;
        Ok(Self {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns a copy with one header set, leaving the stored original untouched.
    pub fn with_header(&self, name: HeaderName, value: HeaderValue) -> Self {
        let mut copy = self.clone();
        copy.headers.insert(name, value);
        copy
    }
}

impl IntoResponse for StoredResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}
