//! Request DTOs for the HTTP API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;

use crate::invalidation::PathKind;

/// Request body for creating a user (POST /api/v1/users)
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}

impl CreateUserRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.name.trim().chars().count() < 3 {
            return Some("Name must be at least 3 characters".to_string());
        }
        if !looks_like_email(&self.email) {
            return Some("Invalid email address".to_string());
        }
        None
    }
}

/// Request body for POST /cache/invalidate
///
/// Every field present is applied; `all` clears every tier first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    /// Revalidation kind for `path`
    #[serde(default)]
    pub kind: PathKind,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub all: bool,
}

impl InvalidateRequest {
    pub fn validate(&self) -> Option<String> {
        let empty = self.tag.is_none()
            && self.tags.is_empty()
            && self.key.is_none()
            && self.path.is_none()
            && self.pattern.is_none()
            && !self.all;
        if empty {
            return Some("Nothing to invalidate: set tag, tags, key, path, pattern or all".to_string());
        }
        if self.path.as_deref().is_some_and(|p| !p.starts_with('/')) {
            return Some("Path must start with '/'".to_string());
        }
        None
    }
}
