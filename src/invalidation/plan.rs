//! Invalidation Plans
//!
//! What a mutation invalidates once it succeeds.

use serde::{Deserialize, Serialize};

use crate::cache::CacheTags;

/// Tags, paths, patterns and exact keys to invalidate together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationPlan {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub keys: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl InvalidationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.paths.is_empty() && self.patterns.is_empty() && self.keys.is_empty()
    }

    // == Presets ==
    /// After creating, updating or deleting a user.
    pub fn users() -> Self {
        Self {
            tags: owned(&[CacheTags::USERS]),
            patterns: owned(&["^user:.*", "^users:.*"]),
            paths: owned(&["/users", "/profile"]),
            keys: Vec::new(),
        }
    }

    pub fn posts() -> Self {
        Self {
            tags: owned(&[CacheTags::POSTS]),
            patterns: owned(&["^post:.*", "^posts:.*"]),
            paths: owned(&["/posts", "/feed"]),
            keys: Vec::new(),
        }
    }

    /// Products also invalidate categories, which list product counts.
    pub fn products() -> Self {
        Self {
            tags: owned(&[CacheTags::PRODUCTS, CacheTags::CATEGORIES]),
            patterns: owned(&["^product:.*", "^products:.*", "^category:.*"]),
            paths: owned(&["/products", "/shop"]),
            keys: Vec::new(),
        }
    }

    pub fn settings() -> Self {
        Self {
            tags: owned(&[CacheTags::SETTINGS]),
            patterns: owned(&["^settings:.*"]),
            paths: owned(&["/settings"]),
            keys: Vec::new(),
        }
    }
}
