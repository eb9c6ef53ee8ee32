//! Tag Index Module
//!
//! Many-to-many relation between invalidation tags and cache keys.

use std::collections::{HashMap, HashSet};

// == Tag Index ==
/// Maps tags to the keys they cover, with a reverse index so a key's
/// tags can be dropped when the key goes away.
#[derive(Debug, Default, Clone)]
pub struct TagIndex {
    by_tag: HashMap<String, HashSet<String>>,
    by_key: HashMap<String, HashSet<String>>,
}

impl TagIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // == Tag ==
    /// Replaces the tags attached to `key`.
    pub fn tag<I, S>(&mut self, key: &str, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.untag(key);

        let tags: HashSet<String> = tags.into_iter().map(Into::into).collect();
        if tags.is_empty() {
            return;
        }
        for tag in &tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.by_key.insert(key.to_string(), tags);
    }

    // == Untag ==
    /// Removes every tag relation for `key`.
    pub fn untag(&mut self, key: &str) {
        let Some(tags) = self.by_key.remove(key) else {
            return;
        };
        for tag in tags {
            if let Some(keys) = self.by_tag.get_mut(&tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_tag.remove(&tag);
                }
            }
        }
    }

    // == Take Tag ==
    /// Removes `tag` and returns the keys it covered.
    ///
    /// The returned keys are untagged entirely, since the caller is about
    /// to delete them.
    pub fn take_tag(&mut self, tag: &str) -> Vec<String> {
        let Some(keys) = self.by_tag.remove(tag) else {
            return Vec::new();
        };
        let keys: Vec<String> = keys.into_iter().collect();
        for key in &keys {
            self.untag(key);
        }
        keys
    }

    // == Lookup ==
    /// Returns the keys currently carrying `tag`.
    pub fn keys_for(&self, tag: &str) -> Vec<String> {
        self.by_tag
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the tags attached to `key`.
    pub fn tags_for(&self, key: &str) -> Vec<String> {
        self.by_key
            .get(key)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.by_tag.clear();
        self.by_key.clear();
    }

    /// Number of distinct tags in use.
    pub fn tag_count(&self) -> usize {
        self.by_tag.len()
    }
}
