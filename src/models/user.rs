//! User records and the in-memory directory serving them
//!
//! The directory stands in for the slow backing service that the cache
//! layer fronts; every call is counted so cache behavior is observable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::models::CreateUserRequest;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

// == User Directory ==
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<BTreeMap<Uuid, User>>,
    fetches: AtomicU64,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reads served, cached or not.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let mut users: Vec<User> = self.users.read().values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    pub async fn find(&self, id: Uuid) -> Result<User> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.users
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(format!("user '{}'", id)))
    }

    /// Creates a user. Emails are unique, case-insensitively.
    pub async fn create(&self, req: CreateUserRequest) -> Result<User> {
        let mut users = self.users.write();
        let email = req.email.trim().to_lowercase();
        if users.values().any(|u| u.email == email) {
            return Err(CacheError::InvalidRequest(format!(
                "email '{}' is already registered",
                email
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            email,
            created_at: Utc::now(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }
}
