//! In-memory directory for tests and database-less runs.

use std::collections::HashMap;

use asknow_core::{Role, UserId};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::errors::Result;
use crate::traits::{Identity, IdentityResolver, PendingItem, PendingItems, sort_pending};

/// Users and pending items held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: RwLock<HashMap<UserId, Role>>,
    pending: RwLock<Vec<PendingItem>>,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub fn add_user(&self, user_id: UserId, role: Role) {
        let _ = self.users.write().insert(user_id, role);
    }

    /// Remove a user. Returns whether it existed.
    pub fn remove_user(&self, user_id: UserId) -> bool {
        self.users.write().remove(&user_id).is_some()
    }

    /// Add a pending item.
    pub fn add_pending(&self, id: i64, payload: Value, created_at: i64) {
        self.pending.write().push(PendingItem {
            id,
            payload,
            created_at,
        });
    }

    /// Take an item out of the pending set. Returns whether it was pending.
    pub fn claim(&self, id: i64) -> bool {
        let mut pending = self.pending.write();
        let before = pending.len();
        pending.retain(|item| item.id != id);
        pending.len() != before
    }
}

#[async_trait]
impl IdentityResolver for InMemoryDirectory {
    async fn resolve(&self, user_id: UserId) -> Result<Option<Identity>> {
        Ok(self
            .users
            .read()
            .get(&user_id)
            .map(|&role| Identity { user_id, role }))
    }
}

#[async_trait]
impl PendingItems for InMemoryDirectory {
    async fn pending_items(&self) -> Result<Vec<PendingItem>> {
        let mut items = self.pending.read().clone();
        sort_pending(&mut items);
        Ok(items)
    }
}
