//! Lookup traits consumed by the realtime server.

use asknow_core::{Role, UserId};
use async_trait::async_trait;
use serde_json::Value;

use crate::errors::Result;

/// A resolved user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    /// User id.
    pub user_id: UserId,
    /// Role of the user.
    pub role: Role,
}

/// An unclaimed work item awaiting a responder.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingItem {
    /// Item id.
    pub id: i64,
    /// Payload delivered verbatim as the notification `data`.
    pub payload: Value,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
}

/// Resolve a user id to an identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` when the user does not exist (or was deleted).
    async fn resolve(&self, user_id: UserId) -> Result<Option<Identity>>;
}

/// Enumerate pending work items.
#[async_trait]
pub trait PendingItems: Send + Sync {
    /// All pending items, ascending by creation time.
    async fn pending_items(&self) -> Result<Vec<PendingItem>>;
}

/// Order items by creation time, then id for ties.
pub fn sort_pending(items: &mut [PendingItem]) {
    items.sort_by_key(|item| (item.created_at, item.id));
}
