//! Unicast and role broadcast over the registry.
//!
//! Delivery is best-effort: one queue attempt per connection, no retry, no
//! persistence. A connection that refuses a frame is evicted so the next
//! lookup no longer sees it.

use std::sync::Arc;

use asknow_core::{Notification, Role, UserId};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::close::CloseReason;
use crate::metrics::{DELIVERIES_TOTAL, WS_BROADCAST_DROPS_TOTAL};
use crate::registry::ConnectionRegistry;
use crate::websocket::connection::ClientConnection;

/// Outcome of a unicast.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryResult {
    /// Queued for the user's connection.
    Delivered,
    /// The user has no live connection. Not an error.
    NotConnected,
    /// The connection refused the frame and was evicted.
    Failed,
}

impl DeliveryResult {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::NotConnected => "not_connected",
            Self::Failed => "failed",
        }
    }

    /// Whether the frame was queued.
    pub fn is_delivered(self) -> bool {
        self == Self::Delivered
    }
}

/// Routes notifications to registered connections.
#[derive(Clone)]
pub struct NotificationRouter {
    registry: Arc<ConnectionRegistry>,
}

impl NotificationRouter {
    /// Create a router over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this router reads.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver to one user.
    pub fn send_to(&self, user_id: UserId, notification: &Notification) -> DeliveryResult {
        let Some(connection) = self.registry.lookup(user_id) else {
            debug!(%user_id, event_type = %notification.kind(), "user not connected");
            return record(DeliveryResult::NotConnected);
        };
        let Some(text) = serialize(notification) else {
            return record(DeliveryResult::Failed);
        };
        if self.deliver(&connection, text) {
            record(DeliveryResult::Delivered)
        } else {
            record(DeliveryResult::Failed)
        }
    }

    /// Deliver to every connection with `role`. Returns the number of
    /// successful deliveries.
    pub fn broadcast(&self, role: Role, notification: &Notification) -> usize {
        let recipients = self.registry.filter_by_role(role);
        if recipients.is_empty() {
            debug!(%role, event_type = %notification.kind(), recipients = 0, "broadcast skipped");
            return 0;
        }
        let Some(text) = serialize(notification) else {
            return 0;
        };

        let mut delivered = 0;
        for connection in &recipients {
            if self.deliver(connection, text.clone()) {
                delivered += 1;
            } else {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
            }
        }
        debug!(
            %role,
            event_type = %notification.kind(),
            recipients = recipients.len(),
            delivered,
            "broadcast complete"
        );
        delivered
    }

    fn deliver(&self, connection: &ClientConnection, text: Arc<String>) -> bool {
        match connection.send(text) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    user_id = %connection.user_id,
                    conn_id = %connection.id,
                    error = %e,
                    "delivery failed, evicting connection"
                );
                let _ = self.registry.evict(connection, CloseReason::DeliveryFailed);
                false
            }
        }
    }
}

fn serialize(notification: &Notification) -> Option<Arc<String>> {
    match notification.to_json() {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            error!(event_type = %notification.kind(), error = %e, "failed to serialize notification");
            None
        }
    }
}

fn record(result: DeliveryResult) -> DeliveryResult {
    counter!(DELIVERIES_TOTAL, "result" => result.as_str()).increment(1);
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
