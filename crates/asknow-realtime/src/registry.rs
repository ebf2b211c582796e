//! Registry of live connections, one per user.
//!
//! The registry is the single shared mutable resource of the server. Every
//! critical section is a map operation under a `parking_lot` lock, plus the
//! active-connections gauge and superseding a replaced handle; nothing is
//! awaited or written to a socket while it is held.

use std::collections::HashMap;
use std::sync::Arc;

use asknow_core::{ConnectionId, Role, UserId};
use metrics::gauge;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::close::CloseReason;
use crate::metrics::WS_CONNECTIONS_ACTIVE;
use crate::websocket::connection::ClientConnection;

/// Maps user ids to their single active connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `connection.user_id`.
    ///
    /// A replaced connection is marked superseded before the write lock is
    /// released, so no router can queue to it once this returns. It is not
    /// torn down here; its own lifecycle does that. Returns the replaced
    /// connection, if any.
    pub fn register(&self, connection: Arc<ClientConnection>) -> Option<Arc<ClientConnection>> {
        let user_id = connection.user_id;
        let previous = {
            let mut map = self.connections.write();
            let previous = map.insert(user_id, connection.clone());
            if let Some(old) = previous.as_ref().filter(|old| old.id != connection.id) {
                let _ = old.supersede();
            }
            record_active(map.len());
            previous
        };

        match &previous {
            Some(old) if old.id != connection.id => {
                info!(
                    %user_id,
                    role = %connection.role,
                    conn_id = %connection.id,
                    replaced = %old.id,
                    "connection replaced"
                );
            }
            _ => info!(%user_id, role = %connection.role, conn_id = %connection.id, "connection registered"),
        }
        previous
    }

    /// Remove whatever entry `user_id` has. Idempotent.
    pub fn unregister(&self, user_id: UserId) -> Option<Arc<ClientConnection>> {
        let removed = {
            let mut map = self.connections.write();
            let removed = map.remove(&user_id);
            if removed.is_some() {
                record_active(map.len());
            }
            removed
        };
        if removed.is_some() {
            info!(%user_id, "connection unregistered");
        }
        removed
    }

    /// Remove the entry for `user_id` only if it is still `conn_id`.
    ///
    /// A lifecycle handler or router holding a stale handle uses this so it
    /// can never remove the connection that replaced it.
    pub fn unregister_connection(&self, user_id: UserId, conn_id: &ConnectionId) -> bool {
        let removed = {
            let mut map = self.connections.write();
            let matches = map.get(&user_id).is_some_and(|c| &c.id == conn_id);
            if matches {
                let _ = map.remove(&user_id);
                record_active(map.len());
            }
            matches
        };
        if removed {
            info!(%user_id, %conn_id, "connection unregistered");
        } else {
            debug!(%user_id, %conn_id, "stale unregister ignored");
        }
        removed
    }

    /// Close `connection` and drop its entry if it is still current.
    pub fn evict(&self, connection: &ClientConnection, reason: CloseReason) -> bool {
        let _ = connection.close(reason);
        self.unregister_connection(connection.user_id, &connection.id)
    }

    /// Current connection for `user_id`.
    pub fn lookup(&self, user_id: UserId) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(&user_id).cloned()
    }

    /// Snapshot of the connections with `role`.
    pub fn filter_by_role(&self, role: Role) -> Vec<Arc<ClientConnection>> {
        self.connections
            .read()
            .values()
            .filter(|c| c.role == role)
            .cloned()
            .collect()
    }

    /// Snapshot of every connection.
    pub fn all(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Number of registered connections with `role`.
    pub fn count_by_role(&self, role: Role) -> usize {
        self.connections
            .read()
            .values()
            .filter(|c| c.role == role)
            .count()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_active(count: usize) {
    gauge!(WS_CONNECTIONS_ACTIVE).set(count as f64);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use assert_matches::assert_matches;

    use crate::errors::SendError;
    use crate::websocket::connection::Outbound;

    fn make_connection(user: i64, role: Role) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(32);
        (Arc::new(ClientConnection::new(UserId::new(user), role, tx)), rx)
    }

    #[test]
    fn register_and_lookup() {
        let reg = ConnectionRegistry::new();
        let (conn, _rx) = make_connection(1, Role::Requester);
        assert!(reg.register(conn.clone()).is_none());
        let found = reg.lookup(UserId::new(1)).unwrap();
        assert_eq!(found.id, conn.id);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn lookup_missing_is_none() {
        let reg = ConnectionRegistry::new();
        assert!(reg.lookup(UserId::new(9)).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn last_connect_wins() {
        let reg = ConnectionRegistry::new();
        let (first, _r1) = make_connection(7, Role::Responder);
        let (second, _r2) = make_connection(7, Role::Responder);
        let _ = reg.register(first.clone());
        let replaced = reg.register(second.clone()).unwrap();

        assert_eq!(replaced.id, first.id);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup(UserId::new(7)).unwrap().id, second.id);
        assert_eq!(first.close_reason(), Some(CloseReason::Superseded));
        assert!(!second.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stale_handle_refuses_writes_once_replaced() {
        let reg = Arc::new(ConnectionRegistry::new());
        let (first, mut first_rx) = make_connection(7, Role::Responder);
        let _ = reg.register(first.clone());

        let writer = {
            let first = first.clone();
            tokio::spawn(async move {
                let mut accepted = 0;
                while first.send(Arc::new("x".into())).is_ok() {
                    accepted += 1;
                    tokio::task::yield_now().await;
                }
                accepted
            })
        };
        tokio::task::yield_now().await;
        let (second, _r2) = make_connection(7, Role::Responder);
        let _ = reg.register(second);

        assert_eq!(first.close_reason(), Some(CloseReason::Superseded));
        assert_matches!(
            first.send(Arc::new("late".into())),
            Err(SendError::Closed(CloseReason::Superseded))
        );
        let accepted = writer.await.unwrap();
        let mut queued = 0;
        while let Ok(Outbound::Text(_)) = first_rx.try_recv() {
            queued += 1;
        }
        assert_eq!(queued, accepted);
    }

    #[test]
    fn unregister_is_idempotent() {
        let reg = ConnectionRegistry::new();
        let (conn, _rx) = make_connection(1, Role::Requester);
        let _ = reg.register(conn);
        assert!(reg.unregister(UserId::new(1)).is_some());
        assert!(reg.unregister(UserId::new(1)).is_none());
        assert!(reg.unregister(UserId::new(2)).is_none());
    }

    #[test]
    fn stale_unregister_keeps_replacement() {
        let reg = ConnectionRegistry::new();
        let (first, _r1) = make_connection(7, Role::Responder);
        let (second, _r2) = make_connection(7, Role::Responder);
        let _ = reg.register(first.clone());
        let _ = reg.register(second.clone());

        assert!(!reg.unregister_connection(UserId::new(7), &first.id));
        assert_eq!(reg.lookup(UserId::new(7)).unwrap().id, second.id);
        assert!(reg.unregister_connection(UserId::new(7), &second.id));
        assert!(reg.lookup(UserId::new(7)).is_none());
    }

    #[test]
    fn evict_closes_and_removes() {
        let reg = ConnectionRegistry::new();
        let (conn, _rx) = make_connection(3, Role::Requester);
        let _ = reg.register(conn.clone());
        assert!(reg.evict(&conn, CloseReason::DeliveryFailed));
        assert!(reg.lookup(UserId::new(3)).is_none());
        assert_eq!(conn.close_reason(), Some(CloseReason::DeliveryFailed));
    }

    #[test]
    fn filter_by_role_snapshot() {
        let reg = ConnectionRegistry::new();
        let mut rxs = Vec::new();
        for (id, role) in [(1, Role::Responder), (2, Role::Requester), (3, Role::Responder)] {
            let (c, rx) = make_connection(id, role);
            rxs.push(rx);
            let _ = reg.register(c);
        }
        let mut tutors: Vec<_> = reg
            .filter_by_role(Role::Responder)
            .iter()
            .map(|c| c.user_id.get())
            .collect();
        tutors.sort_unstable();
        assert_eq!(tutors, vec![1, 3]);
        assert_eq!(reg.count_by_role(Role::Requester), 1);

        let snapshot = reg.filter_by_role(Role::Responder);
        let _ = reg.unregister(UserId::new(1));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(reg.count_by_role(Role::Responder), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_unregister_keeps_one_entry_per_user() {
        let reg = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        for task in 0..16 {
            let reg = reg.clone();
            handles.push(tokio::spawn(async move {
                let mut rxs = Vec::new();
                for round in 0..200 {
                    let user = i64::from((task + round) % 4);
                    let (conn, rx) = make_connection(user, Role::Responder);
                    rxs.push(rx);
                    let _ = reg.register(conn.clone());
                    assert!(reg.len() <= 4);
                    if round % 3 == 0 {
                        let _ = reg.unregister_connection(conn.user_id, &conn.id);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(reg.len() <= 4);
        for conn in reg.all() {
            assert_eq!(reg.lookup(conn.user_id).unwrap().id, conn.id);
            assert!(!conn.is_closed());
        }
    }
}
