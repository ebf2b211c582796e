//! Connection lifecycle: a single client from upgrade through disconnect.
//!
//! 1. Resolve the user id. Unknown users get the upgrade completed and are
//!    then closed with 1008 "User not found"; they are never registered.
//! 2. Register the connection (replacing any previous one for the user).
//! 3. Responders replay pending items as `NEW_ITEM`, oldest first, before
//!    any other frame reaches them.
//! 4. Read loop: acknowledge frames carrying a `messageId`, tolerate
//!    malformed frames up to the configured limit, watch the heartbeat.
//! 5. Teardown: drop the registry entry (if still ours), send the close
//!    frame, stop the writer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use asknow_core::{InboundFrame, Notification, NotificationType, Role, UserId};
use asknow_directory::{Identity, PendingItems, sort_pending};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{Sink, SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::close::CloseReason;
use crate::config::RealtimeConfig;
use crate::errors::SendError;
use crate::metrics::{
    CATCH_UP_FRAMES_TOTAL, MALFORMED_FRAMES_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_REJECTED_TOTAL,
};
use crate::registry::ConnectionRegistry;
use crate::server::AppState;

use super::ack::acknowledge;
use super::connection::{ClientConnection, Outbound};
use super::heartbeat::{HeartbeatResult, run_heartbeat};

/// How long a rejected client gets to answer our close frame.
const REJECT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// GET /ws/{user_id}
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<i64>,
    State(state): State<AppState>,
) -> Response {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, UserId::new(user_id), state))
}

/// Drive one upgraded socket to completion.
#[instrument(skip_all, fields(%user_id))]
pub async fn handle_socket(mut socket: WebSocket, user_id: UserId, state: AppState) {
    let identity = match state.identities.resolve(user_id).await {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            warn!(%user_id, "connection rejected: user not found");
            reject(socket, CloseReason::UnknownIdentity).await;
            return;
        }
        Err(e) => {
            error!(%user_id, error = %e, "connection rejected: identity lookup failed");
            reject(socket, CloseReason::IdentityLookupFailed).await;
            return;
        }
    };

    if state.shutdown.is_shutting_down() {
        let _ = socket.send(Message::Close(Some(CloseReason::GoingAway.frame()))).await;
        return;
    }

    run_connection(socket, identity, state).await;
}

/// Send the close frame, then give the client a moment to complete the
/// close handshake.
async fn reject(mut socket: WebSocket, reason: CloseReason) {
    counter!(WS_REJECTED_TOTAL, "reason" => reason.as_str()).increment(1);
    if socket.send(Message::Close(Some(reason.frame()))).await.is_err() {
        return;
    }
    let _ = tokio::time::timeout(REJECT_DRAIN_TIMEOUT, async {
        while let Some(Ok(_)) = socket.recv().await {}
    })
    .await;
}

async fn run_connection(socket: WebSocket, identity: Identity, state: AppState) {
    let config = state.config.clone();
    let user_id = identity.user_id;
    let (ws_tx, mut ws_rx) = socket.split();

    let (tx, rx) = mpsc::channel(config.send_queue_capacity);
    let conn = Arc::new(ClientConnection::new(user_id, identity.role, tx));
    let needs_catch_up = identity.role == Role::Responder;
    if needs_catch_up {
        conn.hold_for_catch_up();
    }

    let writer = tokio::spawn(write_loop(ws_tx, rx, conn.clone(), config.write_timeout()));
    let connection_start = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL, "role" => identity.role.as_str()).increment(1);
    let _ = state.registry.register(conn.clone());

    if needs_catch_up {
        match catch_up(&conn, state.pending.as_ref(), config.catch_up_timeout()).await {
            Ok(0) => {}
            Ok(sent) => info!(%user_id, sent, "sent pending items to responder"),
            Err(e) => {
                warn!(%user_id, error = %e, "catch-up delivery failed, closing");
                let _ = conn.close(CloseReason::DeliveryFailed);
            }
        }
    }

    let reason = read_loop(&conn, &mut ws_rx, state.shutdown.token(), &config).await;
    let reason = teardown(&conn, &state.registry, writer, reason, config.write_timeout()).await;

    info!(%user_id, conn_id = %conn.id, %reason, "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

/// Drop the registry entry (if still ours), queue the close frame when one
/// is owed, and stop the writer. Returns the reason that won.
async fn teardown(
    conn: &ClientConnection,
    registry: &ConnectionRegistry,
    mut writer: JoinHandle<()>,
    reason: CloseReason,
    write_timeout: Duration,
) -> CloseReason {
    let _ = conn.close(reason);
    let reason = conn.close_reason().unwrap_or(reason);

    let _ = registry.unregister_connection(conn.user_id, &conn.id);
    if reason.sends_frame() && conn.enqueue_close(reason, write_timeout).await {
        if tokio::time::timeout(write_timeout, &mut writer).await.is_err() {
            writer.abort();
        }
    } else {
        writer.abort();
    }
    reason
}

/// Replay pending items as `NEW_ITEM`, oldest first, then open the gate.
///
/// An enumeration failure skips the replay; the connection stays up.
async fn catch_up(
    conn: &ClientConnection,
    pending: &dyn PendingItems,
    timeout: Duration,
) -> Result<usize, SendError> {
    let mut items = match pending.pending_items().await {
        Ok(items) => items,
        Err(e) => {
            warn!(user_id = %conn.user_id, error = %e, "pending item enumeration failed, skipping catch-up");
            Vec::new()
        }
    };
    sort_pending(&mut items);

    let mut sent = 0;
    for item in items {
        let notification = Notification::new(NotificationType::NewItem, item.payload);
        conn.send_catch_up(Arc::new(notification.to_json()?), timeout).await?;
        sent += 1;
    }
    counter!(CATCH_UP_FRAMES_TOTAL).increment(sent as u64);

    let flushed = conn.release_catch_up(timeout).await?;
    if flushed > 0 {
        debug!(user_id = %conn.user_id, flushed, "flushed frames held during catch-up");
    }
    Ok(sent)
}

async fn read_loop<S>(
    conn: &Arc<ClientConnection>,
    ws_rx: &mut S,
    shutdown: CancellationToken,
    config: &RealtimeConfig,
) -> CloseReason
where
    S: futures::Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let heartbeat = run_heartbeat(
        conn.clone(),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
        conn.cancel_token(),
    );
    tokio::pin!(heartbeat);
    let mut malformed: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = conn.closed() => {
                return conn.close_reason().unwrap_or(CloseReason::PeerClosed);
            }
            () = shutdown.cancelled() => {
                return CloseReason::GoingAway;
            }
            result = &mut heartbeat => {
                return match result {
                    HeartbeatResult::TimedOut => {
                        warn!(user_id = %conn.user_id, "heartbeat timeout, disconnecting");
                        CloseReason::HeartbeatTimeout
                    }
                    HeartbeatResult::Cancelled => conn.close_reason().unwrap_or(CloseReason::PeerClosed),
                };
            }
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(t))) => Some(t.as_str().to_owned()),
                    Some(Ok(Message::Binary(data))) => Some(String::from_utf8_lossy(&data).into_owned()),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => None,
                    Some(Ok(Message::Close(_))) | None => return CloseReason::PeerClosed,
                    Some(Err(e)) => {
                        debug!(user_id = %conn.user_id, error = %e, "read error");
                        return CloseReason::TransportError;
                    }
                };
                conn.mark_alive();

                let Some(text) = text else { continue };
                if let Some(reason) = handle_text(conn, &text, &mut malformed, config.max_malformed_frames) {
                    return reason;
                }
            }
        }
    }
}

/// Parse one inbound frame and acknowledge it.
///
/// Returns a close reason once consecutive malformed frames exceed `limit`
/// (0 = unlimited).
fn handle_text(conn: &ClientConnection, text: &str, malformed: &mut u32, limit: u32) -> Option<CloseReason> {
    match InboundFrame::parse(text) {
        Ok(frame) => {
            *malformed = 0;
            debug!(
                user_id = %conn.user_id,
                frame_type = frame.kind.as_deref().unwrap_or("-"),
                "received frame"
            );
            let _ = acknowledge(conn, &frame);
            None
        }
        Err(e) => {
            *malformed += 1;
            counter!(MALFORMED_FRAMES_TOTAL).increment(1);
            warn!(user_id = %conn.user_id, error = %e, consecutive = *malformed, "malformed inbound frame");
            (limit > 0 && *malformed > limit).then_some(CloseReason::MalformedFrames)
        }
    }
}

/// Drain the outbound queue into the socket, one bounded write at a time.
async fn write_loop<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Outbound>,
    conn: Arc<ClientConnection>,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(frame) = rx.recv().await {
        let (message, last) = match frame {
            Outbound::Text(text) => (Message::Text(text.to_string().into()), false),
            Outbound::Ping => (Message::Ping(vec![].into()), false),
            Outbound::Close(reason) => (Message::Close(Some(reason.frame())), true),
        };
        match tokio::time::timeout(write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(user_id = %conn.user_id, error = %e, "socket write failed");
                let _ = conn.close(CloseReason::TransportError);
                break;
            }
            Err(_) => {
                warn!(user_id = %conn.user_id, timeout = ?write_timeout, "socket write timed out");
                let _ = conn.close(CloseReason::TransportError);
                break;
            }
        }
        if last {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use asknow_core::UserId;
    use asknow_directory::{DirectoryError, InMemoryDirectory, PendingItem};
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;

    mock! {
        Pending {}

        #[async_trait]
        impl PendingItems for Pending {
            async fn pending_items(&self) -> asknow_directory::Result<Vec<PendingItem>>;
        }
    }

    /// A peer that never accepts a write.
    struct StalledSink;

    impl Sink<Message> for StalledSink {
        type Error = axum::Error;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), Self::Error> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    fn make_connection(capacity: usize) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(ClientConnection::new(UserId::new(7), Role::Responder, tx)), rx)
    }

    fn drain_ids(rx: &mut mpsc::Receiver<Outbound>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(Outbound::Text(t)) = rx.try_recv() {
            let v: serde_json::Value = serde_json::from_str(&t).unwrap();
            out.push(v["data"]["questionId"].clone());
        }
        out
    }

    #[tokio::test]
    async fn catch_up_sends_in_creation_order() {
        let dir = InMemoryDirectory::new();
        dir.add_pending(1, json!({"questionId": 1}), 100);
        dir.add_pending(2, json!({"questionId": 2}), 50);
        dir.add_pending(3, json!({"questionId": 3}), 75);
        let (conn, mut rx) = make_connection(16);
        conn.hold_for_catch_up();

        let sent = catch_up(&conn, &dir, Duration::from_secs(1)).await.unwrap();
        assert_eq!(sent, 3);
        assert_eq!(drain_ids(&mut rx), vec![json!(2), json!(3), json!(1)]);
    }

    #[tokio::test]
    async fn live_frames_wait_behind_catch_up() {
        let dir = InMemoryDirectory::new();
        dir.add_pending(1, json!({"questionId": 1}), 1);
        let (conn, mut rx) = make_connection(16);
        conn.hold_for_catch_up();
        conn.send(Arc::new(r#"{"data":{"questionId":"live"}}"#.into())).unwrap();

        let _ = catch_up(&conn, &dir, Duration::from_secs(1)).await.unwrap();
        assert_eq!(drain_ids(&mut rx), vec![json!(1), json!("live")]);
    }

    #[tokio::test]
    async fn enumeration_failure_skips_catch_up_and_opens_gate() {
        let mut pending = MockPending::new();
        let _ = pending
            .expect_pending_items()
            .times(1)
            .returning(|| Err(DirectoryError::CorruptRow("boom".into())));
        let (conn, mut rx) = make_connection(4);
        conn.hold_for_catch_up();
        let sent = catch_up(&conn, &pending, Duration::from_secs(1)).await.unwrap();
        assert_eq!(sent, 0);
        assert!(rx.try_recv().is_err());

        conn.send(Arc::new("{}".into())).unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(!conn.is_closed());
    }

    #[test]
    fn malformed_frames_tolerated_when_unlimited() {
        let (conn, _rx) = make_connection(64);
        let mut malformed = 0;
        for _ in 0..20 {
            assert_eq!(handle_text(&conn, "not json", &mut malformed, 0), None);
        }
        assert_eq!(malformed, 20);
    }

    #[test]
    fn malformed_limit_counts_consecutive_frames() {
        let (conn, _rx) = make_connection(64);
        let mut malformed = 0;
        assert_eq!(handle_text(&conn, "bad", &mut malformed, 2), None);
        assert_eq!(handle_text(&conn, "bad", &mut malformed, 2), None);
        assert_eq!(handle_text(&conn, "{}", &mut malformed, 2), None);
        assert_eq!(malformed, 0);
        assert_eq!(handle_text(&conn, "bad", &mut malformed, 2), None);
        assert_eq!(handle_text(&conn, "bad", &mut malformed, 2), None);
        assert_eq!(
            handle_text(&conn, "bad", &mut malformed, 2),
            Some(CloseReason::MalformedFrames)
        );
    }

    #[test]
    fn valid_frame_with_message_id_is_acked() {
        let (conn, mut rx) = make_connection(8);
        let mut malformed = 0;
        let _ = handle_text(&conn, r#"{"type":"PING","messageId":"abc"}"#, &mut malformed, 0);
        let Ok(Outbound::Text(t)) = rx.try_recv() else {
            panic!("expected ack");
        };
        assert!(t.contains(r#""messageId":"abc""#));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_write_times_out_and_entry_is_removed() {
        let config = RealtimeConfig::default();
        let registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(UserId::new(7), Role::Requester, tx));
        let _ = registry.register(conn.clone());

        let writer = tokio::spawn(write_loop(StalledSink, rx, conn.clone(), config.write_timeout()));
        conn.send(Arc::new("{}".into())).unwrap();

        let mut inbound = futures::stream::pending::<Result<Message, axum::Error>>();
        let started = tokio::time::Instant::now();
        let reason = read_loop(&conn, &mut inbound, CancellationToken::new(), &config).await;
        assert_eq!(reason, CloseReason::TransportError);
        assert!(started.elapsed() >= config.write_timeout());
        assert!(started.elapsed() < config.heartbeat_interval());

        let reason = teardown(&conn, &registry, writer, reason, config.write_timeout()).await;
        assert_eq!(reason, CloseReason::TransportError);
        assert!(registry.lookup(UserId::new(7)).is_none());
        assert!(conn.send(Arc::new("{}".into())).is_err());
    }

    #[tokio::test]
    async fn teardown_keeps_replacement_entry() {
        let config = RealtimeConfig::default();
        let registry = ConnectionRegistry::new();
        let (first, _r1) = make_connection(8);
        let (second, _r2) = make_connection(8);
        let _ = registry.register(first.clone());
        let _ = registry.register(second.clone());

        let writer = tokio::spawn(async {});
        let reason = teardown(&first, &registry, writer, CloseReason::PeerClosed, config.write_timeout()).await;
        assert_eq!(reason, CloseReason::Superseded);
        assert_eq!(registry.lookup(UserId::new(7)).unwrap().id, second.id);
    }
}
