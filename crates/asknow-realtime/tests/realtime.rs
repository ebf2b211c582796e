//! End-to-end tests using a real WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use asknow_core::{Role, UserId};
use asknow_directory::{DirectoryError, Identity, IdentityResolver, InMemoryDirectory, PendingItems};
use asknow_realtime::{RealtimeConfig, RealtimeServer};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use mockall::mock;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Students 1 and 2, tutors 10 and 11; no pending items.
fn make_directory() -> Arc<InMemoryDirectory> {
    let dir = InMemoryDirectory::new();
    dir.add_user(UserId::new(1), Role::Requester);
    dir.add_user(UserId::new(2), Role::Requester);
    dir.add_user(UserId::new(10), Role::Responder);
    dir.add_user(UserId::new(11), Role::Responder);
    Arc::new(dir)
}

async fn boot_with(
    config: RealtimeConfig,
    identities: Arc<dyn IdentityResolver>,
    pending: Arc<dyn PendingItems>,
) -> (SocketAddr, Arc<RealtimeServer>) {
    let server = Arc::new(RealtimeServer::new(config, identities, pending));
    let (addr, _handle) = server.listen().await.unwrap();
    (addr, server)
}

async fn boot_server(dir: Arc<InMemoryDirectory>) -> (SocketAddr, Arc<RealtimeServer>) {
    boot_with(RealtimeConfig::default(), dir.clone(), dir).await
}

async fn connect(addr: SocketAddr, user: i64) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(format!("ws://{addr}/ws/{user}")))
        .await
        .unwrap()
        .unwrap();
    ws
}

/// Connect and wait until the server has registered the connection.
async fn connect_registered(addr: SocketAddr, server: &RealtimeServer, user: i64) -> WsStream {
    let ws = connect(addr, user).await;
    wait_until(|| server.registry().lookup(UserId::new(user)).is_some()).await;
    ws
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    timeout(TIMEOUT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(ws: &mut WsStream) -> Value {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(t))) => return serde_json::from_str(t.as_str()).unwrap(),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    })
    .await
    .unwrap()
}

/// Read until the close frame and return its code and reason.
async fn next_close(ws: &mut WsStream) -> (u16, String) {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(Some(frame)))) => {
                    return (u16::from(frame.code), frame.reason.as_str().to_owned());
                }
                Some(Ok(Message::Close(None))) | None => panic!("closed without a close frame"),
                Some(Ok(_)) => {}
                Some(Err(e)) => panic!("read error before close frame: {e}"),
            }
        }
    })
    .await
    .unwrap()
}

mock! {
    Resolver {}

    #[async_trait]
    impl IdentityResolver for Resolver {
        async fn resolve(&self, user_id: UserId) -> asknow_directory::Result<Option<Identity>>;
    }
}

// ── Handshake ──

#[tokio::test]
async fn unknown_user_is_closed_with_1008() {
    let (addr, server) = boot_server(make_directory()).await;
    let mut ws = connect(addr, 999).await;

    let (code, reason) = next_close(&mut ws).await;
    assert_eq!(code, 1008);
    assert_eq!(reason, "User not found");
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn identity_lookup_failure_is_closed_with_1011() {
    let mut resolver = MockResolver::new();
    let _ = resolver
        .expect_resolve()
        .returning(|_| Err(DirectoryError::CorruptRow("role 'admin'".into())));
    let dir = make_directory();
    let (addr, server) = boot_with(RealtimeConfig::default(), Arc::new(resolver), dir).await;

    let mut ws = connect(addr, 1).await;
    let (code, _) = next_close(&mut ws).await;
    assert_eq!(code, 1011);
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn non_numeric_user_id_fails_handshake() {
    let (addr, _server) = boot_server(make_directory()).await;
    let result = connect_async(format!("ws://{addr}/ws/abc")).await;
    assert!(result.is_err());
}

// ── Catch-up ──

#[tokio::test]
async fn responder_receives_pending_items_oldest_first() {
    let dir = make_directory();
    dir.add_pending(1, json!({"questionId": 1}), 300);
    dir.add_pending(2, json!({"questionId": 2}), 100);
    dir.add_pending(3, json!({"questionId": 3}), 200);
    let (addr, _server) = boot_server(dir).await;

    let mut ws = connect(addr, 10).await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        let frame = next_json(&mut ws).await;
        assert_eq!(frame["type"], "NEW_ITEM");
        assert!(frame["timestamp"].is_string());
        ids.push(frame["data"]["questionId"].as_i64().unwrap());
    }
    assert_eq!(ids, vec![2, 3, 1]);
}

#[tokio::test]
async fn requester_gets_no_catch_up() {
    let dir = make_directory();
    dir.add_pending(1, json!({"questionId": 1}), 1);
    let (addr, server) = boot_server(dir).await;

    let mut ws = connect_registered(addr, &server, 1).await;
    let report = server
        .notifier()
        .question_updated(UserId::new(1), None, json!({"questionId": 1}));
    assert_eq!(report.delivered(), 1);
    assert_eq!(next_json(&mut ws).await["type"], "ITEM_UPDATED");
}

// ── Acknowledgements ──

#[tokio::test]
async fn frame_with_message_id_is_acked() {
    let (addr, _server) = boot_server(make_directory()).await;
    let mut ws = connect(addr, 1).await;

    ws.send(Message::Text(r#"{"type":"PING","messageId":"abc"}"#.into()))
        .await
        .unwrap();
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["type"], "ACK");
    assert_eq!(ack["messageId"], "abc");
    assert!(ack["timestamp"].is_string());
}

#[tokio::test]
async fn malformed_frame_does_not_close_connection() {
    let (addr, server) = boot_server(make_directory()).await;
    let mut ws = connect_registered(addr, &server, 2).await;

    ws.send(Message::Text("this is not json".into())).await.unwrap();
    ws.send(Message::Text(r#"{"type":"PING","messageId":"after"}"#.into()))
        .await
        .unwrap();
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["messageId"], "after");
    assert!(server.registry().lookup(UserId::new(2)).is_some());
}

#[tokio::test]
async fn malformed_limit_closes_with_4002() {
    let config = RealtimeConfig {
        max_malformed_frames: 1,
        ..RealtimeConfig::default()
    };
    let dir = make_directory();
    let (addr, server) = boot_with(config, dir.clone(), dir).await;
    let mut ws = connect_registered(addr, &server, 1).await;

    ws.send(Message::Text("bad".into())).await.unwrap();
    ws.send(Message::Text("bad".into())).await.unwrap();
    let (code, _) = next_close(&mut ws).await;
    assert_eq!(code, 4002);
    wait_until(|| server.registry().is_empty()).await;
}

// ── Registry ──

#[tokio::test]
async fn second_connection_replaces_first() {
    let (addr, server) = boot_server(make_directory()).await;
    let mut first = connect_registered(addr, &server, 10).await;
    let first_id = server.registry().lookup(UserId::new(10)).unwrap().id.clone();

    let mut second = connect(addr, 10).await;
    let (code, _) = next_close(&mut first).await;
    assert_eq!(code, 4000);

    wait_until(|| {
        server
            .registry()
            .lookup(UserId::new(10))
            .is_some_and(|c| c.id != first_id)
    })
    .await;
    assert_eq!(server.registry().len(), 1);

    let report = server.notifier().question_created(json!({"questionId": 9}));
    assert_eq!(report.broadcast, Some(1));
    assert_eq!(next_json(&mut second).await["data"]["questionId"], 9);
}

#[tokio::test]
async fn client_disconnect_unregisters() {
    let (addr, server) = boot_server(make_directory()).await;
    let mut ws = connect_registered(addr, &server, 1).await;

    ws.close(None).await.unwrap();
    wait_until(|| server.registry().lookup(UserId::new(1)).is_none()).await;
    assert!(server.registry().is_empty());
}

// ── Fan-out ──

#[tokio::test]
async fn broadcast_reaches_only_tutors() {
    let (addr, server) = boot_server(make_directory()).await;
    let mut t1 = connect_registered(addr, &server, 10).await;
    let mut t2 = connect_registered(addr, &server, 11).await;
    let mut student = connect_registered(addr, &server, 1).await;

    let report = server.notifier().question_created(json!({"questionId": 5}));
    assert_eq!(report.broadcast, Some(2));
    for ws in [&mut t1, &mut t2] {
        let frame = next_json(ws).await;
        assert_eq!(frame["type"], "NEW_ITEM");
        assert_eq!(frame["data"]["questionId"], 5);
    }

    // The student's next frame is the ack, not the broadcast.
    student
        .send(Message::Text(r#"{"messageId":"m1"}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut student).await["type"], "ACK");
}

#[tokio::test]
async fn chat_goes_to_counterpart_only() {
    let (addr, server) = boot_server(make_directory()).await;
    let mut student = connect_registered(addr, &server, 1).await;
    let mut tutor = connect_registered(addr, &server, 10).await;

    let report = server.notifier().chat_message(
        Role::Responder,
        UserId::new(1),
        Some(UserId::new(10)),
        json!({"content": "hello"}),
    );
    assert_eq!(report.delivered(), 1);
    let frame = next_json(&mut student).await;
    assert_eq!(frame["type"], "CHAT_MESSAGE");
    assert_eq!(frame["data"]["content"], "hello");

    tutor
        .send(Message::Text(r#"{"messageId":"t1"}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut tutor).await["type"], "ACK");
}

// ── HTTP ──

#[tokio::test]
async fn notify_endpoint_delivers_over_websocket() {
    let (addr, server) = boot_server(make_directory()).await;
    let mut ws = connect_registered(addr, &server, 2).await;

    let client = reqwest::Client::new();
    let resp: Value = client
        .post(format!("http://{addr}/api/notify"))
        .json(&json!({"target": {"userId": 2}, "type": "ITEM_CLOSED", "data": {"questionId": 4}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(resp, json!({"result": "delivered", "delivered": 1}));

    let frame = next_json(&mut ws).await;
    assert_eq!(frame["type"], "ITEM_CLOSED");
    assert_eq!(frame["data"]["questionId"], 4);
}

#[tokio::test]
async fn health_counts_connections() {
    let (addr, server) = boot_server(make_directory()).await;
    let _t = connect_registered(addr, &server, 10).await;
    let _s = connect_registered(addr, &server, 1).await;

    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 2);
    assert_eq!(health["responders"], 1);
    assert_eq!(health["requesters"], 1);
}

// ── Shutdown ──

#[tokio::test]
async fn shutdown_closes_clients_with_1001() {
    let (addr, server) = boot_server(make_directory()).await;
    let mut ws = connect_registered(addr, &server, 1).await;

    server.shutdown().shutdown();
    let (code, _) = next_close(&mut ws).await;
    assert_eq!(code, 1001);
    wait_until(|| server.registry().is_empty()).await;
}
