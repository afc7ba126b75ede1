// Integration tests for `NotifyClient` against an in-process WebSocket
// server. Each test owns a listener on an ephemeral port and scripts
// the server side: deliver frames, close cleanly, or drop the socket
// without a close handshake.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use avisos_core::{
    ClientConfig, ConnectionState, Endpoint, EventKind, NotifyClient, OutboundMessage,
    ReloadEntity, SessionIdentity,
};

// ── Test server ─────────────────────────────────────────────────────

struct TestServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    conns: mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>,
}

impl TestServer {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (tx, conns) = mpsc::unbounded_channel();

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                        let _ = tx.send(ws);
                    }
                });
            }
        });

        Self {
            addr,
            accepted,
            conns,
        }
    }

    /// Client config pointed at this server, with fast retries.
    fn config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: Endpoint {
                host: "127.0.0.1".into(),
                port: self.addr.port(),
                secure: false,
                path: "/ws".into(),
            },
            reconnect_delay: Duration::from_millis(50),
            ..ClientConfig::default()
        }
    }

    async fn next_conn(&mut self) -> WebSocketStream<TcpStream> {
        tokio::time::timeout(Duration::from_secs(5), self.conns.recv())
            .await
            .expect("no connection within timeout")
            .expect("listener task gone")
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn wait_for_state(client: &NotifyClient, target: ConnectionState) {
    let mut rx = client.state_changes();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow_and_update() == target {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("state {target:?} not reached in time"));
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: serde_json::Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Complete the close handshake from the server side.
async fn close_clean(mut ws: WebSocketStream<TcpStream>) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "server shutdown".into(),
    };
    ws.send(Message::Close(Some(frame))).await.unwrap();
    while ws.next().await.is_some() {}
}

fn identity() -> SessionIdentity {
    SessionIdentity::new("medico-7", "token-abc")
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn connects_and_routes_messages() {
    let mut server = TestServer::spawn().await;
    let client = NotifyClient::new(server.config());

    let (hits_tx, mut hits_rx) = mpsc::unbounded_channel();
    let sub = client.subscribe(EventKind::CitaCreada, move |msg| {
        let _ = hits_tx.send(msg.title.clone());
    });
    let mut citas = client.reloads().subscribe_entity(ReloadEntity::Citas);

    client.ensure_connected(&identity()).unwrap();
    let mut conn = server.next_conn().await;
    wait_for_state(&client, ConnectionState::Connected).await;

    send_json(
        &mut conn,
        serde_json::json!({
            "type": "cita_creada",
            "title": "Nueva cita",
            "message": "Mañana 10:00",
            "cita_id": 42
        }),
    )
    .await;

    let title = tokio::time::timeout(Duration::from_secs(5), hits_rx.recv())
        .await
        .expect("listener not invoked")
        .unwrap();
    assert_eq!(title.as_deref(), Some("Nueva cita"));

    let signal = tokio::time::timeout(Duration::from_secs(5), citas.recv())
        .await
        .expect("no reload signal")
        .unwrap();
    assert_eq!(signal.entity, ReloadEntity::Citas);

    let last = client.last_update().borrow().clone().unwrap();
    assert_eq!(last.kind, EventKind::CitaCreada);
    assert_eq!(client.recent_notifications().len(), 1);

    client.unsubscribe(sub);
    client.disconnect("test done");
}

#[tokio::test]
async fn outbound_message_reaches_server() {
    let mut server = TestServer::spawn().await;
    let client = NotifyClient::new(server.config());

    client.ensure_connected(&identity()).unwrap();
    let mut conn = server.next_conn().await;
    wait_for_state(&client, ConnectionState::Connected).await;

    client.send(&OutboundMessage::presence("medico-7"));

    let frame = tokio::time::timeout(Duration::from_secs(5), conn.next())
        .await
        .expect("no outbound frame")
        .unwrap()
        .unwrap();
    let Message::Text(text) = frame else {
        panic!("expected text frame, got {frame:?}");
    };
    let json: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(json["type"], "presence");
    assert_eq!(json["user_id"], "medico-7");

    client.disconnect("test done");
}

// ── Idempotence and identity changes ────────────────────────────────

#[tokio::test]
async fn ensure_connected_is_idempotent_for_same_identity() {
    let mut server = TestServer::spawn().await;
    let client = NotifyClient::new(server.config());

    client.ensure_connected(&identity()).unwrap();
    let _conn = server.next_conn().await;
    wait_for_state(&client, ConnectionState::Connected).await;

    for _ in 0..3 {
        client.ensure_connected(&identity()).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(server.accepted(), 1, "no second transport may be opened");
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect("test done");
}

#[tokio::test]
async fn identity_change_replaces_the_connection() {
    let mut server = TestServer::spawn().await;
    let client = NotifyClient::new(server.config());

    client
        .ensure_connected(&SessionIdentity::new("medico-7", "tok-a"))
        .unwrap();
    let mut first = server.next_conn().await;
    wait_for_state(&client, ConnectionState::Connected).await;

    client
        .ensure_connected(&SessionIdentity::new("enfermera-2", "tok-b"))
        .unwrap();

    // The old transport is closed with a normal-closure frame.
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => {}
                Some(Err(_)) => return true,
            }
        }
    })
    .await
    .expect("old connection never closed");
    assert!(closed);

    let _second = server.next_conn().await;
    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(server.accepted(), 2);

    client.disconnect("test done");
}

#[tokio::test]
async fn identity_change_during_connecting_replaces_the_attempt() {
    // A server that stalls the first handshake long enough for the
    // second login to arrive while the client is still `Connecting`.
    // The URI of every handshake that completes is recorded.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, mut uri_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let mut first = true;
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let delay = if first {
                Duration::from_millis(300)
            } else {
                Duration::ZERO
            };
            first = false;
            let uri_tx = uri_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let mut uri = String::new();
                let handshake =
                    tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
                        uri = req.uri().to_string();
                        Ok(resp)
                    })
                    .await;
                if let Ok(mut ws) = handshake {
                    let _ = uri_tx.send(uri);
                    while ws.next().await.is_some() {}
                }
            });
        }
    });

    let config = ClientConfig {
        endpoint: Endpoint {
            host: "127.0.0.1".into(),
            port: addr.port(),
            secure: false,
            path: "/ws".into(),
        },
        reconnect_delay: Duration::from_millis(50),
        ..ClientConfig::default()
    };
    let client = NotifyClient::new(config);

    client
        .ensure_connected(&SessionIdentity::new("medico-7", "tok-a"))
        .unwrap();
    wait_for_state(&client, ConnectionState::Connecting).await;

    // Second login before the first handshake resolves.
    client
        .ensure_connected(&SessionIdentity::new("enfermera-2", "tok-b"))
        .unwrap();
    wait_for_state(&client, ConnectionState::Connected).await;

    let uri = tokio::time::timeout(Duration::from_secs(5), uri_rx.recv())
        .await
        .expect("no handshake completed")
        .unwrap();
    assert!(
        uri.contains("token=tok-b"),
        "connected transport must carry the new identity, got {uri}"
    );

    client.disconnect("test done");
}

// ── Close and retry semantics ───────────────────────────────────────

#[tokio::test]
async fn clean_close_is_terminal() {
    let mut server = TestServer::spawn().await;
    let client = NotifyClient::new(server.config());

    client.ensure_connected(&identity()).unwrap();
    let conn = server.next_conn().await;
    wait_for_state(&client, ConnectionState::Connected).await;

    close_clean(conn).await;
    wait_for_state(&client, ConnectionState::Disconnected).await;

    // Several retry windows pass without a new connection attempt.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn unclean_close_triggers_exactly_one_reconnect() {
    let mut server = TestServer::spawn().await;
    let client = NotifyClient::new(server.config());

    client.ensure_connected(&identity()).unwrap();
    let conn = server.next_conn().await;
    wait_for_state(&client, ConnectionState::Connected).await;

    // Drop the socket without a close handshake.
    drop(conn);

    let _second = server.next_conn().await;
    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(server.accepted(), 2);

    // No second attempt is scheduled for the same close.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.accepted(), 2);

    client.disconnect("test done");
}

#[tokio::test]
async fn reconnect_attempts_are_capped() {
    // A listener that accepts and immediately drops every socket:
    // each handshake fails, so every attempt counts as unclean.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let config = ClientConfig {
        endpoint: Endpoint {
            host: "127.0.0.1".into(),
            port: addr.port(),
            secure: false,
            path: "/ws".into(),
        },
        reconnect_delay: Duration::from_millis(50),
        ..ClientConfig::default()
    };
    let client = NotifyClient::new(config);

    client.ensure_connected(&identity()).unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Initial attempt plus the configured 3 retries, then silence.
    assert_eq!(accepted.load(Ordering::SeqCst), 4);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 4, "no attempt after exhaustion");

    // An explicit call starts a fresh attempt for the same identity.
    client.ensure_connected(&identity()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(accepted.load(Ordering::SeqCst) > 4);

    client.disconnect("test done");
}

#[tokio::test]
async fn disconnect_cancels_pending_reconnect() {
    let mut server = TestServer::spawn().await;
    let config = ClientConfig {
        // Wide retry window so the disconnect lands inside it.
        reconnect_delay: Duration::from_millis(300),
        ..server.config()
    };
    let client = NotifyClient::new(config);

    client.ensure_connected(&identity()).unwrap();
    let conn = server.next_conn().await;
    wait_for_state(&client, ConnectionState::Connected).await;

    drop(conn); // unclean: a retry timer is now pending
    wait_for_state(&client, ConnectionState::Disconnected).await;
    client.disconnect("logout");

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(server.accepted(), 1, "stale transport opened after disconnect");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

// ── Session observation ─────────────────────────────────────────────

#[tokio::test]
async fn session_watcher_follows_login_and_logout() {
    let mut server = TestServer::spawn().await;
    let client = NotifyClient::new(server.config());

    let (sessions_tx, sessions_rx) = watch::channel(None::<SessionIdentity>);
    let _watcher = client.watch_session(sessions_rx);

    // Login
    sessions_tx.send(Some(identity())).unwrap();
    let mut conn = server.next_conn().await;
    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(server.accepted(), 1);

    // Logout: the transport is closed with a normal-closure frame.
    sessions_tx.send(None).unwrap();
    wait_for_state(&client, ConnectionState::Disconnected).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match conn.next().await {
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => {}
                Some(Err(_)) => return true,
            }
        }
    })
    .await
    .expect("connection never closed after logout");
    assert!(closed);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.accepted(), 1, "no reconnect after logout");
}
