//! Integration tests for the StackClash server over real WebSockets.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use stackclash::Registry;
use stackclash::prelude::*;
use stackclash_protocol::{
    ClientMessage, ErrorKind, MapPreference, MatchEndReason, ServerMessage, SessionToken, UserInfo,
};
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

type TestRegistry = Registry<StandardRules, MemoryAccountStore>;

/// Starts a server on a random port and returns its address and registry.
async fn start_server(room: RoomConfig) -> (String, Arc<TestRegistry>) {
    let server = StackClashServerBuilder::new()
        .bind("127.0.0.1:0")
        .room_config(room)
        .sweep_interval(Duration::from_millis(100))
        .build(StandardRules, MemoryAccountStore::new())
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let registry = server.registry();

    tokio::spawn(async move {
        let _ = server.run().await;
    });
    (addr, registry)
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send(ws: &mut ClientWs, msg: &ClientMessage) {
    let text = serde_json::to_string(msg).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn send_raw(ws: &mut ClientWs, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

/// Next server message, skipping heartbeat pings.
async fn recv(ws: &mut ClientWs) -> ServerMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let msg: ServerMessage = serde_json::from_str(&text).unwrap();
                    if !matches!(msg, ServerMessage::HeartbeatPing { .. }) {
                        return msg;
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("server reply within 5s")
}

fn login(name: &str) -> ClientMessage {
    ClientMessage::Login {
        username: name.into(),
        password: "secret123".into(),
    }
}

/// Registers `name` and logs in on a fresh connection.
async fn player(addr: &str, name: &str) -> (ClientWs, SessionToken, UserInfo) {
    let mut ws = connect(addr).await;
    send(
        &mut ws,
        &ClientMessage::Register {
            username: name.into(),
            password: "secret123".into(),
        },
    )
    .await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::RegisterOk { .. }));
    let (token, user) = relogin(&mut ws, name).await;
    (ws, token, user)
}

async fn relogin(ws: &mut ClientWs, name: &str) -> (SessionToken, UserInfo) {
    send(ws, &login(name)).await;
    match recv(ws).await {
        ServerMessage::LoginOk {
            session_token,
            user,
        } => (session_token, user),
        other => panic!("expected login_ok, got {other:?}"),
    }
}

fn find_match() -> ClientMessage {
    ClientMessage::FindMatch {
        map_preference: MapPreference::NoPreference,
    }
}

/// Two players in one room; both have seen `match_found`.
async fn matched(addr: &str) -> [(ClientWs, SessionToken); 2] {
    let (mut alice, alice_token, _) = player(addr, "alice").await;
    let (mut bob, bob_token, _) = player(addr, "bob").await;

    send(&mut alice, &find_match()).await;
    assert!(matches!(
        recv(&mut alice).await,
        ServerMessage::MatchmakingStatus { queue_position: 1, .. }
    ));
    send(&mut bob, &find_match()).await;
    assert!(matches!(
        recv(&mut bob).await,
        ServerMessage::MatchmakingStatus { queue_position: 2, .. }
    ));

    for ws in [&mut alice, &mut bob] {
        match recv(ws).await {
            ServerMessage::MatchFound { seq, .. } => assert_eq!(seq, 1),
            other => panic!("expected match_found, got {other:?}"),
        }
    }
    [(alice, alice_token), (bob, bob_token)]
}

fn error_code(msg: &ServerMessage) -> (u16, ErrorKind) {
    match msg {
        ServerMessage::Error { code, kind, .. } => (*code, *kind),
        other => panic!("expected error, got {other:?}"),
    }
}

// =========================================================================
// Authentication
// =========================================================================

#[tokio::test]
async fn test_register_then_login_returns_token_and_stats() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let (_ws, token, user) = player(&addr, "alice").await;

    assert_eq!(token.as_str().len(), 43);
    assert_eq!(user.username, "alice");
    assert_eq!(user.stats.wins, 0);
    assert_eq!(user.stats.rating, 1000);
}

#[tokio::test]
async fn test_register_taken_name_is_register_error() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let (_ws, _, _) = player(&addr, "alice").await;

    let mut ws = connect(&addr).await;
    send_raw(
        &mut ws,
        r#"{"type":"register","username":"alice","password":"another1"}"#,
    )
    .await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::RegisterError { .. }));
}

#[tokio::test]
async fn test_login_wrong_password_is_login_error() {
    let (addr, registry) = start_server(RoomConfig::default()).await;
    let (_ws, _, _) = player(&addr, "alice").await;

    let mut ws = connect(&addr).await;
    send(
        &mut ws,
        &ClientMessage::Login {
            username: "alice".into(),
            password: "not-it-at-all".into(),
        },
    )
    .await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::LoginError { .. }));
    assert_eq!(registry.session_count().await, 1);
}

#[tokio::test]
async fn test_message_before_login_is_401() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;

    send(&mut ws, &find_match()).await;
    assert_eq!(error_code(&recv(&mut ws).await), (401, ErrorKind::Auth));
}

#[tokio::test]
async fn test_garbage_frame_is_400_and_connection_stays_open() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let (mut ws, _, _) = player(&addr, "alice").await;

    send_raw(&mut ws, "this is not json").await;
    assert_eq!(error_code(&recv(&mut ws).await), (400, ErrorKind::Protocol));
    send_raw(&mut ws, r#"{"type":"teleport"}"#).await;
    assert_eq!(error_code(&recv(&mut ws).await), (400, ErrorKind::Protocol));

    send(&mut ws, &ClientMessage::HeartbeatPing { nonce: 5 }).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::HeartbeatPong { nonce: 5 });
}

#[tokio::test]
async fn test_auth_message_after_login_is_400() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let (mut ws, _, _) = player(&addr, "alice").await;

    send(&mut ws, &login("alice")).await;
    assert_eq!(error_code(&recv(&mut ws).await), (400, ErrorKind::Protocol));
}

// =========================================================================
// Matchmaking
// =========================================================================

#[tokio::test]
async fn test_two_players_are_matched_and_start() {
    let (addr, registry) = start_server(RoomConfig::default()).await;
    let [(mut alice, _), (mut bob, _)] = matched(&addr).await;
    assert_eq!(registry.room_count().await, 1);

    send(&mut alice, &ClientMessage::Ready).await;
    send(&mut bob, &ClientMessage::Ready).await;
    for ws in [&mut alice, &mut bob] {
        match recv(ws).await {
            ServerMessage::GameState {
                seq,
                clock_remaining_ms,
                ..
            } => {
                assert_eq!(seq, 2);
                assert!((235_000..=240_000).contains(&clock_remaining_ms));
            }
            other => panic!("expected game_state, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_find_match_twice_is_409_queue() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let (mut ws, _, _) = player(&addr, "alice").await;

    send(&mut ws, &find_match()).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::MatchmakingStatus { .. }));
    send(&mut ws, &find_match()).await;
    assert_eq!(error_code(&recv(&mut ws).await), (409, ErrorKind::Queue));
}

#[tokio::test]
async fn test_cancel_match_then_cancel_again_is_409() {
    let (addr, registry) = start_server(RoomConfig::default()).await;
    let (mut ws, _, _) = player(&addr, "alice").await;

    send(&mut ws, &find_match()).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::MatchmakingStatus { .. }));
    send(&mut ws, &ClientMessage::CancelMatch).await;
    assert_eq!(recv(&mut ws).await, ServerMessage::MatchmakingCancelled);
    assert_eq!(registry.queue_len().await, 0);

    send(&mut ws, &ClientMessage::CancelMatch).await;
    assert_eq!(error_code(&recv(&mut ws).await), (409, ErrorKind::Queue));
}

#[tokio::test]
async fn test_room_message_without_room_is_409() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let (mut ws, _, _) = player(&addr, "alice").await;

    send(&mut ws, &ClientMessage::Ready).await;
    assert_eq!(error_code(&recv(&mut ws).await), (409, ErrorKind::Room));
}

#[tokio::test]
async fn test_find_match_while_in_room_is_409() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let [(mut alice, _), _bob] = matched(&addr).await;

    send(&mut alice, &find_match()).await;
    assert_eq!(error_code(&recv(&mut alice).await), (409, ErrorKind::Queue));
}

// =========================================================================
// Reconnect
// =========================================================================

#[tokio::test]
async fn test_reconnect_unknown_token_is_resync_error() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let mut ws = connect(&addr).await;

    send(
        &mut ws,
        &ClientMessage::Reconnect {
            session_token: SessionToken::new("definitely-not-a-real-token"),
        },
    )
    .await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::ResyncError { .. }));
}

#[tokio::test]
async fn test_reconnect_without_room_replies_login_ok() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let (ws, token, _) = player(&addr, "alice").await;
    drop(ws);

    let mut ws = connect(&addr).await;
    send(
        &mut ws,
        &ClientMessage::Reconnect {
            session_token: token.clone(),
        },
    )
    .await;
    match recv(&mut ws).await {
        ServerMessage::LoginOk {
            session_token,
            user,
        } => {
            assert_eq!(session_token, token);
            assert_eq!(user.username, "alice");
        }
        other => panic!("expected login_ok, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reconnect_mid_match_resyncs_and_notifies_opponent() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let [(alice, alice_token), (mut bob, _)] = matched(&addr).await;

    drop(alice);
    assert_eq!(recv(&mut bob).await, ServerMessage::OpponentDisconnected { seq: 2 });

    let mut alice = connect(&addr).await;
    send(
        &mut alice,
        &ClientMessage::Reconnect {
            session_token: alice_token,
        },
    )
    .await;
    match recv(&mut alice).await {
        ServerMessage::Resync { full_state, .. } => {
            assert_eq!(full_state.you.username, "alice");
            assert_eq!(full_state.opponent.username, "bob");
        }
        other => panic!("expected resync, got {other:?}"),
    }
    assert_eq!(recv(&mut bob).await, ServerMessage::OpponentReconnected { seq: 3 });
}

#[tokio::test]
async fn test_disconnect_closes_session_for_good() {
    let (addr, _) = start_server(RoomConfig::default()).await;
    let (mut ws, token, _) = player(&addr, "alice").await;

    send(&mut ws, &ClientMessage::Disconnect { reason: None }).await;
    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "server should close the socket");

    let mut ws = connect(&addr).await;
    send(&mut ws, &ClientMessage::Reconnect { session_token: token }).await;
    assert!(matches!(recv(&mut ws).await, ServerMessage::ResyncError { .. }));
}

// =========================================================================
// Match result
// =========================================================================

#[tokio::test]
async fn test_forfeit_is_recorded_in_winner_stats() {
    let room = RoomConfig {
        reconnect_grace: Duration::from_millis(300),
        ..RoomConfig::default()
    };
    let (addr, registry) = start_server(room).await;
    let [(alice, _), (mut bob, _)] = matched(&addr).await;

    drop(alice);
    assert_eq!(recv(&mut bob).await, ServerMessage::OpponentDisconnected { seq: 2 });
    match recv(&mut bob).await {
        ServerMessage::MatchResult {
            seq,
            winner_name,
            reason,
            ..
        } => {
            assert_eq!(seq, 3);
            assert_eq!(winner_name, "bob");
            assert_eq!(reason, MatchEndReason::Forfeit);
        }
        other => panic!("expected match_result, got {other:?}"),
    }
    send(&mut bob, &ClientMessage::AckResult).await;

    let released = tokio::time::timeout(Duration::from_secs(5), async {
        while registry.room_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "room should close after the ack");

    let mut again = connect(&addr).await;
    let (_, user) = relogin(&mut again, "bob").await;
    assert_eq!(user.stats.wins, 1);
    assert_eq!(user.stats.losses, 0);
    assert_eq!(user.stats.rating, 1025);
}

// =========================================================================
// Heartbeat loss (in-memory transport, paused clock)
// =========================================================================

mod heartbeat {
    use super::*;

    use stackclash_session::ConnectionState;
    use stackclash_transport::{
        Connection, Connector, MemoryConnection, MemoryConnector, MemoryListener,
    };
    use tokio::sync::mpsc;

    struct MemClient {
        conn: Arc<MemoryConnection>,
        inbox: mpsc::UnboundedReceiver<ServerMessage>,
    }

    impl MemClient {
        /// Dials the server. Pings are answered only if `answer_pings`.
        async fn dial(connector: &MemoryConnector, answer_pings: bool) -> Self {
            let conn = Arc::new(connector.connect().await.unwrap());
            let (tx, inbox) = mpsc::unbounded_channel();
            let reader = Arc::clone(&conn);
            tokio::spawn(async move {
                while let Ok(Some(bytes)) = reader.recv().await {
                    let msg: ServerMessage = serde_json::from_slice(&bytes).unwrap();
                    match msg {
                        ServerMessage::HeartbeatPing { nonce } => {
                            if answer_pings {
                                let pong = ClientMessage::HeartbeatPong { nonce };
                                let _ = reader.send(&serde_json::to_vec(&pong).unwrap()).await;
                            }
                        }
                        msg => {
                            if tx.send(msg).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
            Self { conn, inbox }
        }

        async fn send(&self, msg: &ClientMessage) {
            self.conn.send(&serde_json::to_vec(msg).unwrap()).await.unwrap();
        }

        async fn recv(&mut self) -> ServerMessage {
            tokio::time::timeout(Duration::from_secs(5), self.inbox.recv())
                .await
                .expect("server reply within 5s")
                .expect("connection open")
        }

        /// Registers, logs in and queues for a match.
        async fn player(
            connector: &MemoryConnector,
            name: &str,
            answer_pings: bool,
        ) -> (Self, SessionToken) {
            let mut client = Self::dial(connector, answer_pings).await;
            client
                .send(&ClientMessage::Register {
                    username: name.into(),
                    password: "secret123".into(),
                })
                .await;
            assert!(matches!(client.recv().await, ServerMessage::RegisterOk { .. }));
            client.send(&login(name)).await;
            let token = match client.recv().await {
                ServerMessage::LoginOk { session_token, .. } => session_token,
                other => panic!("expected login_ok, got {other:?}"),
            };
            client.send(&find_match()).await;
            assert!(matches!(client.recv().await, ServerMessage::MatchmakingStatus { .. }));
            (client, token)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_pongs_put_session_in_grace() {
        let (listener, connector) = MemoryListener::new();
        let server = StackClashServerBuilder::new().build_with_transport(
            listener,
            StandardRules,
            MemoryAccountStore::new(),
        );
        let registry = server.registry();
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let (mut alice, alice_token) = MemClient::player(&connector, "alice", false).await;
        let (mut bob, _) = MemClient::player(&connector, "bob", true).await;
        assert!(matches!(alice.recv().await, ServerMessage::MatchFound { .. }));
        assert!(matches!(bob.recv().await, ServerMessage::MatchFound { .. }));

        // Pings at 15 s and 30 s; the second goes unanswered at 40 s.
        tokio::time::sleep(Duration::from_secs(39)).await;
        assert_eq!(
            registry.session_state(&alice_token).await,
            Some(ConnectionState::Connected)
        );
        while let Ok(msg) = bob.inbox.try_recv() {
            assert!(!matches!(msg, ServerMessage::OpponentDisconnected { .. }));
        }

        let disconnected = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let ServerMessage::OpponentDisconnected { .. } = bob.recv().await {
                    return;
                }
            }
        })
        .await;
        assert!(disconnected.is_ok(), "opponent told about the drop");
        assert!(matches!(
            registry.session_state(&alice_token).await,
            Some(ConnectionState::Grace { .. })
        ));
    }
}
