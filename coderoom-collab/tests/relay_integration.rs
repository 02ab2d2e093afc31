//! Integration tests for the relay over real WebSockets.
//!
//! These tests start a real server and drive it with raw JSON clients,
//! the way a browser would.

use std::sync::Arc;

use coderoom_collab::protocol::{
    ChatMessage, ClientEvent, ConnectionId, CursorPosition, Language, ParticipantInfo, ServerEvent,
};
use coderoom_collab::{RelayConfig, RelayServer};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a relay on a free port.
async fn start_test_server() -> (Arc<RelayServer>, u16) {
    start_test_server_with(RelayConfig::default().outbox_capacity).await
}

async fn start_test_server_with(outbox_capacity: usize) -> (Arc<RelayServer>, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Arc::new(RelayServer::new(RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        outbox_capacity,
        ..RelayConfig::default()
    }));

    let background = server.clone();
    tokio::spawn(async move {
        background.serve(listener).await.unwrap();
    });
    (server, port)
}

/// Poll until `check` passes or two seconds elapse.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

struct TestClient {
    ws: Ws,
}

impl TestClient {
    async fn connect(port: u16) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}"))
            .await
            .unwrap();
        Self { ws }
    }

    async fn send(&mut self, event: ClientEvent) {
        self.ws
            .send(Message::text(event.encode().unwrap()))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> ServerEvent {
        loop {
            let frame = timeout(Duration::from_secs(2), self.ws.next())
                .await
                .expect("timed out waiting for relay")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = frame {
                return ServerEvent::decode(text.as_str()).unwrap();
            }
        }
    }

    /// True if nothing arrives within `ms`.
    async fn is_silent(&mut self, ms: u64) -> bool {
        timeout(Duration::from_millis(ms), self.ws.next()).await.is_err()
    }

    /// Join and return (participants, own id, code, language, history).
    async fn join(
        &mut self,
        room_id: &str,
        username: &str,
    ) -> (Vec<ParticipantInfo>, ConnectionId, String, Language, Vec<ChatMessage>) {
        self.send(ClientEvent::JoinCodeRoom {
            room_id: room_id.into(),
            username: username.into(),
        })
        .await;

        let participants = match self.recv().await {
            ServerEvent::CodeRoomUserList { participants, .. } => participants,
            other => panic!("expected codeRoomUserList, got {other:?}"),
        };
        let (id, code, language) = match self.recv().await {
            ServerEvent::InitialCodeState { connection_id, code, language, .. } => {
                (connection_id, code, language)
            }
            other => panic!("expected initialCodeState, got {other:?}"),
        };
        let history = match self.recv().await {
            ServerEvent::PreviousMessages { messages, .. } => messages,
            other => panic!("expected previousMessages, got {other:?}"),
        };
        (participants, id, code, language, history)
    }

    async fn expect_user_list(&mut self) -> Vec<String> {
        match self.recv().await {
            ServerEvent::CodeRoomUserList { participants, .. } => {
                participants.into_iter().map(|p| p.username).collect()
            }
            other => panic!("expected codeRoomUserList, got {other:?}"),
        }
    }
}

fn names(participants: &[ParticipantInfo]) -> Vec<&str> {
    participants.iter().map(|p| p.username.as_str()).collect()
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let (_server, port) = start_test_server().await;
    let result = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}")).await;
    assert!(result.is_ok(), "Should connect to relay");
}

#[tokio::test]
async fn test_fresh_room_snapshot() {
    let (server, port) = start_test_server().await;
    let mut alice = TestClient::connect(port).await;

    let (participants, _, code, language, history) = alice.join("NEW1", "alice").await;
    assert_eq!(names(&participants), vec!["alice"]);
    assert_eq!(code, "");
    assert_eq!(language, Language::Javascript);
    assert!(history.is_empty());
    assert_eq!(server.registry().room_count().await, 1);
}

#[tokio::test]
async fn test_late_joiner_receives_document() {
    let (server, port) = start_test_server().await;
    let registry = server.registry().clone();

    let mut alice = TestClient::connect(port).await;
    alice.join("ABC123", "alice").await;
    alice
        .send(ClientEvent::CodeChange {
            room_id: "ABC123".into(),
            code: "print(1)".into(),
            language: Language::Python,
        })
        .await;
    eventually(|| {
        let registry = registry.clone();
        async move {
            registry
                .document("ABC123")
                .await
                .is_some_and(|d| d.content == "print(1)")
        }
    })
    .await;

    let mut bob = TestClient::connect(port).await;
    let (participants, _, code, language, history) = bob.join("ABC123", "bob").await;
    assert_eq!(names(&participants), vec!["alice", "bob"]);
    assert_eq!(code, "print(1)");
    assert_eq!(language, Language::Python);
    assert!(history.is_empty());

    // Alice sees bob arrive and never sees her own edit.
    assert_eq!(alice.expect_user_list().await, vec!["alice", "bob"]);
    assert!(alice.is_silent(150).await);
}

#[tokio::test]
async fn test_last_write_wins() {
    let (server, port) = start_test_server().await;
    let registry = server.registry().clone();

    let mut alice = TestClient::connect(port).await;
    let mut bob = TestClient::connect(port).await;
    alice.join("LWW", "alice").await;
    bob.join("LWW", "bob").await;
    alice.expect_user_list().await;

    alice
        .send(ClientEvent::CodeChange {
            room_id: "LWW".into(),
            code: "A".into(),
            language: Language::Javascript,
        })
        .await;
    assert_eq!(
        bob.recv().await,
        ServerEvent::CodeUpdate {
            room_id: "LWW".into(),
            code: "A".into(),
            language: Language::Javascript,
        }
    );

    bob.send(ClientEvent::CodeChange {
        room_id: "LWW".into(),
        code: "B".into(),
        language: Language::Javascript,
    })
    .await;
    assert!(matches!(alice.recv().await, ServerEvent::CodeUpdate { code, .. } if code == "B"));

    eventually(|| {
        let registry = registry.clone();
        async move { registry.document("LWW").await.is_some_and(|d| d.content == "B") }
    })
    .await;

    let mut carol = TestClient::connect(port).await;
    let (participants, _, code, _, _) = carol.join("LWW", "carol").await;
    assert_eq!(code, "B");
    assert_eq!(names(&participants), vec!["alice", "bob", "carol"]);

    // No echo back to either writer.
    assert_eq!(alice.expect_user_list().await.len(), 3);
    assert_eq!(bob.expect_user_list().await.len(), 3);
    assert!(alice.is_silent(100).await);
    assert!(bob.is_silent(100).await);
}

#[tokio::test]
async fn test_chat_history_replayed_in_order() {
    let (server, port) = start_test_server().await;
    let registry = server.registry().clone();

    let mut alice = TestClient::connect(port).await;
    alice.join("CHAT", "alice").await;
    for body in ["one", "two", "three"] {
        alice
            .send(ClientEvent::SendCodeRoomMessage {
                room_id: "CHAT".into(),
                sender: "alice".into(),
                message: body.into(),
                is_code_snippet: false,
            })
            .await;
        // Sender receives its own message.
        match alice.recv().await {
            ServerEvent::CodeRoomMessage { message, .. } => assert_eq!(message.message, body),
            other => panic!("expected codeRoomMessage, got {other:?}"),
        }
    }
    eventually(|| {
        let registry = registry.clone();
        async move { registry.chat_history("CHAT").await.len() == 3 }
    })
    .await;

    let mut bob = TestClient::connect(port).await;
    let (_, _, _, _, history) = bob.join("CHAT", "bob").await;
    let bodies: Vec<&str> = history.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(bodies, vec!["one", "two", "three"]);
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    alice.expect_user_list().await;
    alice
        .send(ClientEvent::SendCodeRoomMessage {
            room_id: "CHAT".into(),
            sender: "alice".into(),
            message: "fn main() {}".into(),
            is_code_snippet: true,
        })
        .await;
    match bob.recv().await {
        ServerEvent::CodeRoomMessage { message, .. } => {
            assert_eq!(message.message, "fn main() {}");
            assert!(message.is_code_snippet);
        }
        other => panic!("expected codeRoomMessage, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cursor_and_typing_relayed_to_others() {
    let (_server, port) = start_test_server().await;
    let mut alice = TestClient::connect(port).await;
    let mut bob = TestClient::connect(port).await;
    let (_, alice_id, ..) = alice.join("CUR", "alice").await;
    bob.join("CUR", "bob").await;
    alice.expect_user_list().await;

    alice
        .send(ClientEvent::CursorMove {
            room_id: "CUR".into(),
            username: "alice".into(),
            position: CursorPosition::new(3, 14),
        })
        .await;
    alice
        .send(ClientEvent::UserTyping {
            room_id: "CUR".into(),
            username: "alice".into(),
            is_typing: true,
        })
        .await;

    assert_eq!(
        bob.recv().await,
        ServerEvent::CursorUpdate {
            room_id: "CUR".into(),
            connection_id: alice_id,
            username: "alice".into(),
            position: CursorPosition::new(3, 14),
        }
    );
    assert_eq!(
        bob.recv().await,
        ServerEvent::UserTyping {
            room_id: "CUR".into(),
            connection_id: alice_id,
            username: "alice".into(),
            is_typing: true,
        }
    );
    assert!(alice.is_silent(150).await);
}

#[tokio::test]
async fn test_disconnect_updates_presence() {
    let (server, port) = start_test_server().await;
    let mut alice = TestClient::connect(port).await;
    alice.join("BYE", "alice").await;

    {
        let mut bob = TestClient::connect(port).await;
        bob.join("BYE", "bob").await;
        assert_eq!(alice.expect_user_list().await, vec!["alice", "bob"]);
        bob.ws.close(None).await.unwrap();
    }

    assert_eq!(alice.expect_user_list().await, vec!["alice"]);
    let registry = server.registry().clone();
    eventually(|| {
        let registry = registry.clone();
        async move { registry.participants("BYE").await.len() == 1 }
    })
    .await;
}

#[tokio::test]
async fn test_explicit_leave_sends_nothing_to_leaver() {
    let (_server, port) = start_test_server().await;
    let mut alice = TestClient::connect(port).await;
    let mut bob = TestClient::connect(port).await;
    alice.join("LEAVE", "alice").await;
    bob.join("LEAVE", "bob").await;
    alice.expect_user_list().await;

    bob.send(ClientEvent::LeaveCodeRoom { room_id: "LEAVE".into() }).await;
    assert_eq!(alice.expect_user_list().await, vec!["alice"]);
    assert!(bob.is_silent(150).await);

    // Gone from the room: no more broadcasts reach bob.
    alice
        .send(ClientEvent::CodeChange {
            room_id: "LEAVE".into(),
            code: "x".into(),
            language: Language::Html,
        })
        .await;
    assert!(bob.is_silent(150).await);
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let (_server, port) = start_test_server().await;
    let mut alice = TestClient::connect(port).await;
    let mut bob = TestClient::connect(port).await;
    alice.join("ROOM-A", "alice").await;
    bob.join("ROOM-B", "bob").await;

    alice
        .send(ClientEvent::CodeChange {
            room_id: "ROOM-A".into(),
            code: "only a".into(),
            language: Language::Java,
        })
        .await;
    assert!(bob.is_silent(150).await);
}

#[tokio::test]
async fn test_malformed_frames_are_skipped() {
    let (server, port) = start_test_server().await;
    let mut alice = TestClient::connect(port).await;

    alice.ws.send(Message::text("not json")).await.unwrap();
    alice
        .ws
        .send(Message::text(r#"{"event":"teleport","data":{}}"#))
        .await
        .unwrap();
    alice
        .send(ClientEvent::JoinCodeRoom {
            room_id: "R".into(),
            username: "".into(),
        })
        .await;
    assert!(alice.is_silent(150).await);

    // Connection still works.
    let (participants, ..) = alice.join("R", "alice").await;
    assert_eq!(names(&participants), vec!["alice"]);

    let stats = server.stats().await;
    assert_eq!(stats.rejected_frames, 2);
    assert_eq!(stats.active_connections, 1);
}

#[tokio::test]
async fn test_ping_pong() {
    let (_server, port) = start_test_server().await;
    let mut client = TestClient::connect(port).await;

    client.ws.send(Message::Ping(vec![1, 2, 3].into())).await.unwrap();
    let frame = timeout(Duration::from_secs(2), client.ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame, Message::Pong(vec![1, 2, 3].into()));
}

#[tokio::test]
async fn test_presence_converges() {
    let (_server, port) = start_test_server().await;
    let mut clients = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let mut client = TestClient::connect(port).await;
        client.join("CONV", name).await;
        clients.push(client);
    }

    // Each earlier joiner sees one list per later join; the last one wins.
    for (i, client) in clients.iter_mut().enumerate() {
        let mut last = None;
        for _ in i + 1..4 {
            last = Some(client.expect_user_list().await);
        }
        if let Some(view) = last {
            assert_eq!(view, vec!["a", "b", "c", "d"]);
        }
    }
}

#[tokio::test]
async fn test_join_snapshot_with_single_frame_outbox() {
    let (_server, port) = start_test_server_with(1).await;

    let mut alice = TestClient::connect(port).await;
    alice.join("TINY", "alice").await;
    for i in 0..3 {
        alice
            .send(ClientEvent::SendCodeRoomMessage {
                room_id: "TINY".into(),
                sender: "alice".into(),
                message: format!("m{i}"),
                is_code_snippet: false,
            })
            .await;
        assert!(matches!(alice.recv().await, ServerEvent::CodeRoomMessage { .. }));
    }

    // The whole snapshot arrives even though the outbox holds one frame.
    let mut bob = TestClient::connect(port).await;
    let (participants, _, _, _, history) = bob.join("TINY", "bob").await;
    assert_eq!(names(&participants), vec!["alice", "bob"]);
    assert_eq!(history.len(), 3);

    assert_eq!(alice.expect_user_list().await, vec!["alice", "bob"]);
}
