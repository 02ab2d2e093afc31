//! WebSocket relay for code rooms.
//!
//! Architecture:
//! ```text
//! Client A ──┐                                   ┌──► outbox A ──► Client A
//!             ├── decode ── RoomRegistry ── Room ─┤
//! Client B ──┘   (JSON)    (per-room lock)        └──► outbox B ──► Client B
//! ```
//!
//! Each connection gets a fresh [`ConnectionId`] and a bounded outbox.
//! The connection task multiplexes inbound frames and its outbox; joins
//! are answered directly on the socket before the task returns to the
//! outbox, so the snapshot always precedes later broadcasts. When the
//! socket goes away the connection leaves every room it joined.

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::Frame;
use crate::config::RelayConfig;
use crate::protocol::{ClientEvent, ConnectionId, ParticipantInfo, RoomId, ServerEvent};
use crate::registry::RoomRegistry;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_events: u64,
    pub rejected_frames: u64,
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    registry: Arc<RoomRegistry>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            registry: Arc::new(RoomRegistry::new()),
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(&self.config.bind_addr).await
    }

    /// Bind and serve forever.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind and serve until `shutdown` resolves.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<(), BoxError> {
        let listener = self.bind().await?;
        tokio::select! {
            result = self.serve(listener) => result,
            _ = shutdown => {
                log::info!("Relay shutting down");
                Ok(())
            }
        }
    }

    /// Accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        log::info!("Code room relay listening on {}", listener.local_addr()?);

        if let Some(ttl) = self.config.idle_room_ttl {
            self.spawn_idle_sweeper(ttl);
        }

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let outbox_capacity = self.config.outbox_capacity;

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, registry, stats, outbox_capacity).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    fn spawn_idle_sweeper(&self, ttl: Duration) {
        let registry = Arc::downgrade(&self.registry);
        let period = (ttl / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.evict_idle(ttl).await;
            }
        });
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        stats: Arc<RwLock<RelayStats>>,
        outbox_capacity: usize,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let connection_id = ConnectionId::new();
        // mpsc panics on zero; a struct literal config can skip from_env checks.
        let (outbox, mut outbox_rx) = mpsc::channel::<Frame>(outbox_capacity.max(1));
        let mut joined: HashSet<RoomId> = HashSet::new();

        log::info!("WebSocket connection {connection_id} established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let text = match msg {
                            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                                Ok(text) => text,
                                Err(_) => {
                                    log::warn!("Non-UTF-8 binary frame from {addr}");
                                    stats.write().await.rejected_frames += 1;
                                    continue;
                                }
                            },
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                                continue;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection {connection_id} closed from {addr}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }
                            Some(Ok(_)) => continue,
                        };

                        let event = match ClientEvent::decode(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                log::warn!("Failed to decode event from {addr}: {e}");
                                stats.write().await.rejected_frames += 1;
                                continue;
                            }
                        };
                        stats.write().await.total_events += 1;

                        let replies =
                            Self::dispatch(&registry, connection_id, &outbox, &mut joined, event).await?;
                        for reply in replies {
                            ws_sender.send(Message::text(reply.encode()?)).await?;
                        }
                    }

                    Some(frame) = outbox_rx.recv() => {
                        ws_sender.send(Message::text(frame.to_string())).await?;
                    }
                }
            }
            Ok::<(), BoxError>(())
        }
        .await;

        // Cleanup runs even when the socket failed mid-send.
        for room_id in &joined {
            if let Err(e) = registry.leave(room_id, connection_id).await {
                log::error!("Failed to remove {connection_id} from room {room_id}: {e}");
            }
        }
        stats.write().await.active_connections -= 1;

        result
    }

    /// Apply one client event. Returns frames for this connection only.
    async fn dispatch(
        registry: &RoomRegistry,
        connection_id: ConnectionId,
        outbox: &mpsc::Sender<Frame>,
        joined: &mut HashSet<RoomId>,
        event: ClientEvent,
    ) -> Result<Vec<ServerEvent>, BoxError> {
        if event.room_id().trim().is_empty() {
            log::warn!("Event without room id from {connection_id}");
            return Ok(Vec::new());
        }

        match event {
            ClientEvent::JoinCodeRoom { room_id, username } => {
                if username.trim().is_empty() {
                    log::warn!("Join without username from {connection_id}");
                    return Ok(Vec::new());
                }
                let participant = ParticipantInfo::new(connection_id, username);
                let snapshot = registry.join(&room_id, participant, outbox.clone()).await?;
                let replies = snapshot.into_events(&room_id).to_vec();
                joined.insert(room_id);
                Ok(replies)
            }

            ClientEvent::LeaveCodeRoom { room_id } => {
                registry.leave(&room_id, connection_id).await?;
                joined.remove(&room_id);
                Ok(Vec::new())
            }

            ClientEvent::CodeChange { room_id, code, language } => {
                registry.code_change(&room_id, connection_id, code, language).await?;
                Ok(Vec::new())
            }

            ClientEvent::CursorMove { room_id, username, position } => {
                registry.cursor_move(&room_id, connection_id, username, position).await?;
                Ok(Vec::new())
            }

            ClientEvent::UserTyping { room_id, username, is_typing } => {
                registry.typing(&room_id, connection_id, username, is_typing).await?;
                Ok(Vec::new())
            }

            ClientEvent::SendCodeRoomMessage { room_id, sender, message, is_code_snippet } => {
                registry.send_message(&room_id, sender, message, is_code_snippet).await?;
                Ok(Vec::new())
            }
        }
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}
