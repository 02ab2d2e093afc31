//! Authoritative room state held by the relay.
//!
//! ```text
//!                    RoomRegistry
//!   RwLock<HashMap<RoomId, Arc<Mutex<Room>>>>
//!                        │
//!        ┌───────────────┼────────────────┐
//!        ▼               ▼                ▼
//!      Room            Room             Room
//!   ├ DocumentState  (content + language, last write wins)
//!   ├ chat history   (append-only)
//!   └ BroadcastGroup (members + outboxes)
//! ```
//!
//! Every operation on a room runs under that room's mutex, so one room's
//! events are applied and fanned out strictly in arrival order while
//! different rooms proceed independently. Rooms are created implicitly
//! by the first join or write and are only removed by the optional idle
//! sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::broadcast::{BroadcastGroup, BroadcastStats, Outbox};
use crate::protocol::{
    ChatMessage, ConnectionId, CursorPosition, Language, ParticipantInfo, ProtocolError, RoomId,
    ServerEvent,
};

/// The shared document of a room. Each edit replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentState {
    pub content: String,
    pub language: Language,
}

/// What a joiner receives, and nobody else.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSnapshot {
    pub connection_id: ConnectionId,
    pub participants: Vec<ParticipantInfo>,
    pub document: DocumentState,
    pub chat_history: Vec<ChatMessage>,
}

impl JoinSnapshot {
    /// Wire events in delivery order: user list, document, chat replay.
    pub fn into_events(self, room_id: &str) -> [ServerEvent; 3] {
        [
            ServerEvent::CodeRoomUserList {
                room_id: room_id.to_string(),
                participants: self.participants,
            },
            ServerEvent::InitialCodeState {
                room_id: room_id.to_string(),
                connection_id: self.connection_id,
                code: self.document.content,
                language: self.document.language,
            },
            ServerEvent::PreviousMessages {
                room_id: room_id.to_string(),
                messages: self.chat_history,
            },
        ]
    }
}

struct Room {
    id: RoomId,
    document: DocumentState,
    chat_history: Vec<ChatMessage>,
    broadcast: BroadcastGroup,
    last_activity: Instant,
    evicted: bool,
}

impl Room {
    fn new(id: RoomId) -> Self {
        Self {
            id,
            document: DocumentState::default(),
            chat_history: Vec::new(),
            broadcast: BroadcastGroup::new(),
            last_activity: Instant::now(),
            evicted: false,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn broadcast_user_list(&mut self, except: Option<ConnectionId>) -> Result<usize, ProtocolError> {
        let event = ServerEvent::CodeRoomUserList {
            room_id: self.id.clone(),
            participants: self.broadcast.peers(),
        };
        self.broadcast.broadcast(&event, except)
    }
}

/// All rooms known to the relay.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<Mutex<Room>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_or_create(&self, room_id: &str) -> Arc<Mutex<Room>> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(room_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                log::info!("Room {room_id} created");
                Arc::new(Mutex::new(Room::new(room_id.to_string())))
            })
            .clone()
    }

    /// Lock a room, creating it if needed.
    async fn lock_room(&self, room_id: &str) -> OwnedMutexGuard<Room> {
        loop {
            let guard = self.get_or_create(room_id).await.lock_owned().await;
            // Lost a race with the idle sweep; the map no longer holds this room.
            if !guard.evicted {
                return guard;
            }
        }
    }

    /// Lock a room only if it already exists.
    async fn lock_existing(&self, room_id: &str) -> Option<OwnedMutexGuard<Room>> {
        let room = self.rooms.read().await.get(room_id).cloned()?;
        let guard = room.lock_owned().await;
        (!guard.evicted).then_some(guard)
    }

    /// Add `participant` to the room and return the joiner's snapshot.
    ///
    /// The rest of the room receives the updated participant list. The
    /// outbox is registered under the same lock the snapshot is taken
    /// under, so every later broadcast reaches the joiner after it.
    pub async fn join(
        &self,
        room_id: &str,
        participant: ParticipantInfo,
        outbox: Outbox,
    ) -> Result<JoinSnapshot, ProtocolError> {
        let mut room = self.lock_room(room_id).await;
        let connection_id = participant.connection_id;
        let username = participant.username.clone();

        if !room.broadcast.add_peer(participant, outbox) {
            log::debug!("{username} ({connection_id}) re-joined room {room_id}");
        }
        room.touch();
        room.broadcast_user_list(Some(connection_id))?;

        log::info!(
            "{username} ({connection_id}) joined room {room_id} ({} present)",
            room.broadcast.peer_count()
        );

        Ok(JoinSnapshot {
            connection_id,
            participants: room.broadcast.peers(),
            document: room.document.clone(),
            chat_history: room.chat_history.clone(),
        })
    }

    /// Remove a connection from a room. The leaver gets no notice; the
    /// remaining members get the updated list. Returns whether it was a member.
    pub async fn leave(&self, room_id: &str, connection_id: ConnectionId) -> Result<bool, ProtocolError> {
        let Some(mut room) = self.lock_existing(room_id).await else {
            return Ok(false);
        };
        let Some(info) = room.broadcast.remove_peer(&connection_id) else {
            return Ok(false);
        };
        room.touch();
        room.broadcast_user_list(None)?;

        log::info!(
            "{} ({connection_id}) left room {room_id} ({} present)",
            info.username,
            room.broadcast.peer_count()
        );
        Ok(true)
    }

    /// Overwrite the room document and forward it to every other member.
    ///
    /// Last write to arrive wins; there is no membership or version check.
    pub async fn code_change(
        &self,
        room_id: &str,
        origin: ConnectionId,
        code: String,
        language: Language,
    ) -> Result<usize, ProtocolError> {
        let mut room = self.lock_room(room_id).await;
        room.document = DocumentState {
            content: code.clone(),
            language,
        };
        room.touch();

        let event = ServerEvent::CodeUpdate {
            room_id: room_id.to_string(),
            code,
            language,
        };
        let delivered = room.broadcast.broadcast(&event, Some(origin))?;
        log::debug!("Room {room_id}: document replaced by {origin}, forwarded to {delivered}");
        Ok(delivered)
    }

    /// Forward a cursor position. Nothing is retained.
    pub async fn cursor_move(
        &self,
        room_id: &str,
        origin: ConnectionId,
        username: String,
        position: CursorPosition,
    ) -> Result<usize, ProtocolError> {
        let Some(mut room) = self.lock_existing(room_id).await else {
            return Ok(0);
        };
        let event = ServerEvent::CursorUpdate {
            room_id: room_id.to_string(),
            connection_id: origin,
            username,
            position,
        };
        log::trace!("Room {room_id}: cursor from {origin}");
        room.broadcast.broadcast(&event, Some(origin))
    }

    /// Forward a typing flag. Nothing is retained.
    pub async fn typing(
        &self,
        room_id: &str,
        origin: ConnectionId,
        username: String,
        is_typing: bool,
    ) -> Result<usize, ProtocolError> {
        let Some(mut room) = self.lock_existing(room_id).await else {
            return Ok(0);
        };
        let event = ServerEvent::UserTyping {
            room_id: room_id.to_string(),
            connection_id: origin,
            username,
            is_typing,
        };
        room.broadcast.broadcast(&event, Some(origin))
    }

    /// Append to the chat history and deliver to the whole room, sender included.
    pub async fn send_message(
        &self,
        room_id: &str,
        sender: String,
        body: String,
        is_code_snippet: bool,
    ) -> Result<ChatMessage, ProtocolError> {
        let mut room = self.lock_room(room_id).await;
        let message = ChatMessage {
            sender,
            message: body,
            is_code_snippet,
            timestamp: unix_millis(),
        };
        room.chat_history.push(message.clone());
        room.touch();

        let event = ServerEvent::CodeRoomMessage {
            room_id: room_id.to_string(),
            message: message.clone(),
        };
        room.broadcast.broadcast(&event, None)?;
        log::debug!(
            "Room {room_id}: message from {} ({} in history)",
            message.sender,
            room.chat_history.len()
        );
        Ok(message)
    }

    /// Remove rooms that have no members and no activity for `ttl`.
    pub async fn evict_idle(&self, ttl: Duration) -> Vec<RoomId> {
        let mut rooms = self.rooms.write().await;
        let mut evicted = Vec::new();

        rooms.retain(|id, room| {
            // A locked room is in use right now.
            let Ok(mut guard) = room.try_lock() else {
                return true;
            };
            if guard.broadcast.is_empty() && guard.last_activity.elapsed() >= ttl {
                guard.evicted = true;
                evicted.push(id.clone());
                false
            } else {
                true
            }
        });

        for id in &evicted {
            log::info!("Room {id} evicted after {}s idle", ttl.as_secs());
        }
        evicted
    }

    pub async fn document(&self, room_id: &str) -> Option<DocumentState> {
        let room = self.lock_existing(room_id).await?;
        Some(room.document.clone())
    }

    pub async fn participants(&self, room_id: &str) -> Vec<ParticipantInfo> {
        match self.lock_existing(room_id).await {
            Some(room) => room.broadcast.peers(),
            None => Vec::new(),
        }
    }

    pub async fn chat_history(&self, room_id: &str) -> Vec<ChatMessage> {
        match self.lock_existing(room_id).await {
            Some(room) => room.chat_history.clone(),
            None => Vec::new(),
        }
    }

    pub async fn broadcast_stats(&self, room_id: &str) -> Option<BroadcastStats> {
        let room = self.lock_existing(room_id).await?;
        Some(room.broadcast.stats())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
