//! Client session for one code room.
//!
//! ```text
//!                 ┌──────────────── CodeRoomSession ────────────────┐
//! CoordinatorEvent│  DocumentSync   PresenceTracker   ChatPanel     │ EventSink
//!  ──────────────►│       │               │               │         ├──────────►
//!  local input    │       └──── RecoveryCache ◄───────────┘         │
//!  ──────────────►│                TypingTimers ────────────────────┤
//!                 └─────────────────────────────────────────────────┘
//! ```
//!
//! Joining and leaving on the wire belong to the
//! [`ConnectionCoordinator`](crate::client::ConnectionCoordinator), which
//! also rejoins after reconnects. The session reacts to what the relay
//! sends and turns local input into events.

use std::fmt;
use std::time::Duration;

use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::chat::ChatPanel;
use crate::client::{validate_identity, ClientError, ConnectionStatus, CoordinatorEvent, EventSink};
use crate::protocol::{ClientEvent, CursorPosition, Language, RoomId, ServerEvent};
use crate::presence::PresenceTracker;
use crate::recovery::{RecoveryCache, RecoveryError, RecoveryStore};
use crate::sync::DocumentSync;
use crate::typing::TypingTimers;

const ROOM_ID_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ROOM_ID_LEN: usize = 6;

/// Random 6-character room id from `A-Z0-9`.
pub fn generate_room_id() -> RoomId {
    let mut rng = rand::rng();
    (0..ROOM_ID_LEN)
        .filter_map(|_| ROOM_ID_CHARS.choose(&mut rng))
        .map(|&b| b as char)
        .collect()
}

/// Which editor pane is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorTab {
    #[default]
    Backend,
    Frontend,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    Client(ClientError),
    Recovery(RecoveryError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Client(e) => write!(f, "{e}"),
            SessionError::Recovery(e) => write!(f, "Recovery cache: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ClientError> for SessionError {
    fn from(e: ClientError) -> Self {
        SessionError::Client(e)
    }
}

impl From<RecoveryError> for SessionError {
    fn from(e: RecoveryError) -> Self {
        SessionError::Recovery(e)
    }
}

/// Log and swallow a cache failure; the cache is best-effort.
fn best_effort(what: &str, result: Result<(), RecoveryError>) {
    if let Err(e) = result {
        log::warn!("Could not {what}: {e}");
    }
}

/// One participant's view of one room.
pub struct CodeRoomSession<S: RecoveryStore, K: EventSink + Clone + Send + 'static> {
    room_id: RoomId,
    username: String,
    sink: K,
    document: DocumentSync,
    presence: PresenceTracker,
    chat: ChatPanel,
    typing: TypingTimers<K>,
    cache: RecoveryCache<S>,
    active_tab: EditorTab,
    status: ConnectionStatus,
}

impl<S: RecoveryStore, K: EventSink + Clone + Send + 'static> CodeRoomSession<S, K> {
    /// Open a session, restoring whatever the cache holds.
    pub fn open(
        room_id: &str,
        username: &str,
        sink: K,
        cache: RecoveryCache<S>,
        typing_idle: Duration,
    ) -> Result<Self, SessionError> {
        validate_identity(room_id, username)?;
        let room_id = room_id.trim().to_string();
        let username = username.trim().to_string();

        let mut cache = cache;
        best_effort("save identity", cache.save_identity(&username, &room_id));

        let document = match (cache.load_code(), cache.load_language()) {
            (Ok(Some(code)), Ok(language)) => {
                DocumentSync::restore(room_id.clone(), code, language.unwrap_or_default())
            }
            (code, language) => {
                if let Err(e) = code.and(language) {
                    log::warn!("Ignoring cached document: {e}");
                }
                DocumentSync::new(room_id.clone())
            }
        };

        let active_tab = cache.load_active_tab().ok().flatten().unwrap_or_default();

        let mut chat = ChatPanel::new(room_id.clone(), username.clone());
        match cache.load_transcript(&room_id) {
            Ok(messages) => chat.show_cached(messages),
            Err(e) => log::warn!("Ignoring cached transcript for {room_id}: {e}"),
        }

        let status = if sink.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        };

        log::info!("Session opened for {username} in room {room_id}");
        Ok(Self {
            typing: TypingTimers::new(sink.clone(), typing_idle),
            room_id,
            username,
            sink,
            document,
            presence: PresenceTracker::new(),
            chat,
            cache,
            active_tab,
            status,
        })
    }

    // ── Inbound ───────────────────────────────────────────────────

    pub fn handle_coordinator_event(&mut self, event: CoordinatorEvent) -> bool {
        match event {
            CoordinatorEvent::Status(status) => {
                self.handle_status(status);
                true
            }
            CoordinatorEvent::Server(event) => self.handle_server_event(event),
        }
    }

    /// Track connection status. Losing the connection persists the document.
    pub fn handle_status(&mut self, status: ConnectionStatus) {
        let was_connected = self.status.is_connected();
        self.status = status;
        if was_connected && !status.is_connected() {
            log::info!("Disconnected from room {}, saving local state", self.room_id);
            self.persist_document();
        }
    }

    /// Apply a relay event. Events for other rooms are ignored.
    /// Returns `true` if anything visible changed.
    pub fn handle_server_event(&mut self, event: ServerEvent) -> bool {
        if event.room_id() != self.room_id {
            return false;
        }

        match event {
            ServerEvent::CodeRoomUserList { participants, .. } => {
                self.presence.handle_user_list(participants);
                true
            }
            ServerEvent::InitialCodeState { connection_id, code, language, .. } => {
                self.presence.set_local_id(connection_id);
                if code.is_empty() && self.presence.remote_participants().next().is_none() {
                    // Fresh room with nobody else in it: seed it from the local document.
                    log::info!("Seeding empty room {} with the local document", self.room_id);
                    self.sink.send(self.document.change_event());
                    return true;
                }
                self.apply_remote_code(&code, language);
                true
            }
            ServerEvent::CodeUpdate { code, language, .. } => self.apply_remote_code(&code, language),
            ServerEvent::PreviousMessages { messages, .. } => {
                self.chat.replay(messages);
                self.persist_transcript();
                true
            }
            ServerEvent::CodeRoomMessage { message, .. } => {
                self.chat.receive(message);
                self.persist_transcript();
                true
            }
            ServerEvent::CursorUpdate { connection_id, username, position, .. } => {
                self.presence.handle_cursor(connection_id, &username, position)
            }
            ServerEvent::UserTyping { connection_id, username, is_typing, .. } => {
                self.presence.handle_typing(connection_id, &username, is_typing)
            }
        }
    }

    fn apply_remote_code(&mut self, code: &str, language: Language) -> bool {
        let before = self.document.language();
        let replaced = self.document.apply_remote(code, language);
        if replaced || before != language {
            self.persist_code_and_language();
        }
        replaced || before != language
    }

    // ── Outbound ──────────────────────────────────────────────────

    /// The editor content changed.
    pub fn local_edit(&mut self, content: impl Into<String>) {
        let event = self.document.local_edit(content);
        best_effort("save code", self.cache.save_code(self.document.content()));

        if let Some(event) = event {
            self.sink.send(event);
            self.typing.on_local_edit(&self.room_id, &self.username);
        }
    }

    pub fn cursor_moved(&mut self, position: CursorPosition) -> bool {
        self.sink.send(ClientEvent::CursorMove {
            room_id: self.room_id.clone(),
            username: self.username.clone(),
            position,
        })
    }

    pub fn change_language(&mut self, language: Language) {
        if let Some(event) = self.document.change_language(language) {
            self.persist_code_and_language();
            self.sink.send(event);
        }
    }

    /// Send typed chat input. Blank input sends nothing.
    pub fn send_chat(&mut self, input: &str) -> bool {
        match self.chat.compose(input) {
            Some(event) => self.sink.send(event),
            None => false,
        }
    }

    /// Share the current document as a code snippet.
    pub fn share_code(&mut self) -> bool {
        match self.chat.share_code(self.document.content()) {
            Some(event) => self.sink.send(event),
            None => false,
        }
    }

    pub fn set_active_tab(&mut self, tab: EditorTab) {
        self.active_tab = tab;
        best_effort("save active tab", self.cache.save_active_tab(tab));
    }

    /// Local side of leaving: stop timers, forget presence, clear the
    /// cached session (the username is kept).
    pub fn leave(&mut self) {
        self.typing.cancel_all();
        self.presence.clear();
        best_effort("clear session", self.cache.clear_session());
        log::info!("{} left room {}", self.username, self.room_id);
    }

    // ── Persistence ───────────────────────────────────────────────

    fn persist_document(&mut self) {
        best_effort(
            "save document",
            self.cache.save_document(
                self.document.content(),
                self.document.language(),
                self.active_tab,
            ),
        );
    }

    fn persist_code_and_language(&mut self) {
        best_effort("save code", self.cache.save_code(self.document.content()));
        best_effort("save language", self.cache.save_language(self.document.language()));
    }

    fn persist_transcript(&mut self) {
        best_effort(
            "save transcript",
            self.cache.save_transcript(&self.room_id, self.chat.messages()),
        );
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn document(&self) -> &DocumentSync {
        &self.document
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn chat(&self) -> &ChatPanel {
        &self.chat
    }

    pub fn chat_mut(&mut self) -> &mut ChatPanel {
        &mut self.chat
    }

    pub fn active_tab(&self) -> EditorTab {
        self.active_tab
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    pub fn cache(&self) -> &RecoveryCache<S> {
        &self.cache
    }
}
