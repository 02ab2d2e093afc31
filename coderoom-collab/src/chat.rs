//! Room Chat sub-channel, client side.
//!
//! The relay replays the whole transcript once on join (`previousMessages`)
//! and then streams new messages one by one (`codeRoomMessage`). A cached
//! transcript may be shown first; the replay overwrites it.

use crate::protocol::{ChatMessage, ClientEvent, RoomId};

/// Rendering hint: does `text` look like code?
///
/// Only used to pick a monospace style, never for parsing.
pub fn looks_like_code(text: &str) -> bool {
    text.contains("```") || (text.contains('{') && text.contains('}')) || text.contains("function ")
}

/// Transcript and panel state of one room's chat.
#[derive(Debug, Clone)]
pub struct ChatPanel {
    room_id: RoomId,
    username: String,
    messages: Vec<ChatMessage>,
    expanded: bool,
    unread: usize,
}

impl ChatPanel {
    pub fn new(room_id: impl Into<RoomId>, username: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            username: username.into(),
            messages: Vec::new(),
            expanded: true,
            unread: 0,
        }
    }

    /// Show a cached transcript until the relay's replay lands.
    pub fn show_cached(&mut self, messages: Vec<ChatMessage>) {
        if self.messages.is_empty() {
            self.messages = messages;
        }
    }

    /// Build a chat event from typed input. Blank input sends nothing.
    pub fn compose(&self, input: &str) -> Option<ClientEvent> {
        if input.trim().is_empty() {
            return None;
        }
        Some(self.message_event(input.to_string(), looks_like_code(input)))
    }

    /// Share the current document as a code snippet. Blank documents send nothing.
    pub fn share_code(&self, code: &str) -> Option<ClientEvent> {
        if code.trim().is_empty() {
            return None;
        }
        Some(self.message_event(code.to_string(), true))
    }

    fn message_event(&self, message: String, is_code_snippet: bool) -> ClientEvent {
        ClientEvent::SendCodeRoomMessage {
            room_id: self.room_id.clone(),
            sender: self.username.clone(),
            message,
            is_code_snippet,
        }
    }

    /// Authoritative history from the relay; replaces whatever is shown.
    pub fn replay(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    pub fn receive(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if !self.expanded {
            self.unread += 1;
        }
    }

    /// Toggle the panel. Returns the new expanded state.
    pub fn toggle(&mut self) -> bool {
        if self.expanded {
            self.collapse();
        } else {
            self.expand();
        }
        self.expanded
    }

    pub fn expand(&mut self) {
        self.expanded = true;
        self.unread = 0;
    }

    pub fn collapse(&mut self) {
        self.expanded = false;
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn unread(&self) -> usize {
        self.unread
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_mine(&self, message: &ChatMessage) -> bool {
        message.sender == self.username
    }
}
