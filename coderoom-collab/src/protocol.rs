//! JSON event protocol spoken between browser clients and the relay.
//!
//! Wire format (one event per WebSocket text frame):
//! ```text
//! {"event": "codeChange", "data": {"roomId": "ABC123", "code": "...", "language": "python"}}
//! ```
//!
//! Channel names and payload fields are camelCase. Every relay → client
//! event carries `roomId` so a connection joined to several rooms can
//! route them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, client-supplied room identifier.
pub type RoomId = String;

/// Relay-assigned identity of one WebSocket connection.
///
/// This is the uniqueness key for participants; usernames are display-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Editor languages offered in a code room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Javascript,
    Python,
    Java,
    Cpp,
    Html,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Javascript,
        Language::Python,
        Language::Java,
        Language::Cpp,
        Language::Html,
    ];

    /// Wire identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Html => "html",
        }
    }

    /// Human-readable label for language pickers.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Javascript => "JavaScript (Node.js)",
            Language::Python => "Python 3",
            Language::Java => "Java",
            Language::Cpp => "C++",
            Language::Html => "HTML",
        }
    }

    /// Starter content shown in a fresh editor.
    pub fn template(&self) -> &'static str {
        match self {
            Language::Javascript => "// Write your JavaScript code here\n",
            Language::Python => "# Write your Python code here\n",
            Language::Java => concat!(
                "public class Main {\n",
                "    public static void main(String[] args) {\n",
                "        // Write your Java code here\n",
                "    }\n",
                "}",
            ),
            Language::Cpp => concat!(
                "#include <iostream>\n",
                "using namespace std;\n",
                "\n",
                "int main() {\n",
                "    // Write your C++ code here\n",
                "    return 0;\n",
                "}",
            ),
            Language::Html => concat!(
                "<!DOCTYPE html>\n",
                "<html>\n",
                "<head>\n",
                "    <title>HTML Example</title>\n",
                "    <style>\n",
                "        /* CSS styles here */\n",
                "    </style>\n",
                "</head>\n",
                "<body>\n",
                "    <!-- HTML content here -->\n",
                "    <h1>Hello, World!</h1>\n",
                "    <script>\n",
                "        // JavaScript code here\n",
                "    </script>\n",
                "</body>\n",
                "</html>",
            ),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownLanguage(s.to_string()))
    }
}

/// Editor cursor location (1-based, as reported by the editor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPosition {
    pub line_number: u32,
    pub column: u32,
}

impl CursorPosition {
    pub fn new(line_number: u32, column: u32) -> Self {
        Self { line_number, column }
    }
}

/// One chat line. Immutable once the relay has stamped it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub sender: String,
    pub message: String,
    pub is_code_snippet: bool,
    /// Unix milliseconds, assigned by the relay.
    pub timestamp: u64,
}

/// A room member as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub connection_id: ConnectionId,
    pub username: String,
}

impl ParticipantInfo {
    pub fn new(connection_id: ConnectionId, username: impl Into<String>) -> Self {
        Self {
            connection_id,
            username: username.into(),
        }
    }
}

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinCodeRoom {
        room_id: RoomId,
        username: String,
    },
    LeaveCodeRoom {
        room_id: RoomId,
    },
    CodeChange {
        room_id: RoomId,
        code: String,
        language: Language,
    },
    CursorMove {
        room_id: RoomId,
        username: String,
        position: CursorPosition,
    },
    UserTyping {
        room_id: RoomId,
        username: String,
        is_typing: bool,
    },
    SendCodeRoomMessage {
        room_id: RoomId,
        sender: String,
        message: String,
        is_code_snippet: bool,
    },
}

impl ClientEvent {
    pub fn room_id(&self) -> &str {
        match self {
            ClientEvent::JoinCodeRoom { room_id, .. }
            | ClientEvent::LeaveCodeRoom { room_id }
            | ClientEvent::CodeChange { room_id, .. }
            | ClientEvent::CursorMove { room_id, .. }
            | ClientEvent::UserTyping { room_id, .. }
            | ClientEvent::SendCodeRoomMessage { room_id, .. } => room_id,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Events the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    CodeRoomUserList {
        room_id: RoomId,
        participants: Vec<ParticipantInfo>,
    },
    /// Sent to the joiner only. `connection_id` tells the joiner which
    /// participant entry is its own.
    InitialCodeState {
        room_id: RoomId,
        connection_id: ConnectionId,
        code: String,
        language: Language,
    },
    PreviousMessages {
        room_id: RoomId,
        messages: Vec<ChatMessage>,
    },
    CodeUpdate {
        room_id: RoomId,
        code: String,
        language: Language,
    },
    CursorUpdate {
        room_id: RoomId,
        connection_id: ConnectionId,
        username: String,
        position: CursorPosition,
    },
    UserTyping {
        room_id: RoomId,
        connection_id: ConnectionId,
        username: String,
        is_typing: bool,
    },
    CodeRoomMessage {
        room_id: RoomId,
        message: ChatMessage,
    },
}

impl ServerEvent {
    pub fn room_id(&self) -> &str {
        match self {
            ServerEvent::CodeRoomUserList { room_id, .. }
            | ServerEvent::InitialCodeState { room_id, .. }
            | ServerEvent::PreviousMessages { room_id, .. }
            | ServerEvent::CodeUpdate { room_id, .. }
            | ServerEvent::CursorUpdate { room_id, .. }
            | ServerEvent::UserTyping { room_id, .. }
            | ServerEvent::CodeRoomMessage { room_id, .. } => room_id,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    UnknownLanguage(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::UnknownLanguage(lang) => write!(f, "Unknown language: {lang}"),
        }
    }
}

impl std::error::Error for ProtocolError {}
