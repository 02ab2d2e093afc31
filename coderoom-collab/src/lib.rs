//! # coderoom-collab — Real-time collaborative code rooms
//!
//! A relay that keeps one shared document, participant list and chat
//! transcript per room, and the client-side pieces that talk to it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     WebSocket      ┌──────────────────┐
//! │ CodeRoomSession  │ ◄────────────────► │ RelayServer      │
//! │ (per user/room)  │    JSON events     │ (central)        │
//! └────────┬─────────┘                    └────────┬─────────┘
//!          │                                       │
//!          ▼                                       ▼
//! ┌──────────────────┐                    ┌──────────────────┐
//! │ DocumentSync     │                    │ RoomRegistry     │
//! │ PresenceTracker  │                    │ (per-room lock)  │
//! │ ChatPanel        │                    └────────┬─────────┘
//! │ RecoveryCache    │                             │
//! └──────────────────┘                    ┌────────┴─────────┐
//!                                         │ BroadcastGroup   │
//!                                         │ (fan-out)        │
//!                                         └──────────────────┘
//! ```
//!
//! Every edit carries the whole document and the last one to reach the
//! relay wins. There is no merge.
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire events and shared types
//! - [`registry`] — Room Registry: membership, document, chat history
//! - [`broadcast`] — Room fan-out with backpressure
//! - [`server`] — WebSocket relay
//! - [`client`] — Connection Coordinator with reconnect
//! - [`backoff`] — Reconnect state machine
//! - [`sync`] — Document Sync Channel
//! - [`presence`] — Cursor colors, decorations, typing set
//! - [`typing`] — Local typing-indicator timers
//! - [`chat`] — Room chat panel
//! - [`recovery`] — Local Recovery Cache
//! - [`session`] — Client session composing the above
//! - [`config`] — Relay and client configuration

pub mod protocol;
pub mod config;
pub mod backoff;
pub mod broadcast;
pub mod registry;
pub mod server;
pub mod client;
pub mod sync;
pub mod presence;
pub mod typing;
pub mod chat;
pub mod recovery;
pub mod session;

// Re-exports for convenience
pub use protocol::{
    ChatMessage, ClientEvent, ConnectionId, CursorPosition, Language, ParticipantInfo,
    ProtocolError, RoomId, ServerEvent,
};
pub use config::{ClientConfig, ConfigError, RelayConfig};
pub use backoff::{BackoffPolicy, ReconnectMachine, ReconnectState};
pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use registry::{DocumentState, JoinSnapshot, RoomRegistry};
pub use server::{RelayServer, RelayStats};
pub use client::{
    ClientError, ConnectionCoordinator, ConnectionHandle, ConnectionStatus, CoordinatorEvent,
    EventSink,
};
pub use sync::DocumentSync;
pub use presence::{CursorColor, CursorDecoration, PresenceTracker};
pub use typing::TypingTimers;
pub use chat::{looks_like_code, ChatPanel};
pub use recovery::{FileStore, MemoryStore, RecoveryCache, RecoveryError, RecoveryStore};
pub use session::{generate_room_id, CodeRoomSession, EditorTab, SessionError};
