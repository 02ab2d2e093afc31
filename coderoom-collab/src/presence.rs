//! Presence & Cursor Tracker for remote participants.
//!
//! ## Architecture
//!
//! ```text
//! codeRoomUserList ──► handle_user_list() ──► participants, prune stale
//! cursorUpdate     ──► handle_cursor()    ──► CursorDecoration (upsert)
//! userTyping       ──► handle_typing()    ──► typing set ──► typing_label()
//! ```
//!
//! Everything is keyed by [`ConnectionId`]; usernames are display-only.
//! Colors are derived from the username alone, so every client renders
//! the same person in the same color without coordination.
//!
//! Cursor markers of departed users linger until the next participant
//! list arrives.

use std::collections::HashMap;

use crate::protocol::{ConnectionId, CursorPosition, ParticipantInfo};

// ───────────────────────────────────────────────────────────────────
// Colors
// ───────────────────────────────────────────────────────────────────

const SATURATION: f32 = 0.7;
const LIGHTNESS: f32 = 0.6;

/// RGBA color for a participant's cursor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorColor {
    pub hue: u32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl CursorColor {
    /// Stable color for a username: `hsl(hue, 70%, 60%)`.
    pub fn from_username(username: &str) -> Self {
        let hue = username_hue(username);
        let (r, g, b) = hsl_to_rgb(hue as f32 / 360.0, SATURATION, LIGHTNESS);
        Self { hue, r, g, b, a: 1.0 }
    }

    /// CSS form, e.g. `hsl(212, 70%, 60%)`.
    pub fn css(&self) -> String {
        format!(
            "hsl({}, {}%, {}%)",
            self.hue,
            (SATURATION * 100.0) as u32,
            (LIGHTNESS * 100.0) as u32
        )
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Hue in `[0, 360)` from a rolling `hash * 31 + c` over UTF-16 code units.
///
/// The left shift truncates to 32 bits and the subtraction does not, which
/// is what browser clients compute; keeping the same arithmetic keeps the
/// colors identical across clients.
pub fn username_hue(username: &str) -> u32 {
    let mut hash: i64 = 0;
    for unit in username.encode_utf16() {
        let shifted = (hash as i32).wrapping_shl(5) as i64;
        hash = unit as i64 + (shifted - hash);
    }
    (hash.unsigned_abs() % 360) as u32
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l); // Achromatic
    }

    let q = if l < 0.5 {
        l * (1.0 + s)
    } else {
        l + s - l * s
    };
    let p = 2.0 * l - q;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    (r, g, b)
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 { t += 1.0; }
    if t > 1.0 { t -= 1.0; }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

// ───────────────────────────────────────────────────────────────────
// Decorations
// ───────────────────────────────────────────────────────────────────

/// A labeled, single-character-wide marker at a remote cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorDecoration {
    pub connection_id: ConnectionId,
    pub label: String,
    pub color: CursorColor,
    pub start: CursorPosition,
    /// Exclusive; always one column after `start`.
    pub end: CursorPosition,
}

impl CursorDecoration {
    pub fn new(connection_id: ConnectionId, username: &str, position: CursorPosition) -> Self {
        Self {
            connection_id,
            label: username.to_string(),
            color: CursorColor::from_username(username),
            start: position,
            end: CursorPosition::new(position.line_number, position.column + 1),
        }
    }

    pub fn position(&self) -> CursorPosition {
        self.start
    }
}

// ───────────────────────────────────────────────────────────────────
// Tracker
// ───────────────────────────────────────────────────────────────────

/// Presence state of one room as seen by the local participant.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    local_id: Option<ConnectionId>,
    participants: Vec<ParticipantInfo>,
    cursors: HashMap<ConnectionId, CursorDecoration>,
    typing: HashMap<ConnectionId, String>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Our own connection id, learned from `initialCodeState`.
    pub fn set_local_id(&mut self, id: ConnectionId) {
        self.local_id = Some(id);
        self.cursors.remove(&id);
        self.typing.remove(&id);
    }

    pub fn local_id(&self) -> Option<ConnectionId> {
        self.local_id
    }

    fn is_local(&self, id: &ConnectionId) -> bool {
        self.local_id.as_ref() == Some(id)
    }

    /// Replace the participant list and drop state of anyone who left.
    pub fn handle_user_list(&mut self, participants: Vec<ParticipantInfo>) {
        let present = |id: &ConnectionId| participants.iter().any(|p| &p.connection_id == id);
        self.cursors.retain(|id, _| present(id));
        self.typing.retain(|id, _| present(id));
        self.participants = participants;
    }

    /// Upsert the cursor marker. Returns `false` for our own cursor.
    pub fn handle_cursor(
        &mut self,
        connection_id: ConnectionId,
        username: &str,
        position: CursorPosition,
    ) -> bool {
        if self.is_local(&connection_id) {
            return false;
        }
        log::trace!("Cursor {username} at {}:{}", position.line_number, position.column);
        self.cursors.insert(
            connection_id,
            CursorDecoration::new(connection_id, username, position),
        );
        true
    }

    /// Track who is typing. Returns `true` if the set changed.
    pub fn handle_typing(&mut self, connection_id: ConnectionId, username: &str, is_typing: bool) -> bool {
        if self.is_local(&connection_id) {
            return false;
        }
        if is_typing {
            self.typing.insert(connection_id, username.to_string()).is_none()
        } else {
            self.typing.remove(&connection_id).is_some()
        }
    }

    /// Participants in join order, including ourselves.
    pub fn participants(&self) -> &[ParticipantInfo] {
        &self.participants
    }

    pub fn participant_names(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.username.clone()).collect()
    }

    /// Participants other than ourselves.
    pub fn remote_participants(&self) -> impl Iterator<Item = &ParticipantInfo> {
        self.participants
            .iter()
            .filter(move |p| !self.is_local(&p.connection_id))
    }

    pub fn cursor(&self, id: &ConnectionId) -> Option<&CursorDecoration> {
        self.cursors.get(id)
    }

    /// Cursor markers sorted by label, for stable rendering.
    pub fn cursors(&self) -> Vec<&CursorDecoration> {
        let mut cursors: Vec<_> = self.cursors.values().collect();
        cursors.sort_by(|a, b| a.label.cmp(&b.label));
        cursors
    }

    pub fn is_typing(&self, id: &ConnectionId) -> bool {
        self.typing.contains_key(id)
    }

    /// Usernames currently typing, sorted.
    pub fn typing_users(&self) -> Vec<String> {
        let mut names: Vec<String> = self.typing.values().cloned().collect();
        names.sort();
        names
    }

    /// Status-bar text, or `None` when nobody is typing.
    pub fn typing_label(&self) -> Option<String> {
        let names = self.typing_users();
        match names.as_slice() {
            [] => None,
            [one] => Some(format!("{one} is typing...")),
            [a, b] => Some(format!("{a} and {b} are typing...")),
            _ => Some(format!("{} people are typing...", names.len())),
        }
    }

    /// Forget everything, e.g. after leaving the room.
    pub fn clear(&mut self) {
        self.local_id = None;
        self.participants.clear();
        self.cursors.clear();
        self.typing.clear();
    }
}
