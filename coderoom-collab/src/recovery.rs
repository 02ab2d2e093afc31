//! Local Recovery Cache: best-effort client-side mirror for reload recovery.
//!
//! Not an authority. Whatever is cached is shown first and then replaced
//! by the relay's join snapshot.
//!
//! Layout:
//! ```text
//! collaborativeCode           → String             (bincode)
//! collaborativeLanguage       → Language           (bincode)
//! collaborativeActiveTab      → EditorTab          (bincode)
//! codeRoom_<roomId>_messages  → Vec<ChatMessage>   (bincode + LZ4)
//! username                    → String             (bincode)
//! roomId                      → String             (bincode)
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::{ChatMessage, Language};
use crate::session::EditorTab;

pub const KEY_CODE: &str = "collaborativeCode";
pub const KEY_LANGUAGE: &str = "collaborativeLanguage";
pub const KEY_ACTIVE_TAB: &str = "collaborativeActiveTab";
pub const KEY_USERNAME: &str = "username";
pub const KEY_ROOM_ID: &str = "roomId";

/// Key of a room's cached chat transcript.
pub fn transcript_key(room_id: &str) -> String {
    format!("codeRoom_{room_id}_messages")
}

/// Cache errors. Callers log these and carry on.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryError {
    IoError(String),
    SerializationError(String),
    DeserializationError(String),
    CompressionError(String),
}

impl std::fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryError::IoError(e) => write!(f, "I/O error: {e}"),
            RecoveryError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            RecoveryError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            RecoveryError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for RecoveryError {}

impl From<std::io::Error> for RecoveryError {
    fn from(e: std::io::Error) -> Self {
        RecoveryError::IoError(e.to_string())
    }
}

// ───────────────────────────────────────────────────────────────────
// Raw stores
// ───────────────────────────────────────────────────────────────────

/// Byte storage by string key.
pub trait RecoveryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RecoveryError>;
    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), RecoveryError>;
    fn remove(&mut self, key: &str) -> Result<(), RecoveryError>;
}

/// In-process store, lost on exit.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl RecoveryStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RecoveryError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), RecoveryError> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), RecoveryError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, RecoveryError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Room ids are client-supplied; anything outside `[A-Za-z0-9_-]` is
    /// percent-encoded so keys cannot escape the directory or collide.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut name = String::with_capacity(key.len() + 4);
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        name.push_str(".bin");
        self.dir.join(name)
    }
}

impl RecoveryStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RecoveryError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), RecoveryError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), RecoveryError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Typed cache
// ───────────────────────────────────────────────────────────────────

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RecoveryError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| RecoveryError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RecoveryError> {
    let (value, _): (T, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| RecoveryError::DeserializationError(e.to_string()))?;
    Ok(value)
}

/// Typed accessors over a [`RecoveryStore`].
#[derive(Debug, Clone)]
pub struct RecoveryCache<S: RecoveryStore> {
    store: S,
}

impl<S: RecoveryStore> RecoveryCache<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, RecoveryError> {
        self.store.get(key)?.map(|bytes| decode(&bytes)).transpose()
    }

    fn save<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), RecoveryError> {
        let bytes = encode(value)?;
        self.store.put(key, &bytes)
    }

    pub fn save_code(&mut self, code: &str) -> Result<(), RecoveryError> {
        self.save(KEY_CODE, &code)
    }

    pub fn load_code(&self) -> Result<Option<String>, RecoveryError> {
        self.load(KEY_CODE)
    }

    pub fn save_language(&mut self, language: Language) -> Result<(), RecoveryError> {
        self.save(KEY_LANGUAGE, &language)
    }

    pub fn load_language(&self) -> Result<Option<Language>, RecoveryError> {
        self.load(KEY_LANGUAGE)
    }

    pub fn save_active_tab(&mut self, tab: EditorTab) -> Result<(), RecoveryError> {
        self.save(KEY_ACTIVE_TAB, &tab)
    }

    pub fn load_active_tab(&self) -> Result<Option<EditorTab>, RecoveryError> {
        self.load(KEY_ACTIVE_TAB)
    }

    /// Document, language and active tab in one go.
    pub fn save_document(
        &mut self,
        code: &str,
        language: Language,
        tab: EditorTab,
    ) -> Result<(), RecoveryError> {
        self.save_code(code)?;
        self.save_language(language)?;
        self.save_active_tab(tab)
    }

    pub fn save_identity(&mut self, username: &str, room_id: &str) -> Result<(), RecoveryError> {
        self.save(KEY_USERNAME, &username)?;
        self.save(KEY_ROOM_ID, &room_id)
    }

    pub fn load_username(&self) -> Result<Option<String>, RecoveryError> {
        self.load(KEY_USERNAME)
    }

    pub fn load_room_id(&self) -> Result<Option<String>, RecoveryError> {
        self.load(KEY_ROOM_ID)
    }

    /// Cache a room's transcript. Empty transcripts are not written.
    pub fn save_transcript(&mut self, room_id: &str, messages: &[ChatMessage]) -> Result<(), RecoveryError> {
        if messages.is_empty() {
            return Ok(());
        }
        let raw = encode(&messages)?;
        let compressed = lz4_flex::compress_prepend_size(&raw);
        self.store.put(&transcript_key(room_id), &compressed)
    }

    pub fn load_transcript(&self, room_id: &str) -> Result<Vec<ChatMessage>, RecoveryError> {
        let Some(compressed) = self.store.get(&transcript_key(room_id))? else {
            return Ok(Vec::new());
        };
        let raw = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| RecoveryError::CompressionError(e.to_string()))?;
        decode(&raw)
    }

    /// Forget the session on leave. The username is kept for next time,
    /// and transcripts stay keyed by room.
    pub fn clear_session(&mut self) -> Result<(), RecoveryError> {
        for key in [KEY_CODE, KEY_LANGUAGE, KEY_ACTIVE_TAB, KEY_ROOM_ID] {
            self.store.remove(key)?;
        }
        Ok(())
    }
}
