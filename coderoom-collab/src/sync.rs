//! Document Sync Channel: whole-document replace on every edit.
//!
//! Each local edit produces a `codeChange` carrying the full content and
//! language. Remote updates replace the local document outright (last
//! write at the relay wins). An editor that reports programmatic changes
//! as edits would bounce every remote update straight back, so the text
//! of the last applied remote update is remembered and the matching
//! local edit is swallowed once.

use crate::protocol::{ClientEvent, Language, RoomId};

/// Local view of one room's shared document.
#[derive(Debug, Clone)]
pub struct DocumentSync {
    room_id: RoomId,
    content: String,
    language: Language,
    pending_echo: Option<String>,
}

impl DocumentSync {
    /// Fresh document: JavaScript starter template.
    pub fn new(room_id: impl Into<RoomId>) -> Self {
        let language = Language::default();
        Self {
            room_id: room_id.into(),
            content: language.template().to_string(),
            language,
            pending_echo: None,
        }
    }

    /// Document recovered from the local cache.
    pub fn restore(room_id: impl Into<RoomId>, content: String, language: Language) -> Self {
        Self {
            room_id: room_id.into(),
            content,
            language,
            pending_echo: None,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// True while a remote update is applied but its editor echo is not yet seen.
    pub fn is_receiving(&self) -> bool {
        self.pending_echo.is_some()
    }

    /// The editor content changed. Returns the event to send, or `None`
    /// when the change is the echo of a remote update.
    pub fn local_edit(&mut self, content: impl Into<String>) -> Option<ClientEvent> {
        let content = content.into();
        if self.pending_echo.take().as_deref() == Some(content.as_str()) {
            self.content = content;
            return None;
        }

        self.content = content;
        Some(self.change_event())
    }

    /// Apply `codeUpdate` / `initialCodeState`. Returns `true` when the
    /// editor text must be replaced. An empty `code` clears the document.
    pub fn apply_remote(&mut self, code: &str, language: Language) -> bool {
        self.language = language;
        if code == self.content {
            return false;
        }
        self.content = code.to_string();
        self.pending_echo = Some(self.content.clone());
        true
    }

    /// Switch language. Untouched starter code is swapped for the new
    /// language's template; anything else is kept.
    pub fn change_language(&mut self, language: Language) -> Option<ClientEvent> {
        if language == self.language {
            return None;
        }
        if self.content == self.language.template() {
            self.content = language.template().to_string();
        }
        self.language = language;
        self.pending_echo = None;
        Some(self.change_event())
    }

    /// The whole current document as a `codeChange`.
    pub fn change_event(&self) -> ClientEvent {
        ClientEvent::CodeChange {
            room_id: self.room_id.clone(),
            code: self.content.clone(),
            language: self.language,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_of(event: Option<ClientEvent>) -> (String, Language) {
        match event {
            Some(ClientEvent::CodeChange { code, language, .. }) => (code, language),
            other => panic!("expected codeChange, got {other:?}"),
        }
    }

    #[test]
    fn test_new_starts_from_javascript_template() {
        let doc = DocumentSync::new("R");
        assert_eq!(doc.language(), Language::Javascript);
        assert_eq!(doc.content(), Language::Javascript.template());
        assert!(!doc.is_receiving());
    }

    #[test]
    fn test_local_edit_emits_full_document() {
        let mut doc = DocumentSync::new("R");
        let event = doc.local_edit("let x = 1;");
        assert_eq!(
            event,
            Some(ClientEvent::CodeChange {
                room_id: "R".into(),
                code: "let x = 1;".into(),
                language: Language::Javascript,
            })
        );
    }

    #[test]
    fn test_remote_update_is_not_echoed() {
        let mut doc = DocumentSync::new("R");
        assert!(doc.apply_remote("print(1)", Language::Python));
        assert!(doc.is_receiving());

        // Editor reports the programmatic replace.
        assert_eq!(doc.local_edit("print(1)"), None);
        assert!(!doc.is_receiving());
        assert_eq!(doc.content(), "print(1)");
        assert_eq!(doc.language(), Language::Python);

        // A real edit afterwards goes out.
        assert_eq!(code_of(doc.local_edit("print(2)")).0, "print(2)");
    }

    #[test]
    fn test_user_edit_after_remote_still_sent() {
        let mut doc = DocumentSync::new("R");
        doc.apply_remote("A", Language::Javascript);
        // The user typed before the echo arrived.
        assert_eq!(code_of(doc.local_edit("AB")).0, "AB");
        assert!(!doc.is_receiving());
    }

    #[test]
    fn test_cleared_document_propagates() {
        let mut alice = DocumentSync::restore("R", "x".into(), Language::Javascript);
        let mut bob = DocumentSync::restore("R", "x".into(), Language::Javascript);

        let (code, language) = code_of(bob.local_edit(""));
        assert_eq!(code, "");

        assert!(alice.apply_remote(&code, language));
        assert_eq!(alice.content(), bob.content());
        assert_eq!(alice.content(), "");

        // The editor reports the clear; it is not sent back.
        assert_eq!(alice.local_edit(""), None);
    }

    #[test]
    fn test_empty_remote_takes_language() {
        let mut doc = DocumentSync::restore("R", "mine".into(), Language::Javascript);
        assert!(doc.apply_remote("", Language::Java));
        assert_eq!(doc.content(), "");
        assert_eq!(doc.language(), Language::Java);
        assert!(doc.is_receiving());
    }

    #[test]
    fn test_identical_remote_is_noop() {
        let mut doc = DocumentSync::restore("R", "same".into(), Language::Cpp);
        assert!(!doc.apply_remote("same", Language::Cpp));
        assert!(!doc.is_receiving());
        assert!(doc.local_edit("same").is_some());
    }

    #[test]
    fn test_language_switch_resets_untouched_template() {
        let mut doc = DocumentSync::new("R");
        let (code, language) = code_of(doc.change_language(Language::Python));
        assert_eq!(language, Language::Python);
        assert_eq!(code, Language::Python.template());
        assert_eq!(doc.content(), Language::Python.template());
    }

    #[test]
    fn test_language_switch_preserves_user_code() {
        let mut doc = DocumentSync::new("R");
        doc.local_edit("console.log('hi')");
        let (code, language) = code_of(doc.change_language(Language::Html));
        assert_eq!(code, "console.log('hi')");
        assert_eq!(language, Language::Html);
    }

    #[test]
    fn test_same_language_is_noop() {
        let mut doc = DocumentSync::new("R");
        assert_eq!(doc.change_language(Language::Javascript), None);
    }
}
