//! Typing-indicator timers for the local participant.
//!
//! Every local edit emits `userTyping(true)` immediately and (re)arms a
//! single-shot timer per `(room, username)`. The timer fires once after
//! the idle window and emits `userTyping(false)`. A new edit aborts the
//! pending timer before arming a fresh one, so `false` is only ever sent
//! after a `true` and after a full idle window.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::client::EventSink;
use crate::protocol::{ClientEvent, RoomId};

/// Per-room map from participant to a cancellable "stopped typing" task.
pub struct TypingTimers<K: EventSink + Clone + Send + 'static> {
    sink: K,
    idle: Duration,
    timers: HashMap<(RoomId, String), JoinHandle<()>>,
}

impl<K: EventSink + Clone + Send + 'static> TypingTimers<K> {
    pub fn new(sink: K, idle: Duration) -> Self {
        Self {
            sink,
            idle,
            timers: HashMap::new(),
        }
    }

    /// A local edit happened in `room_id`.
    pub fn on_local_edit(&mut self, room_id: &str, username: &str) {
        self.sink.send(ClientEvent::UserTyping {
            room_id: room_id.to_string(),
            username: username.to_string(),
            is_typing: true,
        });

        let key = (room_id.to_string(), username.to_string());
        if let Some(previous) = self.timers.remove(&key) {
            previous.abort();
        }

        let sink = self.sink.clone();
        let deadline = tokio::time::Instant::now() + self.idle;
        let stop = ClientEvent::UserTyping {
            room_id: key.0.clone(),
            username: key.1.clone(),
            is_typing: false,
        };
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            sink.send(stop);
        });
        self.timers.insert(key, timer);
    }

    /// Whether a "stopped typing" event is still pending.
    pub fn is_pending(&self, room_id: &str, username: &str) -> bool {
        self.timers
            .get(&(room_id.to_string(), username.to_string()))
            .is_some_and(|t| !t.is_finished())
    }

    /// Drop every pending timer for `room_id` without emitting anything.
    pub fn cancel_room(&mut self, room_id: &str) {
        self.timers.retain(|(room, _), timer| {
            if room == room_id {
                timer.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
    }
}

impl<K: EventSink + Clone + Send + 'static> Drop for TypingTimers<K> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
