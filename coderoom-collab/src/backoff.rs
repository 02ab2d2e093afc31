//! Reconnect state machine with capped exponential backoff.
//!
//! ```text
//!   Disconnected ──begin_connect──► Connecting ──on_connected──► Connected
//!        ▲                              │                           │
//!        │                          on_failure                on_disconnected
//!        │                              ▼                           ▼
//!        └────────── (delay elapsed) ── Backoff(n) ◄─schedule_retry─ Disconnected
//! ```
//!
//! Delay for attempt `n` (0-based) is `initial * 2^n`, capped at `max`.
//! A successful connection resets the attempt counter.

use std::time::Duration;

/// Delay policy for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Connection lifecycle as observed by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before retry number `n` (1-based).
    Backoff(u32),
}

impl ReconnectState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ReconnectState::Connected)
    }
}

/// Drives [`ReconnectState`] from transport callbacks.
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: BackoffPolicy,
    state: ReconnectState,
    attempts: u32,
}

impl ReconnectMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ReconnectState::Disconnected,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// Consecutive failed attempts since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn begin_connect(&mut self) -> ReconnectState {
        self.state = ReconnectState::Connecting;
        self.state
    }

    pub fn on_connected(&mut self) -> ReconnectState {
        self.attempts = 0;
        self.state = ReconnectState::Connected;
        self.state
    }

    /// An established connection closed or errored.
    pub fn on_disconnected(&mut self) -> ReconnectState {
        self.state = ReconnectState::Disconnected;
        self.state
    }

    /// A connection attempt failed before it was established.
    pub fn on_failure(&mut self) -> ReconnectState {
        self.state = ReconnectState::Disconnected;
        self.state
    }

    /// Enter `Backoff` and return how long to wait before the next attempt.
    pub fn schedule_retry(&mut self) -> Duration {
        let delay = self.policy.delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        self.state = ReconnectState::Backoff(self.attempts);
        delay
    }
}
