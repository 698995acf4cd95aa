//! Per-peer session state machine.
use std::time::Duration;

use localtime::LocalTime;

use crate::config::ReconnectBackoff;

/// `idle -> dialing -> handshaking -> open -> closing -> closed`, per spec §4.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Idle,
    Dialing,
    Handshaking,
    Open { since: LocalTime },
    Closing,
    Closed { reason: String },
}

/// Direction a session was established in. Only outbound sessions reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Outbound,
    Inbound,
}

/// A session bound to one logical peer: an outbound stub plus an inbound
/// target sharing the same peer name (spec §9 "reference cycles" note:
/// sessions refer to peers by name, never by owning reference).
#[derive(Debug, Clone)]
pub struct Session {
    pub peer: String,
    pub link: Link,
    pub state: State,
    /// Time of the last message sent or received, for heartbeat expiry.
    pub last_active: LocalTime,
    /// Consecutive authentication failures within the current window.
    auth_failures: usize,
    /// Current backoff delay for the next reconnect attempt (outbound only).
    backoff: Duration,
}

/// Authentication failures within this many attempts puts the peer in
/// `failed` status, requiring explicit delete + recreate.
pub const MAX_AUTH_FAILURES: usize = 3;

impl Session {
    pub fn dialing(peer: impl Into<String>, now: LocalTime, backoff: &ReconnectBackoff) -> Self {
        Self {
            peer: peer.into(),
            link: Link::Outbound,
            state: State::Dialing,
            last_active: now,
            auth_failures: 0,
            backoff: Duration::from_millis(backoff.initial_ms),
        }
    }

    pub fn accepting(peer: impl Into<String>, now: LocalTime) -> Self {
        Self {
            peer: peer.into(),
            link: Link::Inbound,
            state: State::Dialing,
            last_active: now,
            auth_failures: 0,
            backoff: Duration::ZERO,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, State::Open { .. })
    }

    pub fn to_handshaking(&mut self) {
        self.state = State::Handshaking;
    }

    pub fn to_open(&mut self, now: LocalTime) {
        self.auth_failures = 0;
        self.state = State::Open { since: now };
        self.last_active = now;
    }

    /// Record a handshake/auth failure. Returns `true` once the peer has
    /// exceeded [`MAX_AUTH_FAILURES`] and must transition to `failed`.
    pub fn record_auth_failure(&mut self) -> bool {
        self.auth_failures += 1;
        self.auth_failures >= MAX_AUTH_FAILURES
    }

    pub fn to_closing(&mut self) {
        self.state = State::Closing;
    }

    pub fn to_closed(&mut self, reason: impl Into<String>) {
        self.state = State::Closed {
            reason: reason.into(),
        };
    }

    pub fn touch(&mut self, now: LocalTime) {
        self.last_active = now;
    }

    /// Whether this session has gone quiet long enough to be torn down.
    /// Expiry is `12H` where `H` is the configured heartbeat interval.
    pub fn is_stale(&self, now: LocalTime, heartbeat: Duration) -> bool {
        let elapsed = now.as_secs().saturating_sub(self.last_active.as_secs());
        elapsed >= heartbeat.as_secs().saturating_mul(12)
    }

    /// Current reconnect delay, then advance it exponentially up to `max_ms`.
    pub fn next_backoff(&mut self, config: &ReconnectBackoff) -> Duration {
        let current = self.backoff;
        let doubled = current.as_millis().saturating_mul(2) as u64;
        self.backoff = Duration::from_millis(doubled.min(config.max_ms)).max(Duration::from_millis(config.initial_ms));
        current
    }

    pub fn reset_backoff(&mut self, config: &ReconnectBackoff) {
        self.backoff = Duration::from_millis(config.initial_ms);
    }
}
