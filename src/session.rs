//! Session lifecycle state machine shared by both endpoints.
//!
//! Each supervisor owns one [`Lifecycle`]. Transitions are published on a
//! [`tokio::sync::watch`] channel so callers (and tests) can wait for a
//! session to reach `Streaming` or `Closed` without polling.

use std::fmt::{Display, Formatter};

use tokio::sync::watch;
use tracing::debug;

/// Lifecycle state of one agent ↔ collector session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Agent is dialing the collector.
    Connecting,
    /// Transport established; handshake in progress.
    Handshaking,
    /// Handshake complete; log data flowing.
    Streaming,
    /// Tearing down transport and file handles.
    Closing,
    /// All resources released. Terminal.
    Closed,
}

impl SessionState {
    /// Determine whether a lifecycle transition is permitted.
    ///
    /// A session never returns to `Streaming` once it started closing.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Handshaking | Self::Closing)
                | (Self::Handshaking, Self::Streaming | Self::Closing)
                | (Self::Streaming, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Streaming => "streaming",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tracks and publishes the current [`SessionState`] of one supervisor.
#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<SessionState>,
}

impl Lifecycle {
    /// Lifecycle for an agent, which starts by dialing.
    #[must_use]
    pub fn connecting() -> Self {
        Self::starting_at(SessionState::Connecting)
    }

    /// Lifecycle for an accepted collector connection.
    #[must_use]
    pub fn handshaking() -> Self {
        Self::starting_at(SessionState::Handshaking)
    }

    fn starting_at(state: SessionState) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { tx }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Receiver that observes every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move to `next`. Illegal transitions leave the state unchanged and
    /// return `false`.
    pub fn advance(&self, next: SessionState) -> bool {
        let current = self.state();
        if !current.can_transition_to(next) {
            debug!(from = %current, to = %next, "session: ignoring illegal transition");
            return false;
        }
        debug!(from = %current, to = %next, "session: state changed");
        self.tx.send_replace(next);
        true
    }

    /// Run the `Closing → Closed` tail from whatever state the session is in.
    pub fn close(&self) {
        if self.state() != SessionState::Closing {
            self.advance(SessionState::Closing);
        }
        self.advance(SessionState::Closed);
    }
}
