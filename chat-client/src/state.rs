//! Sync engine state machine.
//!
//! A pure, side-effect-free state machine for the relay connection
//! lifecycle. It takes events as input and produces a new state plus a list
//! of actions to execute; [`ChatEngine`](crate::ChatEngine) performs the I/O.
//!
//! ```text
//! Connecting ──dial ok──▶ SyncingBackfill ──SYNC sent──▶ Live
//!     ▲  │                      │                          │
//!     │  └─dial failed (wait)   └──────── lost ────────────┤
//!     └──────────────────── wait, redial ◀─────────────────┘
//! ```
//!
//! There is no terminal state other than [`EngineState::Stopped`], reached
//! only on request.

use std::time::Duration;

/// Status text shown while connected.
pub const STATUS_ONLINE: &str = "Online";
/// Status text shown while a dial is being retried.
pub const STATUS_RETRYING: &str = "Offline - Retrying";
/// Status text shown after an established connection is lost.
pub const STATUS_RECONNECTING: &str = "Offline - Reconnecting";
/// Status text shown after `stop()`.
pub const STATUS_STOPPED: &str = "Stopped";

/// Delays driving reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait after a failed dial.
    pub dial_retry: Duration,
    /// Wait after an established connection ends.
    pub reconnect_delay: Duration,
    /// Upper bound on the WebSocket (and TLS) handshake.
    pub handshake_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            dial_retry: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(1),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Engine state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    /// Dialling the relay (or waiting to redial).
    Connecting {
        /// Dial attempts since the last successful connection.
        attempt: u32,
    },
    /// Connected; the sync command for `last_id` is being sent.
    SyncingBackfill {
        /// Highest id in the local mirror at connect time.
        last_id: u32,
    },
    /// Sync command sent; backfill and live frames are flowing.
    Live,
    /// Stopped on request.
    Stopped,
}

impl EngineState {
    /// Initial state: about to make the first dial.
    pub fn new() -> Self {
        Self::Connecting { attempt: 1 }
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects.
    pub fn on_event(self, event: EngineEvent, policy: &ReconnectPolicy) -> (Self, Vec<Action>) {
        match (self, event) {
            (Self::Stopped, _) => (Self::Stopped, vec![]),

            (_, EngineEvent::StopRequested) => (
                Self::Stopped,
                vec![Action::Close, Action::EmitStatus(Status::offline(STATUS_STOPPED))],
            ),

            // From Connecting
            (Self::Connecting { .. }, EngineEvent::DialSucceeded { last_id }) => (
                Self::SyncingBackfill { last_id },
                vec![
                    Action::EmitStatus(Status::online()),
                    Action::SendSync { last_id },
                ],
            ),
            (Self::Connecting { attempt }, EngineEvent::DialFailed { error }) => (
                Self::Connecting {
                    attempt: attempt.saturating_add(1),
                },
                vec![
                    Action::EmitStatus(Status::offline(STATUS_RETRYING).because(error)),
                    Action::Wait {
                        delay: policy.dial_retry,
                    },
                ],
            ),
            (state @ Self::Connecting { .. }, EngineEvent::RetryTimer) => {
                (state, vec![Action::Dial])
            }

            // From SyncingBackfill
            (Self::SyncingBackfill { .. }, EngineEvent::SyncSent) => {
                (Self::Live, vec![Action::Receive])
            }

            // Any connection loss after a successful dial
            (
                Self::SyncingBackfill { .. } | Self::Live,
                EngineEvent::ConnectionLost { reason },
            ) => (
                Self::Connecting { attempt: 1 },
                vec![
                    Action::Close,
                    Action::EmitStatus(Status::offline(STATUS_RECONNECTING).because(reason)),
                    Action::Wait {
                        delay: policy.reconnect_delay,
                    },
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Whether outgoing events may be sent now.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }

    /// Whether the engine has been stopped.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that drive the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Transport connection established.
    DialSucceeded {
        /// Highest id in the local mirror.
        last_id: u32,
    },
    /// Transport connection failed.
    DialFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The sync command was written.
    SyncSent,
    /// The connection ended (read or write failure, or peer close).
    ConnectionLost {
        /// Reason for disconnection.
        reason: String,
    },
    /// A wait finished.
    RetryTimer,
    /// `stop()` was called.
    StopRequested,
}

/// Actions to be executed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Dial the relay.
    Dial,
    /// Send `SYNC:<last_id>`.
    SendSync {
        /// Id to resume after.
        last_id: u32,
    },
    /// Read frames until the connection ends, then report
    /// [`EngineEvent::ConnectionLost`].
    Receive,
    /// Sleep before the next [`EngineEvent::RetryTimer`].
    Wait {
        /// How long to wait.
        delay: Duration,
    },
    /// Close the transport.
    Close,
    /// Report a status change to the event sink.
    EmitStatus(Status),
}

/// Connection status as reported to an [`EventSink`](crate::EventSink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Human-readable status.
    pub text: String,
    /// Whether the engine is connected.
    pub online: bool,
    /// Underlying error, for logs.
    pub reason: Option<String>,
}

impl Status {
    fn online() -> Self {
        Self {
            text: STATUS_ONLINE.to_string(),
            online: true,
            reason: None,
        }
    }

    fn offline(text: &str) -> Self {
        Self {
            text: text.to_string(),
            online: false,
            reason: None,
        }
    }

    fn because(mut self, reason: String) -> Self {
        self.reason = Some(reason);
        self
    }
}
