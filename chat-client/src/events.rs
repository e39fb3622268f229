//! Engine notifications.
//!
//! The engine reports connection status, newly stored messages and file
//! transfer progress through an [`EventSink`]. Front ends implement it
//! directly or take a [`ChannelSink`] and consume notifications from a task.

use chat_types::ChatEvent;
use tokio::sync::mpsc;

/// Receiver of engine notifications.
///
/// Methods are called from engine tasks and must not block.
pub trait EventSink: Send + Sync {
    /// Connection status changed.
    fn on_status(&self, _status: &str, _online: bool) {}

    /// A message was stored in the local mirror for the first time.
    fn on_message(&self, _event: &ChatEvent) {}

    /// Upload or download progress, from 0.0 to 1.0.
    fn on_progress(&self, _fraction: f64) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {}

/// A notification forwarded by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
    /// Connection status changed.
    Status {
        /// Human-readable status.
        text: String,
        /// Whether the engine is connected.
        online: bool,
    },
    /// A new message.
    Message(ChatEvent),
    /// Transfer progress.
    Progress(f64),
}

/// Sink that forwards notifications over an unbounded channel.
///
/// Sends to a dropped receiver are ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EngineNotification>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn on_status(&self, status: &str, online: bool) {
        let _ = self.tx.send(EngineNotification::Status {
            text: status.to_string(),
            online,
        });
    }

    fn on_message(&self, event: &ChatEvent) {
        let _ = self.tx.send(EngineNotification::Message(event.clone()));
    }

    fn on_progress(&self, fraction: f64) {
        let _ = self.tx.send(EngineNotification::Progress(fraction));
    }
}
