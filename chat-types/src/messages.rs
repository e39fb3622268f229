//! The chat event model.
//!
//! A [`ChatEvent`] is serialized to JSON, encrypted by the sending client and
//! handed to the relay as an opaque payload. The relay never sees these fields.

use serde::{Deserialize, Serialize};

use crate::WireError;

/// Kind of a chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Plain text message
    Text,
    /// Reference to an encrypted blob on the relay
    File,
    /// Reserved for profile updates; never produced
    Profile,
}

impl EventKind {
    /// Stable lowercase name, as stored in the local mirror.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Text => "text",
            EventKind::File => "file",
            EventKind::Profile => "profile",
        }
    }

    /// Parse a stored kind name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(EventKind::Text),
            "file" => Some(EventKind::File),
            "profile" => Some(EventKind::Profile),
            _ => None,
        }
    }
}

/// A single chat event.
///
/// `id` is zero until the relay assigns one; the relay frame header is the
/// only authoritative source for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Relay-assigned log position (0 = unassigned)
    #[serde(default, skip_serializing_if = "is_unassigned")]
    pub id: u32,
    /// Event kind
    #[serde(rename = "tp")]
    pub kind: EventKind,
    /// Client-supplied sender identifier
    #[serde(rename = "u")]
    pub sender: String,
    /// Message body (text events)
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Content address of the encrypted blob (file events)
    #[serde(rename = "h", default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    /// Original file name (file events)
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Sender's local wall-clock time, `HH:MM`. Advisory only.
    #[serde(rename = "tm", default)]
    pub sent_at: String,
    /// Content address of the sender's avatar blob
    #[serde(rename = "ah", default, skip_serializing_if = "Option::is_none")]
    pub avatar_hash: Option<String>,
}

fn is_unassigned(id: &u32) -> bool {
    *id == 0
}

impl ChatEvent {
    /// Create a text event stamped with the current local time.
    pub fn text(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: 0,
            kind: EventKind::Text,
            sender: sender.into(),
            text: Some(body.into()),
            file_hash: None,
            file_name: None,
            sent_at: local_clock(),
            avatar_hash: None,
        }
    }

    /// Create a file event referencing an uploaded blob.
    pub fn file(
        sender: impl Into<String>,
        name: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            kind: EventKind::File,
            sender: sender.into(),
            text: None,
            file_hash: Some(hash.into()),
            file_name: Some(name.into()),
            sent_at: local_clock(),
            avatar_hash: None,
        }
    }

    /// Attach the sender's avatar hash.
    pub fn with_avatar(mut self, avatar_hash: Option<String>) -> Self {
        self.avatar_hash = avatar_hash.filter(|h| !h.is_empty());
        self
    }

    /// Serialize to JSON bytes (the plaintext that gets encrypted).
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from decrypted JSON bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

fn local_clock() -> String {
    chrono::Local::now().format("%H:%M").to_string()
}
