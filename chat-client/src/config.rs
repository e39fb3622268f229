//! Engine configuration and relay address handling.

use crate::state::ReconnectPolicy;

/// Settings for a [`ChatEngine`](crate::ChatEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Relay address as entered: `host:port`, `wss://…`, `https://…`.
    pub server: String,
    /// Sender id stamped on outgoing events (display name plus tripcode).
    pub sender_id: String,
    /// Avatar blob hash stamped on outgoing events.
    pub avatar_hash: Option<String>,
    /// Reconnection timing.
    pub reconnect: ReconnectPolicy,
}

impl EngineConfig {
    /// Create a configuration with default reconnection timing.
    pub fn new(server: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            server: server.into().trim().to_string(),
            sender_id: sender_id.into(),
            avatar_hash: None,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Set the initial avatar hash.
    pub fn with_avatar_hash(mut self, hash: Option<String>) -> Self {
        self.avatar_hash = hash.filter(|h| !h.is_empty());
        self
    }

    /// Set the reconnection timing.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// WebSocket URL for the sync channel.
    pub fn websocket_url(&self) -> String {
        websocket_url(&self.server)
    }

    /// HTTP base URL for blob transfer.
    pub fn http_base_url(&self) -> String {
        http_base_url(&self.server)
    }
}

/// Turn a relay address into its `/ws` URL.
///
/// `https://` becomes `wss://`, `http://` becomes `ws://`, a bare address
/// gets `wss://`, and `/ws` is appended unless already present.
pub fn websocket_url(server: &str) -> String {
    let server = server.trim();
    let url = if let Some(rest) = server.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if server.starts_with("wss://") || server.starts_with("ws://") {
        server.to_string()
    } else {
        format!("wss://{server}")
    };

    if url.ends_with("/ws") {
        url
    } else {
        format!("{}/ws", url.trim_end_matches('/'))
    }
}

/// Turn a relay address into the base URL of its blob endpoints.
pub fn http_base_url(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    let server = server.strip_suffix("/ws").unwrap_or(server);

    if let Some(rest) = server.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = server.strip_prefix("ws://") {
        format!("http://{rest}")
    } else if server.starts_with("https://") || server.starts_with("http://") {
        server.to_string()
    } else {
        format!("https://{server}")
    }
}
