//! CLI command implementations.

pub mod download;
pub mod history;
pub mod listen;
pub mod send;
pub mod send_file;

use anyhow::{Context, Result};
use chat_client::{
    content_hash, tripcode, ChatEngine, EngineConfig, EngineState, EventSink, LocalMirror,
    SessionKey, WebSocketTransport,
};
use chat_types::{ChatEvent, EventKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How long commands wait for the first successful sync.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine type used by every command.
pub type Engine = ChatEngine<WebSocketTransport>;

/// Settings shared by all commands.
#[derive(Debug)]
pub struct ChatOptions {
    config: EngineConfig,
    passphrase: Option<String>,
    data_dir: PathBuf,
}

impl ChatOptions {
    /// Build options from command-line values.
    pub fn new(
        server: String,
        display_name: &str,
        secret: Option<&str>,
        passphrase: Option<String>,
        data_dir: PathBuf,
    ) -> Self {
        let sender_id = format!("{}{}", display_name, tripcode(secret.unwrap_or("")));
        Self {
            config: EngineConfig::new(server, sender_id),
            passphrase,
            data_dir,
        }
    }

    /// Sender id stamped on outgoing messages.
    pub fn sender_id(&self) -> &str {
        &self.config.sender_id
    }

    /// Mirror database for this relay.
    ///
    /// Each relay keeps its own mirror: ids are only meaningful within one
    /// relay's log.
    pub fn mirror_path(&self) -> PathBuf {
        let url = self.config.websocket_url();
        let tag = &content_hash(url.as_bytes())[..16];
        self.data_dir.join(format!("mirror-{}.db", tag))
    }

    /// Open this relay's local mirror.
    pub async fn open_mirror(&self) -> Result<LocalMirror> {
        let path = self.mirror_path();
        tracing::debug!("Opening local mirror at {}", path.display());
        LocalMirror::open(&path)
            .await
            .with_context(|| format!("Failed to open local mirror {}", path.display()))
    }

    /// Derive the room key, prompting for the passphrase if needed.
    pub async fn session_key(&self) -> Result<SessionKey> {
        let passphrase = match &self.passphrase {
            Some(p) => p.clone(),
            None => prompt_passphrase("Room passphrase: ")?,
        };
        if passphrase.is_empty() {
            anyhow::bail!("Passphrase must not be empty");
        }

        // Argon2 with 64 MiB is too slow for the async workers
        tokio::task::spawn_blocking(move || SessionKey::derive(&passphrase))
            .await
            .context("Key derivation task failed")?
            .context("Key derivation failed")
    }

    /// Build an engine reporting to `sink`. It is not started.
    pub async fn build_engine(&self, sink: Arc<dyn EventSink>) -> Result<Arc<Engine>> {
        let key = self.session_key().await?;
        let mirror = self.open_mirror().await?;
        let transport = WebSocketTransport::new(self.config.reconnect.handshake_timeout);

        let engine = ChatEngine::new(self.config.clone(), key, mirror, transport, sink)
            .context("Failed to create chat engine")?;
        Ok(Arc::new(engine))
    }
}

/// Prompt for passphrase input with echo suppression.
fn prompt_passphrase(prompt: &str) -> Result<String> {
    let passphrase = rpassword::prompt_password(prompt).context("Failed to read passphrase")?;
    Ok(passphrase.trim().to_string())
}

/// Wait until the engine has connected and sent its sync command.
pub async fn wait_until_live(engine: &Engine) -> Result<()> {
    let mut state = engine.subscribe_state();
    tokio::time::timeout(CONNECT_TIMEOUT, state.wait_for(EngineState::is_live))
        .await
        .context("Timed out connecting to relay")?
        .context("Chat engine stopped")?;
    Ok(())
}

/// One line per event: `[HH:MM] #id sender: text`.
pub fn format_event(event: &ChatEvent) -> String {
    match event.kind {
        EventKind::File => format!(
            "[{}] #{} {} shared {} ({})",
            event.sent_at,
            event.id,
            event.sender,
            event.file_name.as_deref().unwrap_or("file"),
            event.file_hash.as_deref().unwrap_or("?"),
        ),
        EventKind::Text | EventKind::Profile => format!(
            "[{}] #{} {}: {}",
            event.sent_at,
            event.id,
            event.sender,
            event.text.as_deref().unwrap_or(""),
        ),
    }
}

/// Sink printing transfer progress to stderr.
#[derive(Debug, Default)]
pub struct ProgressPrinter;

impl EventSink for ProgressPrinter {
    fn on_status(&self, status: &str, _online: bool) {
        eprintln!("* {}", status);
    }

    fn on_progress(&self, fraction: f64) {
        eprint!("\r{:>5.1}%", fraction * 100.0);
        if fraction >= 1.0 {
            eprintln!();
        }
    }
}
