//! ChatEngine - the client side of the relay protocol.
//!
//! # Architecture
//!
//! The engine drives a pure state machine ([`EngineState`]) and interprets
//! its actions to perform I/O via the [`Transport`] trait:
//!
//! ```text
//! Application → ChatEngine → Transport → Relay
//!                   ↓    ↘
//!          EngineState   LocalMirror (decrypted history)
//! ```
//!
//! Every received frame is decrypted, stored under its relay-assigned id and
//! reported once. Outgoing events are never echoed locally: a sender learns
//! its own message's id when the relay broadcasts it back.
//!
//! # Example
//!
//! ```ignore
//! let key = SessionKey::derive("shared passphrase")?;
//! let mirror = LocalMirror::open(&data_dir.join("mirror.db")).await?;
//! let transport = WebSocketTransport::new(Duration::from_secs(10));
//! let config = EngineConfig::new("relay.example:8080", "alice#3f09c1");
//!
//! let engine = Arc::new(ChatEngine::new(config, key, mirror, transport, sink)?);
//! let task = engine.clone().start();
//! engine.send_text("hello").await?;
//! ```

use chat_types::{decode_frame, ChatEvent, SyncRequest, WireError};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::crypto::{content_hash, CryptoError, SessionKey};
use crate::events::EventSink;
use crate::files::{BlobClient, ProgressFn, TransferError};
use crate::mirror::{LocalMirror, MirrorError};
use crate::state::{Action, EngineEvent, EngineState};
use crate::transport::{Frame, Transport, TransportError};

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No live relay connection.
    #[error("not connected")]
    NotConnected,

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Local mirror error.
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Blob transfer error.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Event encoding error.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Local file error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Stored and reported to the sink.
    Stored(u32),
    /// Already in the mirror; not reported again.
    Duplicate(u32),
    /// Skipped.
    Dropped(DropReason),
}

/// Why an inbound frame was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Four bytes or fewer: no ciphertext.
    Short,
    /// Failed authentication (different passphrase, or corrupt).
    Undecryptable,
    /// Decrypted but not a valid event.
    Malformed,
    /// The mirror rejected the write.
    StorageFault,
}

/// The chat engine.
///
/// Owns the connection lifecycle, the local mirror and blob transfers.
pub struct ChatEngine<T: Transport> {
    config: EngineConfig,
    key: SessionKey,
    mirror: LocalMirror,
    transport: T,
    blobs: BlobClient,
    sink: Arc<dyn EventSink>,
    state: watch::Sender<EngineState>,
    avatar_hash: RwLock<Option<String>>,
    /// Held while dialling, syncing and writing events, so an event can
    /// never reach a connection before its sync command.
    send_lock: Mutex<()>,
}

impl<T: Transport> ChatEngine<T> {
    /// Create an engine. Nothing happens until [`run`](Self::run).
    pub fn new(
        config: EngineConfig,
        key: SessionKey,
        mirror: LocalMirror,
        transport: T,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, EngineError> {
        let blobs = BlobClient::new(config.http_base_url())?;
        let (state, _) = watch::channel(EngineState::new());
        let avatar_hash = RwLock::new(config.avatar_hash.clone());

        Ok(Self {
            config,
            key,
            mirror,
            transport,
            blobs,
            sink,
            state,
            avatar_hash,
            send_lock: Mutex::new(()),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    /// Watch lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn start(self: Arc<Self>) -> JoinHandle<()>
    where
        T: 'static,
    {
        tokio::spawn(async move { self.run().await })
    }

    /// Connect, sync and receive until [`stop`](Self::stop) is called.
    ///
    /// Connection failures never end this loop; they lead to a wait and a
    /// redial.
    pub async fn run(&self) {
        tracing::info!(
            "Chat engine starting for {} as {}",
            self.config.websocket_url(),
            self.config.sender_id
        );

        let mut pending: VecDeque<Action> = VecDeque::from([Action::Dial]);
        while let Some(action) = pending.pop_front() {
            if self.state().is_stopped() {
                break;
            }
            pending.extend(self.execute(action).await);
        }

        // A dial may have completed after stop() closed the transport
        let _ = self.transport.close().await;
        tracing::info!("Chat engine stopped");
    }

    /// Stop the engine: close the connection and end [`run`](Self::run).
    pub async fn stop(&self) {
        for action in self.apply(EngineEvent::StopRequested) {
            self.execute(action).await;
        }
    }

    /// Feed an event to the state machine and return its actions.
    fn apply(&self, event: EngineEvent) -> Vec<Action> {
        let mut actions = Vec::new();
        let policy = self.config.reconnect;
        self.state.send_modify(|state| {
            let (next, next_actions) = state.clone().on_event(event, &policy);
            if *state != next {
                tracing::debug!("Engine state {:?} -> {:?}", state, next);
            }
            *state = next;
            actions = next_actions;
        });
        actions
    }

    /// Perform one action; returns the follow-up actions.
    async fn execute(&self, action: Action) -> Vec<Action> {
        match action {
            Action::Dial => {
                let event = self.dial().await;
                self.apply(event)
            }
            Action::SendSync { last_id } => self.send_sync(last_id).await,
            Action::Receive => {
                let event = self.receive_until_closed().await;
                self.apply(event)
            }
            Action::Wait { delay } => {
                self.wait(delay).await;
                self.apply(EngineEvent::RetryTimer)
            }
            Action::Close => {
                if let Err(e) = self.transport.close().await {
                    tracing::debug!("Close failed: {}", e);
                }
                vec![]
            }
            Action::EmitStatus(status) => {
                match &status.reason {
                    Some(reason) => tracing::info!("{} ({})", status.text, reason),
                    None => tracing::info!("{}", status.text),
                }
                self.sink.on_status(&status.text, status.online);
                vec![]
            }
        }
    }

    async fn dial(&self) -> EngineEvent {
        let url = self.config.websocket_url();
        let _guard = self.send_lock.lock().await;

        match self.transport.connect(&url).await {
            Ok(()) => {
                let last_id = match self.mirror.last_id().await {
                    Ok(id) => id,
                    Err(e) => {
                        tracing::error!("Failed to read last id, requesting full history: {}", e);
                        0
                    }
                };
                tracing::debug!("Connected to {}, resuming after {}", url, last_id);
                EngineEvent::DialSucceeded { last_id }
            }
            Err(e) => {
                tracing::warn!("Dial {} failed: {}", url, e);
                EngineEvent::DialFailed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn send_sync(&self, last_id: u32) -> Vec<Action> {
        let _guard = self.send_lock.lock().await;
        let command = SyncRequest::new(last_id).to_command();

        match self.transport.send_text(&command).await {
            // Go live while still holding the lock
            Ok(()) => self.apply(EngineEvent::SyncSent),
            Err(e) => self.apply(EngineEvent::ConnectionLost {
                reason: e.to_string(),
            }),
        }
    }

    async fn receive_until_closed(&self) -> EngineEvent {
        loop {
            match self.transport.recv().await {
                Ok(Frame::Binary(frame)) => {
                    self.handle_frame(&frame).await;
                }
                Ok(Frame::Text(_)) => {
                    tracing::debug!("Ignoring text frame from relay");
                }
                Err(e) => {
                    return EngineEvent::ConnectionLost {
                        reason: e.to_string(),
                    }
                }
            }
        }
    }

    async fn wait(&self, delay: std::time::Duration) {
        let mut state = self.state.subscribe();
        let stopped = async { state.wait_for(EngineState::is_stopped).await.is_ok() };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stopped => {}
        }
    }

    /// Decrypt, store and report one `id ‖ ciphertext` frame.
    ///
    /// Frames that cannot be used are skipped without affecting the
    /// connection; duplicates are stored once and reported once.
    pub async fn handle_frame(&self, frame: &[u8]) -> FrameOutcome {
        let Some((id, ciphertext)) = decode_frame(frame) else {
            tracing::debug!("Skipping {}-byte frame", frame.len());
            return FrameOutcome::Dropped(DropReason::Short);
        };

        let plaintext = match self.key.decrypt(ciphertext) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                tracing::debug!("Skipping frame {}: not readable with this passphrase", id);
                return FrameOutcome::Dropped(DropReason::Undecryptable);
            }
        };

        let mut event = match ChatEvent::from_bytes(&plaintext) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Skipping frame {}: {}", id, e);
                return FrameOutcome::Dropped(DropReason::Malformed);
            }
        };
        event.id = id;

        match self.mirror.insert(&event).await {
            Ok(true) => {
                self.sink.on_message(&event);
                FrameOutcome::Stored(id)
            }
            Ok(false) => FrameOutcome::Duplicate(id),
            Err(e) => {
                tracing::error!("Failed to store message {}: {}", id, e);
                FrameOutcome::Dropped(DropReason::StorageFault)
            }
        }
    }

    /// Encrypt and send an event.
    ///
    /// Fails with [`EngineError::NotConnected`] unless the engine is live.
    /// The event is not stored locally; it arrives back through the relay.
    pub async fn send_event(&self, event: &ChatEvent) -> Result<(), EngineError> {
        if !self.state().is_live() {
            return Err(EngineError::NotConnected);
        }
        let ciphertext = self.key.encrypt(&event.to_bytes()?)?;

        let _guard = self.send_lock.lock().await;
        if !self.state().is_live() {
            return Err(EngineError::NotConnected);
        }
        self.transport.send_binary(&ciphertext).await?;
        Ok(())
    }

    /// Send a text message.
    pub async fn send_text(&self, text: &str) -> Result<(), EngineError> {
        let event =
            ChatEvent::text(&self.config.sender_id, text).with_avatar(self.avatar_hash().await);
        self.send_event(&event).await
    }

    /// Announce an uploaded file.
    pub async fn send_file_message(&self, name: &str, hash: &str) -> Result<(), EngineError> {
        let event = ChatEvent::file(&self.config.sender_id, name, hash)
            .with_avatar(self.avatar_hash().await);
        self.send_event(&event).await
    }

    /// Stored history in ascending id order.
    pub async fn history(&self) -> Result<Vec<ChatEvent>, EngineError> {
        Ok(self.mirror.history().await?)
    }

    /// Avatar hash stamped on outgoing events.
    pub async fn avatar_hash(&self) -> Option<String> {
        self.avatar_hash.read().await.clone()
    }

    /// Change the avatar hash stamped on outgoing events.
    pub async fn set_avatar_hash(&self, hash: Option<String>) {
        *self.avatar_hash.write().await = hash.filter(|h| !h.is_empty());
    }

    fn progress(&self) -> ProgressFn {
        let sink = Arc::clone(&self.sink);
        Arc::new(move |fraction| sink.on_progress(fraction))
    }

    /// Encrypt and upload content. Returns its content hash.
    pub async fn upload_file(&self, content: &[u8]) -> Result<String, EngineError> {
        let ciphertext = self.key.encrypt(content)?;
        self.upload_encrypted(ciphertext).await
    }

    /// Upload an already encrypted blob. Returns its content hash.
    ///
    /// If the relay already has the blob, progress jumps to 1.0 and nothing
    /// is sent. Re-uploading the same ciphertext (a cached avatar, say) is
    /// the only way to hit this path: every fresh encryption has a new nonce.
    pub async fn upload_encrypted(&self, ciphertext: Vec<u8>) -> Result<String, EngineError> {
        let hash = content_hash(&ciphertext);

        match self.blobs.exists(&hash).await {
            Ok(true) => {
                tracing::debug!("Blob {} already on relay", hash);
                self.sink.on_progress(1.0);
                return Ok(hash);
            }
            Ok(false) => {}
            Err(e) => tracing::debug!("Blob check failed, uploading anyway: {}", e),
        }

        self.blobs.upload(&hash, ciphertext, self.progress()).await?;
        Ok(hash)
    }

    /// Encrypt content for [`upload_encrypted`](Self::upload_encrypted).
    pub fn encrypt_blob(&self, content: &[u8]) -> Result<Vec<u8>, EngineError> {
        Ok(self.key.encrypt(content)?)
    }

    /// Download and decrypt a blob.
    pub async fn download_file(&self, hash: &str) -> Result<Vec<u8>, EngineError> {
        let ciphertext = self.blobs.download(hash, self.progress()).await?;
        Ok(self.key.decrypt(&ciphertext)?)
    }

    /// Upload a local file and announce it. Returns its content hash.
    pub async fn share_file(&self, path: &Path) -> Result<String, EngineError> {
        let content = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let hash = self.upload_file(&content).await?;
        self.send_file_message(&name, &hash).await?;
        Ok(hash)
    }

    /// Upload an avatar image and use it on subsequent events.
    pub async fn upload_avatar(&self, content: &[u8]) -> Result<String, EngineError> {
        let hash = self.upload_file(content).await?;
        self.set_avatar_hash(Some(hash.clone())).await;
        Ok(hash)
    }
}
