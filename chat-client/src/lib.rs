//! # securechat-client
//!
//! Client library for the SecureChat end-to-end encrypted relay.
//!
//! Everyone who knows the room passphrase derives the same key; the relay
//! only ever sees ciphertext. This crate holds everything on the client side
//! of that boundary.
//!
//! ## Features
//!
//! - **E2E Encryption**: XChaCha20-Poly1305 with 192-bit nonces
//! - **Passphrase Key Derivation**: Argon2id, identical on every client
//! - **Local Mirror**: SQLite copy of decrypted history, keyed by relay id
//! - **Resumable Sync**: `SYNC:<lastID>` on every (re)connect
//! - **Blob Transfer**: encrypted uploads and downloads with progress
//! - **Pure State Machine**: side-effect-free connection lifecycle
//!
//! ## Example
//!
//! ```ignore
//! use securechat_client::{ChatEngine, EngineConfig, LocalMirror, SessionKey, WebSocketTransport};
//!
//! let engine = Arc::new(ChatEngine::new(config, key, mirror, transport, sink)?);
//! let task = engine.clone().start();
//!
//! engine.send_text("hello").await?;
//! let history = engine.history().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crypto;
pub mod engine;
pub mod events;
pub mod files;
pub mod mirror;
pub mod state;
pub mod transport;

pub use config::EngineConfig;
pub use crypto::{content_hash, tripcode, CryptoError, KdfParams, SessionKey, KEY_SIZE, NONCE_SIZE};
pub use engine::{ChatEngine, DropReason, EngineError, FrameOutcome};
pub use events::{ChannelSink, EngineNotification, EventSink, NoopSink};
pub use files::{BlobClient, TransferError, DEFAULT_MAX_DOWNLOAD};
pub use mirror::{LocalMirror, MirrorError};
pub use state::{EngineState, ReconnectPolicy};
pub use transport::{Frame, MockTransport, Transport, TransportError, WebSocketTransport};
