//! # chat-relay
//!
//! Blind relay server for SecureChat.
//!
//! This crate implements a relay server that:
//! - Accepts WebSocket connections from any number of clients
//! - Keeps a durable, ordered log of opaque ciphertexts
//! - Backfills each client from the id it reports, then broadcasts live
//! - Stores encrypted file blobs by content hash
//! - Never sees plaintext (relay is a "dumb pipe")
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                    ┌── Client B
//!            │   WebSocket /ws    │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │        chat-relay          │
//!        │  ┌─────────────────────┐   │
//!        │  │ SQLite (message log)│   │
//!        │  ├─────────────────────┤   │
//!        │  │ uploads/ (blobs)    │   │
//!        │  └─────────────────────┘   │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! - client → relay, first frame: `SYNC:<lastID>`
//! - relay → client: `[u32 BE id][ciphertext]` for every entry after
//!   `lastID`, then every live append (the sender's own included)
//! - client → relay: raw ciphertext, appended and broadcast
//! - HTTP `/check`, `/upload`, `/download` with `?hash=<hex>`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blobs;
pub mod config;
pub mod error;
pub mod http;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;
pub mod tls;

pub use config::Config;
pub use error::{BlobError, RelayError, StorageError};
pub use server::ChatRelay;
