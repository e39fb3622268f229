//! # securechat-types
//!
//! Wire format types for the SecureChat relay protocol.
//!
//! This crate provides the foundational types shared by the relay and clients:
//! - [`ChatEvent`], [`EventKind`] - the unit of conversation (encrypted end to end)
//! - [`SyncRequest`] - the `SYNC:<lastID>` command opening every connection
//! - [`encode_frame`] / [`decode_frame`] - the `[u32 BE id][ciphertext]` relay frame
//! - [`WireError`] - error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod messages;
mod wire;

pub use error::WireError;
pub use messages::{ChatEvent, EventKind};
pub use wire::{decode_frame, encode_frame, SyncRequest, FRAME_HEADER_LEN, SYNC_PREFIX};
