//! Per-connection session management.
//!
//! A session reads the `SYNC:` command, streams the backfill, joins the
//! live broadcast set, then appends every binary frame it receives. A
//! writer task owns the socket's sending half and drains the peer queue.

use crate::error::RelayError;
use crate::registry::{ChannelPeer, ConnectionId, PeerOutbox, PeerSink};
use crate::server::{ChatRelay, RelayMetrics};
use axum::extract::ws::{Message, WebSocket};
use chat_types::{encode_frame, SyncRequest};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// A per-connection session.
pub struct Session {
    relay: Arc<ChatRelay>,
    id: ConnectionId,
    remote: Option<SocketAddr>,
}

impl Session {
    /// Create a new session for an upgraded connection.
    pub fn new(relay: Arc<ChatRelay>, remote: Option<SocketAddr>) -> Self {
        let id = relay.registry().next_id();
        Self {
            relay,
            id,
            remote,
        }
    }

    /// Run the session until the connection ends.
    pub async fn run(self, socket: WebSocket) {
        RelayMetrics::incr(&self.relay.metrics().connections_total);
        tracing::info!("New connection {} from {:?}", self.id, self.remote);

        let (sink, mut stream) = socket.split();

        let last_id = match self.read_sync(&mut stream).await {
            Some(last_id) => last_id,
            None => return,
        };

        let (peer, outbox) = ChannelPeer::channel(self.relay.config().limits.outbound_queue);
        let mut writer = tokio::spawn(write_loop(self.id, sink, outbox));

        match self.backfill(&peer, last_id).await {
            Ok(()) => {
                tracing::debug!("{} live", self.id);
                self.read_loop(&mut stream, &mut writer).await;
            }
            Err(e) => tracing::warn!("{} backfill failed: {}", self.id, e),
        }

        self.relay.leave(self.id).await;
        peer.close();
        drop(peer);
        if !writer.is_finished() {
            let _ = writer.await;
        }

        tracing::info!("Connection {} closed", self.id);
    }

    /// Wait for the first text frame and parse it as a sync command.
    ///
    /// Returns `None` if the client disconnects or stays silent too long.
    async fn read_sync(&self, stream: &mut SplitStream<WebSocket>) -> Option<u32> {
        let timeout_secs = self.relay.config().limits.sync_timeout_secs;

        let first = tokio::time::timeout(Duration::from_secs(timeout_secs), async {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => return Some(text),
                    Ok(Message::Binary(bytes)) => {
                        return Some(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                    Ok(Message::Close(_)) => return None,
                    Err(e) => {
                        tracing::debug!("{} read error before sync: {}", self.id, e);
                        return None;
                    }
                }
            }
            None
        })
        .await;

        let raw = match first {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!("{} closed before sync", self.id);
                return None;
            }
            Err(_) => {
                tracing::warn!("Sync timeout ({}s) for {}", timeout_secs, self.id);
                return None;
            }
        };

        if !SyncRequest::is_well_formed(&raw) {
            RelayMetrics::incr(&self.relay.metrics().malformed_sync);
            tracing::warn!("{} sent malformed sync command: {:?}", self.id, raw);
        }

        let request = SyncRequest::parse(&raw);
        tracing::debug!("{} sync from {}", self.id, request.last_id);
        Some(request.last_id)
    }

    /// Stream stored entries newer than `last_id`, page by page, then join.
    async fn backfill(&self, peer: &ChannelPeer, last_id: u32) -> Result<(), RelayError> {
        let batch = self.relay.config().limits.backfill_batch.max(1);
        let mut cursor = last_id;
        let mut sent: u64 = 0;

        loop {
            let entries = match self.relay.log().entries_after(cursor, batch).await {
                Ok(entries) => entries,
                Err(e) => {
                    RelayMetrics::incr(&self.relay.metrics().storage_faults);
                    tracing::error!("Backfill read failed for {}: {}", self.id, e);
                    return Err(e.into());
                }
            };
            let fetched = entries.len();

            for entry in entries {
                peer.send(encode_frame(entry.id, &entry.ciphertext)).await?;
                cursor = entry.id;
                sent += 1;
            }

            if fetched < batch as usize {
                break;
            }
        }

        RelayMetrics::add(&self.relay.metrics().backfill_frames, sent);
        tracing::debug!("{} backfilled {} entries up to {}", self.id, sent, cursor);

        self.relay
            .join(self.id, Arc::new(peer.clone()), cursor)
            .await?;
        Ok(())
    }

    /// Append incoming binary frames until the connection ends.
    async fn read_loop(
        &self,
        stream: &mut SplitStream<WebSocket>,
        writer: &mut tokio::task::JoinHandle<()>,
    ) {
        loop {
            let msg = tokio::select! {
                _ = &mut *writer => {
                    tracing::debug!("{} writer finished", self.id);
                    break;
                }
                msg = stream.next() => msg,
            };

            match msg {
                Some(Ok(Message::Binary(ciphertext))) => {
                    if ciphertext.is_empty() {
                        tracing::debug!("{} sent empty frame, ignoring", self.id);
                        continue;
                    }
                    // A storage fault loses this message only; the connection stays up.
                    if let Err(e) = self.relay.publish(&ciphertext).await {
                        tracing::error!("Failed to append message from {}: {}", self.id, e);
                    }
                }
                Some(Ok(Message::Text(_))) => {
                    tracing::debug!("{} sent text frame after sync, ignoring", self.id);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!("{} read error: {}", self.id, e);
                    break;
                }
            }
        }
    }
}

/// Drain the peer queue into the socket until evicted or the socket fails.
async fn write_loop(
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: PeerOutbox,
) {
    while let Some(frame) = outbox.next().await {
        if let Err(e) = sink.send(Message::Binary(frame)).await {
            tracing::debug!("{} write failed: {}", id, e);
            break;
        }
    }
    let _ = sink.close().await;
}
