//! Main ChatRelay server coordination.
//!
//! ChatRelay owns the message log, the blob store and the live connection
//! registry, and implements the two operations that must be serialized
//! against each other: appending a message and admitting a connection.

use crate::blobs::BlobStore;
use crate::config::Config;
use crate::error::{RelayError, StorageError};
use crate::registry::{ConnectionId, ConnectionRegistry, PeerSink};
use crate::storage::{MessageLog, SqliteLog};
use chat_types::encode_frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total WebSocket connections accepted.
    pub connections_total: AtomicU64,
    /// Total messages appended to the log.
    pub messages_appended: AtomicU64,
    /// Total ciphertext bytes received on live sends.
    pub bytes_received: AtomicU64,
    /// Total frames queued by live broadcasts.
    pub broadcast_deliveries: AtomicU64,
    /// Total peers evicted after a failed delivery.
    pub peers_evicted: AtomicU64,
    /// Total frames sent during backfill (including join catch-up).
    pub backfill_frames: AtomicU64,
    /// Total blobs written.
    pub blob_uploads: AtomicU64,
    /// Total uploads skipped because the hash was already stored.
    pub blob_dedup_hits: AtomicU64,
    /// Total first frames that were not a well-formed `SYNC:` command.
    pub malformed_sync: AtomicU64,
    /// Total log read/write failures.
    pub storage_faults: AtomicU64,
}

impl RelayMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Main relay server.
pub struct ChatRelay {
    config: Config,
    log: Arc<dyn MessageLog>,
    blobs: BlobStore,
    registry: ConnectionRegistry,
    metrics: RelayMetrics,
    started: Instant,
}

impl std::fmt::Debug for ChatRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRelay")
            .field("config", &self.config)
            .field("blobs", &self.blobs)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl ChatRelay {
    /// Create a relay from an already-opened log and blob store.
    pub fn new(config: Config, log: impl MessageLog + 'static, blobs: BlobStore) -> Self {
        Self {
            config,
            log: Arc::new(log),
            blobs,
            registry: ConnectionRegistry::new(),
            metrics: RelayMetrics::default(),
            started: Instant::now(),
        }
    }

    /// Open the SQLite log and blob directory named in `config`.
    pub async fn open(config: Config) -> Result<Self, RelayError> {
        let log = SqliteLog::new(&config.storage.database).await?;
        let blobs = BlobStore::new(
            config.storage.blob_dir.clone(),
            config.storage.max_blob_size,
        )
        .await?;
        Ok(Self::new(config, log, blobs))
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the message log.
    pub fn log(&self) -> &dyn MessageLog {
        self.log.as_ref()
    }

    /// Get access to the blob store.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Get access to the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Seconds since the relay was created.
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Number of connections receiving live broadcasts.
    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    /// Append a ciphertext and broadcast it to every live connection,
    /// the sender included.
    ///
    /// Append and broadcast happen under the registry lock, so every peer
    /// observes live frames in id order. Returns the assigned id.
    pub async fn publish(&self, ciphertext: &[u8]) -> Result<u32, StorageError> {
        let mut guard = self.registry.lock().await;

        let id = match self.log.append(ciphertext).await {
            Ok(id) => id,
            Err(e) => {
                RelayMetrics::incr(&self.metrics.storage_faults);
                return Err(e);
            }
        };
        RelayMetrics::incr(&self.metrics.messages_appended);
        RelayMetrics::add(&self.metrics.bytes_received, ciphertext.len() as u64);

        let report = guard.broadcast(&encode_frame(id, ciphertext));
        RelayMetrics::add(
            &self.metrics.broadcast_deliveries,
            report.delivered as u64,
        );
        RelayMetrics::add(&self.metrics.peers_evicted, report.evicted.len() as u64);

        tracing::debug!(
            "Appended message {} ({} bytes), delivered to {} peers",
            id,
            ciphertext.len(),
            report.delivered
        );
        Ok(id)
    }

    /// Admit a connection that has been backfilled up to `after`.
    ///
    /// Under the registry lock, any entries appended since the backfill
    /// finished are queued for the peer, then the peer is registered. No
    /// message can fall between backfill and live broadcast. Returns the
    /// highest id the peer has been sent.
    pub async fn join(
        &self,
        id: ConnectionId,
        peer: Arc<dyn PeerSink>,
        after: u32,
    ) -> Result<u32, RelayError> {
        let batch = self.config.limits.backfill_batch.max(1);
        let mut guard = self.registry.lock().await;

        let mut cursor = after;
        loop {
            let entries = match self.log.entries_after(cursor, batch).await {
                Ok(entries) => entries,
                Err(e) => {
                    RelayMetrics::incr(&self.metrics.storage_faults);
                    return Err(e.into());
                }
            };
            let fetched = entries.len();

            for entry in entries {
                peer.deliver(&encode_frame(entry.id, &entry.ciphertext))?;
                RelayMetrics::incr(&self.metrics.backfill_frames);
                cursor = entry.id;
            }

            if fetched < batch as usize {
                break;
            }
        }

        if cursor > after {
            tracing::debug!("{} caught up {}..={} at join", id, after + 1, cursor);
        }

        guard.register(id, peer);
        Ok(cursor)
    }

    /// Remove a connection from the broadcast set.
    pub async fn leave(&self, id: ConnectionId) {
        self.registry.unregister(id).await;
    }
}
