//! Live connection registry.
//!
//! The registry mutex doubles as the relay's append lock: whoever holds a
//! [`RegistryGuard`] may append to the log and broadcast, and no peer can
//! join or leave in between. Delivery never awaits a peer; each peer owns a
//! bounded queue and a peer whose queue is full or closed is evicted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, MutexGuard, Notify};

/// Identifier of a live connection, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a frame could not be handed to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The peer's outbound queue is full.
    #[error("outbound queue full")]
    Backpressure,
    /// The peer's writer has gone away.
    #[error("peer connection closed")]
    Closed,
}

/// Something frames can be delivered to.
pub trait PeerSink: Send + Sync {
    /// Queue a frame without waiting.
    fn deliver(&self, frame: &[u8]) -> Result<(), DeliveryError>;

    /// Tear the peer's connection down.
    fn close(&self);
}

/// Peer backed by a bounded channel drained by a writer task.
#[derive(Debug, Clone)]
pub struct ChannelPeer {
    tx: mpsc::Sender<Vec<u8>>,
    evicted: Arc<Notify>,
}

/// Receiving half of a [`ChannelPeer`], owned by the writer task.
#[derive(Debug)]
pub struct PeerOutbox {
    rx: mpsc::Receiver<Vec<u8>>,
    evicted: Arc<Notify>,
}

impl ChannelPeer {
    /// Create a peer with room for `capacity` queued frames.
    pub fn channel(capacity: usize) -> (Self, PeerOutbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let evicted = Arc::new(Notify::new());
        (
            Self {
                tx,
                evicted: evicted.clone(),
            },
            PeerOutbox { rx, evicted },
        )
    }

    /// Queue a frame, waiting for room. Used for backfill, before the peer
    /// is visible to broadcasts.
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), DeliveryError> {
        self.tx.send(frame).await.map_err(|_| DeliveryError::Closed)
    }
}

impl PeerSink for ChannelPeer {
    fn deliver(&self, frame: &[u8]) -> Result<(), DeliveryError> {
        self.tx.try_send(frame.to_vec()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn close(&self) {
        self.evicted.notify_one();
    }
}

impl PeerOutbox {
    /// Next frame to write, or `None` once the peer is closed.
    ///
    /// Eviction wins over queued frames.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        tokio::select! {
            biased;
            _ = self.evicted.notified() => None,
            frame = self.rx.recv() => frame,
        }
    }
}

/// Result of a broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the frame was queued for.
    pub delivered: usize,
    /// Peers removed because delivery failed.
    pub evicted: Vec<ConnectionId>,
}

/// The set of connections receiving live broadcasts.
pub struct ConnectionRegistry {
    peers: Mutex<HashMap<ConnectionId, Arc<dyn PeerSink>>>,
    next_id: AtomicU64,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a fresh connection id.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Take the registry lock.
    pub async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            peers: self.peers.lock().await,
        }
    }

    /// Remove a connection. Returns whether it was registered.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        self.lock().await.unregister(id)
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.peers.lock().await.len()
    }

    /// Whether no connections are registered.
    pub async fn is_empty(&self) -> bool {
        self.peers.lock().await.is_empty()
    }
}

/// Exclusive access to the registry.
pub struct RegistryGuard<'a> {
    peers: MutexGuard<'a, HashMap<ConnectionId, Arc<dyn PeerSink>>>,
}

impl RegistryGuard<'_> {
    /// Add a connection to the broadcast set.
    pub fn register(&mut self, id: ConnectionId, peer: Arc<dyn PeerSink>) {
        self.peers.insert(id, peer);
        tracing::debug!("Registered {} (total: {})", id, self.peers.len());
    }

    /// Remove a connection. Returns whether it was registered.
    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        let removed = self.peers.remove(&id).is_some();
        if removed {
            tracing::debug!("Unregistered {} (remaining: {})", id, self.peers.len());
        }
        removed
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Queue `frame` for every registered peer.
    ///
    /// Peers that cannot take it are closed and removed before returning.
    pub fn broadcast(&mut self, frame: &[u8]) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (id, peer) in self.peers.iter() {
            match peer.deliver(frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!("Evicting {}: {}", id, e);
                    report.evicted.push(*id);
                }
            }
        }

        for id in &report.evicted {
            if let Some(peer) = self.peers.remove(id) {
                peer.close();
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_all_registered() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_out) = ChannelPeer::channel(8);
        let (b, mut b_out) = ChannelPeer::channel(8);

        {
            let mut guard = registry.lock().await;
            guard.register(registry.next_id(), Arc::new(a));
            guard.register(registry.next_id(), Arc::new(b));
            let report = guard.broadcast(b"frame");
            assert_eq!(report.delivered, 2);
            assert!(report.evicted.is_empty());
        }

        assert_eq!(a_out.next().await, Some(b"frame".to_vec()));
        assert_eq!(b_out.next().await, Some(b"frame".to_vec()));
    }

    #[tokio::test]
    async fn full_queue_evicts_peer() {
        let registry = ConnectionRegistry::new();
        let (slow, mut slow_out) = ChannelPeer::channel(1);
        let (fast, _fast_out) = ChannelPeer::channel(8);
        let slow_id = registry.next_id();

        let mut guard = registry.lock().await;
        guard.register(slow_id, Arc::new(slow));
        guard.register(registry.next_id(), Arc::new(fast));

        assert_eq!(guard.broadcast(b"one").delivered, 2);
        let report = guard.broadcast(b"two");
        assert_eq!(report.delivered, 1);
        assert_eq!(report.evicted, vec![slow_id]);
        assert_eq!(guard.len(), 1);
        drop(guard);

        // Eviction closes the outbox even though a frame is still queued
        assert_eq!(slow_out.next().await, None);
    }

    #[tokio::test]
    async fn closed_peer_is_evicted() {
        let registry = ConnectionRegistry::new();
        let (peer, outbox) = ChannelPeer::channel(4);
        let id = registry.next_id();
        registry.lock().await.register(id, Arc::new(peer));

        drop(outbox);
        let report = registry.lock().await.broadcast(b"x");
        assert_eq!(report.evicted, vec![id]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (peer, _outbox) = ChannelPeer::channel(4);
        let id = registry.next_id();
        registry.lock().await.register(id, Arc::new(peer));

        assert!(registry.unregister(id).await);
        assert!(!registry.unregister(id).await);
        assert_eq!(registry.len().await, 0);
    }

    #[test]
    fn connection_ids_are_unique() {
        let registry = ConnectionRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "conn-1");
    }

    #[tokio::test]
    async fn send_waits_for_room() {
        let (peer, mut outbox) = ChannelPeer::channel(1);
        peer.send(b"first".to_vec()).await.unwrap();

        let sender = peer.clone();
        let pending = tokio::spawn(async move { sender.send(b"second".to_vec()).await });

        assert_eq!(outbox.next().await, Some(b"first".to_vec()));
        pending.await.unwrap().unwrap();
        assert_eq!(outbox.next().await, Some(b"second".to_vec()));
    }
}
