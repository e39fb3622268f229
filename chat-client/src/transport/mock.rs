//! Mock transport for testing.
//!
//! Allows queueing inbound frames and capturing sent frames for verification.

use super::{Frame, Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Mock transport for testing.
///
/// By default `recv()` on an empty queue reports the connection closed.
/// With [`hold_open`](Self::hold_open) it waits instead, like a quiet relay.
#[derive(Debug, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    wakeup: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    connect_count: usize,
    sent_frames: Vec<Frame>,
    receive_queue: VecDeque<Frame>,
    hold_open: bool,
    remote_closed: bool,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a binary frame to be returned by `recv()`.
    pub fn queue_binary(&self, data: Vec<u8>) {
        self.queue_frame(Frame::Binary(data));
    }

    /// Queue any frame to be returned by `recv()`.
    pub fn queue_frame(&self, frame: Frame) {
        self.lock().receive_queue.push_back(frame);
        self.wakeup.notify_waiters();
    }

    /// Keep `recv()` waiting on an empty queue instead of failing.
    pub fn hold_open(&self, hold: bool) {
        self.lock().hold_open = hold;
        self.wakeup.notify_waiters();
    }

    /// Simulate the relay dropping the connection.
    ///
    /// The next `recv()` after the queue drains fails with
    /// [`TransportError::ConnectionClosed`].
    pub fn drop_connection(&self) {
        self.lock().remote_closed = true;
        self.wakeup.notify_waiters();
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.lock().sent_frames.clone()
    }

    /// Get the binary frames that were sent.
    pub fn sent_binary(&self) -> Vec<Vec<u8>> {
        self.lock()
            .sent_frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Binary(data) => Some(data.clone()),
                Frame::Text(_) => None,
            })
            .collect()
    }

    /// Get the text frames that were sent.
    pub fn sent_text(&self) -> Vec<String> {
        self.lock()
            .sent_frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::Text(text) => Some(text.clone()),
                Frame::Binary(_) => None,
            })
            .collect()
    }

    /// Get the last frame that was sent.
    pub fn last_sent(&self) -> Option<Frame> {
        self.lock().sent_frames.last().cloned()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// Number of successful `connect()` calls.
    pub fn connect_count(&self) -> usize {
        self.lock().connect_count
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.lock().fail_next_recv = Some(error.to_string());
        self.wakeup.notify_waiters();
    }

    /// Clear all state (frames, queue, connection).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
        self.wakeup.notify_waiters();
    }

    fn record_send(&self, frame: Frame) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_frames.push(frame);
        Ok(())
    }
}

impl Clone for MockTransport {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            wakeup: Arc::clone(&self.wakeup),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.remote_closed = false;
        inner.connected_address = Some(address.to_string());
        inner.connect_count += 1;
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.record_send(Frame::Text(text.to_string()))
    }

    async fn send_binary(&self, data: &[u8]) -> Result<(), TransportError> {
        self.record_send(Frame::Binary(data.to_vec()))
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        loop {
            // Registered before checking state so a wakeup in between is kept
            let notified = self.wakeup.notified();
            {
                let mut inner = self.lock();

                if !inner.connected {
                    return Err(TransportError::NotConnected);
                }

                // Check for forced failure
                if let Some(error) = inner.fail_next_recv.take() {
                    return Err(TransportError::ReceiveFailed(error));
                }

                if let Some(frame) = inner.receive_queue.pop_front() {
                    return Ok(frame);
                }

                if inner.remote_closed || !inner.hold_open {
                    inner.remote_closed = false;
                    inner.connected = false;
                    return Err(TransportError::ConnectionClosed);
                }
            }
            notified.await;
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        self.wakeup.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_connects() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect("ws://relay/ws").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(
            transport.connected_address(),
            Some("ws://relay/ws".to_string())
        );
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn mock_transport_records_frames_in_order() {
        let transport = MockTransport::new();
        transport.connect("relay").await.unwrap();

        transport.send_text("SYNC:0").await.unwrap();
        transport.send_binary(b"message 1").await.unwrap();
        transport.send_binary(b"message 2").await.unwrap();

        assert_eq!(
            transport.sent_frames(),
            vec![
                Frame::Text("SYNC:0".into()),
                Frame::Binary(b"message 1".to_vec()),
                Frame::Binary(b"message 2".to_vec()),
            ]
        );
        assert_eq!(transport.sent_text(), vec!["SYNC:0".to_string()]);
        assert_eq!(transport.sent_binary().len(), 2);
    }

    #[tokio::test]
    async fn mock_transport_receives_queued_frames() {
        let transport = MockTransport::new();
        transport.connect("relay").await.unwrap();

        transport.queue_binary(b"response 1".to_vec());
        transport.queue_frame(Frame::Text("noise".into()));

        assert_eq!(
            transport.recv().await.unwrap(),
            Frame::Binary(b"response 1".to_vec())
        );
        assert_eq!(transport.recv().await.unwrap(), Frame::Text("noise".into()));
    }

    #[tokio::test]
    async fn mock_transport_recv_empty_returns_closed() {
        let transport = MockTransport::new();
        transport.connect("relay").await.unwrap();

        let result = transport.recv().await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn held_open_recv_waits_for_a_frame() {
        let transport = MockTransport::new();
        transport.hold_open(true);
        transport.connect("relay").await.unwrap();

        let reader = transport.clone();
        let pending = tokio::spawn(async move { reader.recv().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        transport.queue_binary(b"late".to_vec());
        let frame = pending.await.unwrap().unwrap();
        assert_eq!(frame, Frame::Binary(b"late".to_vec()));
    }

    #[tokio::test]
    async fn close_wakes_pending_recv() {
        let transport = MockTransport::new();
        transport.hold_open(true);
        transport.connect("relay").await.unwrap();

        let reader = transport.clone();
        let pending = tokio::spawn(async move { reader.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        transport.close().await.unwrap();
        assert!(matches!(
            pending.await.unwrap(),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn drop_connection_ends_held_recv() {
        let transport = MockTransport::new();
        transport.hold_open(true);
        transport.connect("relay").await.unwrap();
        transport.queue_binary(b"before".to_vec());
        transport.drop_connection();

        // Queued frames drain first
        assert!(transport.recv().await.is_ok());
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
        assert!(!transport.is_connected());
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.send_binary(b"data").await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn recv_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.recv().await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn forced_connect_failure() {
        let transport = MockTransport::new();
        transport.fail_next_connect("network unreachable");

        let result = transport.connect("relay").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.is_connected());
        assert_eq!(transport.connect_count(), 0);

        // Next connect should work
        transport.connect("relay").await.unwrap();
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn forced_send_failure() {
        let transport = MockTransport::new();
        transport.connect("relay").await.unwrap();
        transport.fail_next_send("buffer full");

        let result = transport.send_binary(b"data").await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));

        // Next send should work
        transport.send_binary(b"data").await.unwrap();
        assert_eq!(transport.sent_binary().len(), 1);
    }

    #[tokio::test]
    async fn forced_recv_failure() {
        let transport = MockTransport::new();
        transport.connect("relay").await.unwrap();
        transport.queue_binary(b"data".to_vec());
        transport.fail_next_recv("timeout");

        let result = transport.recv().await;
        assert!(matches!(result, Err(TransportError::ReceiveFailed(_))));

        // Next recv should work (and get the queued data)
        let data = transport.recv().await.unwrap();
        assert_eq!(data, Frame::Binary(b"data".to_vec()));
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.connect("relay").await.unwrap();
        assert!(transport2.is_connected());

        transport1.send_binary(b"from t1").await.unwrap();
        transport2.send_binary(b"from t2").await.unwrap();

        assert_eq!(transport1.sent_frames().len(), 2);
    }

    #[tokio::test]
    async fn mock_transport_reset_clears_all() {
        let transport = MockTransport::new();
        transport.connect("relay").await.unwrap();
        transport.send_binary(b"data").await.unwrap();
        transport.queue_binary(b"response".to_vec());

        transport.reset();

        assert!(!transport.is_connected());
        assert!(transport.sent_frames().is_empty());
        assert!(transport.connected_address().is_none());
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn last_sent_returns_most_recent() {
        let transport = MockTransport::new();
        transport.connect("relay").await.unwrap();

        assert!(transport.last_sent().is_none());

        transport.send_text("first").await.unwrap();
        assert_eq!(transport.last_sent(), Some(Frame::Text("first".into())));

        transport.send_binary(b"second").await.unwrap();
        assert_eq!(
            transport.last_sent(),
            Some(Frame::Binary(b"second".to_vec()))
        );
    }
}
