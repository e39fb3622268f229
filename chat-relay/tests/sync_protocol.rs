//! Wire-level tests against an in-process relay.

use chat_types::decode_frame;
use futures_util::{SinkExt, StreamExt};
use securechat_relay::blobs::BlobStore;
use securechat_relay::storage::{MessageLog, SqliteLog};
use securechat_relay::{http, ChatRelay, Config};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestRelay {
    relay: Arc<ChatRelay>,
    addr: SocketAddr,
    _dir: TempDir,
}

async fn start_relay(config: Config) -> TestRelay {
    let dir = TempDir::new().unwrap();
    let log = SqliteLog::new(&dir.path().join("relay.db")).await.unwrap();
    let blobs = BlobStore::new(dir.path().join("uploads"), 1024 * 1024)
        .await
        .unwrap();
    let relay = Arc::new(ChatRelay::new(config, log, blobs));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(http::serve_plain(
        relay.clone(),
        listener,
        std::future::pending(),
    ));

    TestRelay {
        relay,
        addr,
        _dir: dir,
    }
}

async fn connect(addr: SocketAddr, last_id: u32) -> Ws {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    ws.send(Message::Text(format!("SYNC:{last_id}")))
        .await
        .unwrap();
    ws
}

async fn recv_frame(ws: &mut Ws) -> (u32, Vec<u8>) {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .unwrap();
        if let Message::Binary(frame) = msg {
            let (id, ct) = decode_frame(&frame).expect("short frame");
            return (id, ct.to_vec());
        }
    }
}

async fn expect_silence(ws: &mut Ws) {
    let next = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(next.is_err(), "unexpected frame: {:?}", next);
}

/// Wait until the relay has registered `n` live connections.
async fn wait_for_connections(relay: &ChatRelay, n: usize) {
    for _ in 0..100 {
        if relay.connection_count().await == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("relay never reached {n} connections");
}

#[tokio::test]
async fn new_client_gets_full_backfill_then_live() {
    let t = start_relay(Config::default()).await;
    for i in 1..=5u8 {
        t.relay.publish(&[i; 16]).await.unwrap();
    }

    let mut ws = connect(t.addr, 0).await;
    for expected in 1..=5u32 {
        let (id, ct) = recv_frame(&mut ws).await;
        assert_eq!(id, expected);
        assert_eq!(ct, vec![expected as u8; 16]);
    }

    wait_for_connections(&t.relay, 1).await;
    ws.send(Message::Binary(b"live ciphertext".to_vec()))
        .await
        .unwrap();

    // Self-echo carries the assigned id
    let (id, ct) = recv_frame(&mut ws).await;
    assert_eq!(id, 6);
    assert_eq!(ct, b"live ciphertext");
}

#[tokio::test]
async fn resume_only_sends_newer_entries() {
    let t = start_relay(Config::default()).await;
    for i in 1..=5u8 {
        t.relay.publish(&[i; 8]).await.unwrap();
    }

    let mut ws = connect(t.addr, 3).await;
    assert_eq!(recv_frame(&mut ws).await.0, 4);
    assert_eq!(recv_frame(&mut ws).await.0, 5);
    expect_silence(&mut ws).await;
}

#[tokio::test]
async fn up_to_date_client_gets_no_backfill() {
    let t = start_relay(Config::default()).await;
    t.relay.publish(b"already seen").await.unwrap();

    let mut ws = connect(t.addr, 1).await;
    expect_silence(&mut ws).await;
    assert_eq!(t.relay.metrics().backfill_frames.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn malformed_sync_means_full_history() {
    let t = start_relay(Config::default()).await;
    t.relay.publish(b"first").await.unwrap();
    t.relay.publish(b"second").await.unwrap();

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", t.addr))
        .await
        .unwrap();
    ws.send(Message::Text("HELLO".into())).await.unwrap();

    assert_eq!(recv_frame(&mut ws).await.0, 1);
    assert_eq!(recv_frame(&mut ws).await.0, 2);
    assert_eq!(t.relay.metrics().malformed_sync.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn broadcast_reaches_every_client_in_the_same_order() {
    let t = start_relay(Config::default()).await;
    let mut alice = connect(t.addr, 0).await;
    let mut bob = connect(t.addr, 0).await;
    wait_for_connections(&t.relay, 2).await;

    alice
        .send(Message::Binary(b"from alice".to_vec()))
        .await
        .unwrap();
    let a = recv_frame(&mut alice).await;
    let b = recv_frame(&mut bob).await;
    assert_eq!(a, b);
    assert_eq!(a.1, b"from alice");

    bob.send(Message::Binary(b"from bob".to_vec()))
        .await
        .unwrap();
    assert_eq!(recv_frame(&mut alice).await.1, b"from bob");
    assert_eq!(recv_frame(&mut bob).await.1, b"from bob");
}

#[tokio::test]
async fn concurrent_senders_get_distinct_increasing_ids() {
    let t = start_relay(Config::default()).await;
    let mut observer = connect(t.addr, 0).await;

    let mut senders = Vec::new();
    for _ in 0..4 {
        senders.push(connect(t.addr, 0).await);
    }
    wait_for_connections(&t.relay, 5).await;

    let tasks: Vec<_> = senders
        .into_iter()
        .enumerate()
        .map(|(n, mut ws)| {
            tokio::spawn(async move {
                for i in 0..5u8 {
                    ws.send(Message::Binary(vec![n as u8, i])).await.unwrap();
                }
                ws
            })
        })
        .collect();
    let mut senders = Vec::new();
    for task in tasks {
        senders.push(task.await.unwrap());
    }

    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(recv_frame(&mut observer).await.0);
    }
    assert_eq!(ids, (1..=20).collect::<Vec<_>>());
    assert_eq!(t.relay.log().max_id().await.unwrap(), 20);

    // Every sender saw the same order as the observer
    for ws in senders.iter_mut() {
        let mut seen = Vec::new();
        for _ in 0..20 {
            seen.push(recv_frame(ws).await.0);
        }
        assert_eq!(seen, ids);
    }
}

#[tokio::test]
async fn relay_stores_ciphertext_verbatim() {
    let t = start_relay(Config::default()).await;
    let mut ws = connect(t.addr, 0).await;
    wait_for_connections(&t.relay, 1).await;

    let ciphertext = vec![0xA5u8; 64];
    ws.send(Message::Binary(ciphertext.clone())).await.unwrap();
    recv_frame(&mut ws).await;

    let stored = t.relay.log().entries_after(0, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].ciphertext, ciphertext);
}

#[tokio::test]
async fn text_frames_after_sync_are_ignored() {
    let t = start_relay(Config::default()).await;
    let mut ws = connect(t.addr, 0).await;
    wait_for_connections(&t.relay, 1).await;

    ws.send(Message::Text("SYNC:0".into())).await.unwrap();
    expect_silence(&mut ws).await;
    assert_eq!(t.relay.log().count().await.unwrap(), 0);
}

#[tokio::test]
async fn disconnect_unregisters() {
    let t = start_relay(Config::default()).await;
    let ws = connect(t.addr, 0).await;
    wait_for_connections(&t.relay, 1).await;

    drop(ws);
    wait_for_connections(&t.relay, 0).await;

    // Publishing with nobody listening still appends
    t.relay.publish(b"into the void").await.unwrap();
    assert_eq!(t.relay.log().count().await.unwrap(), 1);
}

#[tokio::test]
async fn silent_client_is_dropped_after_sync_timeout() {
    let mut config = Config::default();
    config.limits.sync_timeout_secs = 1;
    let t = start_relay(config).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", t.addr))
        .await
        .unwrap();

    let ended = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "relay kept a silent connection open");
    assert_eq!(t.relay.connection_count().await, 0);
}
