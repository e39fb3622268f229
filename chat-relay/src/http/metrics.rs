//! Prometheus metrics endpoint.

use crate::server::ChatRelay;
use axum::{http::header::CONTENT_TYPE, http::StatusCode, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<ChatRelay>>) -> impl IntoResponse {
    if !relay.config().server.metrics_enabled {
        return (StatusCode::NOT_FOUND, "metrics disabled").into_response();
    }

    let m = relay.metrics();

    // Gauges — current state
    let connections = relay.connection_count().await;

    // Counters — monotonic since startup
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let appended = m.messages_appended.load(Ordering::Relaxed);
    let bytes_rx = m.bytes_received.load(Ordering::Relaxed);
    let deliveries = m.broadcast_deliveries.load(Ordering::Relaxed);
    let evicted = m.peers_evicted.load(Ordering::Relaxed);
    let backfill = m.backfill_frames.load(Ordering::Relaxed);
    let uploads = m.blob_uploads.load(Ordering::Relaxed);
    let dedup = m.blob_dedup_hits.load(Ordering::Relaxed);
    let malformed = m.malformed_sync.load(Ordering::Relaxed);
    let faults = m.storage_faults.load(Ordering::Relaxed);

    // Log stats (async queries — best effort)
    let stored = relay.log().count().await.unwrap_or(0);
    let storage_bytes = relay.log().total_bytes().await.unwrap_or(0);
    let max_id = relay.log().max_id().await.unwrap_or(0);

    let body = format!(
        r#"# HELP chat_relay_connections_active Number of live connections
# TYPE chat_relay_connections_active gauge
chat_relay_connections_active {connections}

# HELP chat_relay_info Server information
# TYPE chat_relay_info gauge
chat_relay_info{{version="{version}"}} 1

# HELP chat_relay_connections_total Total connections accepted
# TYPE chat_relay_connections_total counter
chat_relay_connections_total {conns_total}

# HELP chat_relay_messages_appended_total Total messages appended to the log
# TYPE chat_relay_messages_appended_total counter
chat_relay_messages_appended_total {appended}

# HELP chat_relay_bytes_received_total Total ciphertext bytes received on live sends
# TYPE chat_relay_bytes_received_total counter
chat_relay_bytes_received_total {bytes_rx}

# HELP chat_relay_broadcast_deliveries_total Total frames queued by live broadcasts
# TYPE chat_relay_broadcast_deliveries_total counter
chat_relay_broadcast_deliveries_total {deliveries}

# HELP chat_relay_peers_evicted_total Total peers evicted after a failed delivery
# TYPE chat_relay_peers_evicted_total counter
chat_relay_peers_evicted_total {evicted}

# HELP chat_relay_backfill_frames_total Total frames sent during backfill
# TYPE chat_relay_backfill_frames_total counter
chat_relay_backfill_frames_total {backfill}

# HELP chat_relay_blob_uploads_total Total blobs written
# TYPE chat_relay_blob_uploads_total counter
chat_relay_blob_uploads_total {uploads}

# HELP chat_relay_blob_dedup_hits_total Total uploads skipped because the blob existed
# TYPE chat_relay_blob_dedup_hits_total counter
chat_relay_blob_dedup_hits_total {dedup}

# HELP chat_relay_malformed_sync_total Total malformed sync commands
# TYPE chat_relay_malformed_sync_total counter
chat_relay_malformed_sync_total {malformed}

# HELP chat_relay_storage_faults_total Total log read/write failures
# TYPE chat_relay_storage_faults_total counter
chat_relay_storage_faults_total {faults}

# HELP chat_relay_log_messages Number of messages currently in the log
# TYPE chat_relay_log_messages gauge
chat_relay_log_messages {stored}

# HELP chat_relay_log_bytes Total ciphertext bytes in the log
# TYPE chat_relay_log_bytes gauge
chat_relay_log_bytes {storage_bytes}

# HELP chat_relay_log_max_id Highest assigned message id
# TYPE chat_relay_log_max_id gauge
chat_relay_log_max_id {max_id}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
