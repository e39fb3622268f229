//! HTTP endpoints for chat-relay.
//!
//! One listener serves the WebSocket sync channel, blob transfer,
//! health checks and metrics.

mod blobs;
pub mod health;
mod metrics;

use crate::server::ChatRelay;
use crate::session::Session;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, DefaultBodyLimit};
use axum::response::Response;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub use health::HealthStatus;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<ChatRelay>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/check", get(blobs::check_handler))
        .route(
            "/upload",
            post(blobs::upload_handler).layer(DefaultBodyLimit::disable()),
        )
        .route("/download", get(blobs::download_handler))
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(relay))
}

/// Upgrade to a WebSocket and hand the socket to a [`Session`].
async fn ws_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(relay): Extension<Arc<ChatRelay>>,
) -> Response {
    let remote = connect_info.map(|ConnectInfo(addr)| addr);
    let max_message_size = relay.config().limits.max_message_size;

    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| Session::new(relay, remote).run(socket))
}

/// Serve plain `ws://` / `http://` on an already-bound listener.
pub async fn serve_plain<F>(
    relay: Arc<ChatRelay>,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(relay);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

/// Serve `wss://` / `https://` on `addr`.
pub async fn serve_tls<F>(
    relay: Arc<ChatRelay>,
    addr: SocketAddr,
    tls: RustlsConfig,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(relay);
    let handle = axum_server::Handle::new();

    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobStore;
    use crate::config::Config;
    use crate::storage::SqliteLog;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    async fn test_relay(config: Config) -> (Arc<ChatRelay>, TempDir) {
        let dir = TempDir::new().unwrap();
        let log = SqliteLog::in_memory().await.unwrap();
        let blobs = BlobStore::new(dir.path().join("uploads"), 1024)
            .await
            .unwrap();
        (Arc::new(ChatRelay::new(config, log, blobs)), dir)
    }

    fn hash_of(data: &[u8]) -> String {
        blake3::hash(data).to_hex().to_string()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Body) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (relay, _dir) = test_relay(Config::default()).await;
        relay.publish(b"one").await.unwrap();
        let app = build_router(relay);

        let response = send(&app, "GET", "/health", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["messages"], 1);
        assert_eq!(json["connections"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_ok() {
        let (relay, _dir) = test_relay(Config::default()).await;
        let app = build_router(relay);

        let response = send(&app, "GET", "/metrics", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let text = String::from_utf8(body_bytes(response).await).unwrap();
        assert!(text.contains("# TYPE chat_relay_connections_active gauge"));
        assert!(text.contains("chat_relay_messages_appended_total 0"));
    }

    #[tokio::test]
    async fn metrics_can_be_disabled() {
        let mut config = Config::default();
        config.server.metrics_enabled = false;
        let (relay, _dir) = test_relay(config).await;
        let app = build_router(relay);

        let response = send(&app, "GET", "/metrics", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_check_download_roundtrip() {
        let (relay, _dir) = test_relay(Config::default()).await;
        let app = build_router(relay.clone());
        let data = b"nonce||ciphertext||tag".to_vec();
        let hash = hash_of(&data);

        let response = send(&app, "GET", &format!("/check?hash={hash}"), Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(
            &app,
            "POST",
            &format!("/upload?hash={hash}"),
            Body::from(data.clone()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", &format!("/check?hash={hash}"), Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", &format!("/download?hash={hash}"), Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_LENGTH],
            data.len().to_string().as_str()
        );
        assert_eq!(body_bytes(response).await, data);

        // Second upload of the same hash is a dedup hit
        let response = send(
            &app,
            "POST",
            &format!("/upload?hash={hash}"),
            Body::from(data.clone()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        use std::sync::atomic::Ordering;
        assert_eq!(relay.metrics().blob_uploads.load(Ordering::Relaxed), 1);
        assert_eq!(relay.metrics().blob_dedup_hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn download_missing_blob_is_404() {
        let (relay, _dir) = test_relay(Config::default()).await;
        let app = build_router(relay);

        let hash = hash_of(b"absent");
        let response = send(&app, "GET", &format!("/download?hash={hash}"), Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn invalid_hash_is_400() {
        let (relay, _dir) = test_relay(Config::default()).await;
        let app = build_router(relay);

        let response = send(&app, "GET", "/download?hash=..%2F..%2Fetc%2Fpasswd", Body::empty()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, "POST", "/upload?hash=ABC", Body::from("x")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_with_wrong_hash_is_400() {
        let (relay, _dir) = test_relay(Config::default()).await;
        let app = build_router(relay);

        let hash = hash_of(b"expected");
        let response = send(
            &app,
            "POST",
            &format!("/upload?hash={hash}"),
            Body::from("tampered"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, "GET", &format!("/check?hash={hash}"), Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn oversized_upload_is_413() {
        let (relay, _dir) = test_relay(Config::default()).await;
        let app = build_router(relay);

        let data = vec![7u8; 2048];
        let hash = hash_of(&data);
        let response = send(&app, "POST", &format!("/upload?hash={hash}"), Body::from(data)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn ws_route_requires_upgrade() {
        let (relay, _dir) = test_relay(Config::default()).await;
        let app = build_router(relay);

        let response = send(&app, "GET", "/ws", Body::empty()).await;
        assert!(response.status().is_client_error());
    }
}
