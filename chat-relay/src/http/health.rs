//! Health check endpoint.

use crate::server::ChatRelay;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of live connections.
    pub connections: usize,
    /// Number of messages in the log.
    pub messages: u64,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(relay): Extension<Arc<ChatRelay>>) -> Json<HealthStatus> {
    let (status, messages) = match relay.log().count().await {
        Ok(count) => ("ok", count),
        Err(e) => {
            tracing::error!("Health check could not read the log: {}", e);
            ("degraded", 0)
        }
    };

    Json(HealthStatus {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: relay.connection_count().await,
        messages,
        uptime_seconds: relay.uptime_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_serializes() {
        let status = HealthStatus {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            connections: 42,
            messages: 1500,
            uptime_seconds: 3600,
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"connections\":42"));
        assert!(json.contains("\"messages\":1500"));
    }
}
