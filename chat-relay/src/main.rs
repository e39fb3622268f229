//! chat-relay binary entry point.
//!
//! Usage:
//! ```bash
//! chat-relay --config relay.toml
//! ```

use anyhow::Context;
use securechat_relay::{http, tls, ChatRelay, Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,securechat_relay=debug")),
        )
        .init();

    tracing::info!("Starting chat-relay v{}", env!("CARGO_PKG_VERSION"));

    let config_path = get_config_path();
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    tracing::info!(?config, "Loaded configuration");

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind_address {:?}", config.server.bind_address))?;

    let relay = Arc::new(
        ChatRelay::open(config.clone())
            .await
            .context("opening relay storage")?,
    );
    let stored = relay.log().max_id().await.context("reading message log")?;
    tracing::info!("Message log at id {}", stored);

    match &config.tls {
        Some(tls_config) => {
            let rustls = tls::load_rustls_config(tls_config).context("loading TLS certificate")?;
            tracing::info!("Listening on wss://{}/ws", addr);
            http::serve_tls(relay, addr, rustls, shutdown_signal()).await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {}", addr))?;
            tracing::warn!("No [tls] section; serving plain ws://{}/ws", addr);
            http::serve_plain(relay, listener, shutdown_signal()).await?;
        }
    }

    tracing::info!("Relay stopped");
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
