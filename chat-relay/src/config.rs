//! Configuration loading for the relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).
//! Every field has a default, so an empty file is a valid configuration.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listener configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// TLS certificate (optional; plain ws/http when absent).
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Per-connection limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the WebSocket + HTTP listener (default: 0.0.0.0:8080).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Enable the Prometheus metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// TLS certificate configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite message log.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Directory holding content-addressed blobs.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
    /// Maximum blob size in bytes (default: 512 MiB).
    #[serde(default = "default_max_blob_size")]
    pub max_blob_size: u64,
}

/// Per-connection limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Seconds a new connection has to send its `SYNC:` command (default: 10).
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
    /// Largest accepted WebSocket message in bytes (default: 1 MiB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Frames buffered per peer before it counts as stalled (default: 1024).
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    /// Log rows fetched per backfill query (default: 500).
    #[serde(default = "default_backfill_batch")]
    pub backfill_batch: u32,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/relay.db")
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("data/uploads")
}

fn default_max_blob_size() -> u64 {
    512 * 1024 * 1024 // 512 MiB
}

fn default_sync_timeout_secs() -> u64 {
    10
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_outbound_queue() -> usize {
    1024
}

fn default_backfill_batch() -> u32 {
    500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            blob_dir: default_blob_dir(),
            max_blob_size: default_max_blob_size(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            sync_timeout_secs: default_sync_timeout_secs(),
            max_message_size: default_max_message_size(),
            outbound_queue: default_outbound_queue(),
            backfill_batch: default_backfill_batch(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            tls: None,
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.storage.max_blob_size, 512 * 1024 * 1024);
        assert_eq!(config.limits.sync_timeout_secs, 10);
        assert!(config.tls.is_none());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:9443"
metrics_enabled = false

[tls]
cert_path = "server.crt"
key_path = "server.key"

[storage]
database = "/srv/chat/relay.db"
blob_dir = "/srv/chat/uploads"
max_blob_size = 1048576

[limits]
outbound_queue = 64
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:9443");
        assert!(!config.server.metrics_enabled);
        let tls = config.tls.unwrap();
        assert_eq!(tls.cert_path, PathBuf::from("server.crt"));
        assert_eq!(config.storage.database, PathBuf::from("/srv/chat/relay.db"));
        assert_eq!(config.storage.max_blob_size, 1048576);
        assert_eq!(config.limits.outbound_queue, 64);
        assert_eq!(config.limits.backfill_batch, 500);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.storage.blob_dir, PathBuf::from("data/uploads"));
        assert_eq!(config.limits.max_message_size, 1024 * 1024);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.limits.outbound_queue, 1024);
    }

    #[test]
    fn unreadable_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "[server\nbind_address = 1").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
