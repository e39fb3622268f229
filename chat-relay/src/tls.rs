//! TLS listener configuration.

use crate::config::TlsConfig;
use crate::error::RelayError;
use axum_server::tls_rustls::RustlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Build a rustls server config from PEM files.
///
/// Uses the ring provider explicitly so no process-wide default has to be
/// installed. Only HTTP/1.1 is offered: WebSocket upgrades need it.
pub fn load_rustls_config(tls: &TlsConfig) -> Result<RustlsConfig, RelayError> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_key(&tls.key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| RelayError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| RelayError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, RelayError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(RelayError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, RelayError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| RelayError::Tls(format!("no private key found in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_files_are_io_errors() {
        let tls = TlsConfig {
            cert_path: PathBuf::from("/nonexistent/server.crt"),
            key_path: PathBuf::from("/nonexistent/server.key"),
        };
        assert!(matches!(load_rustls_config(&tls), Err(RelayError::Io(_))));
    }

    #[test]
    fn empty_pem_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("server.crt");
        let key = dir.path().join("server.key");
        std::fs::write(&cert, "").unwrap();
        std::fs::write(&key, "").unwrap();

        let tls = TlsConfig {
            cert_path: cert,
            key_path: key,
        };
        assert!(matches!(load_rustls_config(&tls), Err(RelayError::Tls(_))));
    }
}
