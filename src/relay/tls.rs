//! TLS configuration loading
//!
//! Builds a rustls server config from PEM files so the relay can terminate
//! wss/https itself. Key parsing accepts PKCS#8, RSA and SEC1 keys.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{NetworkError, Result};

/// Load a rustls [`ServerConfig`](rustls::ServerConfig) from a PEM
/// certificate chain and private key.
pub fn load_server_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<rustls::ServerConfig> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| NetworkError::Tls(format!("{}: {}", cert_path.display(), e)))?;
    if certs.is_empty() {
        return Err(NetworkError::Tls(format!(
            "{}: no certificates found",
            cert_path.display()
        ))
        .into());
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| NetworkError::Tls(format!("{}: {}", key_path.display(), e)))?
        .ok_or_else(|| {
            NetworkError::Tls(format!("{}: no private key found", key_path.display()))
        })?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| NetworkError::Tls(e.to_string()))?;

    Ok(config)
}
