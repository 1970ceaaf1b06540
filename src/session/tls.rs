//! Trust material loading
//!
//! Builds the rustls client configuration for the broker session from the CA
//! trust anchor, the client certificate, and the client private key. Mutual
//! authentication is not optional: every field is required, the broker chain
//! is always verified, and rustls itself floors the protocol at TLS 1.2.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Paths to the trust material, fixed at startup
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// CA trust anchor verifying the broker
    pub ca_file: String,
    /// Client certificate presented to the broker
    pub cert_file: String,
    /// Private key matching the client certificate
    pub key_file: String,
}

/// Error type for trust configuration
#[derive(Debug)]
pub enum TlsError {
    /// IO error reading files
    Io(std::io::Error),
    /// Certificate parsing error
    Certificate(String),
    /// Private key error
    PrivateKey(String),
    /// TLS configuration error
    Config(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Io(e) => write!(f, "IO error: {}", e),
            TlsError::Certificate(msg) => write!(f, "certificate error: {}", msg),
            TlsError::PrivateKey(msg) => write!(f, "private key error: {}", msg),
            TlsError::Config(msg) => write!(f, "TLS config error: {}", msg),
        }
    }
}

impl std::error::Error for TlsError {}

impl From<std::io::Error> for TlsError {
    fn from(e: std::io::Error) -> Self {
        TlsError::Io(e)
    }
}

/// Load certificates from a PEM file
fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_reader_iter(reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("failed to parse {}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(TlsError::Certificate(format!(
            "no certificates found in {}",
            path
        )));
    }

    Ok(certs)
}

/// Load a private key from a PEM file
fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    PrivateKeyDer::from_pem_reader(reader)
        .map_err(|e| TlsError::PrivateKey(format!("failed to parse {}: {}", path, e)))
}

/// Build a TLS connector enforcing mutual authentication
pub fn client_connector(config: &TrustConfig) -> Result<TlsConnector, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(&config.ca_file)? {
        roots
            .add(cert)
            .map_err(|e| TlsError::Certificate(format!("failed to add CA certificate: {}", e)))?;
    }

    let certs = load_certs(&config.cert_file)?;
    let key = load_private_key(&config.key_file)?;

    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| TlsError::Config(format!("failed to build client config: {}", e)))?;

    Ok(TlsConnector::from(Arc::new(client_config)))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn temp_pem(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_ca_file_is_io_error() {
        let config = TrustConfig {
            ca_file: "/nonexistent/ca.crt".to_string(),
            cert_file: "/nonexistent/client.crt".to_string(),
            key_file: "/nonexistent/client.key".to_string(),
        };
        match client_connector(&config) {
            Err(TlsError::Io(_)) => {}
            other => panic!("expected IO error, got {:?}", other.err()),
        }
    }

    #[test]
    fn empty_pem_rejected() {
        let ca = temp_pem("");
        let config = TrustConfig {
            ca_file: ca.path().to_string_lossy().to_string(),
            cert_file: ca.path().to_string_lossy().to_string(),
            key_file: ca.path().to_string_lossy().to_string(),
        };
        match client_connector(&config) {
            Err(TlsError::Certificate(msg)) => assert!(msg.contains("no certificates")),
            other => panic!("expected certificate error, got {:?}", other.err()),
        }
    }

    #[test]
    fn garbage_pem_rejected() {
        let ca = temp_pem("this is not a certificate");
        let config = TrustConfig {
            ca_file: ca.path().to_string_lossy().to_string(),
            cert_file: ca.path().to_string_lossy().to_string(),
            key_file: ca.path().to_string_lossy().to_string(),
        };
        assert!(client_connector(&config).is_err());
    }

    #[test]
    fn tls_error_display() {
        let err = TlsError::Certificate("test error".to_string());
        assert!(err.to_string().contains("certificate error"));

        let err = TlsError::PrivateKey("key error".to_string());
        assert!(err.to_string().contains("private key error"));

        let err = TlsError::Config("config error".to_string());
        assert!(err.to_string().contains("TLS config error"));
    }
}
