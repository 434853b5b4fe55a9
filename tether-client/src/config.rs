//! Native client configuration
//!
//! Connection behaviour (timeouts, heartbeat, reconnect) lives in
//! [`tether_core::ClientConfig`]; this module adds the TLS trust setup that
//! only the self-driven transport needs.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tether_core::error::ConfigError;
use tether_core::{Error, Result};

pub use tether_core::config::{
    ClientConfig, HeartbeatConfig, ReconnectConfig, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RECONNECT_INTERVAL, KEEPALIVE_PAYLOAD,
};

/// TLS trust configuration for `wss://` targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Trust the bundled Mozilla root set
    pub webpki_roots: bool,
    /// Additional PEM bundle of trusted certificates
    pub ca_file: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            webpki_roots: true,
            ca_file: None,
        }
    }
}

impl TlsConfig {
    /// Trust the certificates in a PEM file in addition to the root set
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Do not trust the bundled root set
    pub fn without_webpki_roots(mut self) -> Self {
        self.webpki_roots = false;
        self
    }

    /// Build the rustls client configuration
    pub fn build(&self) -> Result<rustls::ClientConfig> {
        let mut roots = rustls::RootCertStore::empty();
        if self.webpki_roots {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        if let Some(path) = &self.ca_file {
            let file = File::open(path).map_err(|e| ConfigError::InvalidValue {
                field: "tls.ca_file".to_string(),
                value: format!("{}: {}", path.display(), e),
            })?;
            let mut reader = BufReader::new(file);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| {
                    ConfigError::Validation(format!("Invalid certificate in {}: {}", path.display(), e))
                })?;
                roots.add(cert).map_err(|e| {
                    ConfigError::Validation(format!("Untrusted certificate in {}: {}", path.display(), e))
                })?;
            }
        }

        if roots.is_empty() {
            return Err(Error::Config(ConfigError::Validation(
                "TLS configuration has no trust anchors".to_string(),
            )));
        }

        Ok(rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    fn temp_pem(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_tls_uses_webpki_roots() {
        let config = TlsConfig::default();
        assert!(config.webpki_roots);
        assert!(config.build().is_ok());
    }

    #[test]
    fn test_missing_ca_file() {
        let err = TlsConfig::default()
            .ca_file("/nonexistent/tether-ca.pem")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidValue { ref field, .. }) if field == "tls.ca_file"
        ));
    }

    #[test]
    fn test_no_trust_anchors() {
        let pem = temp_pem("not a certificate\n");
        let err = TlsConfig::default()
            .without_webpki_roots()
            .ca_file(pem.path())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no trust anchors"));
    }

    #[test]
    fn test_core_config_reexported() {
        let config = ClientConfig::default().heartbeat(DEFAULT_HEARTBEAT_INTERVAL);
        assert!(config.heartbeat.enabled);
        assert_eq!(config.heartbeat.payload, KEEPALIVE_PAYLOAD);
    }
}
