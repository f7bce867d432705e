//! Client certificate handling and outbound TLS for hub connections

use crate::tls::{load_private_key, protocol_versions};
use anyhow::{anyhow, Result};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::certs;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Client authentication mode for incoming TLS connections
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ClientAuthMode {
    /// No client certificate requested
    #[default]
    NoClientAuth,
    /// Client certificate is verified when presented
    Optional,
    /// Client certificate is required
    Required,
}

impl ClientAuthMode {
    /// Parse client auth mode from string
    pub fn from_string(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "required" => ClientAuthMode::Required,
            "optional" => ClientAuthMode::Optional,
            _ => ClientAuthMode::NoClientAuth,
        }
    }

    /// Check if client auth is required
    pub fn is_required(&self) -> bool {
        matches!(self, ClientAuthMode::Required)
    }

    /// Check if client auth is optional or required
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ClientAuthMode::NoClientAuth)
    }
}

/// TLS options for outbound connections to a hub
///
/// The default performs no server verification and presents no client
/// certificate, which is what a local hub with a self-signed certificate needs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TlsClientConfig {
    /// PEM-encoded client certificate
    pub cert_pem: Option<Vec<u8>>,
    /// PEM-encoded client private key
    pub key_pem: Option<Vec<u8>>,
    /// PEM-encoded CA bundle for server verification
    pub ca_cert_pem: Option<Vec<u8>>,
    /// Whether to verify the server certificate
    pub verify_server_cert: bool,
    /// Minimum protocol version ("1.0" to "1.3"); all versions when unset
    pub min_version: Option<String>,
}

impl TlsClientConfig {
    /// Create a new TLS client configuration
    pub fn new(
        cert_pem: Option<Vec<u8>>,
        key_pem: Option<Vec<u8>>,
        ca_cert_pem: Option<Vec<u8>>,
        verify_server_cert: bool,
    ) -> Self {
        Self {
            cert_pem,
            key_pem,
            ca_cert_pem,
            verify_server_cert,
            min_version: None,
        }
    }

    pub fn with_min_version(mut self, version: impl Into<String>) -> Self {
        self.min_version = Some(version.into());
        self
    }

    /// Build the rustls client configuration
    pub fn build(&self) -> Result<ClientConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions = protocol_versions(self.min_version.as_deref().unwrap_or("1.0"))?;

        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(versions)
            .map_err(|e| anyhow!("Unsupported TLS protocol versions: {}", e))?;

        let builder = if self.verify_server_cert {
            let ca_pem = self
                .ca_cert_pem
                .as_deref()
                .ok_or_else(|| anyhow!("Server verification requires a CA certificate"))?;

            let mut root_store = RootCertStore::empty();
            for cert in load_certificates(ca_pem)? {
                root_store
                    .add(cert)
                    .map_err(|e| anyhow!("Failed to add CA certificate to root store: {}", e))?;
            }
            debug!("Verifying hub certificates against {} CA(s)", root_store.len());
            builder.with_root_certificates(root_store)
        } else {
            warn!("Hub server certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
        };

        let config = match (&self.cert_pem, &self.key_pem) {
            (Some(cert_pem), Some(key_pem)) => {
                let chain = load_certificates(cert_pem)?;
                if chain.is_empty() {
                    return Err(anyhow!("No certificates found in client certificate PEM"));
                }
                let key = load_private_key(key_pem)?;
                info!("Presenting client certificate to hub");
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| anyhow!("Failed to configure client certificate: {}", e))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => return Err(anyhow!("Client certificate and key must be given together")),
        };

        Ok(config)
    }

    /// Build a connector for wrapping outbound sockets
    pub fn build_connector(&self) -> Result<TlsConnector> {
        Ok(TlsConnector::from(Arc::new(self.build()?)))
    }
}

/// Load certificates from PEM-encoded data
pub fn load_certificates(pem_data: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem_data);
    certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("Failed to parse certificates: {}", e))
}

/// Accepts any hub certificate while still checking handshake signatures
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_auth_mode_from_string() {
        assert_eq!(ClientAuthMode::from_string("required"), ClientAuthMode::Required);
        assert_eq!(ClientAuthMode::from_string("optional"), ClientAuthMode::Optional);
        assert_eq!(ClientAuthMode::from_string("none"), ClientAuthMode::NoClientAuth);
        assert_eq!(ClientAuthMode::from_string("REQUIRED"), ClientAuthMode::Required);
        assert_eq!(ClientAuthMode::from_string("unknown"), ClientAuthMode::NoClientAuth);
    }

    #[test]
    fn test_client_auth_mode_flags() {
        assert!(ClientAuthMode::Required.is_required());
        assert!(ClientAuthMode::Required.is_enabled());
        assert!(!ClientAuthMode::Optional.is_required());
        assert!(ClientAuthMode::Optional.is_enabled());
        assert!(!ClientAuthMode::NoClientAuth.is_enabled());
        assert_eq!(ClientAuthMode::default(), ClientAuthMode::NoClientAuth);
    }

    #[test]
    fn test_default_client_config_builds() {
        let config = TlsClientConfig::default();
        assert!(!config.verify_server_cert);
        assert!(config.build_connector().is_ok());
    }

    #[test]
    fn test_tls13_only_client_config_builds() {
        let config = TlsClientConfig::default().with_min_version("1.3");
        assert!(config.build().is_ok());
    }

    #[test]
    fn test_verification_requires_ca() {
        let config = TlsClientConfig::new(None, None, None, true);
        assert!(config.build().is_err());
    }

    #[test]
    fn test_certificate_without_key_rejected() {
        let config = TlsClientConfig::new(Some(vec![1, 2, 3]), None, None, false);
        assert!(config.build().is_err());
    }

    #[test]
    fn test_invalid_min_version_rejected() {
        let config = TlsClientConfig::default().with_min_version("2.0");
        assert!(config.build().is_err());
    }

    #[test]
    fn test_load_certificates_empty_input() {
        let certs = load_certificates(b"").expect("empty input parses");
        assert!(certs.is_empty());
    }
}
