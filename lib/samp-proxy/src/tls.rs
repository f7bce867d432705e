//! TLS support for the dispatch server listener

use crate::mtls::{load_certificates, ClientAuthMode};
use anyhow::{anyhow, Context, Result};
use rustls::pki_types::PrivateKeyDer;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, SupportedProtocolVersion};
use rustls_pemfile::read_all;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// TLS configuration for the HTTPS listener
#[derive(Clone)]
pub struct TlsServerConfig {
    /// Rustls server configuration
    pub config: Arc<ServerConfig>,
    /// Minimum TLS version
    pub min_version: String,
    /// Client authentication mode (for mTLS)
    pub client_auth: ClientAuthMode,
}

impl TlsServerConfig {
    /// Validate TLS version string
    pub fn validate_version(version: &str) -> Result<()> {
        match version {
            "1.0" | "1.1" | "1.2" | "1.3" => Ok(()),
            _ => Err(anyhow!(
                "Invalid TLS version: {}. Must be 1.0, 1.1, 1.2, or 1.3",
                version
            )),
        }
    }

    /// Create a TLS configuration from PEM-encoded certificate and private key
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8], min_version: Option<String>) -> Result<Self> {
        Self::from_pem_with_client_auth(
            cert_pem,
            key_pem,
            None,
            ClientAuthMode::NoClientAuth,
            min_version,
        )
    }

    /// Create a TLS configuration with client certificate validation (mTLS)
    pub fn from_pem_with_client_auth(
        cert_pem: &[u8],
        key_pem: &[u8],
        ca_cert_pem: Option<&[u8]>,
        client_auth: ClientAuthMode,
        min_version: Option<String>,
    ) -> Result<Self> {
        debug!("Creating TLS configuration from PEM data");

        let certs_vec = load_certificates(cert_pem)?;
        if certs_vec.is_empty() {
            return Err(anyhow!("No certificates found in PEM data"));
        }
        debug!("Loaded {} certificate(s)", certs_vec.len());

        let private_key = load_private_key(key_pem)?;
        debug!("Loaded private key");

        let min_version_str = min_version.unwrap_or_else(|| "1.0".to_string());
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(protocol_versions(&min_version_str)?)
            .map_err(|e| anyhow!("Unsupported TLS protocol versions: {}", e))?;

        let config = if client_auth.is_enabled() {
            let ca_pem = ca_cert_pem
                .ok_or_else(|| anyhow!("Client certificate validation requires a CA certificate"))?;

            let mut root_store = RootCertStore::empty();
            for cert in load_certificates(ca_pem)? {
                root_store
                    .add(cert)
                    .map_err(|e| anyhow!("Failed to add CA certificate to root store: {}", e))?;
            }
            if root_store.is_empty() {
                return Err(anyhow!("No CA certificates found in PEM data"));
            }

            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), provider);
            let verifier = if client_auth.is_required() {
                verifier
            } else {
                verifier.allow_unauthenticated()
            };
            let verifier = verifier
                .build()
                .map_err(|e| anyhow!("Failed to create WebPKI verifier: {}", e))?;

            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs_vec, private_key)
                .map_err(|e| anyhow!("Failed to create mTLS config: {}", e))?
        } else {
            builder
                .with_no_client_auth()
                .with_single_cert(certs_vec, private_key)
                .map_err(|e| anyhow!("Failed to create TLS config: {}", e))?
        };

        info!(
            "TLS configuration created with client auth: {:?}, minimum version {}",
            client_auth, min_version_str
        );

        Ok(Self {
            config: Arc::new(config),
            min_version: min_version_str,
            client_auth,
        })
    }

    /// Create a TLS configuration from PEM files on disk
    pub fn from_files(
        cert_path: &Path,
        key_path: &Path,
        ca_path: Option<&Path>,
        client_auth: ClientAuthMode,
        min_version: Option<String>,
    ) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path)
            .with_context(|| format!("Failed to read certificate {}", cert_path.display()))?;
        let key_pem = std::fs::read(key_path)
            .with_context(|| format!("Failed to read private key {}", key_path.display()))?;
        let ca_pem = ca_path
            .map(|path| {
                std::fs::read(path)
                    .with_context(|| format!("Failed to read CA bundle {}", path.display()))
            })
            .transpose()?;

        Self::from_pem_with_client_auth(&cert_pem, &key_pem, ca_pem.as_deref(), client_auth, min_version)
    }

    /// Acceptor wrapping inbound sockets with this configuration
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.config.clone())
    }
}

/// Protocol versions admitted for a minimum version string
///
/// rustls implements TLS 1.2 and 1.3 only, so anything below 1.3 admits both.
pub fn protocol_versions(min_version: &str) -> Result<&'static [&'static SupportedProtocolVersion]> {
    TlsServerConfig::validate_version(min_version)?;
    Ok(match min_version {
        "1.3" => TLS13_ONLY,
        _ => rustls::ALL_VERSIONS,
    })
}

/// Parse the first private key (PKCS#8, PKCS#1 or SEC1) from PEM data
pub fn load_private_key(key_pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut key_reader = BufReader::new(key_pem);
    let items: Vec<_> = read_all(&mut key_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow!("Failed to parse private key: {}", e))?;

    for item in items {
        match item {
            rustls_pemfile::Item::Pkcs8Key(k) => return Ok(PrivateKeyDer::Pkcs8(k)),
            rustls_pemfile::Item::Pkcs1Key(k) => return Ok(PrivateKeyDer::Pkcs1(k)),
            rustls_pemfile::Item::Sec1Key(k) => return Ok(PrivateKeyDer::Sec1(k)),
            _ => {}
        }
    }

    Err(anyhow!("No private key found in PEM data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_valid_tls_versions() {
        for version in &["1.0", "1.1", "1.2", "1.3"] {
            let result = TlsServerConfig::validate_version(version);
            assert!(result.is_ok(), "Version {} should be valid", version);
        }
    }

    #[test]
    fn test_validate_invalid_tls_version() {
        let result = TlsServerConfig::validate_version("2.0");
        assert!(result.is_err(), "Version 2.0 should be invalid");
    }

    #[test]
    fn test_protocol_versions() {
        let all = protocol_versions("1.0").expect("valid");
        assert_eq!(all.len(), rustls::ALL_VERSIONS.len());

        let only13 = protocol_versions("1.3").expect("valid");
        assert_eq!(only13.len(), 1);
        assert_eq!(only13[0].version, rustls::ProtocolVersion::TLSv1_3);

        assert!(protocol_versions("3").is_err());
    }

    #[test]
    fn test_missing_certificate_rejected() {
        let result = TlsServerConfig::from_pem(b"", b"", None);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_private_key_rejected() {
        assert!(load_private_key(b"not a pem document").is_err());
    }

    #[test]
    fn test_missing_files_rejected() {
        let result = TlsServerConfig::from_files(
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
            None,
            ClientAuthMode::NoClientAuth,
            None,
        );
        assert!(result.is_err());
    }
}
