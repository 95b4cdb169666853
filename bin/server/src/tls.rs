//! TLS configuration for secure mode.

use rootcause::prelude::Report;
use std::sync::Arc;
use tokio_rustls::rustls::ServerConfig as TlsServerConfig;
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::SslConfig;
use crate::error::ServerError;

/// Protocols offered during the handshake, most preferred first.
const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

/// Loads the certificate chain and key into a rustls server configuration
/// offering HTTP/2 and HTTP/1.1.
pub fn load_tls_config(ssl: &SslConfig) -> Result<Arc<TlsServerConfig>, Report<ServerError>> {
    let certs = CertificateDer::pem_file_iter(&ssl.certificate_file)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|e| ServerError::Tls {
            reason: format!(
                "reading certificate '{}': {e}",
                ssl.certificate_file.display()
            ),
        })?;

    if certs.is_empty() {
        return Err(ServerError::Tls {
            reason: format!(
                "no certificate found in '{}'",
                ssl.certificate_file.display()
            ),
        }
        .into());
    }

    let key = PrivateKeyDer::from_pem_file(&ssl.key_file).map_err(|e| ServerError::Tls {
        reason: format!("reading key '{}': {e}", ssl.key_file.display()),
    })?;

    let mut config = TlsServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls {
            reason: e.to_string(),
        })?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls {
            reason: format!("certificate and key do not form a valid pair: {e}"),
        })?;

    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();

    tracing::debug!(
        certificate = %ssl.certificate_file.display(),
        "loaded TLS configuration"
    );
    Ok(Arc::new(config))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::Path;

    /// Writes a self-signed `localhost` certificate and key into `dir`.
    pub(crate) fn self_signed(dir: &Path) -> SslConfig {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
                .expect("generate certificate");

        let certificate_file = dir.join("server.crt");
        let key_file = dir.join("server.key");
        std::fs::write(&certificate_file, cert.pem()).expect("write certificate");
        std::fs::write(&key_file, key_pair.serialize_pem()).expect("write key");

        SslConfig {
            certificate_file,
            key_file,
        }
    }

    #[test]
    fn loads_certificate_and_offers_h2() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_tls_config(&self_signed(dir.path())).expect("tls config");

        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn missing_certificate_is_a_tls_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ssl = SslConfig {
            certificate_file: dir.path().join("absent.crt"),
            key_file: dir.path().join("absent.key"),
        };

        let err = load_tls_config(&ssl).expect_err("should fail");
        assert!(matches!(err.current_context(), ServerError::Tls { .. }));
    }

    #[test]
    fn empty_certificate_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ssl = self_signed(dir.path());
        ssl.certificate_file = dir.path().join("empty.crt");
        std::fs::write(&ssl.certificate_file, "").expect("write");

        let err = load_tls_config(&ssl).expect_err("should fail");
        assert!(matches!(
            err.current_context(),
            ServerError::Tls { reason } if reason.contains("no certificate found")
        ));
    }
}
