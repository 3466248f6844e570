//!
//! rustls Configuration Builders
//!
//! Turns a `Configuration` into rustls client/server connections. Both
//! engine models share these builders; they differ only in how records
//! reach the descriptor.
//!
//! - Client with `allow_self_signed` - certificate verification disabled
//! - Client otherwise - Mozilla roots plus any `trusted_roots` PEM
//! - Server - single certificate chain and key from `Configuration::certificate`
//!

use std::sync::{Arc, OnceLock};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, ServerConfig, ServerConnection};

use super::{Configuration, ensure_initialized};
use crate::certificate::Certificate;
use crate::descriptor::Descriptor;
use crate::errors::{Result, SocketError};
use crate::os;

pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    static INSTANCE: OnceLock<Arc<CryptoProvider>> = OnceLock::new();
    INSTANCE
        .get_or_init(|| Arc::new(rustls::crypto::ring::default_provider()))
        .clone()
}

fn build_client_config(config: &Configuration) -> Result<Arc<ClientConfig>> {
    let builder = ClientConfig::builder_with_provider(crypto_provider()).with_safe_default_protocol_versions()?;

    let client_config = if config.allow_self_signed {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DisabledVerifier {
                supported_algs: crypto_provider().signature_verification_algorithms,
            }))
            .with_no_client_auth()
    } else {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if !config.trusted_roots.is_empty() {
            let mut reader = config.trusted_roots.as_slice();
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| SocketError::Certificate(format!("failed to parse trusted roots: {}", e)))?;
                root_store.add(cert)?;
            }
        }
        builder.with_root_certificates(root_store).with_no_client_auth()
    };

    Ok(Arc::new(client_config))
}

fn build_server_config(certificate: &Certificate) -> Result<Arc<ServerConfig>> {
    let server_config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certificate.chain()?, certificate.private_key()?)?;
    Ok(Arc::new(server_config))
}

/// SNI/verification name: the configured peer, else the connected peer's IP.
fn server_name(descriptor: Descriptor, config: &Configuration) -> Result<ServerName<'static>> {
    let name = match &config.peer {
        Some(peer) => peer.clone(),
        None => os::peer_addr(descriptor)?.ip().to_string(),
    };
    ServerName::try_from(name.clone()).map_err(|e| SocketError::InvalidAddress {
        address: format!("{} ({})", name, e),
    })
}

pub(crate) fn client_connection(descriptor: Descriptor, config: &Configuration) -> Result<ClientConnection> {
    ensure_initialized();
    let client_config = build_client_config(config)?;
    Ok(ClientConnection::new(client_config, server_name(descriptor, config)?)?)
}

pub(crate) fn server_connection(certificate: &Certificate) -> Result<ServerConnection> {
    ensure_initialized();
    Ok(ServerConnection::new(build_server_config(certificate)?)?)
}

/// Client or server connection, chosen by the configuration's role.
pub(crate) fn new_connection(descriptor: Descriptor, config: &Configuration) -> Result<rustls::Connection> {
    match &config.certificate {
        Some(certificate) => Ok(server_connection(certificate)?.into()),
        None => Ok(client_connection(descriptor, config)?.into()),
    }
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct DisabledVerifier {
    supported_algs: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for DisabledVerifier {
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
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.supported_algs)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.supported_algs)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.supported_algs.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_connection_with_peer_name() {
        crate::tls::initialize();
        let config = Configuration::client(Some("example.com"));
        let conn = client_connection(Descriptor::from_raw(-1), &config).unwrap();
        assert!(conn.is_handshaking());
    }

    #[test]
    fn test_client_without_peer_needs_connected_descriptor() {
        crate::tls::initialize();
        let config = Configuration::client(None);
        let err = client_connection(Descriptor::from_raw(-1), &config).unwrap_err();
        assert_eq!(err.code(), Some(libc::EBADF));
    }

    #[test]
    fn test_invalid_trusted_roots_rejected() {
        crate::tls::initialize();
        let config = Configuration::client(Some("example.com"))
            .with_trusted_roots(b"-----BEGIN CERTIFICATE-----\nnot base64!\n-----END CERTIFICATE-----\n".to_vec());
        let err = client_connection(Descriptor::from_raw(-1), &config).unwrap_err();
        assert!(matches!(err, SocketError::Certificate(_)));
    }

    #[test]
    fn test_server_requires_valid_key_material() {
        crate::tls::initialize();
        let certificate = Certificate::from_pem(b"garbage".to_vec(), b"garbage".to_vec());
        let err = server_connection(&certificate).unwrap_err();
        assert!(matches!(err, SocketError::Certificate(_)));
    }
}
