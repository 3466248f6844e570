//!
//! Server Certificates
//!
//! A `Certificate` holds a PEM certificate chain and its PEM private key.
//! Parsing is deferred until a server engine is built, so importing only
//! checks that the files can be read.
//!
//! Encrypted private keys are not supported.
//!

use std::fmt;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::errors::{Result, SocketError};

#[derive(Clone)]
pub struct Certificate {
    cert: Vec<u8>,
    key: Vec<u8>,
}

impl Certificate {
    pub fn from_pem(cert: Vec<u8>, key: Vec<u8>) -> Self {
        Self { cert, key }
    }

    /// Read a PEM certificate chain and a PEM private key from disk.
    pub fn import(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();
        let cert = std::fs::read(cert_path).map_err(|e| {
            SocketError::Certificate(format!(
                "failed to open certificate file '{}': {}",
                cert_path.display(),
                e
            ))
        })?;
        let key = std::fs::read(key_path).map_err(|e| {
            SocketError::Certificate(format!("failed to open key file '{}': {}", key_path.display(), e))
        })?;
        Ok(Self { cert, key })
    }

    pub fn cert_pem(&self) -> &[u8] {
        &self.cert
    }

    pub(crate) fn chain(&self) -> Result<Vec<CertificateDer<'static>>> {
        let mut reader = self.cert.as_slice();
        let certs = rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SocketError::Certificate(format!("failed to parse certificates: {}", e)))?;

        if certs.is_empty() {
            return Err(SocketError::Certificate(
                "no certificates found in certificate file".to_string(),
            ));
        }
        Ok(certs)
    }

    pub(crate) fn private_key(&self) -> Result<PrivateKeyDer<'static>> {
        let mut reader = self.key.as_slice();
        rustls_pemfile::private_key(&mut reader)
            .map_err(|e| SocketError::Certificate(format!("failed to parse private key: {}", e)))?
            .ok_or_else(|| SocketError::Certificate("no private key found in key file".to_string()))
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("cert", &format_args!("{} bytes", self.cert.len()))
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn localhost() -> rcgen::CertifiedKey {
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap()
    }

    #[test]
    fn test_parse_generated_certificate() {
        let generated = localhost();
        let certificate = Certificate::from_pem(
            generated.cert.pem().into_bytes(),
            generated.key_pair.serialize_pem().into_bytes(),
        );
        assert_eq!(certificate.chain().unwrap().len(), 1);
        assert!(certificate.private_key().is_ok());
    }

    #[test]
    fn test_import_from_files() {
        let generated = localhost();
        let mut cert_file = tempfile::NamedTempFile::new().unwrap();
        cert_file.write_all(generated.cert.pem().as_bytes()).unwrap();
        let mut key_file = tempfile::NamedTempFile::new().unwrap();
        key_file.write_all(generated.key_pair.serialize_pem().as_bytes()).unwrap();

        let certificate = Certificate::import(cert_file.path(), key_file.path()).unwrap();
        assert_eq!(certificate.cert_pem(), generated.cert.pem().as_bytes());
        assert!(certificate.chain().is_ok());
    }

    #[test]
    fn test_import_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Certificate::import(dir.path().join("cert.pem"), dir.path().join("key.pem")).unwrap_err();
        assert!(err.to_string().contains("cert.pem"));
    }

    #[test]
    fn test_key_file_without_key() {
        let generated = localhost();
        let certificate = Certificate::from_pem(generated.cert.pem().into_bytes(), generated.cert.pem().into_bytes());
        let err = certificate.private_key().unwrap_err();
        assert!(err.to_string().contains("no private key"));
    }

    #[test]
    fn test_debug_hides_key() {
        let certificate = Certificate::from_pem(b"cert".to_vec(), b"secret".to_vec());
        assert!(!format!("{:?}", certificate).contains("secret"));
    }
}
