///
/// # Socket Settings
///
/// TOML settings describing socket options and TLS material, so servers can
/// be configured without code changes. Every key is optional.
///
/// ## Example
///
/// ```toml
/// [tls]
/// peer = "example.com"
/// certificate = "certs/server.pem"
/// private_key = "certs/server.key"
/// allow_self_signed = false
/// engine = "direct"
/// trusted_roots = "certs/ca.pem"
///
/// [socket]
/// reuse_address = true
/// keep_alive = true
/// receive_timeout_ms = 5000
/// send_timeout_ms = 5000
/// backlog = 128
/// ```
///
/// Relative paths in a file loaded with `Settings::load` are resolved
/// against the directory containing that file.
///

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::certificate::Certificate;
use crate::errors::{Result, SocketError};
use crate::socket::{Socket, SocketOption};
use crate::tls::{Configuration, EngineKind};

pub const DEFAULT_BACKLOG: i32 = 128;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tls: TlsSettings,
    pub socket: SocketSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    pub peer: Option<String>,
    pub certificate: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    pub allow_self_signed: bool,
    pub engine: Option<EngineKind>,
    pub trusted_roots: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    pub reuse_address: Option<bool>,
    pub keep_alive: Option<bool>,
    pub receive_timeout_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
    pub backlog: Option<i32>,
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SocketError::Settings(format!("failed to read '{}': {}", path.display(), e)))?;
        let mut settings = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            settings.tls.resolve_paths(base);
        }
        Ok(settings)
    }

    /// Build a TLS configuration, importing any certificate files named.
    pub fn tls_configuration(&self) -> Result<Configuration> {
        let tls = &self.tls;
        let certificate = match (&tls.certificate, &tls.private_key) {
            (Some(cert), Some(key)) => Some(Certificate::import(cert, key)?),
            (None, None) => None,
            _ => {
                return Err(SocketError::Settings(
                    "certificate and private_key must be given together".to_string(),
                ));
            }
        };

        let trusted_roots = match &tls.trusted_roots {
            Some(path) => std::fs::read(path).map_err(|e| {
                SocketError::Settings(format!("failed to read trusted roots '{}': {}", path.display(), e))
            })?,
            None => Vec::new(),
        };

        Ok(Configuration {
            peer: tls.peer.clone(),
            certificate,
            allow_self_signed: tls.allow_self_signed,
            trusted_roots,
            engine: tls.engine.unwrap_or_default(),
        })
    }

    /// Set every configured option on `socket`.
    pub fn apply(&self, socket: &Socket) -> Result<()> {
        let options = &self.socket;
        if let Some(on) = options.reuse_address {
            socket.set_option(SocketOption::ReuseAddress(on))?;
        }
        if let Some(on) = options.keep_alive {
            socket.set_option(SocketOption::KeepAlive(on))?;
        }
        if let Some(ms) = options.receive_timeout_ms {
            socket.set_option(SocketOption::ReceiveTimeout(timeout(ms)))?;
        }
        if let Some(ms) = options.send_timeout_ms {
            socket.set_option(SocketOption::SendTimeout(timeout(ms)))?;
        }
        Ok(())
    }

    pub fn backlog(&self) -> i32 {
        self.socket.backlog.unwrap_or(DEFAULT_BACKLOG)
    }
}

impl TlsSettings {
    fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.certificate, &mut self.private_key, &mut self.trusted_roots]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Zero disables the timeout.
fn timeout(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_settings() {
        let settings = Settings::from_toml_str("").unwrap();
        assert!(settings.tls.peer.is_none());
        assert!(!settings.tls.allow_self_signed);
        assert_eq!(settings.backlog(), DEFAULT_BACKLOG);

        let config = settings.tls_configuration().unwrap();
        assert!(config.certificate.is_none());
        assert_eq!(config.engine, EngineKind::platform_default());
    }

    #[test]
    fn test_parse_full_settings() {
        let settings = Settings::from_toml_str(
            r#"
[tls]
peer = "example.com"
allow_self_signed = true
engine = "callback"

[socket]
reuse_address = true
receive_timeout_ms = 50
backlog = 16
"#,
        )
        .unwrap();

        assert_eq!(settings.tls.peer.as_deref(), Some("example.com"));
        assert_eq!(settings.tls.engine, Some(EngineKind::Callback));
        assert_eq!(settings.socket.receive_timeout_ms, Some(50));
        assert_eq!(settings.backlog(), 16);

        let config = settings.tls_configuration().unwrap();
        assert!(config.allow_self_signed);
        assert_eq!(config.engine, EngineKind::Callback);
    }

    #[test]
    fn test_certificate_without_key_rejected() {
        let settings = Settings::from_toml_str("[tls]\ncertificate = \"server.pem\"\n").unwrap();
        let err = settings.tls_configuration().unwrap_err();
        assert!(matches!(err, SocketError::Settings(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Settings::from_toml_str("[socket]\nbacklog = \"lots\"\n").unwrap_err();
        assert!(matches!(err, SocketError::Toml(_)));
    }

    #[test]
    fn test_relative_paths_resolved_against_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sockbridge.toml");
        std::fs::write(
            &path,
            "[tls]\ncertificate = \"server.pem\"\nprivate_key = \"/abs/server.key\"\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.tls.certificate, Some(dir.path().join("server.pem")));
        assert_eq!(settings.tls.private_key, Some(PathBuf::from("/abs/server.key")));
    }

    #[test]
    fn test_zero_timeout_disables() {
        assert_eq!(timeout(0), None);
        assert_eq!(timeout(50), Some(Duration::from_millis(50)));
    }
}
