//!
//! Socket Error Types
//!
//! All failures in this crate are reported through `SocketError`.
//!
//! ## Error Kinds
//!
//! - `Os` - A system call failed; carries errno and its description
//! - `ClosedGraceful` - Peer ended the stream in an orderly fashion
//! - `ClosedAbort` - Peer reset the connection or cut a TLS stream short
//! - `Handshake` - TLS handshake did not complete
//! - `Tls` - TLS record layer failure with the engine's status code
//! - `Resolution` - Host name resolved to no usable address
//!

use std::io;

use thiserror::Error;

use crate::tls::EngineStatus;

pub type Result<T> = std::result::Result<T, SocketError>;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("SocketError {code}: {message}")]
    Os { code: i32, message: String },

    #[error("Connection closed by peer")]
    ClosedGraceful,

    #[error("Connection reset by peer")]
    ClosedAbort,

    #[error("Write made no progress")]
    WriteZero,

    #[error("TLS handshake failed: {message}")]
    Handshake {
        status: Option<EngineStatus>,
        /// errno of the transport failure that stopped the handshake.
        os_code: Option<i32>,
        message: String,
    },

    #[error("TLS error {}: {message}", .status.code())]
    Tls {
        status: EngineStatus,
        message: String,
    },

    #[error("TLS is already active on this socket")]
    TlsAlreadyActive,

    #[error("Could not resolve host '{host}'")]
    Resolution { host: String },

    #[error("Invalid address '{address}'")]
    InvalidAddress { address: String },

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("Failed to parse settings: {0}")]
    Toml(#[from] toml::de::Error),
}

impl SocketError {
    /// Build an `Os` error from the calling thread's current errno.
    pub fn last_os_error() -> Self {
        Self::from_errno(io::Error::last_os_error().raw_os_error().unwrap_or(-1))
    }

    pub fn from_errno(code: i32) -> Self {
        SocketError::Os {
            code,
            message: io::Error::from_raw_os_error(code).to_string(),
        }
    }

    /// The OS or engine code attached to this error, if any. A handshake
    /// stopped by the transport reports the errno over the engine status.
    pub fn code(&self) -> Option<i32> {
        match self {
            SocketError::Os { code, .. } => Some(*code),
            SocketError::Tls { status, .. } => Some(status.code()),
            SocketError::Handshake { status, os_code, .. } => os_code.or(status.map(EngineStatus::code)),
            _ => None,
        }
    }

    /// True for "try again" failures, which is how receive/send timeouts surface.
    pub fn is_would_block(&self) -> bool {
        match self {
            SocketError::Os { code, .. } => is_try_again(*code),
            SocketError::Tls { status, .. } => *status == EngineStatus::WouldBlock,
            SocketError::Handshake { os_code, .. } => os_code.is_some_and(is_try_again),
            _ => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SocketError::ClosedGraceful | SocketError::ClosedAbort)
    }
}

pub(crate) fn is_try_again(code: i32) -> bool {
    code == libc::EAGAIN || code == libc::EWOULDBLOCK
}

/// `UnexpectedEof` is what rustls reports when TCP ends before close_notify,
/// so it counts as a broken stream rather than an orderly close.
impl From<io::Error> for SocketError {
    fn from(error: io::Error) -> Self {
        if let Some(code) = error.raw_os_error() {
            return SocketError::from_errno(code);
        }
        match error.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof => SocketError::ClosedAbort,
            io::ErrorKind::WriteZero => SocketError::WriteZero,
            _ => SocketError::Os {
                code: -1,
                message: error.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = SocketError::from_errno(libc::ECONNREFUSED);
        assert!(err.to_string().starts_with(&format!("SocketError {}", libc::ECONNREFUSED)));
        assert!(err.to_string().to_lowercase().contains("refused"));

        let err = SocketError::Tls {
            status: EngineStatus::Protocol,
            message: "bad record mac".to_string(),
        };
        assert!(err.to_string().contains("bad record mac"));
        assert!(err.to_string().contains(&EngineStatus::Protocol.code().to_string()));

        let err = SocketError::Resolution {
            host: "example.invalid".to_string(),
        };
        assert!(err.to_string().contains("example.invalid"));

        let err = SocketError::Handshake {
            status: Some(EngineStatus::ClosedGraceful),
            os_code: None,
            message: "peer went away".to_string(),
        };
        assert!(err.to_string().contains("handshake failed"));
        assert_eq!(err.code(), Some(EngineStatus::ClosedGraceful.code()));
    }

    #[test]
    fn test_handshake_timeout_keeps_errno() {
        let err = SocketError::Handshake {
            status: Some(EngineStatus::WouldBlock),
            os_code: Some(libc::EAGAIN),
            message: "timed out".to_string(),
        };
        assert_eq!(err.code(), Some(libc::EAGAIN));
        assert!(err.is_would_block());

        let err = SocketError::Handshake {
            status: Some(EngineStatus::Protocol),
            os_code: None,
            message: "bad certificate".to_string(),
        };
        assert!(!err.is_would_block());
    }

    #[test]
    fn test_would_block_detection() {
        assert!(SocketError::from_errno(libc::EAGAIN).is_would_block());
        assert!(SocketError::from_errno(libc::EWOULDBLOCK).is_would_block());
        assert!(!SocketError::from_errno(libc::EPIPE).is_would_block());
        assert!(!SocketError::ClosedGraceful.is_would_block());
        assert!(
            SocketError::Tls {
                status: EngineStatus::WouldBlock,
                message: String::new(),
            }
            .is_would_block()
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let err = SocketError::from(io::Error::from_raw_os_error(libc::ECONNRESET));
        assert_eq!(err.code(), Some(libc::ECONNRESET));

        let err = SocketError::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(err, SocketError::ClosedAbort));
        assert!(err.is_closed());

        let err = SocketError::from(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(err, SocketError::ClosedAbort));
    }
}
