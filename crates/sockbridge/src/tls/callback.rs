//!
//! Callback-Model Engine Adapter
//!
//! Wraps a `CallbackSession` wired to `bridge_read`/`bridge_write`. The
//! session's connection token is a leaked heap cell holding the descriptor
//! number; it stays valid until the session has been closed and dropped.
//!

use std::io;
use std::os::fd::RawFd;
use std::ptr::NonNull;

use tracing::{debug, warn};

use super::bridge::{ConnectionRef, bridge_read, bridge_write};
use super::config;
use super::session::CallbackSession;
use super::status::EngineStatus;
use super::{Configuration, Role, TlsEngine};
use crate::descriptor::Descriptor;
use crate::errors::{Result, SocketError};

pub struct CallbackEngine {
    descriptor: Descriptor,
    session: Option<CallbackSession>,
    token: Option<NonNull<RawFd>>,
}

// The token cell is owned by this engine and only read through the session,
// which moves with it.
unsafe impl Send for CallbackEngine {}

impl CallbackEngine {
    pub fn new(descriptor: Descriptor, config: &Configuration) -> Result<Self> {
        let conn = config::new_connection(descriptor, config)?;
        let token = NonNull::from(Box::leak(Box::new(descriptor.as_raw())));

        let mut session = CallbackSession::new(conn);
        session.set_io_funcs(bridge_read, bridge_write);
        session.set_connection(token.as_ptr() as ConnectionRef);
        // Verification is disabled for self-signed peers, so stop at the
        // certificate and treat that as a completed handshake.
        session.set_break_on_server_auth(config.role() == Role::Client && config.allow_self_signed);

        Ok(Self {
            descriptor,
            session: Some(session),
            token: Some(token),
        })
    }

    fn session(&mut self) -> Result<&mut CallbackSession> {
        self.session.as_mut().ok_or(SocketError::ClosedGraceful)
    }

    fn release(&mut self) -> Result<()> {
        let mut result = Ok(());
        if let Some(mut session) = self.session.take() {
            let status = session.close();
            if !status.is_success() && status != EngineStatus::ClosedGraceful {
                result = Err(status_error(&mut session, status));
            }
        }
        // The session is gone, so nothing can read the cell anymore
        if let Some(token) = self.token.take() {
            drop(unsafe { Box::from_raw(token.as_ptr()) });
        }
        result
    }
}

impl TlsEngine for CallbackEngine {
    fn handshake(&mut self) -> Result<()> {
        let descriptor = self.descriptor;
        let session = self.session()?;
        loop {
            match session.handshake() {
                // A bridge call that moved nothing means the socket timed out
                EngineStatus::WouldBlock if session.is_stalled() => {
                    let errno = session.last_errno();
                    let message = match errno {
                        0 => EngineStatus::WouldBlock.to_string(),
                        code => io::Error::from_raw_os_error(code).to_string(),
                    };
                    return Err(SocketError::Handshake {
                        status: Some(EngineStatus::WouldBlock),
                        os_code: (errno != 0).then_some(errno),
                        message,
                    });
                }
                EngineStatus::WouldBlock => continue,
                EngineStatus::Success => break,
                EngineStatus::PeerAuthCompleted => {
                    debug!(%descriptor, "peer certificate accepted without verification");
                    break;
                }
                status => {
                    let message = match session.take_error() {
                        Some(error) => error.to_string(),
                        None => status.to_string(),
                    };
                    let os_code = match (status, session.last_errno()) {
                        (EngineStatus::IoError, code) if code != 0 => Some(code),
                        _ => None,
                    };
                    return Err(SocketError::Handshake {
                        status: Some(status),
                        os_code,
                        message,
                    });
                }
            }
        }
        debug!(%descriptor, "TLS handshake complete");
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let session = self.session()?;
        let mut processed = 0;
        match session.read(buf, &mut processed) {
            EngineStatus::Success => Ok(processed),
            status => Err(status_error(session, status)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let session = self.session()?;
        let mut processed = 0;
        match session.write(buf, &mut processed) {
            EngineStatus::Success => Ok(processed),
            // Plaintext was accepted but the records did not all go out
            EngineStatus::WouldBlock if processed > 0 => Ok(processed),
            status => Err(status_error(session, status)),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.release()
    }
}

impl Drop for CallbackEngine {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(descriptor = %self.descriptor, "TLS close failed: {}", e);
        }
    }
}

fn status_error(session: &mut CallbackSession, status: EngineStatus) -> SocketError {
    match status {
        EngineStatus::ClosedGraceful => SocketError::ClosedGraceful,
        EngineStatus::ClosedAbort => SocketError::ClosedAbort,
        EngineStatus::WouldBlock | EngineStatus::IoError if session.last_errno() != 0 => {
            SocketError::from_errno(session.last_errno())
        }
        EngineStatus::Protocol => SocketError::Tls {
            status,
            message: session
                .take_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| status.to_string()),
        },
        _ => SocketError::Tls {
            status,
            message: status.to_string(),
        },
    }
}
