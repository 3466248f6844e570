//!
//! Direct-Model Engine
//!
//! rustls drives record I/O on the descriptor itself through `FdStream`.
//! The handshake is one blocking call that returns only once it has
//! completed or failed.
//!

use std::io::{self, Read, Write};

use rustls::{ClientConnection, ServerConnection, StreamOwned};
use tracing::debug;

use super::config;
use super::status::EngineStatus;
use super::{Configuration, TlsEngine};
use crate::descriptor::Descriptor;
use crate::errors::{Result, SocketError};
use crate::os;

/// Borrowed view of a descriptor as a byte stream. Never closes it.
#[derive(Debug)]
pub(crate) struct FdStream {
    descriptor: Descriptor,
}

impl Read for FdStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let received = unsafe { os::recv_raw(self.descriptor.as_raw(), buf.as_mut_ptr(), buf.len()) };
        if received < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(received as usize)
    }
}

impl Write for FdStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let sent = unsafe { os::send_raw(self.descriptor.as_raw(), buf.as_ptr(), buf.len()) };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sent as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum DirectStream {
    Client(StreamOwned<ClientConnection, FdStream>),
    Server(StreamOwned<ServerConnection, FdStream>),
}

impl DirectStream {
    fn is_handshaking(&self) -> bool {
        match self {
            DirectStream::Client(s) => s.conn.is_handshaking(),
            DirectStream::Server(s) => s.conn.is_handshaking(),
        }
    }

    fn complete_io(&mut self) -> io::Result<(usize, usize)> {
        match self {
            DirectStream::Client(s) => s.conn.complete_io(&mut s.sock),
            DirectStream::Server(s) => s.conn.complete_io(&mut s.sock),
        }
    }

    /// Queue close_notify and write out pending records without reading.
    fn shutdown(&mut self) -> io::Result<()> {
        match self {
            DirectStream::Client(s) => {
                s.conn.send_close_notify();
                while s.conn.wants_write() {
                    s.conn.write_tls(&mut s.sock)?;
                }
            }
            DirectStream::Server(s) => {
                s.conn.send_close_notify();
                while s.conn.wants_write() {
                    s.conn.write_tls(&mut s.sock)?;
                }
            }
        }
        Ok(())
    }
}

impl Read for DirectStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DirectStream::Client(s) => s.read(buf),
            DirectStream::Server(s) => s.read(buf),
        }
    }
}

impl Write for DirectStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DirectStream::Client(s) => s.write(buf),
            DirectStream::Server(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            DirectStream::Client(s) => s.flush(),
            DirectStream::Server(s) => s.flush(),
        }
    }
}

pub struct DirectEngine {
    descriptor: Descriptor,
    stream: Option<DirectStream>,
}

impl DirectEngine {
    pub fn new(descriptor: Descriptor, config: &Configuration) -> Result<Self> {
        let sock = FdStream { descriptor };
        let stream = match &config.certificate {
            Some(certificate) => DirectStream::Server(StreamOwned::new(config::server_connection(certificate)?, sock)),
            None => DirectStream::Client(StreamOwned::new(config::client_connection(descriptor, config)?, sock)),
        };
        Ok(Self {
            descriptor,
            stream: Some(stream),
        })
    }

    fn stream(&mut self) -> Result<&mut DirectStream> {
        self.stream.as_mut().ok_or(SocketError::ClosedGraceful)
    }
}

impl TlsEngine for DirectEngine {
    fn handshake(&mut self) -> Result<()> {
        let descriptor = self.descriptor;
        let stream = self.stream()?;
        while stream.is_handshaking() {
            if let Err(e) = stream.complete_io() {
                return Err(handshake_error(engine_error(e)));
            }
        }
        debug!(%descriptor, "TLS handshake complete");
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.stream()?.read(buf) {
            Ok(0) => Err(SocketError::ClosedGraceful),
            Ok(n) => Ok(n),
            Err(e) => Err(engine_error(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let stream = self.stream()?;
        let accepted = stream.write(buf).map_err(engine_error)?;
        stream.flush().map_err(engine_error)?;
        Ok(accepted)
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        stream.shutdown().map_err(engine_error)
    }
}

fn handshake_error(error: SocketError) -> SocketError {
    let (status, os_code, message) = match error {
        SocketError::Tls { status, message } => (Some(status), None, message),
        SocketError::Os { code, message } if code >= 0 => (None, Some(code), message),
        SocketError::ClosedGraceful => (
            Some(EngineStatus::ClosedGraceful),
            None,
            "peer closed the connection".to_string(),
        ),
        SocketError::ClosedAbort => (Some(EngineStatus::ClosedAbort), None, "peer reset the connection".to_string()),
        other => (None, None, other.to_string()),
    };
    SocketError::Handshake {
        status,
        os_code,
        message,
    }
}

/// rustls reports protocol failures as `InvalidData`; everything else is a
/// transport error.
fn engine_error(error: io::Error) -> SocketError {
    if error.kind() == io::ErrorKind::InvalidData {
        return SocketError::Tls {
            status: EngineStatus::Protocol,
            message: error.to_string(),
        };
    }
    error.into()
}
