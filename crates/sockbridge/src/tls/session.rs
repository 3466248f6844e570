//!
//! Callback-Driven TLS Session
//!
//! A Secure-Transport-style engine built on a rustls `Connection`. The
//! session never performs I/O itself: every TLS record goes through the
//! read/write functions installed with `set_io_funcs`, which receive the
//! token installed with `set_connection`.
//!
//! Results are `EngineStatus` values. `WouldBlock` from `handshake` means
//! "call again"; the bridge reporting partial progress makes the session
//! call it again on its own.
//!

use std::io::{self, Read, Write};

use rustls::Connection;
use tracing::trace;

use super::bridge::{ConnectionRef, ReadFunc, WriteFunc};
use super::status::EngineStatus;
use crate::os;

#[derive(Clone, Copy)]
struct IoFuncs {
    read: ReadFunc,
    write: WriteFunc,
}

/// Adapts the installed bridge functions to `io::Read`/`io::Write` so rustls
/// can pull and push records through them.
struct BridgeIo {
    funcs: IoFuncs,
    connection: ConnectionRef,
    status: EngineStatus,
    errno: i32,
}

impl BridgeIo {
    fn record(&mut self, status: EngineStatus, length: usize) {
        self.status = status;
        self.errno = if length == 0 && !status.is_success() {
            os::errno()
        } else {
            0
        };
        trace!(%status, length, "bridge call");
    }
}

impl Read for BridgeIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut length = buf.len();
        let status = unsafe { (self.funcs.read)(self.connection, buf.as_mut_ptr(), &mut length) };
        self.record(status, length);
        match status {
            EngineStatus::Success => Ok(length),
            EngineStatus::WouldBlock if length > 0 => Ok(length),
            EngineStatus::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
            EngineStatus::ClosedGraceful => Ok(0),
            EngineStatus::ClosedAbort => Err(io::ErrorKind::ConnectionReset.into()),
            _ => Err(io::Error::other(status.to_string())),
        }
    }
}

impl Write for BridgeIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut length = buf.len();
        let status = unsafe { (self.funcs.write)(self.connection, buf.as_ptr(), &mut length) };
        self.record(status, length);
        match status {
            EngineStatus::Success => Ok(length),
            EngineStatus::WouldBlock if length > 0 => Ok(length),
            EngineStatus::WouldBlock => Err(io::ErrorKind::WouldBlock.into()),
            EngineStatus::ClosedGraceful => Err(io::ErrorKind::WriteZero.into()),
            _ => Err(io::Error::other(status.to_string())),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct CallbackSession {
    conn: Connection,
    funcs: Option<IoFuncs>,
    connection: ConnectionRef,
    break_on_server_auth: bool,
    auth_reported: bool,
    eof: bool,
    stalled: bool,
    last_errno: i32,
    last_error: Option<rustls::Error>,
}

impl CallbackSession {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            funcs: None,
            connection: std::ptr::null(),
            break_on_server_auth: false,
            auth_reported: false,
            eof: false,
            stalled: false,
            last_errno: 0,
            last_error: None,
        }
    }

    pub fn set_io_funcs(&mut self, read: ReadFunc, write: WriteFunc) {
        self.funcs = Some(IoFuncs { read, write });
    }

    pub fn set_connection(&mut self, connection: ConnectionRef) {
        self.connection = connection;
    }

    /// Interrupt the handshake with `PeerAuthCompleted` once the peer's
    /// certificate has arrived.
    pub fn set_break_on_server_auth(&mut self, enabled: bool) {
        self.break_on_server_auth = enabled;
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// errno captured by the last bridge call that failed without progress.
    pub fn last_errno(&self) -> i32 {
        self.last_errno
    }

    /// True when the last `handshake` step stopped on a bridge call that
    /// moved no bytes, as happens when a socket timeout expires.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn take_error(&mut self) -> Option<rustls::Error> {
        self.last_error.take()
    }

    /// Advance the handshake by one round of record I/O.
    pub fn handshake(&mut self) -> EngineStatus {
        self.stalled = false;

        if self.conn.wants_write() {
            let status = self.flush_records();
            if !status.is_success() {
                return status;
            }
        }

        if self.break_on_server_auth && !self.auth_reported && self.conn.peer_certificates().is_some() {
            self.auth_reported = true;
            return EngineStatus::PeerAuthCompleted;
        }

        if !self.conn.is_handshaking() {
            return EngineStatus::Success;
        }

        let status = self.read_records();
        if !status.is_success() {
            return status;
        }
        EngineStatus::WouldBlock
    }

    pub fn read(&mut self, data: &mut [u8], processed: &mut usize) -> EngineStatus {
        *processed = 0;
        let status = self.finish_handshake();
        if !status.is_success() || data.is_empty() {
            return status;
        }

        loop {
            match self.conn.reader().read(data) {
                Ok(0) => return EngineStatus::ClosedGraceful,
                Ok(n) => {
                    *processed = n;
                    return EngineStatus::Success;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                // TCP ended before close_notify
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return EngineStatus::ClosedAbort,
                Err(_) => return EngineStatus::IoError,
            }

            if self.eof {
                return EngineStatus::ClosedAbort;
            }
            if self.conn.wants_write() {
                let status = self.flush_records();
                if !status.is_success() {
                    return status;
                }
            }
            match self.read_records() {
                EngineStatus::Success => {}
                // Let the reader decide between close_notify and truncation
                EngineStatus::ClosedGraceful if self.eof => {}
                status => return status,
            }
        }
    }

    pub fn write(&mut self, data: &[u8], processed: &mut usize) -> EngineStatus {
        *processed = 0;
        let status = self.finish_handshake();
        if !status.is_success() || data.is_empty() {
            return status;
        }

        match self.conn.writer().write(data) {
            Ok(accepted) => *processed = accepted,
            Err(_) => return EngineStatus::IoError,
        }
        self.flush_records()
    }

    /// Queue close_notify and push it through the write bridge.
    pub fn close(&mut self) -> EngineStatus {
        self.conn.send_close_notify();
        self.flush_records()
    }

    fn bridge(&self) -> Option<BridgeIo> {
        let funcs = self.funcs?;
        if self.connection.is_null() {
            return None;
        }
        Some(BridgeIo {
            funcs,
            connection: self.connection,
            status: EngineStatus::Success,
            errno: 0,
        })
    }

    /// Complete a handshake left open by `PeerAuthCompleted` or by a caller
    /// that skipped `handshake`.
    fn finish_handshake(&mut self) -> EngineStatus {
        while self.conn.is_handshaking() {
            match self.handshake() {
                EngineStatus::Success | EngineStatus::PeerAuthCompleted => {}
                EngineStatus::WouldBlock if !self.stalled => {}
                status => return status,
            }
        }
        EngineStatus::Success
    }

    fn flush_records(&mut self) -> EngineStatus {
        let Some(mut io) = self.bridge() else {
            return EngineStatus::IoError;
        };
        while self.conn.wants_write() {
            if self.conn.write_tls(&mut io).is_err() {
                return self.bridge_failed(&io);
            }
        }
        EngineStatus::Success
    }

    fn read_records(&mut self) -> EngineStatus {
        let Some(mut io) = self.bridge() else {
            return EngineStatus::IoError;
        };
        match self.conn.read_tls(&mut io) {
            Ok(0) => {
                self.eof = true;
                return EngineStatus::ClosedGraceful;
            }
            Ok(_) => {}
            Err(_) => return self.bridge_failed(&io),
        }

        if let Err(error) = self.conn.process_new_packets() {
            // Best effort: get the alert rustls queued onto the wire
            let _ = self.flush_records();
            self.last_error = Some(error);
            return EngineStatus::Protocol;
        }
        EngineStatus::Success
    }

    fn bridge_failed(&mut self, io: &BridgeIo) -> EngineStatus {
        self.last_errno = io.errno;
        match io.status {
            EngineStatus::WouldBlock => {
                self.stalled = true;
                EngineStatus::WouldBlock
            }
            EngineStatus::Success => EngineStatus::IoError,
            status => status,
        }
    }
}
