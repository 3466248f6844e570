//!
//! Stream Socket
//!
//! `Socket` owns one descriptor and, after `start_tls`, one TLS engine.
//! Every read and write goes through the engine once it is installed;
//! before that they go straight to `recv`/`send`.
//!
//! ## Lifecycle
//!
//! - `new` / `tcp_listening` / `connect_host` / `accept` produce sockets
//! - `bind`, `listen`, `connect` configure them
//! - `start_tls` upgrades at most once; a failed handshake leaves the
//!   socket plaintext
//! - `close` (or drop) shuts the engine down before closing the descriptor
//!

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tracing::{debug, warn};

use crate::descriptor::Descriptor;
use crate::errors::{Result, SocketError};
use crate::os;
use crate::plain;
use crate::readiness::{self, Interest};
use crate::tls::{self, Configuration, TlsEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    fn raw(self) -> libc::c_int {
        match self {
            Family::Ipv4 => libc::AF_INET,
            Family::Ipv6 => libc::AF_INET6,
        }
    }

    fn unspecified(self) -> IpAddr {
        match self {
            Family::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => Family::Ipv4,
            SocketAddr::V6(_) => Family::Ipv6,
        }
    }
}

/// `SOL_SOCKET` options settable with `Socket::set_option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    ReuseAddress(bool),
    ReusePort(bool),
    KeepAlive(bool),
    Debug(bool),
    DontRoute(bool),
    Broadcast(bool),
    SendBufferSize(usize),
    ReceiveBufferSize(usize),
    SendLowWaterMark(usize),
    ReceiveLowWaterMark(usize),
    /// `None` blocks indefinitely. An expired timeout surfaces as `EAGAIN`.
    SendTimeout(Option<Duration>),
    ReceiveTimeout(Option<Duration>),
    #[cfg(target_vendor = "apple")]
    NoSignalPipe(bool),
}

pub struct Socket {
    descriptor: Descriptor,
    family: Family,
    tls: Option<Box<dyn TlsEngine>>,
    closed: bool,
}

impl Socket {
    pub fn new(family: Family) -> Result<Self> {
        let descriptor = os::socket(family.raw(), libc::SOCK_STREAM, 0)?;
        let socket = Self::from_descriptor(descriptor, family);
        #[cfg(target_vendor = "apple")]
        socket.set_option(SocketOption::NoSignalPipe(true))?;
        Ok(socket)
    }

    /// Take ownership of an open stream descriptor.
    pub fn from_descriptor(descriptor: Descriptor, family: Family) -> Self {
        Self {
            descriptor,
            family,
            tls: None,
            closed: false,
        }
    }

    /// IPv4 listener with `SO_REUSEADDR`, bound and listening.
    pub fn tcp_listening(port: u16, address: Option<&str>, backlog: i32) -> Result<Self> {
        let mut socket = Self::new(Family::Ipv4)?;
        socket.set_option(SocketOption::ReuseAddress(true))?;
        socket.bind(port, address)?;
        socket.listen(backlog)?;
        Ok(socket)
    }

    /// Resolve `host` and connect to the first address that accepts.
    pub fn connect_host(host: &str, port: u16) -> Result<Self> {
        let mut last_error = None;
        for addr in os::resolve(host, port)? {
            let attempt = Self::new(Family::of(&addr)).and_then(|mut socket| {
                socket.connect_addr(addr)?;
                Ok(socket)
            });
            match attempt {
                Ok(socket) => return Ok(socket),
                Err(e) => {
                    debug!(%addr, "connect failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| SocketError::Resolution {
            host: host.to_string(),
        }))
    }

    pub fn descriptor(&self) -> Descriptor {
        self.descriptor
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Locally bound port.
    pub fn port(&self) -> Result<u16> {
        Ok(self.local_addr()?.port())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        os::local_addr(self.descriptor)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        os::peer_addr(self.descriptor)
    }

    pub fn set_option(&self, option: SocketOption) -> Result<()> {
        let fd = self.descriptor;
        let level = libc::SOL_SOCKET;
        match option {
            SocketOption::ReuseAddress(on) => os::set_option(fd, level, libc::SO_REUSEADDR, &flag(on)),
            SocketOption::ReusePort(on) => os::set_option(fd, level, libc::SO_REUSEPORT, &flag(on)),
            SocketOption::KeepAlive(on) => os::set_option(fd, level, libc::SO_KEEPALIVE, &flag(on)),
            SocketOption::Debug(on) => os::set_option(fd, level, libc::SO_DEBUG, &flag(on)),
            SocketOption::DontRoute(on) => os::set_option(fd, level, libc::SO_DONTROUTE, &flag(on)),
            SocketOption::Broadcast(on) => os::set_option(fd, level, libc::SO_BROADCAST, &flag(on)),
            SocketOption::SendBufferSize(size) => os::set_option(fd, level, libc::SO_SNDBUF, &size_value(size)),
            SocketOption::ReceiveBufferSize(size) => os::set_option(fd, level, libc::SO_RCVBUF, &size_value(size)),
            SocketOption::SendLowWaterMark(size) => os::set_option(fd, level, libc::SO_SNDLOWAT, &size_value(size)),
            SocketOption::ReceiveLowWaterMark(size) => os::set_option(fd, level, libc::SO_RCVLOWAT, &size_value(size)),
            SocketOption::SendTimeout(timeout) => os::set_option(fd, level, libc::SO_SNDTIMEO, &os::timeval(timeout)),
            SocketOption::ReceiveTimeout(timeout) => os::set_option(fd, level, libc::SO_RCVTIMEO, &os::timeval(timeout)),
            #[cfg(target_vendor = "apple")]
            SocketOption::NoSignalPipe(on) => os::set_option(fd, level, libc::SO_NOSIGPIPE, &flag(on)),
        }
    }

    /// Clear and return the pending `SO_ERROR`, if any.
    pub fn take_error(&self) -> Result<Option<SocketError>> {
        let code: libc::c_int = os::get_option(self.descriptor, libc::SOL_SOCKET, libc::SO_ERROR)?;
        Ok((code != 0).then(|| SocketError::from_errno(code)))
    }

    /// Bind to `port` on `address`, or on the unspecified address when `None`.
    pub fn bind(&mut self, port: u16, address: Option<&str>) -> Result<()> {
        let addr = self.socket_addr(port, address)?;
        os::bind(self.descriptor, &addr)?;
        debug!(descriptor = %self.descriptor, %addr, "bound");
        Ok(())
    }

    pub fn connect(&mut self, port: u16, address: Option<&str>) -> Result<()> {
        let addr = self.socket_addr(port, address)?;
        self.connect_addr(addr)
    }

    pub fn connect_addr(&mut self, addr: SocketAddr) -> Result<()> {
        os::connect(self.descriptor, &addr)?;
        debug!(descriptor = %self.descriptor, %addr, "connected");
        Ok(())
    }

    pub fn listen(&mut self, backlog: i32) -> Result<()> {
        os::listen(self.descriptor, backlog)
    }

    /// Block until a client connects. The accepted socket is plaintext.
    pub fn accept(&mut self) -> Result<Socket> {
        let client = os::accept(self.descriptor)?;
        debug!(listener = %self.descriptor, descriptor = %client, "accepted");
        Ok(Socket::from_descriptor(client, self.family))
    }

    /// Upgrade to TLS. On handshake failure the engine is torn down and
    /// the socket remains usable as plaintext.
    ///
    /// # Panics
    /// If `tls::initialize()` has not been called.
    pub fn start_tls(&mut self, config: &Configuration) -> Result<()> {
        if self.tls.is_some() {
            return Err(SocketError::TlsAlreadyActive);
        }

        let mut engine = tls::construct(self.descriptor, config)?;
        if let Err(e) = engine.handshake() {
            warn!(descriptor = %self.descriptor, "TLS handshake failed: {}", e);
            if let Err(close_error) = engine.close() {
                debug!(descriptor = %self.descriptor, "closing failed engine: {}", close_error);
            }
            return Err(e);
        }

        self.tls = Some(engine);
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read(&mut byte)?;
        Ok(byte[0])
    }

    /// Read up to `buf.len()` bytes, at least one unless `buf` is empty, in
    /// which case this returns `Ok(0)` without touching the socket. End of
    /// stream is `SocketError::ClosedGraceful`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.tls.as_mut() {
            Some(engine) => engine.read(buf),
            None => plain::recv(self.descriptor, buf),
        }
    }

    /// Read up to `\n`, dropping any `\r`. A final unterminated line is
    /// returned as-is.
    pub fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        loop {
            match self.read_byte() {
                Ok(b'\n') => break,
                Ok(b'\r') => {}
                Ok(byte) => line.push(byte),
                Err(SocketError::ClosedGraceful) if !line.is_empty() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Write all of `buf`.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        plain::write_fully(buf, |chunk| self.write_once(chunk))?;
        Ok(())
    }

    fn write_once(&mut self, buf: &[u8]) -> Result<usize> {
        match self.tls.as_mut() {
            Some(engine) => engine.write(buf),
            None => plain::send(self.descriptor, buf),
        }
    }

    /// Wait for descriptor readiness. Plaintext already decrypted by the TLS
    /// engine is not visible to `poll`.
    pub fn wait(&self, interest: Interest, timeout: Option<Duration>, retry_on_interrupt: bool) -> Result<bool> {
        readiness::wait(self.descriptor, interest, timeout, retry_on_interrupt)
    }

    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(mut engine) = self.tls.take() {
            if let Err(e) = engine.close() {
                warn!(descriptor = %self.descriptor, "TLS close failed: {}", e);
            }
        }
        os::close(self.descriptor)
    }

    fn socket_addr(&self, port: u16, address: Option<&str>) -> Result<SocketAddr> {
        let ip = match address {
            None => self.family.unspecified(),
            Some(text) => text.parse::<IpAddr>().map_err(|_| SocketError::InvalidAddress {
                address: text.to_string(),
            })?,
        };
        let addr = SocketAddr::new(ip, port);
        if Family::of(&addr) != self.family {
            return Err(SocketError::InvalidAddress {
                address: addr.to_string(),
            });
        }
        Ok(addr)
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(descriptor = %self.descriptor, "close failed: {}", e);
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("descriptor", &self.descriptor)
            .field("family", &self.family)
            .field("tls", &self.is_tls())
            .finish()
    }
}

fn flag(on: bool) -> libc::c_int {
    on as libc::c_int
}

fn size_value(size: usize) -> libc::c_int {
    size.min(libc::c_int::MAX as usize) as libc::c_int
}
