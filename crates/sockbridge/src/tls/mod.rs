//!
//! TLS Engine Layer
//!
//! A socket that upgrades to TLS gets one boxed `TlsEngine`. Two integration
//! models implement it:
//!
//! - `direct` - the engine owns record I/O on the descriptor and the
//!   handshake is a single blocking call.
//! - `callback` - the engine is driven through the `bridge` read/write
//!   functions and reports `EngineStatus` codes; the adapter loops on
//!   `WouldBlock` until the handshake settles.
//!
//! ## Initialization
//!
//! `initialize()` installs the process-wide crypto provider. Call it once
//! at startup, before the first `start_tls`. Constructing an engine without
//! it is a programming error and panics.
//!

pub mod bridge;
mod callback;
pub(crate) mod config;
mod direct;
pub mod session;
pub mod status;

use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;
use tracing::debug;

use crate::certificate::Certificate;
use crate::descriptor::Descriptor;
use crate::errors::Result;

pub use callback::CallbackEngine;
pub use direct::DirectEngine;
pub use status::EngineStatus;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// One-time TLS library setup. Repeated calls are harmless.
pub fn initialize() {
    // Another component may already have installed a provider; either is fine
    let _ = rustls::crypto::ring::default_provider().install_default();
    INITIALIZED.store(true, Ordering::Release);
    debug!("TLS initialized");
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

pub(crate) fn ensure_initialized() {
    assert!(
        is_initialized(),
        "sockbridge::tls::initialize() must be called before using TLS"
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Which integration model backs a TLS upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Direct,
    Callback,
}

impl EngineKind {
    /// Callback on Apple targets, where the system engine works that way;
    /// direct everywhere else.
    pub const fn platform_default() -> Self {
        if cfg!(target_vendor = "apple") {
            EngineKind::Callback
        } else {
            EngineKind::Direct
        }
    }
}

impl Default for EngineKind {
    fn default() -> Self {
        Self::platform_default()
    }
}

/// Parameters for `Socket::start_tls`.
///
/// A configuration with a certificate acts as the server; without one it
/// acts as the client.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    /// Expected peer host name, used for SNI and verification.
    pub peer: Option<String>,
    pub certificate: Option<Certificate>,
    /// Skip peer certificate verification.
    pub allow_self_signed: bool,
    /// Extra PEM roots trusted in addition to the built-in set.
    pub trusted_roots: Vec<u8>,
    pub engine: EngineKind,
}

impl Configuration {
    pub fn client(peer: Option<&str>) -> Self {
        Self {
            peer: peer.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn server(certificate: Certificate) -> Self {
        Self {
            certificate: Some(certificate),
            ..Self::default()
        }
    }

    pub fn with_allow_self_signed(mut self, allow: bool) -> Self {
        self.allow_self_signed = allow;
        self
    }

    pub fn with_trusted_roots(mut self, pem: Vec<u8>) -> Self {
        self.trusted_roots = pem;
        self
    }

    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    pub fn role(&self) -> Role {
        if self.certificate.is_some() {
            Role::Server
        } else {
            Role::Client
        }
    }

    pub fn is_server(&self) -> bool {
        self.role() == Role::Server
    }
}

/// An established-or-establishing TLS session bound to one descriptor.
///
/// `read` returns at least one byte or an error; end of stream is
/// `SocketError::ClosedGraceful`. `write` may accept fewer bytes than given.
pub trait TlsEngine: Send {
    fn handshake(&mut self) -> Result<()>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Send close_notify and release engine resources. Does not close the
    /// descriptor.
    fn close(&mut self) -> Result<()>;
}

/// Build an engine for `descriptor`. The handshake has not started yet.
pub fn construct(descriptor: Descriptor, config: &Configuration) -> Result<Box<dyn TlsEngine>> {
    ensure_initialized();
    debug!(%descriptor, role = ?config.role(), engine = ?config.engine, "constructing TLS engine");

    Ok(match config.engine {
        EngineKind::Direct => Box::new(DirectEngine::new(descriptor, config)?),
        EngineKind::Callback => Box::new(CallbackEngine::new(descriptor, config)?),
    })
}
