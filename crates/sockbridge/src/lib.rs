//!
//! sockbridge - Blocking Stream Sockets with Transparent TLS
//!
//! One read/write/accept/connect API over raw socket descriptors. A socket
//! starts out plaintext and can be upgraded to TLS once; after the upgrade
//! every read and write is routed through the TLS engine.
//!
//! ## Module Structure
//!
//! - `descriptor` - Plain integer handle to an OS stream socket
//! - `readiness` - `poll(2)` based readiness waiting with timeout
//! - `plain` - Blocking `recv`/`send` and the complete-write loop
//! - `tls` - TLS engine trait and its two integration models
//! - `socket` - The connection type tying everything together
//! - `certificate` - PEM certificate/key import
//! - `settings` - TOML settings for socket options and TLS material
//!
//! ## Socket API
//!
//! - `Socket::new(family) -> Socket`
//! - `Socket::tcp_listening(port, address, backlog) -> Socket`
//! - `bind(port, address)`, `connect(port, address)`, `listen(backlog)`
//! - `accept() -> Socket`
//! - `read_byte() -> u8`, `read(buf) -> usize`, `read_line() -> String`
//! - `write(buf)` - returns only after every byte has been written
//! - `wait(interest, timeout, retry_on_interrupt) -> bool`
//! - `start_tls(config)` - upgrade to TLS, at most once
//! - `port() -> u16`
//! - `close()`
//!
//! ## TLS Integration Models
//!
//! - `EngineKind::Direct` - the engine performs raw I/O on the descriptor
//!   itself and handshakes in a single blocking call.
//! - `EngineKind::Callback` - the engine never touches the descriptor; it
//!   calls read/write bridge functions that translate raw OS results into
//!   `EngineStatus` codes.
//!
//! `tls::initialize()` must be called once before the first TLS upgrade.
//!
//! ## Errors
//!
//! Every fallible call returns `Result<T, SocketError>`. OS failures carry
//! the errno and its `strerror` text; graceful and abrupt peer closes have
//! their own variants.
//!
//! ## Platform Support
//!
//! Unix only (Linux, macOS, BSD). Descriptors are raw `RawFd` values.
//!

pub mod certificate;
pub mod descriptor;
mod errors;
mod os;
pub mod plain;
pub mod readiness;
pub mod settings;
pub mod socket;
pub mod tls;

pub use certificate::Certificate;
pub use descriptor::Descriptor;
pub use errors::*;
pub use readiness::Interest;
pub use settings::Settings;
pub use socket::{Family, Socket, SocketOption};
pub use tls::{Configuration, EngineKind, EngineStatus, Role, TlsEngine};
