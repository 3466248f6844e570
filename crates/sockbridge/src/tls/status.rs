//!
//! Engine Status Codes
//!
//! The callback-model engine speaks in `EngineStatus` values, never in raw
//! OS results. `read_status` and `write_status` are the translation tables
//! used by the bridge functions: they take the raw `recv`/`send` return value
//! and errno and produce the status plus the length to report back.
//!
//! ## Mapping
//!
//! | raw result      | write bridge     | read bridge      |
//! |-----------------|------------------|------------------|
//! | `n == wanted`   | `Success`        | `Success`        |
//! | `0 < n < wanted`| `WouldBlock`     | `WouldBlock`     |
//! | `0`             | `ClosedGraceful` | `ClosedGraceful` |
//! | `-1, EAGAIN`    | `WouldBlock`     | `WouldBlock`     |
//! | `-1, ENOENT`    | `IoError`        | `ClosedGraceful` |
//! | `-1, ECONNRESET`| `IoError`        | `ClosedAbort`    |
//! | `-1, other`     | `IoError`        | `IoError`        |
//!
//! Negative results always report a length of zero.
//!

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineStatus {
    Success,
    /// Not finished yet; call again. May carry partial progress.
    WouldBlock,
    ClosedGraceful,
    ClosedAbort,
    IoError,
    /// Peer certificate received while break-on-server-auth is set.
    PeerAuthCompleted,
    /// TLS protocol violation or alert.
    Protocol,
}

impl EngineStatus {
    /// Numeric status, using the Secure Transport `OSStatus` values.
    pub const fn code(self) -> i32 {
        match self {
            EngineStatus::Success => 0,
            EngineStatus::WouldBlock => -9803,
            EngineStatus::ClosedGraceful => -9805,
            EngineStatus::ClosedAbort => -9806,
            EngineStatus::IoError => -36,
            EngineStatus::PeerAuthCompleted => -9841,
            EngineStatus::Protocol => -9800,
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, EngineStatus::Success)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EngineStatus::Success => "success",
            EngineStatus::WouldBlock => "would block",
            EngineStatus::ClosedGraceful => "connection closed gracefully",
            EngineStatus::ClosedAbort => "connection closed abruptly",
            EngineStatus::IoError => "I/O error",
            EngineStatus::PeerAuthCompleted => "peer authentication completed",
            EngineStatus::Protocol => "protocol error",
        };
        f.write_str(text)
    }
}

fn is_try_again(errno: i32) -> bool {
    errno == libc::EAGAIN || errno == libc::EWOULDBLOCK
}

fn positive_status(result: isize, requested: usize) -> (EngineStatus, usize) {
    let transferred = result as usize;
    if transferred < requested {
        (EngineStatus::WouldBlock, transferred)
    } else {
        (EngineStatus::Success, transferred)
    }
}

/// Translate a raw `send` result into the write bridge's status and length.
pub fn write_status(result: isize, requested: usize, errno: i32) -> (EngineStatus, usize) {
    match result {
        n if n > 0 => positive_status(n, requested),
        0 => (EngineStatus::ClosedGraceful, 0),
        _ if is_try_again(errno) => (EngineStatus::WouldBlock, 0),
        _ => (EngineStatus::IoError, 0),
    }
}

/// Translate a raw `recv` result into the read bridge's status and length.
pub fn read_status(result: isize, requested: usize, errno: i32) -> (EngineStatus, usize) {
    match result {
        n if n > 0 => positive_status(n, requested),
        0 => (EngineStatus::ClosedGraceful, 0),
        _ if errno == libc::ENOENT => (EngineStatus::ClosedGraceful, 0),
        _ if is_try_again(errno) => (EngineStatus::WouldBlock, 0),
        _ if errno == libc::ECONNRESET => (EngineStatus::ClosedAbort, 0),
        _ => (EngineStatus::IoError, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_status_table() {
        assert_eq!(read_status(16, 16, 0), (EngineStatus::Success, 16));
        assert_eq!(read_status(5, 16, 0), (EngineStatus::WouldBlock, 5));
        assert_eq!(read_status(0, 16, 0), (EngineStatus::ClosedGraceful, 0));
        assert_eq!(read_status(-1, 16, libc::EAGAIN), (EngineStatus::WouldBlock, 0));
        assert_eq!(read_status(-1, 16, libc::ECONNRESET), (EngineStatus::ClosedAbort, 0));
        assert_eq!(read_status(-1, 16, libc::ENOENT), (EngineStatus::ClosedGraceful, 0));
        assert_eq!(read_status(-1, 16, libc::EBADF), (EngineStatus::IoError, 0));
    }

    #[test]
    fn test_write_status_table() {
        assert_eq!(write_status(16, 16, 0), (EngineStatus::Success, 16));
        assert_eq!(write_status(3, 16, 0), (EngineStatus::WouldBlock, 3));
        assert_eq!(write_status(0, 16, 0), (EngineStatus::ClosedGraceful, 0));
        assert_eq!(write_status(-1, 16, libc::EAGAIN), (EngineStatus::WouldBlock, 0));
        assert_eq!(write_status(-1, 16, libc::ECONNRESET), (EngineStatus::IoError, 0));
        assert_eq!(write_status(-1, 16, libc::EPIPE), (EngineStatus::IoError, 0));
    }

    #[test]
    fn test_mapping_ignores_errno_on_success() {
        // errno is stale after a successful call and must not leak into the status
        assert_eq!(read_status(8, 8, libc::ECONNRESET), (EngineStatus::Success, 8));
        assert_eq!(write_status(8, 8, libc::EPIPE), (EngineStatus::Success, 8));
        assert_eq!(read_status(0, 8, libc::EAGAIN), (EngineStatus::ClosedGraceful, 0));
    }

    #[test]
    fn test_status_codes_are_distinct() {
        let all = [
            EngineStatus::Success,
            EngineStatus::WouldBlock,
            EngineStatus::ClosedGraceful,
            EngineStatus::ClosedAbort,
            EngineStatus::IoError,
            EngineStatus::PeerAuthCompleted,
            EngineStatus::Protocol,
        ];
        let codes: std::collections::HashSet<i32> = all.iter().map(|s| s.code()).collect();
        assert_eq!(codes.len(), all.len());
        assert_eq!(EngineStatus::Success.code(), 0);
        assert!(EngineStatus::Success.is_success());
        assert!(!EngineStatus::WouldBlock.is_success());
    }
}
