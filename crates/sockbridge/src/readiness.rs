//!
//! Readiness Waiting
//!
//! Blocks in `poll(2)` until a descriptor is readable and/or writable or the
//! timeout elapses. One poll call per attempt; a call interrupted by a signal
//! is repeated with the remaining time when `retry_on_interrupt` is set.
//!
//! ## Results
//!
//! - `Ok(true)` - the requested direction is ready, or the peer hung up
//! - `Ok(false)` - timed out
//! - `Err(SocketError::Os)` - poll failed, the descriptor is not open
//!   (`EBADF`) or the socket has a pending error (its `SO_ERROR`)
//!

use std::ops::BitOr;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::descriptor::Descriptor;
use crate::errors::{Result, SocketError};
use crate::os;

/// Direction mask for a readiness request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(libc::c_short);

impl Interest {
    pub const READ: Interest = Interest(libc::POLLIN);
    pub const WRITE: Interest = Interest(libc::POLLOUT);

    pub const fn bits(self) -> libc::c_short {
        self.0
    }

    pub const fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// Wait until `descriptor` is ready for `interest`.
///
/// `timeout` of `None` waits indefinitely. Sub-millisecond remainders are
/// rounded up so the call never returns before the timeout has elapsed.
pub fn wait(
    descriptor: Descriptor,
    interest: Interest,
    timeout: Option<Duration>,
    retry_on_interrupt: bool,
) -> Result<bool> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut pfd = libc::pollfd {
        fd: descriptor.as_raw(),
        events: interest.bits(),
        revents: 0,
    };

    let mut remaining = timeout;
    loop {
        let result = unsafe { libc::poll(&mut pfd, 1, poll_timeout(remaining)) };
        if result == 0 {
            return Ok(false);
        }
        if result > 0 {
            return ready(descriptor, pfd.events, pfd.revents);
        }

        let errno = os::errno();
        if errno != libc::EINTR || !retry_on_interrupt {
            return Err(SocketError::from_errno(errno));
        }
        trace!(fd = descriptor.as_raw(), "poll interrupted, retrying");
        remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
    }
}

fn ready(descriptor: Descriptor, events: libc::c_short, revents: libc::c_short) -> Result<bool> {
    if revents & libc::POLLNVAL != 0 {
        return Err(SocketError::from_errno(libc::EBADF));
    }
    if revents & libc::POLLERR != 0 {
        let code: libc::c_int = os::get_option(descriptor, libc::SOL_SOCKET, libc::SO_ERROR)?;
        return Err(SocketError::from_errno(if code != 0 { code } else { libc::EIO }));
    }
    Ok(revents & (events | libc::POLLHUP) != 0)
}

fn poll_timeout(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(t) => {
            let millis = t.as_nanos().div_ceil(1_000_000);
            millis.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::socket_pair;

    #[test]
    fn test_poll_timeout_rounding() {
        assert_eq!(poll_timeout(None), -1);
        assert_eq!(poll_timeout(Some(Duration::ZERO)), 0);
        assert_eq!(poll_timeout(Some(Duration::from_micros(1))), 1);
        assert_eq!(poll_timeout(Some(Duration::from_millis(50))), 50);
        assert_eq!(poll_timeout(Some(Duration::from_micros(50_500))), 51);
        assert_eq!(poll_timeout(Some(Duration::from_secs(u64::MAX))), libc::c_int::MAX);
    }

    #[test]
    fn test_interest_mask() {
        let both = Interest::READ | Interest::WRITE;
        assert!(both.contains(Interest::READ));
        assert!(both.contains(Interest::WRITE));
        assert!(!Interest::READ.contains(Interest::WRITE));
    }

    #[test]
    fn test_read_times_out_without_data() {
        let (a, b) = socket_pair();
        let started = Instant::now();
        let ready = wait(a, Interest::READ, Some(Duration::from_millis(50)), true).unwrap();
        let elapsed = started.elapsed();

        assert!(!ready);
        assert!(elapsed >= Duration::from_millis(50), "returned early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "overslept: {:?}", elapsed);

        os::close(a).unwrap();
        os::close(b).unwrap();
    }

    #[test]
    fn test_ready_when_data_pending() {
        let (a, b) = socket_pair();
        let sent = unsafe { os::send_raw(b.as_raw(), b"x".as_ptr(), 1) };
        assert_eq!(sent, 1);

        assert!(wait(a, Interest::READ, Some(Duration::from_secs(1)), true).unwrap());
        assert!(wait(a, Interest::WRITE, Some(Duration::ZERO), false).unwrap());

        os::close(a).unwrap();
        os::close(b).unwrap();
    }

    #[test]
    fn test_closed_descriptor_is_an_error() {
        // Freed numbers are handed out again to parallel tests, so use one
        // above any descriptor limit
        let closed = Descriptor::from_raw(libc::c_int::MAX);
        let err = wait(closed, Interest::READ, Some(Duration::from_millis(50)), true).unwrap_err();
        assert_eq!(err.code(), Some(libc::EBADF));

        let err = wait(closed, Interest::WRITE, None, false).unwrap_err();
        assert_eq!(err.code(), Some(libc::EBADF));
    }

    #[test]
    fn test_hangup_counts_as_ready() {
        let (a, b) = socket_pair();
        os::close(b).unwrap();

        assert!(wait(a, Interest::READ, Some(Duration::from_secs(1)), true).unwrap());
        os::close(a).unwrap();
    }

    #[test]
    fn test_reset_connection_reports_socket_error() {
        use crate::socket::{Family, Socket};

        let mut listener = Socket::tcp_listening(0, Some("127.0.0.1"), 1).unwrap();
        let port = listener.port().unwrap();
        let mut client = Socket::new(Family::Ipv4).unwrap();
        client.connect(port, Some("127.0.0.1")).unwrap();

        // A zero linger turns close into a reset
        let server = listener.accept().unwrap();
        let linger = libc::linger {
            l_onoff: 1,
            l_linger: 0,
        };
        os::set_option(server.descriptor(), libc::SOL_SOCKET, libc::SO_LINGER, &linger).unwrap();
        server.close().unwrap();

        let err = wait(client.descriptor(), Interest::READ, Some(Duration::from_secs(2)), true).unwrap_err();
        assert_eq!(err.code(), Some(libc::ECONNRESET));
    }

    #[test]
    fn test_negative_descriptor_is_not_ready() {
        // poll ignores entries with a negative fd
        let ready = wait(Descriptor::from_raw(-1), Interest::READ, Some(Duration::ZERO), true).unwrap();
        assert!(!ready);
    }
}
