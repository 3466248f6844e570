//!
//! Plaintext Transport
//!
//! Blocking `recv`/`send` directly on a descriptor, and the complete-write
//! loop shared by the plaintext and TLS paths.
//!
//! ## Zero-byte receive
//!
//! A `recv` returning 0 on a non-empty buffer is the peer's orderly
//! shutdown. It is reported as `SocketError::ClosedGraceful` so callers can
//! tell "stream ended" apart from `SocketError::Os`.
//!

use tracing::trace;

use crate::descriptor::Descriptor;
use crate::errors::{Result, SocketError};
use crate::os;

/// Single blocking receive of up to `buf.len()` bytes.
pub fn recv(descriptor: Descriptor, buf: &mut [u8]) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let received = unsafe { os::recv_raw(descriptor.as_raw(), buf.as_mut_ptr(), buf.len()) };
    match received {
        n if n > 0 => Ok(n as usize),
        0 => Err(SocketError::ClosedGraceful),
        _ => Err(SocketError::last_os_error()),
    }
}

/// Single blocking send of up to `buf.len()` bytes. May write fewer.
pub fn send(descriptor: Descriptor, buf: &[u8]) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let sent = unsafe { os::send_raw(descriptor.as_raw(), buf.as_ptr(), buf.len()) };
    match sent {
        n if n > 0 => Ok(n as usize),
        0 => Err(SocketError::WriteZero),
        _ => Err(SocketError::last_os_error()),
    }
}

/// Drive `write_once` until all of `buf` has been written.
///
/// Short writes are not errors: the remainder is handed back to
/// `write_once`. The first error ends the loop. A delegate that reports
/// zero bytes for a non-empty remainder fails with `WriteZero`.
pub fn write_fully<F>(buf: &[u8], mut write_once: F) -> Result<usize>
where
    F: FnMut(&[u8]) -> Result<usize>,
{
    let mut total = 0;
    while total < buf.len() {
        let written = write_once(&buf[total..])?;
        if written == 0 {
            return Err(SocketError::WriteZero);
        }
        total += written;
        if total < buf.len() {
            trace!(written, total, remaining = buf.len() - total, "short write");
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::{set_nonblocking, socket_pair};

    #[test]
    fn test_write_fully_accumulates_short_writes() {
        let data = vec![7u8; 100];
        let mut calls = Vec::new();
        let total = write_fully(&data, |chunk| {
            calls.push(chunk.len());
            Ok(chunk.len().min(30))
        })
        .unwrap();

        assert_eq!(total, 100);
        assert_eq!(calls, vec![100, 70, 40, 10]);
    }

    #[test]
    fn test_write_fully_stops_at_first_error() {
        let data = [0u8; 64];
        let mut calls = 0;
        let err = write_fully(&data, |_| {
            calls += 1;
            if calls == 1 {
                Ok(16)
            } else {
                Err(SocketError::from_errno(libc::EPIPE))
            }
        })
        .unwrap_err();

        assert_eq!(calls, 2);
        assert_eq!(err.code(), Some(libc::EPIPE));
    }

    #[test]
    fn test_write_fully_rejects_zero_progress() {
        let err = write_fully(b"abc", |_| Ok(0)).unwrap_err();
        assert!(matches!(err, SocketError::WriteZero));
    }

    #[test]
    fn test_write_fully_empty_buffer() {
        let total = write_fully(&[], |_| panic!("delegate must not be called")).unwrap();
        assert_eq!(total, 0);
    }

    #[test]
    fn test_send_and_recv() {
        let (a, b) = socket_pair();
        let sent = write_fully(b"Hello World", |chunk| send(a, chunk)).unwrap();
        assert_eq!(sent, 11);

        let mut buf = [0u8; 32];
        let n = recv(b, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"Hello World");

        os::close(a).unwrap();
        os::close(b).unwrap();
    }

    #[test]
    fn test_recv_after_peer_close() {
        let (a, b) = socket_pair();
        os::close(a).unwrap();

        let mut buf = [0u8; 8];
        let err = recv(b, &mut buf).unwrap_err();
        assert!(matches!(err, SocketError::ClosedGraceful));

        os::close(b).unwrap();
    }

    #[test]
    fn test_recv_would_block() {
        let (a, b) = socket_pair();
        set_nonblocking(b);

        let mut buf = [0u8; 8];
        let err = recv(b, &mut buf).unwrap_err();
        assert!(err.is_would_block());

        os::close(a).unwrap();
        os::close(b).unwrap();
    }
}
