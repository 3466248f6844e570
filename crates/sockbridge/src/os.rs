//!
//! Raw OS Socket Calls
//!
//! Thin wrappers over the libc socket API. Every wrapper converts the `-1`
//! sentinel into `SocketError::Os` carrying the errno at the point of
//! failure; nothing here retries.
//!
//! ## Address Marshalling
//!
//! `std::net::SocketAddr` is converted to and from `sockaddr_storage` so the
//! rest of the crate never touches C address layouts.
//!

use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};
use std::os::fd::RawFd;
use std::ptr;
use std::time::Duration;

use crate::descriptor::Descriptor;
use crate::errors::{Result, SocketError};

/// Flags passed to every `send(2)`. Suppresses SIGPIPE where the platform
/// supports it per call; Apple targets use `SO_NOSIGPIPE` instead.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub(crate) const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub(crate) const SEND_FLAGS: libc::c_int = 0;

pub(crate) fn errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn cvt(result: libc::c_int) -> Result<libc::c_int> {
    if result == -1 {
        Err(SocketError::last_os_error())
    } else {
        Ok(result)
    }
}

pub(crate) fn socket(family: libc::c_int, kind: libc::c_int, protocol: libc::c_int) -> Result<Descriptor> {
    let fd = cvt(unsafe { libc::socket(family, kind, protocol) })?;
    Ok(Descriptor::from_raw(fd))
}

pub(crate) fn bind(fd: Descriptor, addr: &SocketAddr) -> Result<()> {
    let (storage, len) = to_raw(addr);
    cvt(unsafe {
        libc::bind(
            fd.as_raw(),
            &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
            len,
        )
    })?;
    Ok(())
}

pub(crate) fn connect(fd: Descriptor, addr: &SocketAddr) -> Result<()> {
    let (storage, len) = to_raw(addr);
    cvt(unsafe {
        libc::connect(
            fd.as_raw(),
            &storage as *const libc::sockaddr_storage as *const libc::sockaddr,
            len,
        )
    })?;
    Ok(())
}

pub(crate) fn listen(fd: Descriptor, backlog: i32) -> Result<()> {
    cvt(unsafe { libc::listen(fd.as_raw(), backlog) })?;
    Ok(())
}

pub(crate) fn accept(fd: Descriptor) -> Result<Descriptor> {
    let client = cvt(unsafe { libc::accept(fd.as_raw(), ptr::null_mut(), ptr::null_mut()) })?;
    Ok(Descriptor::from_raw(client))
}

pub(crate) fn close(fd: Descriptor) -> Result<()> {
    // The descriptor is released even when close reports an error; it must
    // not be closed again.
    cvt(unsafe { libc::close(fd.as_raw()) })?;
    Ok(())
}

pub(crate) fn local_addr(fd: Descriptor) -> Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    cvt(unsafe {
        libc::getsockname(
            fd.as_raw(),
            &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut len,
        )
    })?;
    from_raw(&storage)
}

pub(crate) fn peer_addr(fd: Descriptor) -> Result<SocketAddr> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    cvt(unsafe {
        libc::getpeername(
            fd.as_raw(),
            &mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut len,
        )
    })?;
    from_raw(&storage)
}

/// Single raw `recv(2)`. Returns the OS result unchanged.
///
/// # Safety
/// `data` must be valid for writes of `len` bytes.
pub(crate) unsafe fn recv_raw(fd: RawFd, data: *mut u8, len: usize) -> isize {
    unsafe { libc::recv(fd, data as *mut libc::c_void, len, 0) }
}

/// Single raw `send(2)`. Returns the OS result unchanged.
///
/// # Safety
/// `data` must be valid for reads of `len` bytes.
pub(crate) unsafe fn send_raw(fd: RawFd, data: *const u8, len: usize) -> isize {
    unsafe { libc::send(fd, data as *const libc::c_void, len, SEND_FLAGS) }
}

pub(crate) fn set_option<T>(fd: Descriptor, level: libc::c_int, name: libc::c_int, value: &T) -> Result<()> {
    cvt(unsafe {
        libc::setsockopt(
            fd.as_raw(),
            level,
            name,
            value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    })?;
    Ok(())
}

pub(crate) fn get_option<T: Copy>(fd: Descriptor, level: libc::c_int, name: libc::c_int) -> Result<T> {
    let mut value: T = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<T>() as libc::socklen_t;
    cvt(unsafe {
        libc::getsockopt(
            fd.as_raw(),
            level,
            name,
            &mut value as *mut T as *mut libc::c_void,
            &mut len,
        )
    })?;
    Ok(value)
}

/// `None` (or a zero duration) disables the timeout.
pub(crate) fn timeval(timeout: Option<Duration>) -> libc::timeval {
    let timeout = timeout.unwrap_or(Duration::ZERO);
    libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    }
}

/// Resolve `host` through the platform resolver (`getaddrinfo`).
pub(crate) fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|_| SocketError::Resolution {
            host: host.to_string(),
        })?
        .collect();
    if addrs.is_empty() {
        return Err(SocketError::Resolution {
            host: host.to_string(),
        });
    }
    Ok(addrs)
}

fn to_raw(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            let sin = unsafe { &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in) };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            ))]
            {
                sin.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
            }
            mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            let sin6 = unsafe { &mut *(&mut storage as *mut libc::sockaddr_storage as *mut libc::sockaddr_in6) };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            sin6.sin6_scope_id = v6.scope_id();
            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly"
            ))]
            {
                sin6.sin6_len = mem::size_of::<libc::sockaddr_in6>() as u8;
            }
            mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}

fn from_raw(storage: &libc::sockaddr_storage) -> Result<SocketAddr> {
    match storage.ss_family as libc::c_int {
        libc::AF_INET => {
            let sin = unsafe { &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            Ok(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
        }
        libc::AF_INET6 => {
            let sin6 = unsafe { &*(storage as *const libc::sockaddr_storage as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            Ok(SocketAddr::V6(SocketAddrV6::new(
                ip,
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            )))
        }
        _ => Err(SocketError::from_errno(libc::EAFNOSUPPORT)),
    }
}

/// Connected Unix-domain stream pair for tests that need both ends of a socket.
#[cfg(test)]
pub(crate) fn socket_pair() -> (Descriptor, Descriptor) {
    let mut fds = [0 as libc::c_int; 2];
    let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "socketpair failed: {}", io::Error::last_os_error());
    (Descriptor::from_raw(fds[0]), Descriptor::from_raw(fds[1]))
}

#[cfg(test)]
pub(crate) fn set_nonblocking(fd: Descriptor) {
    unsafe {
        let flags = libc::fcntl(fd.as_raw(), libc::F_GETFL);
        assert!(flags >= 0);
        assert_eq!(libc::fcntl(fd.as_raw(), libc::F_SETFL, flags | libc::O_NONBLOCK), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv6Addr};

    #[test]
    fn test_address_marshalling_v4() {
        let addr: SocketAddr = "192.168.10.20:8090".parse().unwrap();
        let (storage, len) = to_raw(&addr);
        assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in>());
        assert_eq!(from_raw(&storage).unwrap(), addr);
    }

    #[test]
    fn test_address_marshalling_v6() {
        let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 443);
        let (storage, len) = to_raw(&addr);
        assert_eq!(len as usize, mem::size_of::<libc::sockaddr_in6>());
        assert_eq!(from_raw(&storage).unwrap(), addr);
    }

    #[test]
    fn test_resolve_localhost() {
        let addrs = resolve("localhost", 80).unwrap();
        assert!(addrs.iter().all(|a| a.port() == 80));
        assert!(addrs.iter().any(|a| a.ip().is_loopback()));
    }

    #[test]
    fn test_resolve_failure() {
        let err = resolve("no-such-host.invalid", 80).unwrap_err();
        assert!(matches!(err, SocketError::Resolution { ref host } if host == "no-such-host.invalid"));
    }

    #[test]
    fn test_close_invalid_descriptor() {
        let err = close(Descriptor::from_raw(-1)).unwrap_err();
        assert_eq!(err.code(), Some(libc::EBADF));
    }

    #[test]
    fn test_timeval_conversion() {
        let tv = timeval(Some(Duration::from_millis(1_250)));
        assert_eq!(tv.tv_sec, 1);
        assert_eq!(tv.tv_usec, 250_000);

        let tv = timeval(None);
        assert_eq!(tv.tv_sec, 0);
        assert_eq!(tv.tv_usec, 0);
    }
}
