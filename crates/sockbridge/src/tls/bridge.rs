//!
//! I/O Bridge Functions
//!
//! The callback-model engine does not know what a descriptor is. It is given
//! an opaque connection token plus these two functions, and calls them
//! whenever it needs TLS records moved. The token is the address of a heap
//! cell holding the descriptor's integer value.
//!
//! Each bridge performs exactly one raw `recv`/`send` and reports the result
//! through `status::read_status` / `status::write_status`.
//!

use std::ffi::c_void;
use std::os::fd::RawFd;

use super::status::{EngineStatus, read_status, write_status};
use crate::os;

/// Opaque connection token handed to the engine.
pub type ConnectionRef = *const c_void;

/// Read bridge: fill up to `*data_length` bytes at `data`, then store the
/// number of bytes actually read back into `*data_length`.
pub type ReadFunc =
    unsafe fn(connection: ConnectionRef, data: *mut u8, data_length: *mut usize) -> EngineStatus;

/// Write bridge: send up to `*data_length` bytes from `data`, then store the
/// number of bytes actually written back into `*data_length`.
pub type WriteFunc =
    unsafe fn(connection: ConnectionRef, data: *const u8, data_length: *mut usize) -> EngineStatus;

/// # Safety
/// `connection` must point to a live `RawFd` cell, `data` must be valid for
/// writes of `*data_length` bytes and `data_length` must be valid.
pub unsafe fn bridge_read(connection: ConnectionRef, data: *mut u8, data_length: *mut usize) -> EngineStatus {
    let fd = unsafe { *(connection as *const RawFd) };
    let requested = unsafe { *data_length };
    let received = unsafe { os::recv_raw(fd, data, requested) };
    let errno = if received < 0 { os::errno() } else { 0 };

    let (status, length) = read_status(received, requested, errno);
    unsafe { *data_length = length };
    status
}

/// # Safety
/// `connection` must point to a live `RawFd` cell, `data` must be valid for
/// reads of `*data_length` bytes and `data_length` must be valid.
pub unsafe fn bridge_write(connection: ConnectionRef, data: *const u8, data_length: *mut usize) -> EngineStatus {
    let fd = unsafe { *(connection as *const RawFd) };
    let requested = unsafe { *data_length };
    let written = unsafe { os::send_raw(fd, data, requested) };
    let errno = if written < 0 { os::errno() } else { 0 };

    let (status, length) = write_status(written, requested, errno);
    unsafe { *data_length = length };
    status
}
