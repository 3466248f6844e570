//!
//! Socket Descriptor
//!
//! A `Descriptor` is the bare integer the OS hands back from `socket(2)` or
//! `accept(2)`. It owns nothing: copying it does not duplicate the kernel
//! resource, and dropping it does not close it. `Socket` is the single owner
//! responsible for closing.
//!

use std::fmt;
use std::os::fd::{AsRawFd, RawFd};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(RawFd);

impl Descriptor {
    pub const fn from_raw(fd: RawFd) -> Self {
        Descriptor(fd)
    }

    pub const fn as_raw(self) -> RawFd {
        self.0
    }
}

impl AsRawFd for Descriptor {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd {}", self.0)
    }
}
