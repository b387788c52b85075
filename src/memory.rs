use std::ops::Deref;
use std::{io, ptr, slice};

use crate::v4l2;

/// Memory used for buffer exchange
///
/// Only driver allocated, memory-mapped buffers are supported.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Memory {
    Mmap = 1,
}

/// Memory-mapped region of a device buffer
///
/// The backing memory belongs to the driver, it is mapped read-only into the process.
/// The destructor unmaps it.
#[derive(Debug)]
pub struct Mmap {
    ptr: *mut u8,
    len: usize,
}

// The mapping is read-only and the pointer is never handed out mutably.
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

impl Mmap {
    /// Maps `len` bytes at `offset` of the device behind `fd`
    pub fn new(fd: std::os::raw::c_int, offset: u32, len: usize) -> io::Result<Self> {
        let ptr = unsafe {
            v4l2::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                fd,
                offset as libc::off_t,
            )?
        };

        Ok(Mmap {
            ptr: ptr as *mut u8,
            len,
        })
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            // nothing sensible to do about a failed unmap
            let _ = v4l2::munmap(self.ptr as *mut std::os::raw::c_void, self.len);
        }
    }
}

impl Deref for Mmap {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }
}

/// Backing storage of a frame buffer
#[derive(Debug)]
pub enum Backing {
    /// Driver memory mapped into the process
    Mapped(Mmap),
    /// Plain heap memory
    Host(Vec<u8>),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match self {
            Backing::Mapped(map) => map,
            Backing::Host(vec) => vec,
        }
    }
}
