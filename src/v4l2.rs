//! Thin wrappers around the raw video4linux syscalls.
//!
//! Every wrapper maps a `-1` return value to the last OS error (errno on Linux).

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::{io, path::Path};

pub mod vidioc;

/// Opens a device node and returns its file descriptor.
///
/// # Arguments
///
/// * `path` - Path to the device node
/// * `flags` - Open flags
///
/// # Example
///
/// ```
/// use vcam::v4l2;
///
/// if let Ok(fd) = v4l2::open("/dev/video0", libc::O_RDWR) {
///     v4l2::close(fd).unwrap();
/// }
/// ```
pub fn open<P: AsRef<Path>>(path: P, flags: i32) -> io::Result<std::os::raw::c_int> {
    let c_path = CString::new(path.as_ref().as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let fd = unsafe { libc::open(c_path.as_ptr(), flags) };
    if fd == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(fd)
    }
}

/// Closes a file descriptor obtained through [`open`].
pub fn close(fd: std::os::raw::c_int) -> io::Result<()> {
    let ret = unsafe { libc::close(fd) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Issues an ioctl on a device.
///
/// # Arguments
///
/// * `fd` - File descriptor
/// * `request` - IO control code (see [`vidioc`])
/// * `argp` - Pointer to memory region holding the argument type
///
/// # Safety
///
/// `argp` must point to a live value of the type `request` expects.
pub unsafe fn ioctl(
    fd: std::os::raw::c_int,
    request: vidioc::_IOC_TYPE,
    argp: *mut std::os::raw::c_void,
) -> io::Result<()> {
    /*
     * libc declares ioctl() with different argument types depending on the
     * platform. syscall() sidesteps that without conditional compilation.
     */
    let ret = libc::syscall(libc::SYS_ioctl, fd, request, argp) as std::os::raw::c_int;
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Maps device memory into the address space of the process.
///
/// # Safety
///
/// `start` is handed to the kernel unchecked; the returned region is only valid as long as
/// the mapping lives.
pub unsafe fn mmap(
    start: *mut std::os::raw::c_void,
    length: usize,
    prot: std::os::raw::c_int,
    flags: std::os::raw::c_int,
    fd: std::os::raw::c_int,
    offset: libc::off_t,
) -> io::Result<*mut std::os::raw::c_void> {
    let ret = libc::mmap(start, length, prot, flags, fd, offset);
    if ret == libc::MAP_FAILED {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Unmaps a region previously obtained through [`mmap`].
///
/// # Safety
///
/// No references into the region may outlive this call.
pub unsafe fn munmap(start: *mut std::os::raw::c_void, length: usize) -> io::Result<()> {
    if libc::munmap(start, length) == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Waits for `events` on a single file descriptor.
///
/// Returns the number of ready descriptors, so `0` means the timeout expired.
/// A negative `timeout` blocks indefinitely.
pub fn poll(
    fd: std::os::raw::c_int,
    events: std::os::raw::c_short,
    timeout: std::os::raw::c_int,
) -> io::Result<usize> {
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    match unsafe { libc::poll(&mut pollfd, 1, timeout) } {
        -1 => Err(io::Error::last_os_error()),
        ret => Ok(ret as usize),
    }
}
