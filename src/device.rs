use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::{io, mem};

use log::debug;
use v4l2_sys::{
    v4l2_capability, v4l2_fmtdesc, v4l2_format, v4l2_format__bindgen_ty_1, v4l2_frmsizeenum,
};

use crate::buffer::Type;
use crate::capability::Capabilities;
use crate::format::{Description, Format, FrameSize};
use crate::v4l2;
use crate::FourCC;

/// Asks the driver what it would make of a format without applying it
pub trait Negotiate {
    /// Returns the closest format the driver supports
    fn try_format(&self, fmt: &Format) -> io::Result<Format>;
}

/// Owned file descriptor of an opened video4linux node
///
/// The descriptor is closed when the handle is dropped.
#[derive(Debug)]
pub struct Handle {
    fd: std::os::raw::c_int,
    path: PathBuf,
    /// buffers granted by the last REQBUFS
    buffers: AtomicU32,
}

impl Handle {
    /// Opens a device node for streaming
    ///
    /// The node is opened non-blocking, so dequeueing is driven by [`Handle::poll`].
    ///
    /// # Example
    ///
    /// ```
    /// use vcam::device::Handle;
    ///
    /// if let Ok(handle) = Handle::open("/dev/video0") {
    ///     println!("{}", handle.query_caps().unwrap());
    /// }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let fd = v4l2::open(path, libc::O_RDWR | libc::O_NONBLOCK)?;
        debug!("opened {} as fd {}", path.display(), fd);

        Ok(Handle {
            fd,
            path: path.to_path_buf(),
            buffers: AtomicU32::new(0),
        })
    }

    /// Returns the raw file descriptor
    pub fn fd(&self) -> std::os::raw::c_int {
        self.fd
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of driver buffers currently allocated on this node
    pub fn buffer_count(&self) -> u32 {
        self.buffers.load(Ordering::Acquire)
    }

    pub(crate) fn set_buffer_count(&self, count: u32) {
        self.buffers.store(count, Ordering::Release);
    }

    /// Waits until the device is ready for `events`
    ///
    /// Returns the number of ready descriptors, `0` on timeout.
    pub fn poll(&self, events: std::os::raw::c_short, timeout: i32) -> io::Result<usize> {
        v4l2::poll(self.fd, events, timeout)
    }

    /// Query for device capabilities
    pub fn query_caps(&self) -> io::Result<Capabilities> {
        unsafe {
            let mut v4l2_caps: v4l2_capability = mem::zeroed();
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_QUERYCAP,
                &mut v4l2_caps as *mut _ as *mut std::os::raw::c_void,
            )?;

            Ok(Capabilities::from(v4l2_caps))
        }
    }

    /// Returns the capture format currently in use
    pub fn format(&self) -> io::Result<Format> {
        unsafe {
            let mut v4l2_fmt = v4l2_format {
                type_: Type::VideoCapture as u32,
                ..mem::zeroed()
            };
            v4l2::ioctl(
                self.fd,
                v4l2::vidioc::VIDIOC_G_FMT,
                &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
            )?;

            Ok(Format::from(v4l2_fmt.fmt.pix))
        }
    }

    /// Modifies the capture format and returns the one the driver settled on
    pub fn set_format(&self, fmt: &Format) -> io::Result<Format> {
        self.exchange_format(v4l2::vidioc::VIDIOC_S_FMT, fmt)?;
        self.format()
    }

    /// Returns a vector of all capture formats the device offers
    pub fn enum_formats(&self) -> io::Result<Vec<Description>> {
        let mut formats = Vec::new();
        let mut v4l2_fmt = v4l2_fmtdesc {
            index: 0,
            type_: Type::VideoCapture as u32,
            ..unsafe { mem::zeroed() }
        };

        loop {
            let ret = unsafe {
                v4l2::ioctl(
                    self.fd,
                    v4l2::vidioc::VIDIOC_ENUM_FMT,
                    &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
                )
            };

            match ret {
                Ok(()) => formats.push(Description::from(v4l2_fmt)),
                // EINVAL marks the end of the list
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => return Ok(formats),
                Err(e) => return Err(e),
            }

            v4l2_fmt.index += 1;
            v4l2_fmt.description = unsafe { mem::zeroed() };
        }
    }

    /// Returns the frame sizes the device supports for a pixel format
    pub fn enum_framesizes(&self, fourcc: FourCC) -> io::Result<Vec<FrameSize>> {
        let mut framesizes = Vec::new();
        let mut v4l2_struct = v4l2_frmsizeenum {
            index: 0,
            pixel_format: fourcc.into(),
            ..unsafe { mem::zeroed() }
        };

        loop {
            let ret = unsafe {
                v4l2::ioctl(
                    self.fd,
                    v4l2::vidioc::VIDIOC_ENUM_FRAMESIZES,
                    &mut v4l2_struct as *mut _ as *mut std::os::raw::c_void,
                )
            };

            if let Err(e) = ret {
                if v4l2_struct.index == 0 {
                    return Err(e);
                }
                return Ok(framesizes);
            }

            if let Ok(frame_size) = FrameSize::try_from(v4l2_struct) {
                framesizes.push(frame_size);
            }

            v4l2_struct.index += 1;
        }
    }

    fn exchange_format(
        &self,
        request: v4l2::vidioc::_IOC_TYPE,
        fmt: &Format,
    ) -> io::Result<Format> {
        unsafe {
            let mut v4l2_fmt = v4l2_format {
                type_: Type::VideoCapture as u32,
                fmt: v4l2_format__bindgen_ty_1 { pix: (*fmt).into() },
            };
            v4l2::ioctl(
                self.fd,
                request,
                &mut v4l2_fmt as *mut _ as *mut std::os::raw::c_void,
            )?;

            Ok(Format::from(v4l2_fmt.fmt.pix))
        }
    }
}

impl Negotiate for Handle {
    fn try_format(&self, fmt: &Format) -> io::Result<Format> {
        self.exchange_format(v4l2::vidioc::VIDIOC_TRY_FMT, fmt)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Err(e) = v4l2::close(self.fd) {
            debug!("failed to close {}: {}", self.path.display(), e);
        }
    }
}

/// Returns the numeric suffix of a device node such as `/dev/video2`
pub fn node_index(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    let digits = name.trim_start_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty() || !name.starts_with("video") {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_index_from_path() {
        assert_eq!(node_index(Path::new("/dev/video0")), Some(0));
        assert_eq!(node_index(Path::new("/dev/video12")), Some(12));
        assert_eq!(node_index(Path::new("/dev/video")), None);
        assert_eq!(node_index(Path::new("/dev/vbi0")), None);
    }

    #[test]
    fn open_missing_node_fails() {
        let err = Handle::open("/dev/does-not-exist-video").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
