use std::collections::HashMap;
use std::sync::Arc;
use std::{io, mem};

use log::{debug, warn};
use v4l2_sys::{v4l2_buffer, v4l2_requestbuffers};

use crate::buffer::{FrameBuffer, Type};
use crate::camera::Camera;
use crate::config::{Stream, StreamConfiguration};
use crate::device::Handle;
use crate::error::{Error, Result};
use crate::memory::{Backing, Memory, Mmap};
use crate::v4l2;

/// Allocates driver buffers for the streams of a configured camera
///
/// Buffers are memory-mapped read-only. Releasing them requires every [`FrameBuffer`] handed
/// out (usually attached to requests) to be dropped first.
pub struct FrameBufferAllocator {
    handle: Option<Arc<Handle>>,
    active: Option<StreamConfiguration>,
    buffers: HashMap<Stream, Vec<FrameBuffer>>,
}

impl FrameBufferAllocator {
    /// Returns an allocator bound to the current configuration of `camera`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use vcam::{CameraManager, FrameBufferAllocator, StreamRole};
    ///
    /// let mut manager = CameraManager::new();
    /// manager.start().unwrap();
    /// let mut camera = manager.get("/dev/video0").unwrap();
    /// camera.acquire().unwrap();
    ///
    /// let mut config = camera
    ///     .generate_configuration(&[StreamRole::Viewfinder])
    ///     .unwrap()
    ///     .unwrap();
    /// camera.configure(&mut config).unwrap();
    ///
    /// let stream = config.at(0).unwrap().stream().unwrap();
    /// let mut allocator = FrameBufferAllocator::new(&camera);
    /// let count = allocator.allocate(&stream).unwrap();
    /// assert_eq!(allocator.buffers(&stream).len(), count);
    /// ```
    pub fn new(camera: &Camera) -> Self {
        FrameBufferAllocator {
            handle: camera.handle(),
            active: camera.active_configuration().cloned(),
            buffers: HashMap::new(),
        }
    }

    fn configured(&self, stream: &Stream) -> Result<(&Arc<Handle>, &StreamConfiguration)> {
        match (&self.handle, &self.active) {
            (Some(handle), Some(cfg)) if cfg.stream() == Some(*stream) => Ok((handle, cfg)),
            _ => Err(Error::Buffer(format!("{} is not configured", stream))),
        }
    }

    /// Allocates the configured number of buffers for `stream`
    ///
    /// Returns how many buffers the driver actually provided.
    pub fn allocate(&mut self, stream: &Stream) -> Result<usize> {
        if self.buffers.contains_key(stream) {
            return Err(Error::Buffer(format!(
                "buffers for {} are already allocated",
                stream
            )));
        }

        let (handle, cfg) = self.configured(stream)?;
        let count = request_buffers(handle, cfg.buffer_count)?;
        if count == 0 {
            return Err(Error::Buffer("driver granted no buffers".into()));
        }
        if count != cfg.buffer_count {
            debug!("asked for {} buffers, got {}", cfg.buffer_count, count);
        }

        let mut buffers = Vec::with_capacity(count as usize);
        for index in 0..count {
            match map_buffer(handle, index) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    drop(buffers);
                    let _ = request_buffers(handle, 0);
                    return Err(e.into());
                }
            }
        }

        let count = buffers.len();
        self.buffers.insert(*stream, buffers);
        Ok(count)
    }

    /// Buffers allocated for `stream`, empty if none
    pub fn buffers(&self, stream: &Stream) -> &[FrameBuffer] {
        self.buffers.get(stream).map_or(&[], Vec::as_slice)
    }

    /// Whether buffers are allocated for `stream`
    pub fn allocated(&self, stream: &Stream) -> bool {
        self.buffers.contains_key(stream)
    }

    /// Unmaps the buffers of `stream` and returns them to the driver
    pub fn free(&mut self, stream: &Stream) -> Result<()> {
        let buffers = self
            .buffers
            .remove(stream)
            .ok_or_else(|| Error::Buffer(format!("no buffers allocated for {}", stream)))?;

        if buffers.iter().any(FrameBuffer::is_shared) {
            self.buffers.insert(*stream, buffers);
            return Err(Error::Buffer(format!(
                "buffers of {} are still attached to requests",
                stream
            )));
        }
        drop(buffers);

        if let Some(handle) = &self.handle {
            request_buffers(handle, 0)?;
        }
        Ok(())
    }
}

impl Drop for FrameBufferAllocator {
    fn drop(&mut self) {
        let streams: Vec<Stream> = self.buffers.keys().copied().collect();
        for stream in streams {
            if let Err(e) = self.free(&stream) {
                warn!("failed to free buffers of {}: {}", stream, e);
            }
        }
    }
}

fn request_buffers(handle: &Handle, count: u32) -> io::Result<u32> {
    let mut v4l2_reqbufs = v4l2_requestbuffers {
        count,
        type_: Type::VideoCapture as u32,
        memory: Memory::Mmap as u32,
        ..unsafe { mem::zeroed() }
    };
    unsafe {
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_REQBUFS,
            &mut v4l2_reqbufs as *mut _ as *mut std::os::raw::c_void,
        )?;
    }

    handle.set_buffer_count(v4l2_reqbufs.count);
    Ok(v4l2_reqbufs.count)
}

fn map_buffer(handle: &Handle, index: u32) -> io::Result<FrameBuffer> {
    let mut v4l2_buf = v4l2_buffer {
        index,
        type_: Type::VideoCapture as u32,
        memory: Memory::Mmap as u32,
        ..unsafe { mem::zeroed() }
    };
    unsafe {
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_QUERYBUF,
            &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
        )?;
    }

    let offset = unsafe { v4l2_buf.m.offset };
    let map = Mmap::new(handle.fd(), offset, v4l2_buf.length as usize)?;
    Ok(FrameBuffer::mapped(index, Backing::Mapped(map)))
}
