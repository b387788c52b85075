use std::collections::BTreeMap;
use std::fmt;

use crate::buffer::{FrameBuffer, FrameStatus};
use crate::config::Stream;
use crate::error::{Error, Result};

/// Lifecycle of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Created or reused, may be queued
    Pending,
    /// All buffers were filled by the device
    Complete,
    /// Streaming stopped before the request completed
    Cancelled,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Pending => write!(f, "pending"),
            RequestStatus::Complete => write!(f, "complete"),
            RequestStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What [`Request::reuse`] keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseFlag {
    /// Drop all buffers
    Default,
    /// Keep the buffers so the request can be queued again as is
    ReuseBuffers,
}

/// A set of buffers to be filled by a single capture
///
/// Requests carry one buffer per stream. They travel to the device when queued and come
/// back through the completion handler.
#[derive(Debug)]
pub struct Request {
    cookie: u64,
    status: RequestStatus,
    buffers: BTreeMap<Stream, FrameBuffer>,
}

impl Request {
    pub(crate) fn new(cookie: u64) -> Self {
        Request {
            cookie,
            status: RequestStatus::Pending,
            buffers: BTreeMap::new(),
        }
    }

    /// Opaque value chosen by the application when the request was created
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Attaches a buffer for `stream`
    ///
    /// Fails if the stream already has a buffer attached.
    pub fn add_buffer(&mut self, stream: &Stream, buffer: FrameBuffer) -> Result<()> {
        if self.buffers.contains_key(stream) {
            return Err(Error::Request(format!(
                "stream {} already has a buffer",
                stream
            )));
        }

        self.buffers.insert(*stream, buffer);
        Ok(())
    }

    /// Buffers of the request, ordered by stream
    pub fn buffers(&self) -> impl Iterator<Item = (&Stream, &FrameBuffer)> {
        self.buffers.iter()
    }

    pub fn buffer(&self, stream: &Stream) -> Option<&FrameBuffer> {
        self.buffers.get(stream)
    }

    pub(crate) fn buffer_mut(&mut self, stream: &Stream) -> Option<&mut FrameBuffer> {
        self.buffers.get_mut(stream)
    }

    /// Resets the request so it can be queued again
    pub fn reuse(&mut self, flags: ReuseFlag) {
        self.status = RequestStatus::Pending;
        match flags {
            ReuseFlag::ReuseBuffers => {
                for buffer in self.buffers.values_mut() {
                    buffer.metadata_mut().status = FrameStatus::Pending;
                }
            }
            ReuseFlag::Default => self.buffers.clear(),
        }
    }

    pub(crate) fn complete(&mut self) {
        self.status = RequestStatus::Complete;
    }

    pub(crate) fn cancel(&mut self) {
        self.status = RequestStatus::Cancelled;
        for buffer in self.buffers.values_mut() {
            buffer.metadata_mut().status = FrameStatus::Cancelled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(index: u32) -> FrameBuffer {
        FrameBuffer::host(index, vec![0; 4], &[4])
    }

    #[test]
    fn one_buffer_per_stream() {
        let stream = Stream::new(0);
        let mut request = Request::new(7);
        request.add_buffer(&stream, buffer(0)).unwrap();
        assert!(request.add_buffer(&stream, buffer(1)).is_err());

        request.add_buffer(&Stream::new(1), buffer(1)).unwrap();
        assert_eq!(request.buffers().count(), 2);
        assert_eq!(request.buffer(&stream).map(FrameBuffer::index), Some(0));
        assert_eq!(request.cookie(), 7);
    }

    #[test]
    fn reuse_keeps_or_drops_buffers() {
        let stream = Stream::new(0);
        let mut request = Request::new(0);
        request.add_buffer(&stream, buffer(2)).unwrap();

        request.cancel();
        assert_eq!(request.status(), RequestStatus::Cancelled);
        assert_eq!(
            request.buffer(&stream).unwrap().metadata().status,
            FrameStatus::Cancelled
        );

        request.reuse(ReuseFlag::ReuseBuffers);
        assert_eq!(request.status(), RequestStatus::Pending);
        assert_eq!(
            request.buffer(&stream).unwrap().metadata().status,
            FrameStatus::Pending
        );

        request.complete();
        request.reuse(ReuseFlag::Default);
        assert_eq!(request.status(), RequestStatus::Pending);
        assert!(request.buffer(&stream).is_none());
    }
}
