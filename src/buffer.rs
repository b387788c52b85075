use std::sync::Arc;
use std::{fmt, time::Duration};

use bitflags::bitflags;

use crate::memory::Backing;

/// Buffer type
///
/// Only single-planar video capture is streamed by this crate.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    VideoCapture = 1,
}

bitflags! {
    /// Buffer flags as set by the driver
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u32 {
        const MAPPED                = 0x00000001;
        const QUEUED                = 0x00000002;
        const DONE                  = 0x00000004;
        const KEYFRAME              = 0x00000008;
        /// Buffer is ready, but the data contained within is corrupted
        const ERROR                 = 0x00000040;
        const TIMESTAMP_MONOTONIC   = 0x00002000;
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Self {
        Self::from_bits_truncate(flags)
    }
}

/// Outcome of a capture into a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameStatus {
    /// The buffer has not been completed yet
    #[default]
    Pending,
    Success,
    /// The driver flagged the data as corrupted
    Error,
    /// The buffer was returned because streaming stopped
    Cancelled,
}

/// Per-frame information filled in on completion
#[derive(Debug, Clone, Default)]
pub struct FrameMetadata {
    pub status: FrameStatus,
    /// Sequence number, counting the frames
    pub sequence: u32,
    /// Time of capture (usually CLOCK_MONOTONIC)
    pub timestamp: Duration,
    pub flags: Flags,
    /// Bytes of payload per plane
    pub planes: Vec<u32>,
}

/// Location of a plane within the buffer memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plane {
    pub offset: usize,
    pub length: usize,
}

/// A capture buffer, identified by its index in the driver's queue
///
/// Clones share the backing memory.
#[derive(Clone)]
pub struct FrameBuffer {
    index: u32,
    planes: Vec<Plane>,
    memory: Arc<Backing>,
    metadata: FrameMetadata,
}

impl FrameBuffer {
    pub(crate) fn mapped(index: u32, memory: Backing) -> Self {
        let length = memory.len();
        FrameBuffer {
            index,
            planes: vec![Plane { offset: 0, length }],
            memory: Arc::new(memory),
            metadata: FrameMetadata::default(),
        }
    }

    /// Returns a buffer backed by heap memory, one plane per entry of `planes`
    ///
    /// # Example
    ///
    /// ```
    /// use vcam::FrameBuffer;
    ///
    /// let buf = FrameBuffer::host(0, vec![0u8; 640 * 480 * 2], &[640 * 480 * 2]);
    /// assert_eq!(buf.planes().len(), 1);
    /// ```
    pub fn host(index: u32, data: Vec<u8>, planes: &[usize]) -> Self {
        let mut offset = 0;
        let planes = planes
            .iter()
            .map(|&length| {
                let plane = Plane { offset, length };
                offset += length;
                plane
            })
            .collect();

        FrameBuffer {
            index,
            planes,
            memory: Arc::new(Backing::Host(data)),
            metadata: FrameMetadata::default(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Full memory of a plane, regardless of how much payload it holds
    pub fn plane_data(&self, plane: usize) -> Option<&[u8]> {
        let plane = self.planes.get(plane)?;
        self.memory.get(plane.offset..plane.offset + plane.length)
    }

    /// Payload of a plane as reported in the metadata, clamped to the plane size
    pub fn payload(&self, plane: usize) -> Option<&[u8]> {
        let data = self.plane_data(plane)?;
        let used = self
            .metadata
            .planes
            .get(plane)
            .map_or(data.len(), |&used| data.len().min(used as usize));
        Some(&data[..used])
    }

    /// Whether a clone of this buffer is still alive somewhere
    pub(crate) fn is_shared(&self) -> bool {
        Arc::strong_count(&self.memory) > 1
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut FrameMetadata {
        &mut self.metadata
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("index", &self.index)
            .field("planes", &self.planes)
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_planes_are_contiguous() {
        let buf = FrameBuffer::host(3, (0..12).collect(), &[8, 4]);
        assert_eq!(buf.index(), 3);
        assert_eq!(
            buf.planes(),
            &[
                Plane {
                    offset: 0,
                    length: 8
                },
                Plane {
                    offset: 8,
                    length: 4
                }
            ]
        );
        assert_eq!(buf.plane_data(1), Some(&[8u8, 9, 10, 11][..]));
        assert_eq!(buf.plane_data(2), None);
    }

    #[test]
    fn payload_is_clamped() {
        let mut buf = FrameBuffer::host(0, vec![1; 16], &[16]);
        assert_eq!(buf.payload(0).unwrap().len(), 16);

        buf.metadata_mut().planes = vec![10];
        assert_eq!(buf.payload(0).unwrap().len(), 10);

        buf.metadata_mut().planes = vec![64];
        assert_eq!(buf.payload(0).unwrap().len(), 16);
    }
}
