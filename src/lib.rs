//! Request-based camera capture on top of video4linux.
//!
//! A [`CameraManager`] finds capture devices, a [`Camera`] is acquired and configured with a
//! [`CameraConfiguration`], a [`FrameBufferAllocator`] maps its buffers and [`Request`]s
//! carry those buffers through the driver. Completed requests are delivered to a handler
//! on a dedicated thread, which can hand them back through a [`RequestQueue`].

pub mod v4l2;

mod capability;
pub use capability::Capabilities;

pub mod device;

mod fourcc;
pub use fourcc::FourCC;

mod format;
pub use format::{Description, DescriptionFlags, Format, FrameSize, Size};

mod error;
pub use error::{Error, Result};

mod memory;

pub mod buffer;
pub use buffer::{FrameBuffer, FrameMetadata, FrameStatus, Plane};

mod config;
pub use config::{
    CameraConfiguration, ConfigStatus, Stream, StreamConfiguration, StreamRole,
    DEFAULT_BUFFER_COUNT, MAX_BUFFER_COUNT, MIN_BUFFER_COUNT,
};

mod request;
pub use request::{Request, RequestStatus, ReuseFlag};

mod camera;
pub use camera::{Camera, CameraInfo, RequestQueue, State};

mod allocator;
pub use allocator::FrameBufferAllocator;

mod manager;
pub use manager::CameraManager;

pub mod writer;
pub use writer::BufferWriter;

mod fps;
pub use fps::FrameRateCounter;

pub mod convert;
pub mod overlay;

#[cfg(feature = "display")]
pub mod display;
