//! Camera state machine and the request completion loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use std::{fmt, io, mem};

use log::{debug, error, info, warn};
use v4l2_sys::v4l2_buffer;

use crate::buffer::{Flags, FrameStatus, Type};
use crate::config::{CameraConfiguration, ConfigStatus, Stream, StreamConfiguration, StreamRole};
use crate::device::Handle;
use crate::error::{Error, Result};
use crate::format::FrameSize;
use crate::memory::Memory;
use crate::request::{Request, RequestStatus};
use crate::v4l2;

/// How long the completion thread waits for a frame before checking whether to stop
const POLL_TIMEOUT_MS: i32 = 100;

/// Lifecycle of a [`Camera`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Available,
    Acquired,
    Configured,
    Running,
}

impl State {
    fn require(self, op: &'static str, allowed: &[State]) -> Result<()> {
        if allowed.contains(&self) {
            Ok(())
        } else {
            Err(Error::InvalidState { op, state: self })
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Available => "available",
            State::Acquired => "acquired",
            State::Configured => "configured",
            State::Running => "running",
        };
        write!(f, "{}", name)
    }
}

/// Static description of a camera found by the [`crate::CameraManager`]
#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) driver: String,
    pub(crate) bus: String,
    pub(crate) claimed: Arc<AtomicBool>,
}

impl CameraInfo {
    /// Unique id, the path of the device node
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human readable model name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn bus(&self) -> &str {
        &self.bus
    }
}

impl fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.name)
    }
}

type Handler = Box<dyn FnMut(Request, &RequestQueue) + Send>;

/// State shared between the camera, its queue handles and the completion thread
struct Shared {
    handle: Arc<Handle>,
    stream: Stream,
    running: AtomicBool,
    order: AtomicU64,
    /// queued requests by buffer index, tagged with their queueing order
    queued: Mutex<HashMap<u32, (u64, Request)>>,
}

impl Shared {
    fn queued(&self) -> MutexGuard<'_, HashMap<u32, (u64, Request)>> {
        // a panicking handler must not take the queue down with it
        self.queued.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn buffer_desc() -> v4l2_buffer {
        v4l2_buffer {
            type_: Type::VideoCapture as u32,
            memory: Memory::Mmap as u32,
            ..unsafe { mem::zeroed() }
        }
    }

    /// Empties the queue and returns its requests cancelled, in queueing order
    fn cancel_queued(&self) -> Vec<Request> {
        let mut entries: Vec<_> = self.queued().drain().map(|(_, entry)| entry).collect();
        entries.sort_by_key(|(order, _)| *order);

        entries
            .into_iter()
            .map(|(_, mut request)| {
                request.cancel();
                request
            })
            .collect()
    }

    fn dequeue(&self) -> io::Result<Option<Request>> {
        let mut v4l2_buf = Self::buffer_desc();
        let ret = unsafe {
            v4l2::ioctl(
                self.handle.fd(),
                v4l2::vidioc::VIDIOC_DQBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )
        };

        match ret {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        }

        let Some((_, mut request)) = self.queued().remove(&v4l2_buf.index) else {
            warn!("dequeued buffer {} without a request", v4l2_buf.index);
            return Ok(None);
        };

        if let Some(buffer) = request.buffer_mut(&self.stream) {
            let flags = Flags::from(v4l2_buf.flags);
            let metadata = buffer.metadata_mut();
            metadata.status = if flags.contains(Flags::ERROR) {
                FrameStatus::Error
            } else {
                FrameStatus::Success
            };
            metadata.sequence = v4l2_buf.sequence;
            metadata.timestamp = Duration::new(
                v4l2_buf.timestamp.tv_sec as u64,
                (v4l2_buf.timestamp.tv_usec as u32) * 1000,
            );
            metadata.flags = flags;
            metadata.planes = vec![v4l2_buf.bytesused];
        }
        request.complete();

        Ok(Some(request))
    }
}

/// Cloneable handle to queue requests on a running camera
///
/// Completion handlers receive one so they can hand requests back to the device.
#[derive(Clone)]
pub struct RequestQueue {
    shared: Arc<Shared>,
}

impl RequestQueue {
    /// Queues a request for capture
    ///
    /// The request must be pending and carry a buffer for the configured stream that is not
    /// already queued.
    pub fn queue(&self, request: Request) -> Result<()> {
        let shared = &self.shared;
        if !shared.running.load(Ordering::Acquire) {
            return Err(Error::InvalidState {
                op: "queue a request",
                state: State::Configured,
            });
        }

        if request.status() != RequestStatus::Pending {
            return Err(Error::Request(format!(
                "request {} is {}, not pending",
                request.cookie(),
                request.status()
            )));
        }

        let index = request
            .buffer(&shared.stream)
            .map(|buffer| buffer.index())
            .ok_or_else(|| {
                Error::Request(format!(
                    "request {} has no buffer for {}",
                    request.cookie(),
                    shared.stream
                ))
            })?;

        let mut queued = shared.queued();
        if queued.contains_key(&index) {
            return Err(Error::Buffer(format!("buffer {} is already queued", index)));
        }

        let mut v4l2_buf = v4l2_buffer {
            index,
            ..Shared::buffer_desc()
        };
        unsafe {
            v4l2::ioctl(
                shared.handle.fd(),
                v4l2::vidioc::VIDIOC_QBUF,
                &mut v4l2_buf as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        let order = shared.order.fetch_add(1, Ordering::Relaxed);
        queued.insert(index, (order, request));
        Ok(())
    }
}

/// A single camera
///
/// Obtained from [`crate::CameraManager::get`]. The camera has to be acquired before it can be
/// configured, and configured before buffers can be allocated and capture started.
pub struct Camera {
    info: CameraInfo,
    state: State,
    handle: Option<Arc<Handle>>,
    active: Option<StreamConfiguration>,
    handler: Option<Handler>,
    shared: Option<Arc<Shared>>,
    worker: Option<JoinHandle<Option<Handler>>>,
}

impl Camera {
    pub(crate) fn new(info: CameraInfo) -> Self {
        Camera {
            info,
            state: State::Available,
            handle: None,
            active: None,
            handler: None,
            shared: None,
            worker: None,
        }
    }

    pub fn id(&self) -> &str {
        self.info.id()
    }

    pub fn info(&self) -> &CameraInfo {
        &self.info
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub(crate) fn handle(&self) -> Option<Arc<Handle>> {
        self.handle.clone()
    }

    /// Configuration applied by the last [`Camera::configure`]
    pub fn active_configuration(&self) -> Option<&StreamConfiguration> {
        self.active.as_ref()
    }

    /// Takes exclusive ownership of the camera
    pub fn acquire(&mut self) -> Result<()> {
        self.state.require("acquire", &[State::Available])?;

        if self
            .info
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy(self.info.id.clone()));
        }

        match Handle::open(&self.info.id) {
            Ok(handle) => self.handle = Some(Arc::new(handle)),
            Err(e) => {
                self.info.claimed.store(false, Ordering::Release);
                return Err(e.into());
            }
        }

        info!("acquired {}", self.info);
        self.state = State::Acquired;
        Ok(())
    }

    /// Gives up ownership of the camera
    ///
    /// Fails while a [`crate::FrameBufferAllocator`] still holds buffers of this camera.
    pub fn release(&mut self) -> Result<()> {
        self.state
            .require("release", &[State::Acquired, State::Configured])?;

        if let Some(handle) = &self.handle {
            let count = handle.buffer_count();
            if count > 0 {
                return Err(Error::Buffer(format!(
                    "{} buffers of {} are still allocated",
                    count, self.info
                )));
            }
        }

        self.handle = None;
        self.active = None;
        self.info.claimed.store(false, Ordering::Release);
        self.state = State::Available;
        info!("released {}", self.info);
        Ok(())
    }

    /// Generates a default configuration with one stream per role
    ///
    /// Returns `None` if a role cannot be served by this camera.
    pub fn generate_configuration(
        &self,
        roles: &[StreamRole],
    ) -> Result<Option<CameraConfiguration>> {
        self.state.require(
            "generate a configuration",
            &[State::Acquired, State::Configured],
        )?;
        let handle = self.require_handle()?;

        let mut config = CameraConfiguration::new(handle.clone());
        for role in roles {
            let current = handle.format()?;
            let mut cfg = StreamConfiguration::from(current);

            match role {
                StreamRole::Viewfinder | StreamRole::VideoRecording => {}
                StreamRole::StillCapture => {
                    let sizes = handle.enum_framesizes(current.fourcc).unwrap_or_default();
                    if let Some(largest) = FrameSize::largest(&sizes) {
                        cfg.size = largest;
                    }
                }
                StreamRole::Raw => {
                    debug!("{} has no raw stream", self.info);
                    return Ok(None);
                }
            }

            config.add(cfg);
        }

        Ok(Some(config))
    }

    /// Applies a configuration
    ///
    /// The configuration is validated first; an invalid one is rejected. On success the
    /// stream configuration reflects what the device delivers and carries its [`Stream`].
    pub fn configure(&mut self, config: &mut CameraConfiguration) -> Result<()> {
        self.state
            .require("configure", &[State::Acquired, State::Configured])?;
        let handle = self.require_handle()?;

        match config.validate()? {
            ConfigStatus::Invalid => {
                return Err(Error::InvalidConfiguration(format!(
                    "`{}` cannot be used with {}",
                    config, self.info
                )))
            }
            ConfigStatus::Adjusted => warn!("configuration adjusted to {}", config),
            ConfigStatus::Valid => {}
        }

        let cfg = config
            .at_mut(0)
            .ok_or_else(|| Error::InvalidConfiguration("no stream configured".into()))?;
        let applied = handle.set_format(&cfg.format())?;
        if applied.dimensions() != cfg.size || applied.fourcc != cfg.pixel_format {
            return Err(Error::InvalidConfiguration(format!(
                "device applied {}-{} instead of {}",
                applied.dimensions(),
                applied.fourcc,
                cfg
            )));
        }

        cfg.apply(&applied);
        cfg.set_stream(Stream::new(0));
        info!("configured {} with {}", self.info, cfg);

        self.active = Some(cfg.clone());
        self.state = State::Configured;
        Ok(())
    }

    /// Creates an empty request tagged with `cookie`
    pub fn create_request(&self, cookie: u64) -> Result<Request> {
        self.state
            .require("create a request", &[State::Configured, State::Running])?;
        Ok(Request::new(cookie))
    }

    /// Installs the function called for every completed or cancelled request
    ///
    /// The handler runs on the completion thread.
    pub fn on_request_completed<F>(&mut self, handler: F) -> Result<()>
    where
        F: FnMut(Request, &RequestQueue) + Send + 'static,
    {
        self.state.require(
            "install a completion handler",
            &[State::Available, State::Acquired, State::Configured],
        )?;
        self.handler = Some(Box::new(handler));
        Ok(())
    }

    /// Starts streaming and the completion thread
    pub fn start(&mut self) -> Result<()> {
        self.state.require("start", &[State::Configured])?;
        let handle = self.require_handle()?;
        let stream = self
            .active
            .as_ref()
            .and_then(StreamConfiguration::stream)
            .ok_or_else(|| Error::InvalidConfiguration("no stream configured".into()))?;

        unsafe {
            let mut typ = Type::VideoCapture as u32;
            v4l2::ioctl(
                handle.fd(),
                v4l2::vidioc::VIDIOC_STREAMON,
                &mut typ as *mut _ as *mut std::os::raw::c_void,
            )?;
        }

        let shared = Arc::new(Shared {
            handle,
            stream,
            running: AtomicBool::new(true),
            order: AtomicU64::new(0),
            queued: Mutex::new(HashMap::new()),
        });

        let queue = RequestQueue {
            shared: shared.clone(),
        };
        let mut handler = self.handler.take();
        let spawned = thread::Builder::new()
            .name("vcam-completion".into())
            .spawn(move || {
                complete_requests(&queue, &mut handler);
                handler
            });

        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                shared.running.store(false, Ordering::Release);
                let _ = stream_off(&shared.handle);
                return Err(e.into());
            }
        };

        self.shared = Some(shared);
        self.worker = Some(worker);
        self.state = State::Running;
        info!("started {}", self.info);
        Ok(())
    }

    /// Returns a queue handle while the camera is running
    pub fn queue(&self) -> Option<RequestQueue> {
        self.shared.as_ref().map(|shared| RequestQueue {
            shared: shared.clone(),
        })
    }

    /// Queues a request for capture, see [`RequestQueue::queue`]
    pub fn queue_request(&self, request: Request) -> Result<()> {
        self.state.require("queue a request", &[State::Running])?;
        match self.queue() {
            Some(queue) => queue.queue(request),
            None => Err(Error::InvalidState {
                op: "queue a request",
                state: self.state,
            }),
        }
    }

    /// Stops streaming
    ///
    /// Requests still queued are handed to the completion handler as cancelled.
    pub fn stop(&mut self) -> Result<()> {
        self.state.require("stop", &[State::Running])?;

        let shared = match self.shared.take() {
            Some(shared) => shared,
            None => return Err(Error::InvalidState { op: "stop", state: self.state }),
        };
        shared.running.store(false, Ordering::Release);

        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(handler) => self.handler = handler,
                Err(_) => error!("completion handler of {} panicked", self.info),
            }
        }

        // the camera is stopped from here on, whatever STREAMOFF says
        self.state = State::Configured;
        let result = stream_off(&shared.handle);

        let queue = RequestQueue {
            shared: shared.clone(),
        };
        for request in shared.cancel_queued() {
            if let Some(handler) = self.handler.as_mut() {
                handler(request, &queue);
            }
        }

        info!("stopped {}", self.info);
        result.map_err(Error::from)
    }

    fn require_handle(&self) -> Result<Arc<Handle>> {
        self.handle.clone().ok_or(Error::InvalidState {
            op: "access the device",
            state: self.state,
        })
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if self.state == State::Running {
            if let Err(e) = self.stop() {
                warn!("failed to stop {}: {}", self.info, e);
            }
        }
        if self.state != State::Available {
            if let Err(e) = self.release() {
                warn!("failed to release {}: {}", self.info, e);
                self.info.claimed.store(false, Ordering::Release);
            }
        }
    }
}

impl fmt::Debug for Camera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Camera")
            .field("info", &self.info)
            .field("state", &self.state)
            .field("active", &self.active)
            .finish()
    }
}

fn stream_off(handle: &Handle) -> io::Result<()> {
    unsafe {
        let mut typ = Type::VideoCapture as u32;
        v4l2::ioctl(
            handle.fd(),
            v4l2::vidioc::VIDIOC_STREAMOFF,
            &mut typ as *mut _ as *mut std::os::raw::c_void,
        )
    }
}

/// Body of the completion thread
fn complete_requests(queue: &RequestQueue, handler: &mut Option<Handler>) {
    let shared = &queue.shared;

    while shared.running.load(Ordering::Acquire) {
        match shared.handle.poll(libc::POLLIN, POLL_TIMEOUT_MS) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("polling {} failed: {}", shared.handle.path().display(), e);
                shared.running.store(false, Ordering::Release);
                break;
            }
        }

        match shared.dequeue() {
            Ok(Some(request)) => match handler {
                Some(handler) => handler(request, queue),
                None => debug!("dropping completed request {}", request.cookie()),
            },
            Ok(None) => {}
            Err(e) => {
                // ENODEV: the device went away, nothing left to wait for
                error!("dequeueing from {} failed: {}", shared.handle.path().display(), e);
                shared.running.store(false, Ordering::Release);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::FrameBuffer;

    fn info(id: &str) -> CameraInfo {
        CameraInfo {
            id: id.into(),
            name: "Test Camera".into(),
            driver: "vivid".into(),
            bus: "platform:vivid-000".into(),
            claimed: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn transitions_are_checked() {
        assert!(State::Available.require("acquire", &[State::Available]).is_ok());

        let err = State::Running
            .require("configure", &[State::Acquired, State::Configured])
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot configure while the camera is running");
    }

    #[test]
    fn available_camera_rejects_capture_operations() {
        let mut camera = Camera::new(info("/dev/video-missing"));
        assert_eq!(camera.state(), State::Available);

        assert!(matches!(
            camera.generate_configuration(&[StreamRole::Viewfinder]),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(camera.create_request(0), Err(Error::InvalidState { .. })));
        assert!(matches!(camera.start(), Err(Error::InvalidState { .. })));
        assert!(matches!(camera.stop(), Err(Error::InvalidState { .. })));
        assert!(matches!(camera.release(), Err(Error::InvalidState { .. })));
        assert!(camera.queue().is_none());
    }

    #[test]
    fn failed_acquire_leaves_camera_available() {
        let info = info("/dev/video-missing");
        let claimed = info.claimed.clone();

        let mut camera = Camera::new(info);
        assert!(matches!(camera.acquire(), Err(Error::Io(_))));
        assert_eq!(camera.state(), State::Available);
        assert!(!claimed.load(Ordering::Acquire));
    }

    #[test]
    fn claimed_camera_is_busy() {
        let info = info("/dev/video-missing");
        info.claimed.store(true, Ordering::Release);

        let mut camera = Camera::new(info);
        assert!(matches!(camera.acquire(), Err(Error::Busy(_))));
    }

    fn running_queue() -> RequestQueue {
        let handle = Handle::open("/dev/null").unwrap();
        RequestQueue {
            shared: Arc::new(Shared {
                handle: Arc::new(handle),
                stream: Stream::new(0),
                running: AtomicBool::new(true),
                order: AtomicU64::new(0),
                queued: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn request(cookie: u64, index: u32) -> Request {
        let mut request = Request::new(cookie);
        request
            .add_buffer(&Stream::new(0), FrameBuffer::host(index, vec![0; 4], &[4]))
            .unwrap();
        request
    }

    #[test]
    fn queue_requires_running_camera() {
        let queue = running_queue();
        queue.shared.running.store(false, Ordering::Release);
        assert!(matches!(
            queue.queue(request(0, 0)),
            Err(Error::InvalidState { state: State::Configured, .. })
        ));
    }

    #[test]
    fn queue_rejects_completed_request() {
        let queue = running_queue();
        let mut completed = request(0, 0);
        completed.complete();
        assert!(matches!(queue.queue(completed), Err(Error::Request(_))));
    }

    #[test]
    fn queue_rejects_request_without_buffer() {
        let queue = running_queue();
        let mut other_stream = Request::new(1);
        other_stream
            .add_buffer(&Stream::new(1), FrameBuffer::host(0, vec![0; 4], &[4]))
            .unwrap();
        assert!(matches!(queue.queue(Request::new(0)), Err(Error::Request(_))));
        assert!(matches!(queue.queue(other_stream), Err(Error::Request(_))));
    }

    #[test]
    fn queue_rejects_buffer_in_flight() {
        let queue = running_queue();
        queue.shared.queued().insert(3, (0, request(0, 3)));

        assert!(matches!(queue.queue(request(1, 3)), Err(Error::Buffer(_))));
        assert_eq!(queue.shared.queued().len(), 1);
    }

    #[test]
    fn stop_cancels_in_queueing_order() {
        let queue = running_queue();
        {
            let mut queued = queue.shared.queued();
            queued.insert(0, (2, request(20, 0)));
            queued.insert(1, (0, request(21, 1)));
            queued.insert(2, (1, request(22, 2)));
        }

        let cancelled = queue.shared.cancel_queued();
        let cookies: Vec<_> = cancelled.iter().map(Request::cookie).collect();
        assert_eq!(cookies, [21, 22, 20]);
        assert!(cancelled
            .iter()
            .all(|request| request.status() == RequestStatus::Cancelled));
        assert!(queue.shared.queued().is_empty());
    }

    #[test]
    fn completion_thread_failure_stops_queueing() {
        // /dev/null polls readable but rejects DQBUF
        let queue = running_queue();
        complete_requests(&queue, &mut None);

        assert!(!queue.shared.running.load(Ordering::Acquire));
        assert!(matches!(
            queue.queue(request(0, 0)),
            Err(Error::InvalidState { .. })
        ));
    }

    #[test]
    fn release_waits_for_buffers_to_be_freed() {
        let mut camera = Camera::new(info("/dev/null"));
        camera.acquire().unwrap();

        let handle = camera.handle().unwrap();
        handle.set_buffer_count(4);
        assert!(matches!(camera.release(), Err(Error::Buffer(_))));
        assert_eq!(camera.state(), State::Acquired);

        handle.set_buffer_count(0);
        camera.release().unwrap();
        assert_eq!(camera.state(), State::Available);
    }

    #[test]
    fn handler_can_be_installed_before_start() {
        let mut camera = Camera::new(info("/dev/video-missing"));
        camera.on_request_completed(|_, _| {}).unwrap();
    }
}
