use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{info, warn};

use vcam::device::Handle;
use vcam::writer::DEFAULT_PATTERN;
use vcam::{
    convert, BufferWriter, Camera, CameraManager, Format, FourCC, FrameBufferAllocator,
    FrameRateCounter, Request, RequestQueue, RequestStatus, ReuseFlag, Size, StreamRole,
};

/// A converted frame with the frame rate label to draw on it
type PreviewFrame = (Vec<u32>, String);

fn cli() -> Command {
    Command::new("vcam")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Captures frames from a video4linux camera")
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .help("List cameras and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("camera")
                .short('c')
                .long("camera")
                .value_name("INDEX or ID")
                .help("Camera index or device node path (default: 0)"),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .value_name("WxH")
                .help("Frame size")
                .default_value("640x480")
                .value_parser(value_parser!(Size)),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FOURCC")
                .help("Pixel format (default: current device format)")
                .value_parser(value_parser!(FourCC)),
        )
        .arg(
            Arg::new("buffers")
                .short('b')
                .long("buffers")
                .value_name("INT")
                .help("Number of buffers to allocate (default: 4)")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("role")
                .short('r')
                .long("role")
                .value_name("ROLE")
                .help("Stream role: viewfinder, video, still or raw")
                .default_value("viewfinder")
                .value_parser(value_parser!(StreamRole)),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_name("MS")
                .help("Capture time in milliseconds, 0 runs until stopped")
                .default_value("3000")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("frames")
                .short('n')
                .long("frames")
                .value_name("INT")
                .help("Stop after this many frames")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("file")
                .short('F')
                .long("file")
                .value_name("PATTERN")
                .help("Write frames to files, '#' is replaced by stream and sequence")
                .num_args(0..=1)
                .default_missing_value(DEFAULT_PATTERN),
        )
        .arg(
            Arg::new("display")
                .short('D')
                .long("display")
                .help("Show a live preview window")
                .action(ArgAction::SetTrue),
        )
}

/// Resolves `--camera` against the cameras the manager found
fn select_camera(manager: &CameraManager, selector: Option<&str>) -> anyhow::Result<Camera> {
    let cameras = manager.cameras();
    let id = match selector {
        None => cameras.first().map(|info| info.id().to_string()),
        Some(sel) => match sel.parse::<usize>() {
            Ok(index) => cameras.get(index).map(|info| info.id().to_string()),
            Err(_) => Some(sel.to_string()),
        },
    }
    .ok_or_else(|| anyhow!("no camera available"))?;

    manager
        .get(&id)
        .ok_or_else(|| anyhow!("camera `{}` not found", id))
}

/// Prints the pixel formats and frame sizes a camera offers
fn list_formats(id: &str) -> anyhow::Result<()> {
    let handle = Handle::open(id)?;
    for desc in handle.enum_formats()? {
        println!("    {}", desc);
        for size in handle.enum_framesizes(desc.fourcc).unwrap_or_default() {
            println!("        {}", size);
        }
    }
    Ok(())
}

/// Everything the completion handler needs to process a request
struct Completion {
    writer: Option<BufferWriter>,
    preview: Option<(Format, mpsc::SyncSender<PreviewFrame>)>,
    fps: FrameRateCounter,
    pixels: Vec<u32>,
    completed: Arc<AtomicU64>,
    /// `--frames`, frames past it are neither processed nor requeued
    limit: Option<u64>,
}

impl Completion {
    /// Counts one more frame, false once the limit was already reached
    fn claim(&self) -> bool {
        let limit = self.limit.unwrap_or(u64::MAX);
        self.completed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_ok()
    }

    fn limit_reached(&self) -> bool {
        self.limit
            .map_or(false, |n| self.completed.load(Ordering::Acquire) >= n)
    }

    fn handle(&mut self, mut request: Request, queue: &RequestQueue) {
        if request.status() == RequestStatus::Cancelled || !self.claim() {
            return;
        }

        self.fps.tick(Instant::now());

        for (i, (_, buffer)) in request.buffers().enumerate() {
            let metadata = buffer.metadata();
            let planes: Vec<String> = metadata.planes.iter().map(u32::to_string).collect();
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(
                stdout,
                " seq: {:06} bytesused: {}",
                metadata.sequence,
                planes.join("/")
            );

            let name = format!("Stream{}", i + 1);
            if let Some(writer) = &self.writer {
                if let Err(e) = writer.write(buffer, &name) {
                    warn!("failed to write frame {}: {}", metadata.sequence, e);
                }
            }

            if let (Some((fmt, tx)), Some(data)) = (&self.preview, buffer.payload(0)) {
                match convert::to_xrgb(fmt, data, &mut self.pixels) {
                    // a full channel means the window lags behind, skip the frame
                    Ok(()) => {
                        let _ = tx.try_send((self.pixels.clone(), self.fps.label()));
                    }
                    Err(e) => warn!("cannot preview frame {}: {}", metadata.sequence, e),
                }
            }
        }

        if self.limit_reached() {
            return;
        }

        request.reuse(ReuseFlag::ReuseBuffers);
        if let Err(e) = queue.queue(request) {
            warn!("failed to requeue request: {}", e);
        }
    }
}

#[cfg(feature = "display")]
type Window = vcam::display::Preview;

#[cfg(feature = "display")]
fn open_window(size: Size) -> anyhow::Result<Window> {
    Ok(vcam::display::Preview::new(
        "vcam",
        size.width as usize,
        size.height as usize,
    )?)
}

#[cfg(not(feature = "display"))]
struct Window;

#[cfg(not(feature = "display"))]
fn open_window(_: Size) -> anyhow::Result<Window> {
    bail!("vcam was built without the `display` feature")
}

/// Waits until the capture should end, presenting preview frames meanwhile
fn wait(
    duration: Option<Duration>,
    frames: Option<u64>,
    completed: &AtomicU64,
    interrupted: &AtomicBool,
    mut window: Option<(Window, mpsc::Receiver<PreviewFrame>)>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    loop {
        if interrupted.load(Ordering::Relaxed) {
            info!("interrupted");
            return Ok(());
        }
        if duration.map_or(false, |d| start.elapsed() >= d) {
            return Ok(());
        }
        if frames.map_or(false, |n| completed.load(Ordering::Relaxed) >= n) {
            return Ok(());
        }

        match window.as_mut() {
            #[cfg(feature = "display")]
            Some((preview, rx)) => {
                if !preview.is_open() {
                    info!("preview closed");
                    return Ok(());
                }
                match rx.recv_timeout(Duration::from_millis(20)) {
                    Ok((mut pixels, label)) => preview.update(&mut pixels, &label)?,
                    Err(mpsc::RecvTimeoutError::Timeout) => preview.idle(),
                    Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
                }
            }
            _ => thread::sleep(Duration::from_millis(10)),
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    run(&cli().get_matches())
}

fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let mut manager = CameraManager::new();
    manager.start().context("failed to start the camera manager")?;

    for camera in manager.cameras() {
        println!("Camera ID: {}", camera.id());
        if matches.get_flag("list") {
            println!("    {} ({}, {})", camera.name(), camera.driver(), camera.bus());
            if let Err(e) = list_formats(camera.id()) {
                warn!("cannot list formats of {}: {}", camera.id(), e);
            }
        }
    }
    if matches.get_flag("list") {
        manager.stop();
        return Ok(());
    }

    let selector = matches.get_one::<String>("camera").map(String::as_str);
    let mut camera = select_camera(&manager, selector)?;
    camera.acquire().context("failed to acquire the camera")?;

    let role = *matches
        .get_one::<StreamRole>("role")
        .ok_or_else(|| anyhow!("missing stream role"))?;
    let mut config = camera
        .generate_configuration(&[role])?
        .ok_or_else(|| anyhow!("{} does not support the {} role", camera.id(), role))?;

    {
        let cfg = config
            .at_mut(0)
            .ok_or_else(|| anyhow!("empty camera configuration"))?;
        if let Some(size) = matches.get_one::<Size>("size") {
            cfg.size = *size;
        }
        if let Some(fourcc) = matches.get_one::<FourCC>("format") {
            cfg.pixel_format = *fourcc;
        }
        if let Some(count) = matches.get_one::<u32>("buffers") {
            cfg.buffer_count = *count;
        }
    }
    config.validate()?;
    println!("Default {} configuration is: {}", role, config);

    camera
        .configure(&mut config)
        .context("failed to configure the camera")?;
    let cfg = config
        .at(0)
        .ok_or_else(|| anyhow!("empty camera configuration"))?
        .clone();
    let stream = cfg
        .stream()
        .ok_or_else(|| anyhow!("configuration has no stream"))?;

    let mut allocator = FrameBufferAllocator::new(&camera);
    let count = allocator
        .allocate(&stream)
        .context("can't allocate buffers")?;
    info!("allocated {} buffers for {}", count, stream);

    let mut requests = Vec::with_capacity(count);
    for (cookie, buffer) in allocator.buffers(&stream).iter().enumerate() {
        let mut request = camera
            .create_request(cookie as u64)
            .context("can't create request")?;
        request
            .add_buffer(&stream, buffer.clone())
            .context("can't set buffer for request")?;
        requests.push(request);
    }

    let (window, preview) = if matches.get_flag("display") {
        let fmt = Format {
            stride: cfg.stride,
            size: cfg.frame_size,
            ..Format::new(cfg.size.width, cfg.size.height, cfg.pixel_format)
        };
        if !convert::is_supported(fmt.fourcc) {
            bail!("cannot preview {} frames", fmt.fourcc);
        }
        let (tx, rx) = mpsc::sync_channel(2);
        (Some((open_window(cfg.size)?, rx)), Some((fmt, tx)))
    } else {
        (None, None)
    };

    let completed = Arc::new(AtomicU64::new(0));
    let mut completion = Completion {
        writer: matches.get_one::<String>("file").map(BufferWriter::new),
        preview,
        fps: FrameRateCounter::default(),
        pixels: Vec::new(),
        completed: completed.clone(),
        limit: matches.get_one::<u64>("frames").copied(),
    };
    camera.on_request_completed(move |request, queue| completion.handle(request, queue))?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || interrupted.store(true, Ordering::Relaxed))
            .context("failed to install the Ctrl-C handler")?;
    }

    camera.start().context("failed to start the camera")?;
    for request in requests {
        camera.queue_request(request)?;
    }

    let duration = match matches.get_one::<u64>("duration") {
        Some(0) | None => None,
        Some(ms) => Some(Duration::from_millis(*ms)),
    };
    let waited = wait(
        duration,
        matches.get_one::<u64>("frames").copied(),
        &completed,
        &interrupted,
        window,
    );

    camera.stop().context("failed to stop the camera")?;
    waited?;

    allocator.free(&stream).context("failed to free buffers")?;
    camera.release()?;
    drop(camera);
    manager.stop();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(limit: Option<u64>) -> Completion {
        Completion {
            writer: None,
            preview: None,
            fps: FrameRateCounter::default(),
            pixels: Vec::new(),
            completed: Arc::new(AtomicU64::new(0)),
            limit,
        }
    }

    #[test]
    fn frame_limit_stops_counting() {
        let completion = completion(Some(2));
        assert!(completion.claim());
        assert!(!completion.limit_reached());
        assert!(completion.claim());
        assert!(completion.limit_reached());

        assert!(!completion.claim());
        assert_eq!(completion.completed.load(Ordering::Acquire), 2);
    }

    #[test]
    fn no_limit_counts_every_frame() {
        let completion = completion(None);
        for _ in 0..100 {
            assert!(completion.claim());
        }
        assert!(!completion.limit_reached());
    }

    #[test]
    fn cli_defaults() {
        let matches = cli().try_get_matches_from(["vcam"]).unwrap();
        assert_eq!(matches.get_one::<Size>("size"), Some(&Size::new(640, 480)));
        assert_eq!(matches.get_one::<u64>("duration"), Some(&3000));
        assert!(matches.get_one::<String>("file").is_none());

        let matches = cli().try_get_matches_from(["vcam", "--file"]).unwrap();
        assert_eq!(
            matches.get_one::<String>("file").map(String::as_str),
            Some(DEFAULT_PATTERN)
        );
    }
}
