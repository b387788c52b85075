//! Stream configuration and format negotiation.

use std::sync::Arc;
use std::{fmt, io, slice};

use log::{debug, warn};

use crate::device::Negotiate;
use crate::error::Result;
use crate::format::{Format, Size};
use crate::FourCC;

/// Smallest and largest number of buffers a stream may ask for
pub const MIN_BUFFER_COUNT: u32 = 1;
pub const MAX_BUFFER_COUNT: u32 = 32;
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// A stream produced by a configured camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stream(u32);

impl Stream {
    pub(crate) const fn new(index: u32) -> Self {
        Stream(index)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream{}", self.0)
    }
}

/// What a stream is going to be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Viewfinder,
    VideoRecording,
    StillCapture,
    Raw,
}

impl fmt::Display for StreamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamRole::Viewfinder => "viewfinder",
            StreamRole::VideoRecording => "video",
            StreamRole::StillCapture => "still",
            StreamRole::Raw => "raw",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for StreamRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "viewfinder" | "vf" => Ok(StreamRole::Viewfinder),
            "video" | "vid" => Ok(StreamRole::VideoRecording),
            "still" => Ok(StreamRole::StillCapture),
            "raw" => Ok(StreamRole::Raw),
            _ => Err(format!("unknown stream role `{}`", s)),
        }
    }
}

/// Parameters of a single stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfiguration {
    pub size: Size,
    pub pixel_format: FourCC,
    /// Bytes per line, filled in by validation
    pub stride: u32,
    /// Bytes per frame, filled in by validation
    pub frame_size: u32,
    pub buffer_count: u32,
    stream: Option<Stream>,
}

impl StreamConfiguration {
    pub fn new(size: Size, pixel_format: FourCC) -> Self {
        StreamConfiguration {
            size,
            pixel_format,
            stride: 0,
            frame_size: 0,
            buffer_count: DEFAULT_BUFFER_COUNT,
            stream: None,
        }
    }

    /// The stream this configuration was applied to
    ///
    /// Only available once the camera has been configured with it.
    pub fn stream(&self) -> Option<Stream> {
        self.stream
    }

    pub(crate) fn set_stream(&mut self, stream: Stream) {
        self.stream = Some(stream);
    }

    pub(crate) fn format(&self) -> Format {
        Format {
            stride: self.stride,
            size: self.frame_size,
            ..Format::new(self.size.width, self.size.height, self.pixel_format)
        }
    }

    pub(crate) fn apply(&mut self, fmt: &Format) {
        self.size = fmt.dimensions();
        self.pixel_format = fmt.fourcc;
        self.stride = fmt.stride;
        self.frame_size = fmt.size;
    }
}

impl From<Format> for StreamConfiguration {
    fn from(fmt: Format) -> Self {
        let mut cfg = StreamConfiguration::new(fmt.dimensions(), fmt.fourcc);
        cfg.apply(&fmt);
        cfg
    }
}

impl fmt::Display for StreamConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.size, self.pixel_format)
    }
}

/// Result of validating a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStatus {
    /// Usable exactly as requested
    Valid,
    /// Usable after changing some parameters
    Adjusted,
    /// Cannot be used
    Invalid,
}

/// Ordered set of stream configurations for one camera
pub struct CameraConfiguration {
    streams: Vec<StreamConfiguration>,
    status: ConfigStatus,
    negotiator: Option<Arc<dyn Negotiate + Send + Sync>>,
}

impl CameraConfiguration {
    /// Returns an empty configuration which is validated against `negotiator`
    pub fn new(negotiator: Arc<dyn Negotiate + Send + Sync>) -> Self {
        CameraConfiguration {
            streams: Vec::new(),
            status: ConfigStatus::Invalid,
            negotiator: Some(negotiator),
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        CameraConfiguration {
            streams: Vec::new(),
            status: ConfigStatus::Invalid,
            negotiator: None,
        }
    }

    pub fn add(&mut self, cfg: StreamConfiguration) {
        self.streams.push(cfg);
    }

    pub fn at(&self, index: usize) -> Option<&StreamConfiguration> {
        self.streams.get(index)
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut StreamConfiguration> {
        self.streams.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, StreamConfiguration> {
        self.streams.iter()
    }

    pub fn iter_mut(&mut self) -> slice::IterMut<'_, StreamConfiguration> {
        self.streams.iter_mut()
    }

    /// Status of the last validation
    pub fn status(&self) -> ConfigStatus {
        self.status
    }

    /// Validates against the device the configuration was generated for
    ///
    /// Parameters the device cannot provide are replaced by the closest supported ones, in
    /// which case [`ConfigStatus::Adjusted`] is returned.
    pub fn validate(&mut self) -> Result<ConfigStatus> {
        match self.negotiator.clone() {
            Some(negotiator) => self.validate_with(negotiator.as_ref()),
            None => {
                self.status = ConfigStatus::Invalid;
                Ok(self.status)
            }
        }
    }

    /// Validates against an explicit negotiator
    pub fn validate_with(&mut self, negotiator: &dyn Negotiate) -> Result<ConfigStatus> {
        self.status = self.check(negotiator)?;
        Ok(self.status)
    }

    fn check(&mut self, negotiator: &dyn Negotiate) -> Result<ConfigStatus> {
        if self.streams.is_empty() {
            return Ok(ConfigStatus::Invalid);
        }

        let mut status = ConfigStatus::Valid;

        // a video node produces exactly one stream
        if self.streams.len() > 1 {
            warn!("dropping {} extra stream(s)", self.streams.len() - 1);
            self.streams.truncate(1);
            status = ConfigStatus::Adjusted;
        }

        let cfg = &mut self.streams[0];
        if cfg.size.is_empty() {
            return Ok(ConfigStatus::Invalid);
        }

        let count = cfg.buffer_count.clamp(MIN_BUFFER_COUNT, MAX_BUFFER_COUNT);
        if count != cfg.buffer_count {
            warn!("buffer count {} adjusted to {}", cfg.buffer_count, count);
            cfg.buffer_count = count;
            status = ConfigStatus::Adjusted;
        }

        let requested = Format::new(cfg.size.width, cfg.size.height, cfg.pixel_format);
        let negotiated = match negotiator.try_format(&requested) {
            Ok(fmt) => fmt,
            Err(e) if e.raw_os_error() == Some(libc::ENOTTY) => {
                // drivers without TRY_FMT; S_FMT has the last word on configure
                debug!("device cannot try formats, keeping {}", cfg);
                return Ok(status);
            }
            Err(e) => return Err(into_config_error(e)),
        };

        if negotiated.dimensions() != cfg.size || negotiated.fourcc != cfg.pixel_format {
            warn!(
                "{} adjusted to {}-{}",
                cfg,
                negotiated.dimensions(),
                negotiated.fourcc
            );
            status = ConfigStatus::Adjusted;
        }
        cfg.apply(&negotiated);

        Ok(status)
    }
}

fn into_config_error(e: io::Error) -> crate::Error {
    if e.kind() == io::ErrorKind::InvalidInput {
        crate::Error::InvalidConfiguration(e.to_string())
    } else {
        crate::Error::Io(e)
    }
}

impl fmt::Display for CameraConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut prefix = "";
        for cfg in &self.streams {
            write!(f, "{}{}", prefix, cfg)?;
            prefix = ", ";
        }
        Ok(())
    }
}

impl fmt::Debug for CameraConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraConfiguration")
            .field("streams", &self.streams)
            .field("status", &self.status)
            .finish()
    }
}

impl<'a> IntoIterator for &'a CameraConfiguration {
    type Item = &'a StreamConfiguration;
    type IntoIter = slice::Iter<'a, StreamConfiguration>;

    fn into_iter(self) -> Self::IntoIter {
        self.streams.iter()
    }
}

impl<'a> IntoIterator for &'a mut CameraConfiguration {
    type Item = &'a mut StreamConfiguration;
    type IntoIter = slice::IterMut<'a, StreamConfiguration>;

    fn into_iter(self) -> Self::IntoIter {
        self.streams.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pretends to be a UVC camera that only does YUYV up to 1280x720
    struct FakeDriver;

    impl Negotiate for FakeDriver {
        fn try_format(&self, fmt: &Format) -> io::Result<Format> {
            let width = fmt.width.min(1280);
            let height = fmt.height.min(720);
            Ok(Format {
                width,
                height,
                fourcc: FourCC::YUYV,
                stride: width * 2,
                size: width * height * 2,
            })
        }
    }

    struct NoTryFmt;

    impl Negotiate for NoTryFmt {
        fn try_format(&self, _: &Format) -> io::Result<Format> {
            Err(io::Error::from_raw_os_error(libc::ENOTTY))
        }
    }

    fn config(streams: &[StreamConfiguration]) -> CameraConfiguration {
        let mut config = CameraConfiguration::new(Arc::new(FakeDriver));
        for cfg in streams {
            config.add(cfg.clone());
        }
        config
    }

    #[test]
    fn supported_format_is_valid_and_gets_stride() {
        let mut config = config(&[StreamConfiguration::new(
            Size::new(640, 480),
            FourCC::YUYV,
        )]);
        assert_eq!(config.validate().unwrap(), ConfigStatus::Valid);

        let cfg = config.at(0).unwrap();
        assert_eq!(cfg.stride, 1280);
        assert_eq!(cfg.frame_size, 640 * 480 * 2);
        assert_eq!(cfg.to_string(), "640x480-YUYV");
    }

    #[test]
    fn unsupported_size_and_format_are_adjusted() {
        let mut config = config(&[StreamConfiguration::new(
            Size::new(1920, 1080),
            FourCC::MJPG,
        )]);
        assert_eq!(config.validate().unwrap(), ConfigStatus::Adjusted);
        assert_eq!(config.to_string(), "1280x720-YUYV");
        assert_eq!(config.status(), ConfigStatus::Adjusted);
    }

    #[test]
    fn extra_streams_are_dropped() {
        let cfg = StreamConfiguration::new(Size::new(640, 480), FourCC::YUYV);
        let mut config = config(&[cfg.clone(), cfg]);
        assert_eq!(config.validate().unwrap(), ConfigStatus::Adjusted);
        assert_eq!(config.len(), 1);
    }

    #[test]
    fn buffer_count_is_clamped() {
        let mut cfg = StreamConfiguration::new(Size::new(640, 480), FourCC::YUYV);
        cfg.buffer_count = 0;
        let mut config = config(&[cfg.clone()]);
        assert_eq!(config.validate().unwrap(), ConfigStatus::Adjusted);
        assert_eq!(config.at(0).unwrap().buffer_count, MIN_BUFFER_COUNT);

        cfg.buffer_count = 100;
        let mut config = self::config(&[cfg]);
        assert_eq!(config.validate().unwrap(), ConfigStatus::Adjusted);
        assert_eq!(config.at(0).unwrap().buffer_count, MAX_BUFFER_COUNT);
    }

    #[test]
    fn empty_or_zero_sized_is_invalid() {
        let mut config = config(&[]);
        assert_eq!(config.validate().unwrap(), ConfigStatus::Invalid);

        let mut config = self::config(&[StreamConfiguration::new(
            Size::new(0, 480),
            FourCC::YUYV,
        )]);
        assert_eq!(config.validate().unwrap(), ConfigStatus::Invalid);
    }

    #[test]
    fn detached_configuration_is_invalid() {
        let mut config = CameraConfiguration::detached();
        config.add(StreamConfiguration::new(Size::new(640, 480), FourCC::YUYV));
        assert_eq!(config.validate().unwrap(), ConfigStatus::Invalid);
    }

    #[test]
    fn drivers_without_try_fmt_keep_request() {
        let mut config = CameraConfiguration::new(Arc::new(NoTryFmt));
        config.add(StreamConfiguration::new(Size::new(800, 600), FourCC::MJPG));
        assert_eq!(config.validate().unwrap(), ConfigStatus::Valid);
        assert_eq!(config.to_string(), "800x600-MJPG");
    }

    #[test]
    fn roles_parse() {
        assert_eq!("vf".parse::<StreamRole>().unwrap(), StreamRole::Viewfinder);
        assert_eq!("still".parse::<StreamRole>().unwrap(), StreamRole::StillCapture);
        assert!("preview".parse::<StreamRole>().is_err());
    }
}
