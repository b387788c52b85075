use std::{fmt, mem, str};

use bitflags::bitflags;
use v4l2_sys::{v4l2_fmtdesc, v4l2_frmsizeenum, v4l2_pix_format};

use crate::FourCC;

/// Frame dimensions in pixels
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }

    /// Number of pixels covered
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl str::FromStr for Size {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{}`", s))?;
        let width = width
            .trim()
            .parse()
            .map_err(|_| format!("invalid width in `{}`", s))?;
        let height = height
            .trim()
            .parse()
            .map_err(|_| format!("invalid height in `{}`", s))?;

        Ok(Size { width, height })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Single-planar streaming format
pub struct Format {
    /// width in pixels
    pub width: u32,
    /// height in pixels
    pub height: u32,
    /// pixelformat code
    pub fourcc: FourCC,
    /// bytes per line
    pub stride: u32,
    /// maximum number of bytes required to store an image
    pub size: u32,
}

impl Format {
    /// Returns a capture format, stride and size are left to the driver
    ///
    /// # Example
    ///
    /// ```
    /// use vcam::{Format, FourCC};
    /// let fmt = Format::new(640, 480, FourCC::YUYV);
    /// ```
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Format {
            width,
            height,
            fourcc,
            stride: 0,
            size: 0,
        }
    }

    pub fn dimensions(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "width          : {}", self.width)?;
        writeln!(f, "height         : {}", self.height)?;
        writeln!(f, "fourcc         : {}", self.fourcc)?;
        writeln!(f, "stride         : {}", self.stride)?;
        writeln!(f, "size           : {}", self.size)?;
        Ok(())
    }
}

impl From<v4l2_pix_format> for Format {
    fn from(fmt: v4l2_pix_format) -> Self {
        Format {
            width: fmt.width,
            height: fmt.height,
            fourcc: FourCC::from(fmt.pixelformat),
            stride: fmt.bytesperline,
            size: fmt.sizeimage,
        }
    }
}

impl From<Format> for v4l2_pix_format {
    fn from(format: Format) -> Self {
        Self {
            width: format.width,
            height: format.height,
            pixelformat: format.fourcc.into(),
            // V4L2_FIELD_ANY, the driver picks
            field: 0,
            bytesperline: format.stride,
            sizeimage: format.size,
            ..unsafe { mem::zeroed() }
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DescriptionFlags : u32 {
        const COMPRESSED            = 0x0001;
        const EMULATED              = 0x0002;
        const CONTINUOUS_BITSTREAM  = 0x0004;
        const DYN_RESOLUTION        = 0x0008;
    }
}

#[derive(Debug, Clone)]
/// Format description as returned by VIDIOC_ENUM_FMT
pub struct Description {
    pub index: u32,
    pub flags: DescriptionFlags,
    pub description: String,
    pub fourcc: FourCC,
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.index, self.fourcc, self.description)?;
        if self.flags.contains(DescriptionFlags::COMPRESSED) {
            write!(f, ", compressed")?;
        }
        if self.flags.contains(DescriptionFlags::EMULATED) {
            write!(f, ", emulated")?;
        }
        Ok(())
    }
}

impl From<v4l2_fmtdesc> for Description {
    fn from(desc: v4l2_fmtdesc) -> Self {
        let end = desc
            .description
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(desc.description.len());

        Description {
            index: desc.index,
            flags: DescriptionFlags::from_bits_truncate(desc.flags),
            description: String::from_utf8_lossy(&desc.description[..end]).into_owned(),
            fourcc: FourCC::from(desc.pixelformat),
        }
    }
}

const FRMSIZE_TYPE_DISCRETE: u32 = 1;
const FRMSIZE_TYPE_CONTINUOUS: u32 = 2;
const FRMSIZE_TYPE_STEPWISE: u32 = 3;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// Frame size as returned by VIDIOC_ENUM_FRAMESIZES
pub enum FrameSize {
    Discrete(Size),
    Stepwise {
        min: Size,
        max: Size,
        step: Size,
    },
}

impl FrameSize {
    /// Largest size this entry allows
    pub fn max(&self) -> Size {
        match *self {
            FrameSize::Discrete(size) => size,
            FrameSize::Stepwise { max, .. } => max,
        }
    }

    /// Whether `size` can be configured exactly
    pub fn contains(&self, size: Size) -> bool {
        match *self {
            FrameSize::Discrete(discrete) => discrete == size,
            FrameSize::Stepwise { min, max, step } => {
                let fits = |value: u32, min: u32, max: u32, step: u32| {
                    value >= min && value <= max && (step == 0 || (value - min) % step == 0)
                };
                fits(size.width, min.width, max.width, step.width)
                    && fits(size.height, min.height, max.height, step.height)
            }
        }
    }

    /// Largest size over a list of enumerated frame sizes
    pub fn largest(sizes: &[FrameSize]) -> Option<Size> {
        sizes.iter().map(FrameSize::max).max_by_key(Size::area)
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSize::Discrete(size) => write!(f, "{}", size),
            FrameSize::Stepwise { min, max, step } => {
                write!(f, "{} - {} (step {})", min, max, step)
            }
        }
    }
}

impl TryFrom<v4l2_frmsizeenum> for FrameSize {
    type Error = String;

    fn try_from(desc: v4l2_frmsizeenum) -> Result<Self, Self::Error> {
        // Unsafe because of access to the anonymous union
        unsafe {
            match desc.type_ {
                FRMSIZE_TYPE_DISCRETE => {
                    let discrete = desc.__bindgen_anon_1.discrete;
                    Ok(FrameSize::Discrete(Size::new(discrete.width, discrete.height)))
                }
                FRMSIZE_TYPE_CONTINUOUS | FRMSIZE_TYPE_STEPWISE => {
                    let stepwise = desc.__bindgen_anon_1.stepwise;
                    Ok(FrameSize::Stepwise {
                        min: Size::new(stepwise.min_width, stepwise.min_height),
                        max: Size::new(stepwise.max_width, stepwise.max_height),
                        step: Size::new(stepwise.step_width, stepwise.step_height),
                    })
                }
                typ => Err(format!("unknown framesize type: {}", typ)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_parse_and_display() {
        let size: Size = "640x480".parse().unwrap();
        assert_eq!(size, Size::new(640, 480));
        assert_eq!(size.to_string(), "640x480");
        assert_eq!("1280X720".parse::<Size>().unwrap(), Size::new(1280, 720));
        assert!("640".parse::<Size>().is_err());
        assert!("axb".parse::<Size>().is_err());
    }

    #[test]
    fn largest_framesize_by_area() {
        let sizes = [
            FrameSize::Discrete(Size::new(640, 480)),
            FrameSize::Discrete(Size::new(1920, 1080)),
            FrameSize::Stepwise {
                min: Size::new(16, 16),
                max: Size::new(1280, 960),
                step: Size::new(16, 16),
            },
        ];
        assert_eq!(FrameSize::largest(&sizes), Some(Size::new(1920, 1080)));
        assert_eq!(FrameSize::largest(&[]), None);
    }

    #[test]
    fn stepwise_contains() {
        let stepwise = FrameSize::Stepwise {
            min: Size::new(16, 16),
            max: Size::new(1280, 960),
            step: Size::new(16, 8),
        };
        assert!(stepwise.contains(Size::new(640, 480)));
        assert!(!stepwise.contains(Size::new(641, 480)));
        assert!(!stepwise.contains(Size::new(1296, 480)));
    }

    #[test]
    fn pix_format_roundtrip_keeps_driver_fields() {
        let fmt = Format {
            width: 640,
            height: 480,
            fourcc: FourCC::YUYV,
            stride: 1280,
            size: 614400,
        };
        let pix: v4l2_pix_format = fmt.into();
        assert_eq!(pix.bytesperline, 1280);
        assert_eq!(Format::from(pix), fmt);
    }
}
