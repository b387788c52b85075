use std::{fmt, str};

use bitflags::bitflags;
use v4l2_sys::v4l2_capability;

bitflags! {
    /// Device capability flags as reported by VIDIOC_QUERYCAP
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        const VIDEO_CAPTURE         = 0x00000001;
        const VIDEO_OUTPUT          = 0x00000002;
        const VIDEO_OVERLAY         = 0x00000004;
        const VIDEO_CAPTURE_MPLANE  = 0x00001000;
        const VIDEO_OUTPUT_MPLANE   = 0x00002000;
        const VIDEO_M2M_MPLANE      = 0x00004000;
        const VIDEO_M2M             = 0x00008000;
        const META_CAPTURE          = 0x00800000;
        const READ_WRITE            = 0x01000000;
        const STREAMING             = 0x04000000;
        const DEVICE_CAPS           = 0x80000000;
    }
}

impl From<u32> for Flags {
    fn from(flags: u32) -> Self {
        Self::from_bits_retain(flags)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut prefix = "";
        for (name, _) in self.iter_names() {
            write!(f, "{}{}", prefix, name)?;
            prefix = ", ";
        }

        let unknown = self.bits() & !Flags::all().bits();
        if unknown != 0 {
            write!(f, "{}{:#x}", prefix, unknown)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Device capabilities
pub struct Capabilities {
    /// Driver name, e.g. uvcvideo for usb video class devices
    pub driver: String,
    /// Card name
    pub card: String,
    /// Bus name, e.g. USB or PCI
    pub bus: String,
    /// Version number MAJOR.MINOR.PATCH
    pub version: (u8, u8, u8),

    /// Capabilities of the opened device node
    pub capabilities: Flags,
}

impl Capabilities {
    /// Whether the node can act as a streaming capture camera
    pub fn is_camera(&self) -> bool {
        self.capabilities
            .contains(Flags::VIDEO_CAPTURE | Flags::STREAMING)
    }
}

fn c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl From<v4l2_capability> for Capabilities {
    fn from(cap: v4l2_capability) -> Self {
        // device_caps is only filled in when the driver sets DEVICE_CAPS
        let flags = Flags::from(cap.capabilities);
        let capabilities = if flags.contains(Flags::DEVICE_CAPS) {
            Flags::from(cap.device_caps)
        } else {
            flags
        };

        Capabilities {
            driver: c_string(&cap.driver),
            card: c_string(&cap.card),
            bus: c_string(&cap.bus_info),
            version: (
                ((cap.version >> 16) & 0xff) as u8,
                ((cap.version >> 8) & 0xff) as u8,
                (cap.version & 0xff) as u8,
            ),
            capabilities,
        }
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Driver      : {}", self.driver)?;
        writeln!(f, "Card        : {}", self.card)?;
        writeln!(f, "Bus         : {}", self.bus)?;
        writeln!(
            f,
            "Version     : {}.{}.{}",
            self.version.0, self.version.1, self.version.2
        )?;
        writeln!(f, "Capabilites : {}", self.capabilities)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(flags: Flags) -> Capabilities {
        Capabilities {
            driver: "uvcvideo".into(),
            card: "Integrated Camera".into(),
            bus: "usb-0000:00:14.0-8".into(),
            version: (6, 1, 0),
            capabilities: flags,
        }
    }

    #[test]
    fn camera_needs_capture_and_streaming() {
        assert!(caps(Flags::VIDEO_CAPTURE | Flags::STREAMING).is_camera());
        assert!(!caps(Flags::VIDEO_CAPTURE | Flags::READ_WRITE).is_camera());
        assert!(!caps(Flags::META_CAPTURE | Flags::STREAMING).is_camera());
    }

    #[test]
    fn c_strings_stop_at_nul() {
        assert_eq!(c_string(b"uvcvideo\0\0\0garbage"), "uvcvideo");
        assert_eq!(c_string(b"full"), "full");
    }

    #[test]
    fn flags_display_lists_names() {
        let flags = Flags::VIDEO_CAPTURE | Flags::STREAMING;
        assert_eq!(flags.to_string(), "VIDEO_CAPTURE, STREAMING");
    }
}
