use std::{fmt, str};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
/// Four character code representing a pixelformat
pub struct FourCC {
    pub repr: [u8; 4],
}

impl FourCC {
    /// Packed YUV 4:2:2, Y0 U Y1 V
    pub const YUYV: FourCC = FourCC::new(b"YUYV");
    /// Packed YUV 4:2:2, U Y0 V Y1
    pub const UYVY: FourCC = FourCC::new(b"UYVY");
    /// Motion JPEG, one baseline JPEG per frame
    pub const MJPG: FourCC = FourCC::new(b"MJPG");
    /// 24-bit RGB
    pub const RGB3: FourCC = FourCC::new(b"RGB3");
    /// 24-bit BGR
    pub const BGR3: FourCC = FourCC::new(b"BGR3");
    /// 8-bit greyscale
    pub const GREY: FourCC = FourCC::new(b"GREY");

    /// Returns a pixelformat as four character code
    ///
    /// # Example
    ///
    /// ```
    /// use vcam::FourCC;
    /// let fourcc = FourCC::new(b"YUYV");
    /// assert_eq!(fourcc, FourCC::YUYV);
    /// ```
    pub const fn new(repr: &[u8; 4]) -> FourCC {
        FourCC { repr: *repr }
    }

    /// Returns the string representation of a four character code
    pub fn str(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.repr)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(string) = self.str() {
            write!(f, "{}", string)?;
        }
        Ok(())
    }
}

impl str::FromStr for FourCC {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 || !s.is_ascii() {
            return Err(format!("invalid pixel format `{}`", s));
        }

        // short codes such as "Y10" are space padded by the kernel
        let mut repr = [b' '; 4];
        repr[..bytes.len()].copy_from_slice(bytes);
        Ok(FourCC::new(&repr))
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        FourCC::new(&code.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        Self::from_le_bytes(fourcc.repr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_code_is_little_endian() {
        // v4l2_fourcc('Y', 'U', 'Y', 'V')
        assert_eq!(u32::from(FourCC::YUYV), 0x5659_5559);
        assert_eq!(FourCC::from(0x4750_4a4d), FourCC::MJPG);
    }

    #[test]
    fn parse() {
        assert_eq!("MJPG".parse::<FourCC>().unwrap(), FourCC::MJPG);
        assert_eq!("Y10".parse::<FourCC>().unwrap().repr, *b"Y10 ");
        assert!("".parse::<FourCC>().is_err());
        assert!("YUYV2".parse::<FourCC>().is_err());
    }

    #[test]
    fn display() {
        assert_eq!(FourCC::RGB3.to_string(), "RGB3");
    }
}
