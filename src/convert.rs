//! Conversion of captured frames into 0RGB pixels for display.

use jpeg_decoder::{Decoder, PixelFormat};

use crate::error::{Error, Result};
use crate::format::Format;
use crate::FourCC;

/// Packs a color into the 0RGB layout windows expect
#[inline]
pub fn xrgb(r: u8, g: u8, b: u8) -> u32 {
    (r as u32) << 16 | (g as u32) << 8 | b as u32
}

/// BT.601 limited range YUV to RGB
#[inline]
fn yuv(y: u8, u: u8, v: u8) -> u32 {
    let y = 1.164 * (y as f32 - 16.);
    let u = u as f32 - 128.;
    let v = v as f32 - 128.;

    let r = y + 1.596 * v;
    let g = y - 0.813 * v - 0.391 * u;
    let b = y + 2.018 * u;

    // float to int casts saturate
    xrgb(r as u8, g as u8, b as u8)
}

/// Bytes per pixel of the packed formats, `None` for compressed ones
fn bytes_per_pixel(fourcc: FourCC) -> Option<usize> {
    match fourcc {
        FourCC::YUYV | FourCC::UYVY => Some(2),
        FourCC::RGB3 | FourCC::BGR3 => Some(3),
        FourCC::GREY => Some(1),
        _ => None,
    }
}

/// Whether frames of `fourcc` can be converted
pub fn is_supported(fourcc: FourCC) -> bool {
    fourcc == FourCC::MJPG || bytes_per_pixel(fourcc).is_some()
}

/// Converts one frame to 0RGB pixels, replacing the contents of `out`
///
/// `out` ends up with `width * height` pixels.
///
/// # Example
///
/// ```
/// use vcam::{convert, Format, FourCC};
///
/// let fmt = Format::new(2, 1, FourCC::RGB3);
/// let mut pixels = Vec::new();
/// convert::to_xrgb(&fmt, &[255, 0, 0, 0, 0, 255], &mut pixels).unwrap();
/// assert_eq!(pixels, [0xff0000, 0x0000ff]);
/// ```
pub fn to_xrgb(fmt: &Format, data: &[u8], out: &mut Vec<u32>) -> Result<()> {
    let width = fmt.width as usize;
    let height = fmt.height as usize;
    out.clear();

    if fmt.fourcc == FourCC::MJPG {
        return decode_jpeg(width, height, data, out);
    }

    let bpp = bytes_per_pixel(fmt.fourcc).ok_or(Error::UnsupportedFormat(fmt.fourcc))?;
    let stride = match fmt.stride as usize {
        0 => width * bpp,
        stride => stride,
    };
    if width == 0 || height == 0 {
        return Ok(());
    }
    if stride < width * bpp {
        return Err(Error::Decode(format!(
            "stride {} is too small for {} {} pixels",
            stride, width, fmt.fourcc
        )));
    }

    let needed = stride * (height - 1) + width * bpp;
    if data.len() < needed {
        return Err(Error::Decode(format!(
            "{} frame needs {} bytes, got {}",
            fmt.fourcc,
            needed,
            data.len()
        )));
    }

    // packed YUV lines hold whole pairs, the chroma of an odd last pixel may sit in the padding
    let line_bytes = match fmt.fourcc {
        FourCC::YUYV | FourCC::UYVY => (width + 1) / 2 * 4,
        _ => width * bpp,
    };

    out.reserve(width * height);
    for line in data.chunks(stride).take(height) {
        let line = &line[..line_bytes.min(line.len())];
        let row = out.len();
        match fmt.fourcc {
            FourCC::YUYV => {
                for px in line.chunks(4) {
                    match *px {
                        [y0, u, y1, v] => out.extend([yuv(y0, u, v), yuv(y1, u, v)]),
                        [y0, u, ..] => out.push(yuv(y0, u, 128)),
                        _ => {}
                    }
                }
            }
            FourCC::UYVY => {
                for px in line.chunks(4) {
                    match *px {
                        [u, y0, v, y1] => out.extend([yuv(y0, u, v), yuv(y1, u, v)]),
                        [u, y0, ..] => out.push(yuv(y0, u, 128)),
                        _ => {}
                    }
                }
            }
            FourCC::RGB3 => {
                out.extend(line.chunks_exact(3).map(|px| xrgb(px[0], px[1], px[2])))
            }
            FourCC::BGR3 => {
                out.extend(line.chunks_exact(3).map(|px| xrgb(px[2], px[1], px[0])))
            }
            FourCC::GREY => out.extend(line.iter().map(|&y| xrgb(y, y, y))),
            fourcc => return Err(Error::UnsupportedFormat(fourcc)),
        }
        // the second pixel of the last pair is past the line
        out.truncate(row + width);
    }

    Ok(())
}

fn decode_jpeg(width: usize, height: usize, data: &[u8], out: &mut Vec<u32>) -> Result<()> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode().map_err(|e| Error::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| Error::Decode("missing JPEG header".into()))?;

    if info.width as usize != width || info.height as usize != height {
        return Err(Error::Decode(format!(
            "JPEG is {}x{}, stream is {}x{}",
            info.width, info.height, width, height
        )));
    }

    match info.pixel_format {
        PixelFormat::RGB24 => {
            out.extend(pixels.chunks_exact(3).map(|px| xrgb(px[0], px[1], px[2])))
        }
        PixelFormat::L8 => out.extend(pixels.iter().map(|&y| xrgb(y, y, y))),
        PixelFormat::L16 => {
            out.extend(pixels.chunks_exact(2).map(|px| xrgb(px[0], px[0], px[0])))
        }
        PixelFormat::CMYK32 => out.extend(pixels.chunks_exact(4).map(|px| {
            let k = px[3] as u32;
            let channel = |c: u8| (c as u32 * k / 255) as u8;
            xrgb(channel(px[0]), channel(px[1]), channel(px[2]))
        })),
    }

    Ok(())
}
