//! Bitmap text drawn on top of preview frames.

const GLYPH_WIDTH: usize = 5;
const GLYPH_HEIGHT: usize = 7;
/// Horizontal space taken by one character, including spacing
const ADVANCE: usize = GLYPH_WIDTH + 1;

/// Rows of a 5x7 glyph, most significant of the low five bits is the leftmost column
fn glyph(c: char) -> [u8; GLYPH_HEIGHT] {
    match c {
        '0' => [0x0e, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0e],
        '1' => [0x04, 0x0c, 0x04, 0x04, 0x04, 0x04, 0x0e],
        '2' => [0x0e, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1f],
        '3' => [0x1f, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0e],
        '4' => [0x02, 0x06, 0x0a, 0x12, 0x1f, 0x02, 0x02],
        '5' => [0x1f, 0x10, 0x1e, 0x01, 0x01, 0x11, 0x0e],
        '6' => [0x06, 0x08, 0x10, 0x1e, 0x11, 0x11, 0x0e],
        '7' => [0x1f, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0e, 0x11, 0x11, 0x0e, 0x11, 0x11, 0x0e],
        '9' => [0x0e, 0x11, 0x11, 0x0f, 0x01, 0x02, 0x0c],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0c, 0x0c],
        ':' => [0x00, 0x0c, 0x0c, 0x00, 0x0c, 0x0c, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1f, 0x00, 0x00, 0x00],
        'F' => [0x1f, 0x10, 0x10, 0x1e, 0x10, 0x10, 0x10],
        'P' => [0x1e, 0x11, 0x11, 0x1e, 0x10, 0x10, 0x10],
        'S' => [0x0f, 0x10, 0x10, 0x0e, 0x01, 0x01, 0x1e],
        _ => [0; GLYPH_HEIGHT],
    }
}

/// Draws short labels into 0RGB frames
#[derive(Debug, Clone, Copy)]
pub struct Overlay {
    /// Integer magnification of the 5x7 font
    pub scale: usize,
    /// Text color in 0RGB
    pub color: u32,
}

impl Default for Overlay {
    fn default() -> Self {
        Overlay {
            scale: 2,
            color: 0x00ff_ff00,
        }
    }
}

impl Overlay {
    pub fn new(scale: usize, color: u32) -> Self {
        Overlay {
            scale: scale.max(1),
            color,
        }
    }

    /// Size of the backing box drawn for `text`
    pub fn extent(&self, text: &str) -> (usize, usize) {
        let chars = text.chars().count();
        (
            (chars * ADVANCE + 1) * self.scale,
            (GLYPH_HEIGHT + 2) * self.scale,
        )
    }

    /// Draws `text` with its top left corner at (`x`, `y`)
    ///
    /// The area behind the text is darkened first. Anything outside of the frame is clipped.
    ///
    /// # Example
    ///
    /// ```
    /// use vcam::overlay::Overlay;
    ///
    /// let (width, height) = (64, 32);
    /// let mut frame = vec![0xffffff; width * height];
    /// Overlay::default().draw(&mut frame, width, height, 4, 4, "30.0 FPS");
    /// assert_eq!(frame[0], 0xffffff);
    /// assert_eq!(frame[4 * width + 4], 0x7f7f7f);
    /// ```
    pub fn draw(
        &self,
        pixels: &mut [u32],
        width: usize,
        height: usize,
        x: usize,
        y: usize,
        text: &str,
    ) {
        let height = height.min(pixels.len() / width.max(1));
        let scale = self.scale.max(1);
        let (box_width, box_height) = self.extent(text);

        for row in y..(y + box_height).min(height) {
            for col in x..(x + box_width).min(width) {
                let px = &mut pixels[row * width + col];
                *px = (*px >> 1) & 0x007f_7f7f;
            }
        }

        for (i, c) in text.chars().enumerate() {
            let left = x + (i * ADVANCE + 1) * scale;
            let top = y + scale;
            for (gy, bits) in glyph(c).iter().enumerate() {
                for gx in 0..GLYPH_WIDTH {
                    if bits & (0x10 >> gx) == 0 {
                        continue;
                    }
                    for sy in 0..scale {
                        let row = top + gy * scale + sy;
                        if row >= height {
                            break;
                        }
                        for sx in 0..scale {
                            let col = left + gx * scale + sx;
                            if col >= width {
                                break;
                            }
                            pixels[row * width + col] = self.color;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_scales() {
        assert_eq!(Overlay::new(1, 0).extent("FPS"), (19, 9));
        assert_eq!(Overlay::new(3, 0).extent("FPS"), (57, 27));
    }

    #[test]
    fn glyph_pixels_are_lit() {
        let (width, height) = (16, 16);
        let mut frame = vec![0; width * height];
        let overlay = Overlay::new(1, 0xff0000);
        overlay.draw(&mut frame, width, height, 0, 0, "-");

        // the dash sits on glyph row 3, one pixel of padding around the glyph
        let row = 1 + 3;
        for col in 1..6 {
            assert_eq!(frame[row * width + col], 0xff0000);
        }
        assert_eq!(frame[row * width + 6], 0);
        assert_eq!(frame[width + 1], 0);
    }

    #[test]
    fn text_is_clipped() {
        let (width, height) = (10, 5);
        let mut frame = vec![0xffffff; width * height];
        Overlay::new(4, 0x00ff00).draw(&mut frame, width, height, 6, 2, "88.8 FPS");
        assert_eq!(frame[0], 0xffffff);
        assert!(frame.iter().any(|&px| px != 0xffffff));
    }

    #[test]
    fn unknown_characters_are_blank() {
        let (width, height) = (8, 9);
        let mut frame = vec![0; width * height];
        Overlay::new(1, 0xffffff).draw(&mut frame, width, height, 0, 0, "?");
        assert!(frame.iter().all(|&px| px == 0));
    }
}
