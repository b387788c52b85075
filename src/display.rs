//! Live preview window.

use std::time::Duration;

use minifb::{Key, Window, WindowOptions};

use crate::error::{Error, Result};
use crate::overlay::Overlay;

/// Desktop window presenting converted frames with a frame rate label
///
/// The window is not `Send`; it has to be driven from the thread that created it.
pub struct Preview {
    window: Window,
    width: usize,
    height: usize,
    overlay: Overlay,
}

impl Preview {
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let mut window = Window::new(title, width, height, WindowOptions::default())
            .map_err(|e| Error::Display(e.to_string()))?;

        // ~60 fps upper bound on redraws
        window.limit_update_rate(Some(Duration::from_micros(16600)));

        Ok(Preview {
            window,
            width,
            height,
            overlay: Overlay::default(),
        })
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Draws `label` over `pixels` and presents the result
    pub fn update(&mut self, pixels: &mut [u32], label: &str) -> Result<()> {
        if pixels.len() < self.width * self.height {
            return Err(Error::Display(format!(
                "frame has {} pixels, window needs {}",
                pixels.len(),
                self.width * self.height
            )));
        }

        self.overlay
            .draw(pixels, self.width, self.height, 8, 8, label);
        self.window
            .update_with_buffer(pixels, self.width, self.height)
            .map_err(|e| Error::Display(e.to_string()))
    }

    /// Processes window events without a new frame
    pub fn idle(&mut self) {
        self.window.update();
    }

    /// False once the window was closed or Escape was pressed
    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }
}
