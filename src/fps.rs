use std::time::{Duration, Instant};

/// Measures frame rate over fixed update intervals
///
/// A new rate is published once per interval, so the displayed value stays readable instead
/// of flickering with every frame.
#[derive(Debug, Clone)]
pub struct FrameRateCounter {
    interval: Duration,
    start: Option<Instant>,
    frames: u32,
    rate: Option<f64>,
}

impl Default for FrameRateCounter {
    fn default() -> Self {
        FrameRateCounter::new(Duration::from_secs(1))
    }
}

impl FrameRateCounter {
    pub fn new(interval: Duration) -> Self {
        FrameRateCounter {
            interval,
            start: None,
            frames: 0,
            rate: None,
        }
    }

    /// Records a frame seen at `now` and returns the current rate, if any
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::{Duration, Instant};
    /// use vcam::FrameRateCounter;
    ///
    /// let mut fps = FrameRateCounter::new(Duration::from_secs(1));
    /// let t0 = Instant::now();
    /// for i in 0..=30 {
    ///     fps.tick(t0 + Duration::from_millis(i * 1000 / 30));
    /// }
    /// assert_eq!(fps.rate().map(f64::round), Some(30.0));
    /// ```
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        let start = *self.start.get_or_insert(now);
        if now < start {
            return self.rate;
        }

        let elapsed = now - start;
        if elapsed >= self.interval && !elapsed.is_zero() {
            self.rate = Some(self.frames as f64 / elapsed.as_secs_f64());
            self.start = Some(now);
            self.frames = 0;
        }
        self.frames += 1;

        self.rate
    }

    /// Rate published at the end of the last interval
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    /// Text shown in the preview overlay
    pub fn label(&self) -> String {
        match self.rate {
            Some(rate) => format!("{:.1} FPS", rate),
            None => "-- FPS".to_string(),
        }
    }
}
