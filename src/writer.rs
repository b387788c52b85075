use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

use log::warn;

use crate::buffer::FrameBuffer;

/// Default file name pattern, `#` is replaced per frame
pub const DEFAULT_PATTERN: &str = "frame-#.bin";

/// Writes frame payloads to files
///
/// The first `#` in the pattern is replaced by `<stream>-<sequence>`, with the sequence
/// zero-padded to six digits, and every frame goes to its own truncated file. Without a `#`
/// all frames are appended to the same file.
#[derive(Debug, Clone)]
pub struct BufferWriter {
    pattern: String,
}

impl Default for BufferWriter {
    fn default() -> Self {
        BufferWriter::new(DEFAULT_PATTERN)
    }
}

impl BufferWriter {
    pub fn new<S: Into<String>>(pattern: S) -> Self {
        BufferWriter {
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// File a frame of `stream_name` with `sequence` is written to
    ///
    /// # Example
    ///
    /// ```
    /// use vcam::BufferWriter;
    ///
    /// let writer = BufferWriter::default();
    /// assert_eq!(writer.filename("Stream1", 42).to_str(), Some("frame-Stream1-000042.bin"));
    /// ```
    pub fn filename(&self, stream_name: &str, sequence: u32) -> PathBuf {
        PathBuf::from(self.pattern.replacen(
            '#',
            &format!("{}-{:06}", stream_name, sequence),
            1,
        ))
    }

    /// Writes the payload of every plane of `buffer`
    ///
    /// Returns the number of bytes written.
    pub fn write(&self, buffer: &FrameBuffer, stream_name: &str) -> io::Result<usize> {
        let metadata = buffer.metadata();
        let per_frame = self.pattern.contains('#');
        let path = self.filename(stream_name, metadata.sequence);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!per_frame)
            .truncate(per_frame)
            .mode(0o666)
            .open(&path)?;

        let mut written = 0;
        for (index, plane) in buffer.planes().iter().enumerate() {
            let used = metadata
                .planes
                .get(index)
                .map_or(plane.length, |&used| used as usize);
            if used > plane.length {
                warn!(
                    "payload size {} larger than plane size {}",
                    used, plane.length
                );
            }

            let data = buffer.payload(index).unwrap_or_default();
            file.write_all(data)?;
            written += data.len();
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_hash_is_replaced() {
        let writer = BufferWriter::new("out/#-#.raw");
        assert_eq!(
            writer.filename("Stream2", 7),
            PathBuf::from("out/Stream2-000007-#.raw")
        );
    }

    #[test]
    fn pattern_without_hash_is_used_verbatim() {
        let writer = BufferWriter::new("capture.yuv");
        assert_eq!(writer.filename("Stream1", 123456), PathBuf::from("capture.yuv"));
    }

    #[test]
    fn long_sequences_are_not_truncated() {
        let writer = BufferWriter::default();
        assert_eq!(
            writer.filename("Stream1", 1234567),
            PathBuf::from("frame-Stream1-1234567.bin")
        );
    }
}
