use std::fs;
use std::os::unix::fs::PermissionsExt;

use tempfile::TempDir;
use vcam::{BufferWriter, FrameBuffer, FrameStatus};

fn frame(sequence: u32, data: &[u8], bytesused: u32) -> FrameBuffer {
    let mut buffer = FrameBuffer::host(0, data.to_vec(), &[data.len()]);
    let metadata = buffer.metadata_mut();
    metadata.status = FrameStatus::Success;
    metadata.sequence = sequence;
    metadata.planes = vec![bytesused];
    buffer
}

#[test]
fn test_one_file_per_frame() {
    let dir = TempDir::new().unwrap();
    let pattern = dir.path().join("frame-#.bin");
    let writer = BufferWriter::new(pattern.to_str().unwrap());

    assert_eq!(writer.write(&frame(1, b"abcd", 4), "Stream1").unwrap(), 4);
    assert_eq!(writer.write(&frame(2, b"efgh", 2), "Stream1").unwrap(), 2);

    let first = dir.path().join("frame-Stream1-000001.bin");
    let second = dir.path().join("frame-Stream1-000002.bin");
    assert_eq!(fs::read(first).unwrap(), b"abcd");
    assert_eq!(fs::read(second).unwrap(), b"ef");
}

#[test]
fn test_per_frame_file_is_truncated() {
    let dir = TempDir::new().unwrap();
    let writer = BufferWriter::new(dir.path().join("#.raw").to_str().unwrap());

    writer.write(&frame(5, b"0123456789", 10), "Stream1").unwrap();
    writer.write(&frame(5, b"xyz", 3), "Stream1").unwrap();

    let path = dir.path().join("Stream1-000005.raw");
    assert_eq!(fs::read(path).unwrap(), b"xyz");
}

#[test]
fn test_single_file_is_appended() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("capture.yuv");
    let writer = BufferWriter::new(path.to_str().unwrap());

    for seq in 0..3 {
        writer.write(&frame(seq, b"ab", 2), "Stream1").unwrap();
    }

    assert_eq!(fs::read(path).unwrap(), b"ababab");
}

#[test]
fn test_oversized_payload_is_clamped() {
    let dir = TempDir::new().unwrap();
    let writer = BufferWriter::new(dir.path().join("#").to_str().unwrap());

    let written = writer.write(&frame(9, b"1234", 4096), "Stream1").unwrap();
    assert_eq!(written, 4);
    assert_eq!(
        fs::read(dir.path().join("Stream1-000009")).unwrap(),
        b"1234"
    );
}

#[test]
fn test_multi_plane_buffers_are_concatenated() {
    let dir = TempDir::new().unwrap();
    let writer = BufferWriter::new(dir.path().join("#.bin").to_str().unwrap());

    let mut buffer = FrameBuffer::host(3, b"YYYYUV".to_vec(), &[4, 2]);
    buffer.metadata_mut().sequence = 11;
    buffer.metadata_mut().planes = vec![4, 1];

    assert_eq!(writer.write(&buffer, "Stream2").unwrap(), 5);
    assert_eq!(
        fs::read(dir.path().join("Stream2-000011.bin")).unwrap(),
        b"YYYYU"
    );
}

#[test]
fn test_missing_directory_is_an_error() {
    let dir = TempDir::new().unwrap();
    let writer = BufferWriter::new(dir.path().join("missing/#.bin").to_str().unwrap());
    assert!(writer.write(&frame(0, b"a", 1), "Stream1").is_err());
}

fn umask() -> u32 {
    let status = fs::read_to_string("/proc/self/status").unwrap();
    let line = status.lines().find(|l| l.starts_with("Umask:")).unwrap();
    u32::from_str_radix(line["Umask:".len()..].trim(), 8).unwrap()
}

#[test]
fn test_files_are_created_world_writable_before_umask() {
    let dir = TempDir::new().unwrap();
    let writer = BufferWriter::new(dir.path().join("#.bin").to_str().unwrap());
    writer.write(&frame(1, b"a", 1), "Stream1").unwrap();

    let path = dir.path().join("Stream1-000001.bin");
    let mode = fs::metadata(path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o666 & !umask());
}
