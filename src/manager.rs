use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use log::{debug, info};

use crate::camera::{Camera, CameraInfo};
use crate::device::{self, Handle};
use crate::error::{Error, Result};

/// Enumerates the cameras of the system
///
/// # Example
///
/// ```
/// use vcam::CameraManager;
///
/// let mut manager = CameraManager::new();
/// manager.start().unwrap();
/// for camera in manager.cameras() {
///     println!("Camera ID: {}", camera.id());
/// }
/// manager.stop();
/// ```
pub struct CameraManager {
    root: PathBuf,
    running: bool,
    cameras: Vec<CameraInfo>,
}

impl Default for CameraManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraManager {
    /// Returns a manager looking for device nodes in `/dev`
    pub fn new() -> Self {
        Self::with_root("/dev")
    }

    /// Returns a manager looking for `video*` device nodes in `root`
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        CameraManager {
            root: root.as_ref().to_path_buf(),
            running: false,
            cameras: Vec::new(),
        }
    }

    /// Scans for capture cameras
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(Error::ManagerRunning);
        }

        let mut nodes: Vec<(usize, PathBuf)> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter_map(|path| device::node_index(&path).map(|index| (index, path)))
            .collect();
        nodes.sort();

        self.cameras = nodes
            .into_iter()
            .filter_map(|(_, path)| probe(&path))
            .collect();
        self.running = true;

        info!("found {} camera(s) in {}", self.cameras.len(), self.root.display());
        Ok(())
    }

    /// Forgets all cameras
    ///
    /// Cameras handed out earlier stay usable.
    pub fn stop(&mut self) {
        self.cameras.clear();
        self.running = false;
    }

    /// Cameras found by the last [`CameraManager::start`], ordered by node index
    pub fn cameras(&self) -> &[CameraInfo] {
        &self.cameras
    }

    /// Returns the camera with the given id
    pub fn get(&self, id: &str) -> Option<Camera> {
        self.cameras
            .iter()
            .find(|info| info.id() == id)
            .cloned()
            .map(Camera::new)
    }
}

/// Opens a node and keeps it if it can stream video
fn probe(path: &Path) -> Option<CameraInfo> {
    let caps = match Handle::open(path).and_then(|handle| handle.query_caps()) {
        Ok(caps) => caps,
        Err(e) => {
            debug!("skipping {}: {}", path.display(), e);
            return None;
        }
    };

    if !caps.is_camera() {
        debug!("skipping {}: {}", path.display(), caps.capabilities);
        return None;
    }

    Some(CameraInfo {
        id: path.to_string_lossy().into_owned(),
        name: caps.card,
        driver: caps.driver,
        bus: caps.bus,
        claimed: Arc::new(AtomicBool::new(false)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_files_are_not_cameras() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["video0", "video1", "vbi0", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let mut manager = CameraManager::with_root(dir.path());
        manager.start().unwrap();
        assert!(manager.cameras().is_empty());
        assert!(manager.get(&dir.path().join("video0").to_string_lossy()).is_none());
    }

    #[test]
    fn start_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = CameraManager::with_root(dir.path());
        manager.start().unwrap();
        assert!(matches!(manager.start(), Err(Error::ManagerRunning)));

        manager.stop();
        manager.start().unwrap();
    }

    #[test]
    fn missing_root_is_an_error() {
        let mut manager = CameraManager::with_root("/nonexistent/vcam");
        assert!(matches!(manager.start(), Err(Error::Io(_))));
    }
}
