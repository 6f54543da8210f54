use crate::errors::ScanError;
use crate::models::frame::Frame;
use crate::services::frame_source::{CameraDevice, FrameSlot};
use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

/// Camera that replays a fixed list of frames on a producer thread
pub struct ReplayCamera {
    name: String,
    frames: Arc<Vec<Frame>>,
    interval: Duration,
    looped: bool,
    stop_signal: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ReplayCamera {
    pub fn from_frames(frames: Vec<Frame>, interval: Duration) -> Self {
        Self {
            name: format!("replay({} frames)", frames.len()),
            frames: Arc::new(frames),
            interval,
            looped: true,
            stop_signal: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Load every image in `dir`, sorted by file name
    pub fn from_dir(dir: &Path, interval: Duration) -> Result<Self, ScanError> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            ScanError::SourceUnavailable(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            match image::open(path) {
                Ok(img) => frames.push(Frame::from_rgb(img.to_rgb8())),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable image"),
            }
        }

        let mut camera = Self::from_frames(frames, interval);
        camera.name = format!("replay({})", dir.display());
        Ok(camera)
    }

    /// Stop after the last frame instead of starting over
    pub fn once(mut self) -> Self {
        self.looped = false;
        self
    }

    fn join_worker(&mut self) -> Result<(), ScanError> {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            handle
                .join()
                .map_err(|_| ScanError::ResourceCleanupFailure("replay thread panicked".into()))?;
        }
        Ok(())
    }
}

impl CameraDevice for ReplayCamera {
    fn open(&mut self, sink: Arc<FrameSlot>) -> Result<(), ScanError> {
        if self.frames.is_empty() {
            return Err(ScanError::SourceUnavailable(format!("{} has no frames", self.name)));
        }

        self.join_worker()?;
        let stop_signal = Arc::new(AtomicBool::new(false));
        self.stop_signal = Arc::clone(&stop_signal);

        let frames = Arc::clone(&self.frames);
        let interval = self.interval;
        let looped = self.looped;

        let handle = std::thread::Builder::new()
            .name("replay-camera".to_string())
            .spawn(move || {
                let mut index = 0usize;
                while !stop_signal.load(Ordering::SeqCst) {
                    if index == frames.len() {
                        if !looped {
                            debug!("Replay finished");
                            break;
                        }
                        index = 0;
                    }

                    let mut frame = frames[index].clone();
                    frame.timestamp = Utc::now();
                    sink.publish(frame);
                    index += 1;

                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| ScanError::SourceUnavailable(format!("cannot spawn replay thread: {}", e)))?;

        self.worker = Some(handle);
        info!(camera = %self.name, "Replay camera opened");
        Ok(())
    }

    fn close(&mut self) -> Result<(), ScanError> {
        self.join_worker()
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

impl Drop for ReplayCamera {
    fn drop(&mut self) {
        let _ = self.join_worker();
    }
}
