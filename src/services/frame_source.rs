use crate::errors::ScanError;
use crate::models::frame::Frame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Single-slot mailbox between the camera thread and the scan worker
///
/// Publishing overwrites whatever frame is still unread. There is no queue.
#[derive(Default)]
pub struct FrameSlot {
    slot: Mutex<Option<Frame>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the newest frame, replacing an unread one
    pub fn publish(&self, frame: Frame) {
        let previous = self.slot.lock().replace(frame);
        self.published.fetch_add(1, Ordering::Relaxed);
        if previous.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the latest frame, leaving the slot empty
    pub fn take(&self) -> Option<Frame> {
        self.slot.lock().take()
    }

    pub fn clear(&self) {
        self.slot.lock().take();
    }

    pub fn published_frames(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frames overwritten before anyone read them
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Camera producer that pushes frames into a [`FrameSlot`]
pub trait CameraDevice: Send {
    /// Start producing frames into `sink`
    fn open(&mut self, sink: Arc<FrameSlot>) -> Result<(), ScanError>;

    /// Stop producing frames and release the device
    fn close(&mut self) -> Result<(), ScanError>;

    /// Human readable device name for logs
    fn describe(&self) -> String;
}

/// Latest-frame view over a camera device
pub struct FrameSource {
    device: Box<dyn CameraDevice>,
    slot: Arc<FrameSlot>,
    running: bool,
}

impl FrameSource {
    pub fn new(device: Box<dyn CameraDevice>) -> Self {
        Self {
            device,
            slot: Arc::new(FrameSlot::new()),
            running: false,
        }
    }

    /// Open the camera. Calling it while running is a no-op.
    pub fn start(&mut self) -> Result<(), ScanError> {
        if self.running {
            return Ok(());
        }

        self.device.open(Arc::clone(&self.slot)).map_err(|e| match e {
            ScanError::SourceUnavailable(_) => e,
            other => ScanError::SourceUnavailable(other.to_string()),
        })?;

        self.running = true;
        info!(device = %self.device.describe(), "Frame source started");
        Ok(())
    }

    /// Close the camera and drop any pending frame. Calling it twice is a no-op.
    pub fn stop(&mut self) -> Result<(), ScanError> {
        if !self.running {
            return Ok(());
        }

        self.running = false;
        self.slot.clear();

        match self.device.close() {
            Ok(()) => {
                info!(
                    device = %self.device.describe(),
                    dropped = self.slot.dropped_frames(),
                    "Frame source stopped"
                );
                Ok(())
            }
            Err(e) => {
                warn!(device = %self.device.describe(), error = %e, "Camera close failed");
                Err(ScanError::ResourceCleanupFailure(e.to_string()))
            }
        }
    }

    /// Latest unread frame, if any. Never blocks.
    pub fn latest_frame(&self) -> Option<Frame> {
        if !self.running {
            return None;
        }
        let frame = self.slot.take();
        if frame.is_none() {
            debug!("No new frame since last sample");
        }
        frame
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn dropped_frames(&self) -> u64 {
        self.slot.dropped_frames()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Frame source cleanup on drop failed");
        }
    }
}
