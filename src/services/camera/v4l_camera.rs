use crate::errors::ScanError;
use crate::models::frame::{Frame, PixelFormat};
use crate::services::frame_source::{CameraDevice, FrameSlot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// V4L2 webcam producing YUYV frames
pub struct V4lCamera {
    path: String,
    width: u32,
    height: u32,
    stop_signal: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl V4lCamera {
    pub fn new(path: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            stop_signal: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn join_worker(&mut self) -> Result<(), ScanError> {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            handle
                .join()
                .map_err(|_| ScanError::ResourceCleanupFailure("capture thread panicked".into()))?;
        }
        Ok(())
    }
}

/// Open the device and negotiate YUYV, returning the granted size
fn open_device(path: &str, width: u32, height: u32) -> std::io::Result<(Device, u32, u32)> {
    let device = Device::with_path(path)?;
    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;

    if format.fourcc != FourCC::new(b"YUYV") {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("device does not support YUYV (got {})", format.fourcc),
        ));
    }
    Ok((device, format.width, format.height))
}

impl CameraDevice for V4lCamera {
    fn open(&mut self, sink: Arc<FrameSlot>) -> Result<(), ScanError> {
        self.join_worker()?;
        let stop_signal = Arc::new(AtomicBool::new(false));
        self.stop_signal = Arc::clone(&stop_signal);

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(u32, u32), String>>(1);
        let (path, width, height) = (self.path.clone(), self.width, self.height);

        // The stream borrows the device, so both live on the capture thread
        let handle = std::thread::Builder::new()
            .name("v4l-camera".to_string())
            .spawn(move || {
                let (device, w, h) = match open_device(&path, width, height) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, 4) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("cannot create capture stream: {}", e)));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok((w, h)));

                let frame_len = PixelFormat::Yuyv.buffer_len(w, h);
                while !stop_signal.load(Ordering::SeqCst) {
                    match stream.next() {
                        Ok((buffer, _meta)) => {
                            if buffer.len() < frame_len {
                                warn!(len = buffer.len(), expected = frame_len, "Short V4L2 buffer");
                                continue;
                            }
                            let data = buffer[..frame_len].to_vec();
                            sink.publish(Frame::new(w, h, PixelFormat::Yuyv, data));
                        }
                        Err(e) => {
                            warn!(error = %e, "V4L2 capture failed, stopping");
                            break;
                        }
                    }
                }
            })
            .map_err(|e| ScanError::SourceUnavailable(format!("cannot spawn capture thread: {}", e)))?;
        self.worker = Some(handle);

        let ready = ready_rx
            .recv_timeout(OPEN_TIMEOUT)
            .map_err(|_| ScanError::SourceUnavailable(format!("{} did not start", self.path)))?;

        match ready {
            Ok((w, h)) => {
                info!(device = %self.path, width = w, height = h, "V4L2 camera opened");
                Ok(())
            }
            Err(reason) => {
                let _ = self.join_worker();
                Err(ScanError::SourceUnavailable(format!("{}: {}", self.path, reason)))
            }
        }
    }

    fn close(&mut self) -> Result<(), ScanError> {
        self.join_worker()
    }

    fn describe(&self) -> String {
        format!("v4l2({})", self.path)
    }
}

impl Drop for V4lCamera {
    fn drop(&mut self) {
        let _ = self.join_worker();
    }
}
