use crate::errors::{DetectionError, ScanError};
use crate::models::config::OrchestratorConfig;
use crate::models::detection::{DetectionOutcome, DetectionResult, ServerInfo};
use crate::models::frame::Frame;
use crate::models::label::ScannedLabel;
use crate::models::session::{DetectionSnapshot, ScanEvent, ScanState, SessionStatus};
use crate::services::box_refiner::BoxRefiner;
use crate::services::detection_client::LabelDetector;
use crate::services::frame_source::{CameraDevice, FrameSource};
use crate::services::ocr::preprocessing::edge_density;
use crate::services::ocr::TextExtractor;
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Receives every [`ScanEvent`] of a session
pub type EventCallback = Arc<dyn Fn(ScanEvent) + Send + Sync>;

const SCANNING_MESSAGE: &str = "Scanning for a label";

/// Detection, refinement and extraction, shared by the scan loop and still images
pub struct ScanPipeline {
    detector: Arc<dyn LabelDetector>,
    refiner: BoxRefiner,
    extractor: TextExtractor,
    config: OrchestratorConfig,
    unreachable_budget: u32,
    /// Held for the whole of a cycle; at most one cycle runs at a time
    gate: Arc<Mutex<()>>,
}

impl ScanPipeline {
    pub fn new(
        detector: Arc<dyn LabelDetector>,
        refiner: BoxRefiner,
        extractor: TextExtractor,
        config: OrchestratorConfig,
        unreachable_budget: u32,
    ) -> Self {
        Self {
            detector,
            refiner,
            extractor,
            config,
            unreachable_budget: unreachable_budget.max(1),
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Refine the coarse box on a blocking thread
    async fn refine(&self, image: &Arc<RgbImage>, result: &mut DetectionResult) {
        if result.refined.is_some() || !self.detector.wants_refinement() {
            return;
        }

        let refiner = self.refiner.clone();
        let image = Arc::clone(image);
        let bbox = result.bbox;
        match tokio::task::spawn_blocking(move || refiner.refine(&image, &bbox)).await {
            Ok(refined) => {
                debug!(kind = ?refined.kind, "Box refined");
                result.refined = Some(refined);
            }
            Err(e) => warn!(error = %e, "Refinement task failed"),
        }
    }

    /// Label pixels for extraction
    ///
    /// The HTTP client rejects detections without a crop, so the frame crop
    /// only serves detectors that leave `cropped_region` empty.
    fn take_region(image: &RgbImage, result: &mut DetectionResult) -> Option<RgbImage> {
        if let Some(crop) = result.cropped_region.take() {
            return Some(crop);
        }

        let roi = result.bbox.to_roi().clamp_to(image.width(), image.height())?;
        Some(
            image::imageops::crop_imm(image, roi.x as u32, roi.y as u32, roi.width, roi.height)
                .to_image(),
        )
    }

    /// Degraded-mode stand-in for the detector
    fn looks_like_label(&self, image: &RgbImage) -> bool {
        let density = edge_density(image, self.config.degraded_sample_width);
        debug!(density, threshold = self.config.degraded_edge_density, "Edge density");
        density >= self.config.degraded_edge_density
    }
}

/// Mutable state of one scan session, owned by its worker
#[derive(Debug, Default)]
struct ScanSession {
    state: ScanState,
    active: bool,
    paused: bool,
    awaiting_resume: bool,
    degraded: bool,
    in_flight: bool,
    consecutive_unreachable: u32,
    message: Option<String>,
    last_detection: Option<DetectionSnapshot>,
    last_label: Option<ScannedLabel>,
}

impl ScanSession {
    fn started(degraded: bool) -> Self {
        Self {
            active: true,
            degraded,
            ..Self::default()
        }
    }

    fn sampling(&self) -> bool {
        self.active && !self.paused && !self.awaiting_resume
    }

    fn snapshot(&self, dropped_frames: u64) -> SessionStatus {
        SessionStatus {
            state: self.state,
            is_active: self.active,
            is_paused: self.paused,
            awaiting_resume: self.awaiting_resume,
            degraded: self.degraded,
            in_flight: self.in_flight,
            consecutive_unreachable: self.consecutive_unreachable,
            message: self.message.clone(),
            last_detection: self.last_detection,
            last_label: self.last_label.clone(),
            dropped_frames,
        }
    }
}

enum Control {
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<Result<(), ScanError>>),
    Reprobe(oneshot::Sender<Result<ServerInfo, ScanError>>),
    Stop,
}

/// The single task that drives a session
struct ScanWorker {
    pipeline: Arc<ScanPipeline>,
    source: FrameSource,
    session: ScanSession,
    status: Arc<watch::Sender<SessionStatus>>,
    on_event: EventCallback,
}

impl ScanWorker {
    /// Sample, detect and extract until stopped. Hands the frame source back.
    async fn run(mut self, mut control: mpsc::Receiver<Control>) -> FrameSource {
        let mut ticker = tokio::time::interval(self.pipeline.config.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.set_state(ScanState::Scanning, Some(SCANNING_MESSAGE.to_string()));

        loop {
            tokio::select! {
                command = control.recv() => {
                    if !self.handle(command).await {
                        break;
                    }
                }
                _ = ticker.tick(), if self.session.sampling() => {
                    let Some(frame) = self.source.latest_frame() else {
                        continue;
                    };

                    // A control message cancels the cycle in flight
                    let interrupted = tokio::select! {
                        command = control.recv() => Some(command),
                        _ = self.run_cycle(frame) => None,
                    };
                    if let Some(command) = interrupted {
                        debug!("Cycle cancelled by control message");
                        self.session.in_flight = false;
                        self.set_state(ScanState::Scanning, Some(SCANNING_MESSAGE.to_string()));
                        if !self.handle(command).await {
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown();
        self.source
    }

    /// Apply a control message. Returns false when the session must end.
    async fn handle(&mut self, command: Option<Control>) -> bool {
        match command {
            None | Some(Control::Stop) => false,
            Some(Control::Pause(reply)) => {
                self.pause();
                let _ = reply.send(());
                true
            }
            Some(Control::Resume(reply)) => {
                let result = self.resume();
                let _ = reply.send(result);
                true
            }
            Some(Control::Reprobe(reply)) => {
                let result = self.reprobe().await;
                let _ = reply.send(result);
                true
            }
        }
    }

    fn pause(&mut self) {
        if self.session.paused {
            return;
        }
        if let Err(e) = self.source.stop() {
            warn!(error = %e, "Camera cleanup failed on pause");
        }
        self.session.paused = true;
        self.session.in_flight = false;
        info!("Scanning paused");
        self.set_state(ScanState::Idle, Some("Paused".to_string()));
    }

    fn resume(&mut self) -> Result<(), ScanError> {
        if self.session.paused {
            if let Err(e) = self.source.start() {
                error!(error = %e, "Cannot reopen frame source");
                self.emit(ScanEvent::SourceFailed {
                    reason: e.to_string(),
                });
                self.session.message = Some(e.to_string());
                self.publish();
                return Err(e);
            }
            self.session.paused = false;
        }

        self.session.awaiting_resume = false;
        info!("Scanning resumed");
        self.set_state(ScanState::Scanning, Some(SCANNING_MESSAGE.to_string()));
        Ok(())
    }

    async fn reprobe(&mut self) -> Result<ServerInfo, ScanError> {
        match self.pipeline.detector.probe().await {
            Ok(info) => {
                info!(status = %info.status, model = ?info.model, "Detector reachable");
                self.session.consecutive_unreachable = 0;
                if self.session.degraded {
                    self.session.degraded = false;
                    info!("Leaving degraded mode");
                    self.emit(ScanEvent::DegradedMode { active: false });
                }
                self.publish();
                Ok(info)
            }
            Err(e) => {
                warn!(error = %e, "Detector probe failed");
                self.publish();
                Err(e.into())
            }
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.source.stop() {
            warn!(error = %e, "Camera cleanup failed on stop");
        }
        self.session.active = false;
        self.session.paused = false;
        self.session.awaiting_resume = false;
        self.session.in_flight = false;
        info!(dropped_frames = self.source.dropped_frames(), "Scan session ended");
        self.set_state(ScanState::Idle, Some("Stopped".to_string()));
    }

    /// One detection-and-extraction cycle on the sampled frame
    async fn run_cycle(&mut self, frame: Frame) {
        let Ok(_permit) = Arc::clone(&self.pipeline.gate).try_lock_owned() else {
            debug!("Another cycle holds the gate, tick discarded");
            return;
        };

        let image = match frame.to_rgb_image() {
            Ok(image) => Arc::new(image),
            Err(e) => {
                warn!(error = %e, "Skipping unusable frame");
                return;
            }
        };
        drop(frame);

        self.session.in_flight = true;
        self.publish();

        if self.session.degraded {
            self.degraded_cycle(image).await;
        } else {
            self.detection_cycle(image).await;
        }

        self.session.in_flight = false;
        self.publish();
    }

    async fn detection_cycle(&mut self, image: Arc<RgbImage>) {
        let started = Instant::now();
        let outcome = self.pipeline.detector.detect(&image).await;
        debug!(latency_ms = started.elapsed().as_millis() as u64, "Detection finished");

        let mut result = match outcome {
            Err(e) => {
                self.on_detection_error(e);
                return;
            }
            Ok(DetectionOutcome::NotDetected) => {
                self.session.consecutive_unreachable = 0;
                self.set_state(ScanState::Scanning, Some("No label in view".to_string()));
                return;
            }
            Ok(DetectionOutcome::Malformed(reason)) => {
                self.session.consecutive_unreachable = 0;
                debug!(reason = %reason, "Ignoring malformed detection");
                self.set_state(ScanState::Scanning, Some("No usable detection".to_string()));
                return;
            }
            Ok(DetectionOutcome::Detected(result)) => {
                self.session.consecutive_unreachable = 0;
                result
            }
        };

        self.pipeline.refine(&image, &mut result).await;
        self.session.last_detection = Some(DetectionSnapshot::from(&result));

        if result.confidence < self.pipeline.config.lock_threshold {
            debug!(confidence = result.confidence, "Candidate below lock threshold");
            self.set_state(ScanState::Candidate, Some("Label found, hold steady".to_string()));
            return;
        }

        info!(confidence = result.confidence, "Label locked");
        self.set_state(ScanState::Locked, Some("Label locked".to_string()));
        tokio::time::sleep(self.pipeline.config.stabilization_delay()).await;

        let region = ScanPipeline::take_region(&image, &mut result);
        drop(result);
        drop(image);

        match region {
            Some(region) => self.extract(region).await,
            None => self.fail("detection box lies outside the frame".to_string()),
        }
    }

    async fn degraded_cycle(&mut self, image: Arc<RgbImage>) {
        if !self.pipeline.looks_like_label(&image) {
            self.set_state(
                ScanState::Scanning,
                Some("Detector offline, waiting for a label".to_string()),
            );
            return;
        }

        debug!("Degraded mode: extracting the full frame");
        let region = Arc::try_unwrap(image).unwrap_or_else(|shared| (*shared).clone());
        self.extract(region).await;
    }

    fn on_detection_error(&mut self, err: DetectionError) {
        match &err {
            DetectionError::Unreachable(_) => self.session.consecutive_unreachable += 1,
            // The service answered, so it is reachable
            DetectionError::Server { .. } => self.session.consecutive_unreachable = 0,
            DetectionError::Timeout(_) | DetectionError::Request(_) => {}
        }
        warn!(
            error = %err,
            consecutive_unreachable = self.session.consecutive_unreachable,
            "Detection failed"
        );

        if !self.session.degraded
            && self.session.consecutive_unreachable >= self.pipeline.unreachable_budget
        {
            self.session.degraded = true;
            warn!(
                budget = self.pipeline.unreachable_budget,
                "Detector unreachable, entering degraded mode"
            );
            self.emit(ScanEvent::DegradedMode { active: true });
        }

        self.set_state(ScanState::Scanning, Some(format!("Detection failed: {}", err)));
    }

    async fn extract(&mut self, region: RgbImage) {
        self.set_state(ScanState::Extracting, None);
        let label = self.pipeline.extractor.extract(&region).await;
        drop(region);

        match label {
            Some(label) if label.has_valid_text() => {
                info!(chars = label.text.chars().count(), color = ?label.dominant_color, "Label captured");
                self.session.last_label = Some(label.clone());
                self.set_state(ScanState::Succeeded, None);
                self.emit(ScanEvent::LabelScanned(label));

                self.session.awaiting_resume = true;
                self.set_state(
                    ScanState::Scanning,
                    Some("Label captured, resume to scan again".to_string()),
                );
            }
            Some(label) => self.fail(format!("text too short: {:?}", label.text.trim())),
            None => self.fail(ScanError::NoTextFound.to_string()),
        }
    }

    fn fail(&mut self, reason: String) {
        info!(reason = %reason, "Extraction failed");
        self.set_state(ScanState::Failed, Some(reason.clone()));
        self.emit(ScanEvent::ExtractionFailed { reason });
        self.set_state(ScanState::Scanning, Some(SCANNING_MESSAGE.to_string()));
    }

    /// Update the state; the caller is notified only when something changed
    fn set_state(&mut self, state: ScanState, message: Option<String>) {
        let changed = self.session.state != state || self.session.message != message;
        self.session.state = state;
        self.session.message = message.clone();
        self.publish();

        if changed {
            debug!(?state, message = ?message, "State changed");
            self.emit(ScanEvent::StateChanged { state, message });
        }
    }

    fn emit(&self, event: ScanEvent) {
        debug!(event = event.name(), "Emitting event");
        (self.on_event)(event);
    }

    fn publish(&self) {
        self.status
            .send_replace(self.session.snapshot(self.source.dropped_frames()));
    }
}

struct SessionHandle {
    control: mpsc::Sender<Control>,
    worker: JoinHandle<FrameSource>,
}

enum Slot {
    Idle(FrameSource),
    Running(SessionHandle),
    /// The worker died while owning the camera
    Lost,
}

/// Caller-facing handle over the scan pipeline and its camera
pub struct LabelScanner {
    pipeline: Arc<ScanPipeline>,
    slot: Mutex<Slot>,
    status: Arc<watch::Sender<SessionStatus>>,
}

impl LabelScanner {
    pub fn new(pipeline: ScanPipeline, camera: Box<dyn CameraDevice>, degraded: bool) -> Self {
        let (status, _) = watch::channel(SessionStatus {
            degraded,
            ..SessionStatus::default()
        });

        Self {
            pipeline: Arc::new(pipeline),
            slot: Mutex::new(Slot::Idle(FrameSource::new(camera))),
            status: Arc::new(status),
        }
    }

    /// Open the camera and start the scan loop. No-op while already scanning.
    pub async fn start_scanning(&self, on_event: EventCallback) -> Result<(), ScanError> {
        let mut slot = self.slot.lock().await;
        let mut source = match std::mem::replace(&mut *slot, Slot::Lost) {
            Slot::Idle(source) => source,
            running @ Slot::Running(_) => {
                *slot = running;
                debug!("Scan session already running");
                return Ok(());
            }
            Slot::Lost => {
                return Err(ScanError::SourceUnavailable(
                    "camera was lost by a failed session".to_string(),
                ))
            }
        };

        if let Err(e) = source.start() {
            error!(error = %e, "Cannot start frame source");
            *slot = Slot::Idle(source);
            on_event(ScanEvent::SourceFailed {
                reason: e.to_string(),
            });
            return Err(e);
        }

        let degraded = self.status.borrow().degraded;
        let session = ScanSession::started(degraded);

        // Visible to callers before the worker first runs
        self.status.send_replace(SessionStatus {
            state: ScanState::Scanning,
            message: Some(SCANNING_MESSAGE.to_string()),
            ..session.snapshot(source.dropped_frames())
        });

        let (control, control_rx) = mpsc::channel(8);
        let worker = ScanWorker {
            pipeline: Arc::clone(&self.pipeline),
            source,
            session,
            status: Arc::clone(&self.status),
            on_event,
        };

        *slot = Slot::Running(SessionHandle {
            control,
            worker: tokio::spawn(worker.run(control_rx)),
        });
        info!(
            degraded,
            recognizer = self.pipeline.extractor.recognizer_name(),
            "Scanning started"
        );
        Ok(())
    }

    /// End the session and release the camera. Safe to call repeatedly.
    pub async fn stop_scanning(&self) {
        let mut slot = self.slot.lock().await;
        let handle = match std::mem::replace(&mut *slot, Slot::Lost) {
            Slot::Running(handle) => handle,
            other => {
                *slot = other;
                return;
            }
        };

        let _ = handle.control.send(Control::Stop).await;
        match handle.worker.await {
            Ok(source) => *slot = Slot::Idle(source),
            Err(e) => {
                error!(error = %e, "Scan worker failed, camera not recovered");
                self.status.send_modify(|status| {
                    status.state = ScanState::Idle;
                    status.is_active = false;
                    status.in_flight = false;
                });
            }
        }
    }

    /// Stop sampling and close the camera, keeping the session
    pub async fn pause(&self) {
        let Some(control) = self.control().await else {
            return;
        };
        let (reply, done) = oneshot::channel();
        if control.send(Control::Pause(reply)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Reopen the camera after `pause`, or continue after a captured label
    pub async fn resume(&self) -> Result<(), ScanError> {
        let Some(control) = self.control().await else {
            return Ok(());
        };
        let (reply, done) = oneshot::channel();
        if control.send(Control::Resume(reply)).await.is_err() {
            return Ok(());
        }
        done.await.unwrap_or(Ok(()))
    }

    /// Probe the detector; success leaves degraded mode
    pub async fn reprobe(&self) -> Result<ServerInfo, ScanError> {
        if let Some(control) = self.control().await {
            let (reply, done) = oneshot::channel();
            if control.send(Control::Reprobe(reply)).await.is_ok() {
                if let Ok(result) = done.await {
                    return result;
                }
            }
        }

        let info = self.pipeline.detector.probe().await?;
        info!(status = %info.status, "Detector reachable");
        self.status.send_modify(|status| {
            status.degraded = false;
            status.consecutive_unreachable = 0;
        });
        Ok(info)
    }

    /// Detect and extract a label from a single image
    ///
    /// Shares the single-flight gate with the scan loop, so it waits for a
    /// running cycle to finish. Returns `None` when no valid label was read.
    pub async fn process_still_image(&self, image: &RgbImage) -> Result<Option<ScannedLabel>, ScanError> {
        let _permit = self.pipeline.gate.lock().await;
        let pipeline = &self.pipeline;

        let label = if self.status.borrow().degraded {
            info!("Detector offline, extracting the whole image");
            pipeline.extractor.extract(image).await
        } else {
            let image = Arc::new(image.clone());
            match pipeline.detector.detect(&image).await? {
                DetectionOutcome::Detected(mut result) => {
                    pipeline.refine(&image, &mut result).await;
                    match ScanPipeline::take_region(&image, &mut result) {
                        Some(region) => pipeline.extractor.extract(&region).await,
                        None => None,
                    }
                }
                DetectionOutcome::NotDetected => {
                    info!("No label in image");
                    None
                }
                DetectionOutcome::Malformed(reason) => {
                    warn!(reason = %reason, "Malformed detection for still image");
                    None
                }
            }
        };

        Ok(label.filter(ScannedLabel::has_valid_text))
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver that sees every status update
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    async fn control(&self) -> Option<mpsc::Sender<Control>> {
        match &*self.slot.lock().await {
            Slot::Running(handle) => Some(handle.control.clone()),
            _ => None,
        }
    }
}
