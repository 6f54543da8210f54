use crate::models::detection::{DetectionBox, DetectionResult, RefinedBox};
use crate::models::label::ScannedLabel;
use serde::{Deserialize, Serialize};

/// Scan loop state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    /// Label seen below the lock threshold
    Candidate,
    /// Label seen at or above the lock threshold
    Locked,
    Extracting,
    Succeeded,
    Failed,
}

/// Geometry of the last detection, without pixels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DetectionSnapshot {
    pub bbox: DetectionBox,
    pub refined: Option<RefinedBox>,
    pub confidence: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl From<&DetectionResult> for DetectionSnapshot {
    fn from(result: &DetectionResult) -> Self {
        Self {
            bbox: result.bbox,
            refined: result.refined,
            confidence: result.confidence,
            source_width: result.source_width,
            source_height: result.source_height,
        }
    }
}

/// Read-only view of a scan session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SessionStatus {
    pub state: ScanState,
    /// Session started and not stopped
    pub is_active: bool,
    pub is_paused: bool,
    /// A label was captured; sampling waits for `resume`
    pub awaiting_resume: bool,
    pub degraded: bool,
    pub in_flight: bool,
    pub consecutive_unreachable: u32,
    pub message: Option<String>,
    pub last_detection: Option<DetectionSnapshot>,
    pub last_label: Option<ScannedLabel>,
    pub dropped_frames: u64,
}

/// Notification delivered to the caller
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ScanEvent {
    StateChanged {
        state: ScanState,
        message: Option<String>,
    },
    LabelScanned(ScannedLabel),
    ExtractionFailed {
        reason: String,
    },
    DegradedMode {
        active: bool,
    },
    /// The camera failed; the session cannot continue
    SourceFailed {
        reason: String,
    },
}

impl ScanEvent {
    /// Channel name for hosts that route events by string
    pub fn name(&self) -> &'static str {
        match self {
            ScanEvent::StateChanged { .. } => "scan:state-changed",
            ScanEvent::LabelScanned(_) => "scan:label",
            ScanEvent::ExtractionFailed { .. } => "scan:extraction-failed",
            ScanEvent::DegradedMode { .. } => "scan:degraded",
            ScanEvent::SourceFailed { .. } => "scan:source-failed",
        }
    }
}
