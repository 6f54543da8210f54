use thiserror::Error;

/// Errors surfaced by the scanning pipeline
#[derive(Debug, Error)]
pub enum ScanError {
    /// Camera could not be opened. Fatal for the session.
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("detection timed out after {0} ms")]
    DetectionTimeout(u64),

    #[error("detection service unreachable: {0}")]
    DetectionUnreachable(String),

    /// The service answered but the call failed
    #[error("detection failed: {0}")]
    DetectionFailed(String),

    /// Refinement found no usable contour. Callers fall back to the coarse box.
    #[error("box refinement failed: {0}")]
    RefinementFailure(String),

    #[error("no text found in label region")]
    NoTextFound,

    /// Releasing a resource failed. Logged, never returned to the caller.
    #[error("resource cleanup failed: {0}")]
    ResourceCleanupFailure(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("text recognition failed: {0}")]
    Recognition(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DetectionError> for ScanError {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::Timeout(ms) => ScanError::DetectionTimeout(ms),
            DetectionError::Unreachable(msg) => ScanError::DetectionUnreachable(msg),
            other => ScanError::DetectionFailed(other.to_string()),
        }
    }
}

/// Failure of a single detection call
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DetectionError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// The service answered with a non-success status. Counts as a failed frame,
    /// not as an outage.
    #[error("service returned status {status}: {message}")]
    Server { status: u16, message: String },

    #[error("request could not be built: {0}")]
    Request(String),
}

impl DetectionError {
    /// Whether this failure counts toward the unreachable budget
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DetectionError::Unreachable(_))
    }
}
