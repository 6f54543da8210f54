use crate::errors::ScanError;
use crate::models::config::{DetectorMode, OcrBackend, OcrConfig, ScannerConfig};
use crate::models::detection::ServerInfo;
use crate::services::box_refiner::BoxRefiner;
use crate::services::detection_client::{HttpDetectionClient, LabelDetector};
use crate::services::frame_source::CameraDevice;
use crate::services::local_detector::LocalContourDetector;
use crate::services::ocr::{HttpRecognizer, TextExtractor, TextRecognizer};
use crate::services::scanner::{LabelScanner, ScanPipeline};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What `initialize` learned about its backends
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Ready {
    /// The detector answered its probe; otherwise the scanner starts degraded
    pub detector_online: bool,
    pub server: Option<ServerInfo>,
    pub recognizer: String,
}

/// Build the scanner from configuration and probe the detector once
///
/// An unreachable detector is not an error: the scanner starts in degraded
/// mode and `reprobe` can bring it back.
pub async fn initialize(
    config: ScannerConfig,
    camera: Box<dyn CameraDevice>,
) -> Result<(LabelScanner, Ready), ScanError> {
    config.validate()?;

    let detector = build_detector(&config)?;
    let recognizer = build_recognizer(&config.ocr, config.extraction.recognition_timeout()).await?;
    let recognizer_name = recognizer.name().to_string();

    let (detector_online, server) = match detector.probe().await {
        Ok(server) => {
            info!(status = %server.status, model = ?server.model, device = ?server.device, "Detector online");
            (true, Some(server))
        }
        Err(e) => {
            warn!(error = %e, "Detector probe failed, starting in degraded mode");
            (false, None)
        }
    };

    let pipeline = ScanPipeline::new(
        detector,
        BoxRefiner::new(config.refinement.clone()),
        TextExtractor::new(recognizer, config.extraction.clone()),
        config.scanner.clone(),
        config.detection.unreachable_budget,
    );

    let ready = Ready {
        detector_online,
        server,
        recognizer: recognizer_name,
    };
    Ok((LabelScanner::new(pipeline, camera, !detector_online), ready))
}

/// Probe the configured detector without building a scanner
pub async fn probe(config: &ScannerConfig) -> Result<ServerInfo, ScanError> {
    let detector = build_detector(config)?;
    Ok(detector.probe().await?)
}

pub fn build_detector(config: &ScannerConfig) -> Result<Arc<dyn LabelDetector>, ScanError> {
    let detector: Arc<dyn LabelDetector> = match config.detection.mode {
        DetectorMode::Http => Arc::new(HttpDetectionClient::new(&config.detection)?),
        DetectorMode::LocalContour => Arc::new(LocalContourDetector::new(
            config.detection.local.clone(),
            config.refinement.clone(),
            config.detection.crop_padding,
        )),
    };
    Ok(detector)
}

pub async fn build_recognizer(
    config: &OcrConfig,
    timeout: Duration,
) -> Result<Arc<dyn TextRecognizer>, ScanError> {
    match config.backend {
        OcrBackend::Http => {
            let recognizer = HttpRecognizer::new(&config.base_url, timeout)?;
            if let Err(e) = recognizer.health_check().await {
                warn!(url = %config.base_url, error = %e, "Recognition server not healthy yet");
            }
            Ok(Arc::new(recognizer))
        }
        #[cfg(feature = "tesseract")]
        OcrBackend::Tesseract => Ok(Arc::new(crate::services::ocr::TesseractRecognizer::new(
            &config.lang,
            config.psm,
        ))),
        #[cfg(not(feature = "tesseract"))]
        OcrBackend::Tesseract => Err(ScanError::Config(
            "tesseract backend requires the `tesseract` feature".to_string(),
        )),
    }
}
