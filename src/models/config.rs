use crate::errors::ScanError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which detector feeds the scanner
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectorMode {
    /// Remote detection service
    #[default]
    Http,
    /// On-device contour detector, no network
    LocalContour,
}

/// Contour filter of the on-device detector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalDetectorConfig {
    pub min_area: f32,
    pub max_area: f32,
    pub min_aspect: f32,
    pub max_aspect: f32,
}

impl Default for LocalDetectorConfig {
    fn default() -> Self {
        Self {
            min_area: 5_000.0,
            max_area: 500_000.0,
            min_aspect: 0.3,
            max_aspect: 5.0,
        }
    }
}

/// Detection service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub mode: DetectorMode,
    pub base_url: String,
    pub endpoint: String,
    pub timeout_ms: u64,
    /// Consecutive unreachable errors before the session degrades
    pub unreachable_budget: u32,
    /// Frames are downscaled to this longest side before upload
    pub max_upload_dimension: u32,
    pub jpeg_quality: u8,
    /// Padding added around the box when cropping locally
    pub crop_padding: u32,
    pub local: LocalDetectorConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            mode: DetectorMode::Http,
            base_url: "http://127.0.0.1:8000".to_string(),
            endpoint: "/detect-and-crop".to_string(),
            timeout_ms: 2000,
            unreachable_budget: 3,
            max_upload_dimension: 1280,
            jpeg_quality: 90,
            crop_padding: 10,
            local: LocalDetectorConfig::default(),
        }
    }
}

impl DetectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Box geometry refinement thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefinementConfig {
    pub enabled: bool,
    pub margin: u32,
    pub bilateral_window: u32,
    pub bilateral_sigma_color: f32,
    pub bilateral_sigma_spatial: f32,
    pub adaptive_block_radius: u32,
    pub canny_low: f32,
    pub canny_high: f32,
    pub close_radius: u8,
    pub dilate_radius: u8,
    pub min_area_ratio: f32,
    pub max_area_ratio: f32,
    /// Contour area over fitted rectangle area. 0 disables the check.
    pub min_contour_quality: f32,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            margin: 20,
            bilateral_window: 9,
            bilateral_sigma_color: 75.0,
            bilateral_sigma_spatial: 75.0,
            adaptive_block_radius: 5,
            canny_low: 50.0,
            canny_high: 150.0,
            close_radius: 2,
            dilate_radius: 1,
            min_area_ratio: 0.15,
            max_area_ratio: 0.95,
            min_contour_quality: 0.0,
        }
    }
}

/// Preprocessing applied before one recognition pass
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessVariant {
    /// Contrast +20%, brightness +10
    MildLift,
    /// Contrast +50%, brightness +20
    StrongLift,
    /// Background subtraction, inversion and percentile stretch
    BackgroundNormalized,
}

/// Dominant color classification thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColorConfig {
    pub patch_size: u32,
    pub strong_margin: f32,
    pub light_margin: f32,
    pub white_min_brightness: f32,
    pub white_max_saturation: f32,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            patch_size: 50,
            strong_margin: 50.0,
            light_margin: 20.0,
            white_min_brightness: 200.0,
            white_max_saturation: 0.15,
        }
    }
}

/// Text extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub variants: Vec<PreprocessVariant>,
    /// Recognized blocks smaller than this (px²) are dropped
    pub min_block_area: f32,
    pub recognition_timeout_ms: u64,
    /// Shortest side each variant is upscaled to
    pub min_side: u32,
    pub color: ColorConfig,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            variants: vec![
                PreprocessVariant::MildLift,
                PreprocessVariant::StrongLift,
                PreprocessVariant::BackgroundNormalized,
            ],
            min_block_area: 100.0,
            recognition_timeout_ms: 5000,
            min_side: 300,
            color: ColorConfig::default(),
        }
    }
}

impl ExtractionConfig {
    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_millis(self.recognition_timeout_ms)
    }
}

/// Text recognition backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OcrBackend {
    /// Recognition server speaking the `/ocr` JSON protocol
    Http,
    /// Local tesseract binary
    Tesseract,
}

impl Default for OcrBackend {
    fn default() -> Self {
        if cfg!(feature = "tesseract") {
            Self::Tesseract
        } else {
            Self::Http
        }
    }
}

/// Recognition configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OcrConfig {
    pub backend: OcrBackend,
    pub base_url: String,
    pub lang: String,
    /// Tesseract page segmentation mode
    pub psm: i32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            backend: OcrBackend::default(),
            base_url: "http://127.0.0.1:8001".to_string(),
            lang: "fra+ara+eng".to_string(),
            psm: 6,
        }
    }
}

/// Scan loop configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub sample_interval_ms: u64,
    /// Confidence at or above which a detection is locked
    pub lock_threshold: f32,
    pub stabilization_delay_ms: u64,
    /// Edge density that triggers extraction while degraded
    pub degraded_edge_density: f32,
    /// Frames are downscaled to this width for the degraded heuristic
    pub degraded_sample_width: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 500,
            lock_threshold: 0.9,
            stabilization_delay_ms: 400,
            degraded_edge_density: 0.08,
            degraded_sample_width: 320,
        }
    }
}

impl OrchestratorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn stabilization_delay(&self) -> Duration {
        Duration::from_millis(self.stabilization_delay_ms)
    }
}

/// Complete scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScannerConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub refinement: RefinementConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub scanner: OrchestratorConfig,
}

impl ScannerConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ScanError> {
        let err = |msg: &str| Err(ScanError::Config(msg.to_string()));

        if self.detection.timeout_ms == 0 {
            return err("detection.timeout_ms must be positive");
        }
        if self.detection.unreachable_budget == 0 {
            return err("detection.unreachable_budget must be at least 1");
        }
        if self.detection.max_upload_dimension < 32 {
            return err("detection.max_upload_dimension must be at least 32");
        }
        if !(1..=100).contains(&self.detection.jpeg_quality) {
            return err("detection.jpeg_quality must be between 1 and 100");
        }

        let r = &self.refinement;
        if !(0.0..1.0).contains(&r.min_area_ratio)
            || !(0.0..=1.0).contains(&r.max_area_ratio)
            || r.min_area_ratio >= r.max_area_ratio
        {
            return err("refinement area ratios must satisfy 0 <= min < max <= 1");
        }
        if r.canny_low > r.canny_high {
            return err("refinement.canny_low must not exceed canny_high");
        }
        if !(0.0..=1.0).contains(&r.min_contour_quality) {
            return err("refinement.min_contour_quality must be within [0, 1]");
        }

        if self.extraction.variants.is_empty() {
            return err("extraction.variants must not be empty");
        }
        if self.extraction.recognition_timeout_ms == 0 {
            return err("extraction.recognition_timeout_ms must be positive");
        }

        if self.scanner.sample_interval_ms == 0 {
            return err("scanner.sample_interval_ms must be positive");
        }
        if !(0.0..=1.0).contains(&self.scanner.lock_threshold) {
            return err("scanner.lock_threshold must be within [0, 1]");
        }

        Ok(())
    }
}
