use crate::errors::DetectionError;
use crate::models::config::{LocalDetectorConfig, RefinementConfig};
use crate::models::detection::{
    polygon_area, BoxKind, DetectionBox, DetectionOutcome, DetectionResult, RefinedBox, ServerInfo,
};
use crate::models::roi::Roi;
use crate::services::box_refiner::adaptive_threshold_inv;
use crate::services::detection_client::LabelDetector;
use crate::services::geometry::{contour_points, convex_hull, min_area_rect};
use async_trait::async_trait;
use image::RgbImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use tracing::debug;

/// On-device label detector based on contour shape
///
/// Looks for the largest roughly rectangular dark-on-light region. Confidence
/// is how well the contour fills its minimum-area rectangle.
#[derive(Debug, Clone)]
pub struct LocalContourDetector {
    filter: LocalDetectorConfig,
    refinement: RefinementConfig,
    crop_padding: u32,
}

impl LocalContourDetector {
    pub fn new(filter: LocalDetectorConfig, refinement: RefinementConfig, crop_padding: u32) -> Self {
        Self {
            filter,
            refinement,
            crop_padding,
        }
    }

    /// Synchronous detection, used from a blocking task
    pub fn detect_blocking(&self, image: &RgbImage) -> DetectionOutcome {
        let (width, height) = image.dimensions();
        let gray = image::imageops::grayscale(image);
        let smoothed = imageproc::filter::bilateral_filter(
            &gray,
            self.refinement.bilateral_window,
            self.refinement.bilateral_sigma_color,
            self.refinement.bilateral_sigma_spatial,
        );
        let binary = adaptive_threshold_inv(&smoothed, self.refinement.adaptive_block_radius, 2);
        let closed = imageproc::morphology::close(&binary, Norm::LInf, self.refinement.close_radius);

        let best = find_contours::<i32>(&closed)
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 4)
            .filter_map(|c| {
                let points = contour_points(c);
                let area = polygon_area(&points);
                if area < self.filter.min_area || area > self.filter.max_area {
                    return None;
                }

                let (min_x, min_y, max_x, max_y) = points.iter().fold(
                    (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
                    |(a, b, c, d), p| (a.min(p.x), b.min(p.y), c.max(p.x), d.max(p.y)),
                );
                let (w, h) = (max_x - min_x + 1.0, max_y - min_y + 1.0);
                let aspect = w / h;
                if aspect < self.filter.min_aspect || aspect > self.filter.max_aspect {
                    return None;
                }

                let rect = min_area_rect(&convex_hull(&points))?;
                let rectangularity = (area / polygon_area(&rect).max(1.0)).min(1.0);
                Some((area, rectangularity, rect, (min_x, min_y, max_x + 1.0, max_y + 1.0)))
            })
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let Some((area, confidence, rect, (x1, y1, x2, y2))) = best else {
            return DetectionOutcome::NotDetected;
        };
        debug!(area, confidence, "Local contour candidate");

        let Some(bbox) = DetectionBox::clamped(x1, y1, x2, y2, confidence, width, height) else {
            return DetectionOutcome::NotDetected;
        };
        let Some(crop_roi) = bbox.to_roi().expand(self.crop_padding).clamp_to(width, height) else {
            return DetectionOutcome::NotDetected;
        };

        let mut result = DetectionResult::new(bbox, width, height).with_crop(crop(image, &crop_roi));
        result.refined = Some(RefinedBox {
            points: rect,
            kind: BoxKind::Rotated,
        });
        DetectionOutcome::Detected(result)
    }
}

fn crop(image: &RgbImage, roi: &Roi) -> RgbImage {
    image::imageops::crop_imm(image, roi.x as u32, roi.y as u32, roi.width, roi.height).to_image()
}

#[async_trait]
impl LabelDetector for LocalContourDetector {
    async fn detect(&self, image: &RgbImage) -> Result<DetectionOutcome, DetectionError> {
        let detector = self.clone();
        let image = image.clone();
        tokio::task::spawn_blocking(move || detector.detect_blocking(&image))
            .await
            .map_err(|e| DetectionError::Request(format!("local detection task failed: {}", e)))
    }

    async fn probe(&self) -> Result<ServerInfo, DetectionError> {
        Ok(ServerInfo {
            status: "local".to_string(),
            model: Some("contour".to_string()),
            device: Some("cpu".to_string()),
            version: None,
        })
    }

    fn wants_refinement(&self) -> bool {
        false
    }
}
