use crate::models::roi::Roi;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Point in frame pixel space
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned detection in the pixel space of the frame that produced it
///
/// Always satisfies `0 <= x1 < x2 <= width` and `0 <= y1 < y2 <= height`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DetectionBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl DetectionBox {
    /// Build a box clamped to a `width`x`height` frame
    ///
    /// Returns `None` for non-finite input, confidence outside `[0, 1]`,
    /// or a box that is empty after clamping.
    pub fn clamped(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        confidence: f32,
        width: u32,
        height: u32,
    ) -> Option<Self> {
        if ![x1, y1, x2, y2, confidence].iter().all(|v| v.is_finite()) {
            return None;
        }
        if !(0.0..=1.0).contains(&confidence) {
            return None;
        }

        let (w, h) = (width as f32, height as f32);
        let bx = Self {
            x1: x1.min(x2).clamp(0.0, w),
            y1: y1.min(y2).clamp(0.0, h),
            x2: x1.max(x2).clamp(0.0, w),
            y2: y1.max(y2).clamp(0.0, h),
            confidence,
        };

        if bx.x2 - bx.x1 < 1.0 || bx.y2 - bx.y1 < 1.0 {
            return None;
        }
        Some(bx)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Corners in clockwise order starting top-left
    pub fn corners(&self) -> [Point2; 4] {
        [
            Point2::new(self.x1, self.y1),
            Point2::new(self.x2, self.y1),
            Point2::new(self.x2, self.y2),
            Point2::new(self.x1, self.y2),
        ]
    }

    /// Smallest integer region covering the box
    pub fn to_roi(&self) -> Roi {
        let x1 = self.x1.floor() as i32;
        let y1 = self.y1.floor() as i32;
        let x2 = (self.x2.ceil() as i32).max(x1 + 1);
        let y2 = (self.y2.ceil() as i32).max(y1 + 1);
        Roi::new(x1, y1, (x2 - x1) as u32, (y2 - y1) as u32)
    }
}

/// How a refined box was obtained
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BoxKind {
    /// Minimum-area rectangle fitted to the label contour
    Rotated,
    /// No contour survived; the coarse detection box is returned as-is
    AxisAlignedFallback,
}

/// Quadrilateral tightly enclosing the label
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RefinedBox {
    pub points: [Point2; 4],
    pub kind: BoxKind,
}

impl RefinedBox {
    pub fn fallback(bx: &DetectionBox) -> Self {
        Self {
            points: bx.corners(),
            kind: BoxKind::AxisAlignedFallback,
        }
    }

    pub fn area(&self) -> f32 {
        polygon_area(&self.points)
    }
}

/// Shoelace area of a simple polygon
pub fn polygon_area(points: &[Point2]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }

    let mut sum = 0.0f32;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        sum += p.x * q.y - q.x * p.y;
    }
    (sum / 2.0).abs()
}

/// Result of one successful detection call
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub bbox: DetectionBox,
    pub refined: Option<RefinedBox>,
    pub confidence: f32,
    pub source_width: u32,
    pub source_height: u32,
    /// Label pixels, present until taken by the text extractor
    pub cropped_region: Option<RgbImage>,
}

impl DetectionResult {
    pub fn new(bbox: DetectionBox, source_width: u32, source_height: u32) -> Self {
        Self {
            confidence: bbox.confidence,
            bbox,
            refined: None,
            source_width,
            source_height,
            cropped_region: None,
        }
    }

    pub fn with_crop(mut self, crop: RgbImage) -> Self {
        self.cropped_region = Some(crop);
        self
    }
}

/// Parsed answer of a detector
#[derive(Debug, Clone)]
pub enum DetectionOutcome {
    Detected(DetectionResult),
    NotDetected,
    /// The response could not be trusted; treated like no detection
    Malformed(String),
}

/// Detection service identity returned by the health endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServerInfo {
    pub status: String,
    pub model: Option<String>,
    pub device: Option<String>,
    pub version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_is_clamped_to_frame() {
        let bx = DetectionBox::clamped(-10.0, 5.0, 700.0, 300.0, 0.8, 640, 480).unwrap();
        assert_eq!((bx.x1, bx.y1, bx.x2, bx.y2), (0.0, 5.0, 640.0, 300.0));
    }

    #[test]
    fn test_box_rejects_bad_input() {
        assert!(DetectionBox::clamped(10.0, 10.0, 10.0, 50.0, 0.5, 100, 100).is_none());
        assert!(DetectionBox::clamped(0.0, 0.0, 50.0, 50.0, 1.5, 100, 100).is_none());
        assert!(DetectionBox::clamped(0.0, f32::NAN, 50.0, 50.0, 0.5, 100, 100).is_none());
        assert!(
            DetectionBox::clamped(200.0, 200.0, 300.0, 300.0, 0.5, 100, 100).is_none(),
            "box entirely outside the frame is empty after clamping"
        );
    }

    #[test]
    fn test_box_swaps_inverted_corners() {
        let bx = DetectionBox::clamped(50.0, 60.0, 10.0, 20.0, 0.5, 100, 100).unwrap();
        assert_eq!((bx.x1, bx.y1, bx.x2, bx.y2), (10.0, 20.0, 50.0, 60.0));
    }

    #[test]
    fn test_polygon_area() {
        let square = [
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ];
        assert_eq!(polygon_area(&square), 100.0);

        let diamond = [
            Point2::new(5.0, 0.0),
            Point2::new(10.0, 5.0),
            Point2::new(5.0, 10.0),
            Point2::new(0.0, 5.0),
        ];
        assert_eq!(polygon_area(&diamond), 50.0);
        assert_eq!(polygon_area(&square[..2]), 0.0);
    }

    #[test]
    fn test_fallback_matches_box() {
        let bx = DetectionBox::clamped(10.0, 20.0, 110.0, 70.0, 0.9, 200, 200).unwrap();
        let refined = RefinedBox::fallback(&bx);
        assert_eq!(refined.kind, BoxKind::AxisAlignedFallback);
        assert_eq!(refined.area(), bx.area());
    }

    #[test]
    fn test_to_roi_covers_box() {
        let bx = DetectionBox::clamped(10.4, 20.6, 50.2, 60.9, 0.5, 100, 100).unwrap();
        assert_eq!(bx.to_roi(), Roi::new(10, 20, 41, 41));
    }

    #[test]
    fn test_server_info_defaults_missing_fields() {
        let info: ServerInfo = serde_json::from_str(r#"{"status": "running"}"#).unwrap();
        assert_eq!(info.status, "running");
        assert!(info.model.is_none());
    }
}
