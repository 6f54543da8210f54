use crate::errors::ScanError;
use crate::models::config::RefinementConfig;
use crate::models::detection::{polygon_area, BoxKind, DetectionBox, Point2, RefinedBox};
use crate::models::roi::Roi;
use crate::services::geometry::{contour_points, convex_hull, min_area_rect};
use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use tracing::debug;

/// Tightens a coarse detection box onto the label outline
///
/// Works purely on edge and contour geometry around the box, so it does not
/// depend on what model produced the detection.
#[derive(Debug, Clone)]
pub struct BoxRefiner {
    config: RefinementConfig,
}

impl BoxRefiner {
    pub fn new(config: RefinementConfig) -> Self {
        Self { config }
    }

    /// Refine `bbox`, falling back to the box itself when no outline is found
    pub fn refine(&self, image: &RgbImage, bbox: &DetectionBox) -> RefinedBox {
        if !self.config.enabled {
            return RefinedBox::fallback(bbox);
        }

        match self.try_refine(image, bbox) {
            Ok(refined) => refined,
            Err(e) => {
                debug!(error = %e, "Using axis-aligned fallback");
                RefinedBox::fallback(bbox)
            }
        }
    }

    /// Refinement without the fallback
    pub fn try_refine(&self, image: &RgbImage, bbox: &DetectionBox) -> Result<RefinedBox, ScanError> {
        let (width, height) = image.dimensions();
        let roi = bbox
            .to_roi()
            .expand(self.config.margin)
            .clamp_to(width, height)
            .ok_or_else(|| ScanError::RefinementFailure("box lies outside the image".into()))?;

        let crop = image::imageops::crop_imm(image, roi.x as u32, roi.y as u32, roi.width, roi.height)
            .to_image();
        let gray = image::imageops::grayscale(&crop);

        let mask = self.edge_mask(&gray);
        let contour = self.largest_contour(&mask, roi.area() as f32)?;

        let hull = convex_hull(&contour);
        let rect = min_area_rect(&hull)
            .ok_or_else(|| ScanError::RefinementFailure("contour hull has no area".into()))?;

        if self.config.min_contour_quality > 0.0 {
            let quality = polygon_area(&contour) / polygon_area(&rect).max(f32::EPSILON);
            if quality < self.config.min_contour_quality {
                return Err(ScanError::RefinementFailure(format!(
                    "contour quality {:.2} below {:.2}",
                    quality, self.config.min_contour_quality
                )));
            }
        }

        Ok(RefinedBox {
            points: rect.map(|p| to_frame(p, &roi)),
            kind: BoxKind::Rotated,
        })
    }

    /// Smoothed edges and local threshold combined, closed and dilated
    fn edge_mask(&self, gray: &GrayImage) -> GrayImage {
        let smoothed = imageproc::filter::bilateral_filter(
            gray,
            self.config.bilateral_window,
            self.config.bilateral_sigma_color,
            self.config.bilateral_sigma_spatial,
        );

        let (thresholded, edges) = rayon::join(
            || adaptive_threshold_inv(&smoothed, self.config.adaptive_block_radius, 2),
            || imageproc::edges::canny(&smoothed, self.config.canny_low, self.config.canny_high),
        );

        let mut combined = thresholded;
        for (dst, src) in combined.pixels_mut().zip(edges.pixels()) {
            dst.0[0] |= src.0[0];
        }

        let closed = imageproc::morphology::close(&combined, Norm::LInf, self.config.close_radius);
        imageproc::morphology::dilate(&closed, Norm::LInf, self.config.dilate_radius)
    }

    /// Largest outer contour whose area is within the configured share of the ROI
    fn largest_contour(&self, mask: &GrayImage, roi_area: f32) -> Result<Vec<Point2>, ScanError> {
        let min_area = roi_area * self.config.min_area_ratio;
        let max_area = roi_area * self.config.max_area_ratio;

        find_contours::<i32>(mask)
            .iter()
            .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 4)
            .map(contour_points)
            .map(|points| (polygon_area(&points), points))
            .filter(|(area, _)| *area >= min_area && *area <= max_area)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, points)| points)
            .ok_or_else(|| ScanError::RefinementFailure("no contour within area bounds".into()))
    }
}

/// ROI-local point to frame coordinates, kept inside the ROI
fn to_frame(p: Point2, roi: &Roi) -> Point2 {
    Point2::new(
        (p.x + roi.x as f32).clamp(roi.x as f32, roi.x2() as f32),
        (p.y + roi.y as f32).clamp(roi.y as f32, roi.y2() as f32),
    )
}

/// Mean adaptive threshold, inverted: pixels darker than their neighborhood
/// mean minus `offset` become foreground
pub fn adaptive_threshold_inv(gray: &GrayImage, block_radius: u32, offset: i16) -> GrayImage {
    let mean = imageproc::filter::box_filter(gray, block_radius, block_radius);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0] as i16;
        let local = mean.get_pixel(x, y)[0] as i16;
        if value < local - offset {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
    use imageproc::rect::Rect;

    /// Light background with a dark label rectangle at (120, 90) 160x120
    fn label_image() -> RgbImage {
        let mut img = RgbImage::from_pixel(400, 300, Rgb([200, 200, 200]));
        draw_filled_rect_mut(&mut img, Rect::at(120, 90).of_size(160, 120), Rgb([40, 40, 40]));
        img
    }

    fn coarse_box() -> DetectionBox {
        DetectionBox::clamped(110.0, 80.0, 290.0, 220.0, 0.95, 400, 300).unwrap()
    }

    #[test]
    fn test_refines_dark_rectangle() {
        let refiner = BoxRefiner::new(RefinementConfig::default());
        let refined = refiner.refine(&label_image(), &coarse_box());

        assert_eq!(refined.kind, BoxKind::Rotated, "a clear outline must be found");

        let area = refined.area();
        assert!(area >= 160.0 * 120.0 * 0.9, "refined box too small: {}", area);

        let cx = refined.points.iter().map(|p| p.x).sum::<f32>() / 4.0;
        let cy = refined.points.iter().map(|p| p.y).sum::<f32>() / 4.0;
        assert!((cx - 200.0).abs() < 4.0 && (cy - 150.0).abs() < 4.0, "center ({}, {})", cx, cy);
    }

    #[test]
    fn test_refined_area_bounded_by_expanded_box() {
        let config = RefinementConfig::default();
        let bbox = coarse_box();
        let refined = BoxRefiner::new(config.clone()).refine(&label_image(), &bbox);

        let m = config.margin as f32;
        let expanded = (bbox.width() + 2.0 * m) * (bbox.height() + 2.0 * m);
        assert!(refined.area() <= expanded, "{} > {}", refined.area(), expanded);
        for p in &refined.points {
            assert!(p.x >= bbox.x1 - m && p.x <= bbox.x2 + m, "x outside ROI: {:?}", p);
            assert!(p.y >= bbox.y1 - m && p.y <= bbox.y2 + m, "y outside ROI: {:?}", p);
        }
    }

    #[test]
    fn test_blank_image_falls_back() {
        let blank = RgbImage::from_pixel(400, 300, Rgb([128, 128, 128]));
        let bbox = coarse_box();
        let refined = BoxRefiner::new(RefinementConfig::default()).refine(&blank, &bbox);

        assert_eq!(refined.kind, BoxKind::AxisAlignedFallback);
        assert_eq!(refined.points, bbox.corners());
    }

    #[test]
    fn test_small_blob_is_filtered_out() {
        let mut img = RgbImage::from_pixel(400, 300, Rgb([200, 200, 200]));
        draw_filled_rect_mut(&mut img, Rect::at(195, 145).of_size(10, 10), Rgb([20, 20, 20]));

        let result = BoxRefiner::new(RefinementConfig::default()).try_refine(&img, &coarse_box());
        assert!(matches!(result, Err(ScanError::RefinementFailure(_))));
    }

    #[test]
    fn test_contour_quality_gate() {
        let mut img = RgbImage::from_pixel(400, 300, Rgb([210, 210, 210]));
        draw_filled_circle_mut(&mut img, (200, 150), 60, Rgb([30, 30, 30]));
        let bbox = DetectionBox::clamped(130.0, 80.0, 270.0, 220.0, 0.9, 400, 300).unwrap();

        let lenient = BoxRefiner::new(RefinementConfig::default()).refine(&img, &bbox);
        assert_eq!(lenient.kind, BoxKind::Rotated, "no quality gate by default");

        let strict = BoxRefiner::new(RefinementConfig {
            min_contour_quality: 0.95,
            ..RefinementConfig::default()
        })
        .refine(&img, &bbox);
        assert_eq!(strict.kind, BoxKind::AxisAlignedFallback, "a disc fills ~79% of its rectangle");
    }

    #[test]
    fn test_disabled_refinement_returns_box() {
        let refiner = BoxRefiner::new(RefinementConfig {
            enabled: false,
            ..RefinementConfig::default()
        });
        let refined = refiner.refine(&label_image(), &coarse_box());
        assert_eq!(refined.kind, BoxKind::AxisAlignedFallback);
    }

    #[test]
    fn test_adaptive_threshold_marks_dark_detail() {
        let mut gray = GrayImage::from_pixel(21, 21, Luma([200]));
        gray.put_pixel(10, 10, Luma([20]));
        let mask = adaptive_threshold_inv(&gray, 3, 2);
        assert_eq!(mask.get_pixel(10, 10)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0, "flat background stays background");
    }
}
