use crate::errors::ScanError;
use crate::models::detection::{DetectionBox, Point2, RefinedBox};
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle on the preview surface
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScreenRect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl ScreenRect {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// Maps frame pixels onto a preview that fills its surface ("cover" fit)
///
/// The frame is scaled uniformly until it covers the surface and centered,
/// so the overflowing axis is cropped equally on both sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    screen_width: f32,
    screen_height: f32,
    image_width: f32,
    image_height: f32,
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl CoordinateMapper {
    pub fn new(
        image_width: u32,
        image_height: u32,
        screen_width: f32,
        screen_height: f32,
    ) -> Result<Self, ScanError> {
        if image_width == 0 || image_height == 0 {
            return Err(ScanError::InvalidFrame(format!(
                "image size {}x{} must be positive",
                image_width, image_height
            )));
        }
        if !(screen_width > 0.0 && screen_height > 0.0) {
            return Err(ScanError::Config(format!(
                "screen size {}x{} must be positive",
                screen_width, screen_height
            )));
        }

        let (iw, ih) = (image_width as f32, image_height as f32);
        let scale = (screen_width / iw).max(screen_height / ih);

        Ok(Self {
            screen_width,
            screen_height,
            image_width: iw,
            image_height: ih,
            scale,
            offset_x: (screen_width - iw * scale) / 2.0,
            offset_y: (screen_height - ih * scale) / 2.0,
        })
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn offset(&self) -> (f32, f32) {
        (self.offset_x, self.offset_y)
    }

    /// Image point to screen point, each axis clamped to the surface
    pub fn map_point(&self, p: Point2) -> Point2 {
        Point2 {
            x: (p.x * self.scale + self.offset_x).clamp(0.0, self.screen_width),
            y: (p.y * self.scale + self.offset_y).clamp(0.0, self.screen_height),
        }
    }

    pub fn map_box(&self, bx: &DetectionBox) -> ScreenRect {
        let top_left = self.map_point(Point2::new(bx.x1, bx.y1));
        let bottom_right = self.map_point(Point2::new(bx.x2, bx.y2));
        ScreenRect {
            x1: top_left.x,
            y1: top_left.y,
            x2: bottom_right.x,
            y2: bottom_right.y,
        }
    }

    pub fn map_refined(&self, refined: &RefinedBox) -> [Point2; 4] {
        refined.points.map(|p| self.map_point(p))
    }

    /// Screen point back to image pixels, clamped to the image
    pub fn unmap_point(&self, p: Point2) -> Point2 {
        Point2 {
            x: ((p.x - self.offset_x) / self.scale).clamp(0.0, self.image_width),
            y: ((p.y - self.offset_y) / self.scale).clamp(0.0, self.image_height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::detection::BoxKind;

    fn approx(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn test_landscape_frame_on_portrait_screen() {
        let mapper = CoordinateMapper::new(1920, 1080, 390.0, 844.0).unwrap();
        assert!(approx(mapper.scale(), 0.781, 0.001), "scale was {}", mapper.scale());
        let (ox, oy) = mapper.offset();
        assert!(ox < 0.0, "horizontal overflow is cropped");
        assert_eq!(oy, 0.0);

        let bx = DetectionBox::clamped(100.0, 200.0, 500.0, 600.0, 0.95, 1920, 1080).unwrap();
        let rect = mapper.map_box(&bx);

        // The box falls left of the visible crop, so x collapses onto the edge
        assert_eq!(rect.x1, 0.0);
        assert_eq!(rect.x2, 0.0);
        assert!(approx(rect.y1, 156.5, 0.5), "y1 was {}", rect.y1);
        assert!(approx(rect.y2, 468.9, 0.1), "y2 was {}", rect.y2);
    }

    #[test]
    fn test_equal_aspect_has_no_offset() {
        let mapper = CoordinateMapper::new(1280, 720, 640.0, 360.0).unwrap();
        assert_eq!(mapper.scale(), 0.5);
        assert_eq!(mapper.offset(), (0.0, 0.0));

        let p = mapper.map_point(Point2::new(100.0, 200.0));
        assert_eq!(p, Point2::new(50.0, 100.0));
    }

    #[test]
    fn test_mapped_points_stay_on_screen() {
        let mapper = CoordinateMapper::new(640, 480, 390.0, 844.0).unwrap();
        for &(x, y) in &[(0.0, 0.0), (640.0, 480.0), (320.0, 0.0), (0.0, 480.0), (639.0, 1.0)] {
            let p = mapper.map_point(Point2::new(x, y));
            assert!((0.0..=390.0).contains(&p.x), "x out of range: {:?}", p);
            assert!((0.0..=844.0).contains(&p.y), "y out of range: {:?}", p);
        }
    }

    #[test]
    fn test_unmap_inverts_map_inside_view() {
        let mapper = CoordinateMapper::new(1920, 1080, 390.0, 844.0).unwrap();
        let original = Point2::new(960.0, 540.0);
        let back = mapper.unmap_point(mapper.map_point(original));
        assert!(approx(back.x, original.x, 0.01) && approx(back.y, original.y, 0.01));
    }

    #[test]
    fn test_map_refined_maps_all_corners() {
        let mapper = CoordinateMapper::new(1000, 1000, 500.0, 500.0).unwrap();
        let refined = RefinedBox {
            points: [
                Point2::new(100.0, 100.0),
                Point2::new(300.0, 120.0),
                Point2::new(280.0, 320.0),
                Point2::new(80.0, 300.0),
            ],
            kind: BoxKind::Rotated,
        };
        let mapped = mapper.map_refined(&refined);
        assert_eq!(mapped[1], Point2::new(150.0, 60.0));
        assert_eq!(mapped[3], Point2::new(40.0, 150.0));
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        assert!(CoordinateMapper::new(0, 1080, 390.0, 844.0).is_err());
        assert!(CoordinateMapper::new(1920, 1080, 0.0, 844.0).is_err());
        assert!(CoordinateMapper::new(1920, 1080, 390.0, f32::NAN).is_err());
    }
}
