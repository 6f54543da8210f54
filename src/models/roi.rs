use serde::{Deserialize, Serialize};

/// Integer pixel region inside a frame, used for cropping
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create ROI from bounds (x1, y1, x2, y2)
    pub fn from_bounds(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Self> {
        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(Self {
            x: x1,
            y: y1,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn x2(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn y2(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Check if ROI contains a point (right/bottom edges exclusive)
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x2() && y >= self.y && y < self.y2()
    }

    /// Grow the region by `margin` pixels on every side
    pub fn expand(&self, margin: u32) -> Self {
        let m = margin as i32;
        Self {
            x: self.x - m,
            y: self.y - m,
            width: self.width + 2 * margin,
            height: self.height + 2 * margin,
        }
    }

    /// Intersect with an image of the given size
    ///
    /// Returns `None` when nothing of the region lies inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let x1 = self.x.clamp(0, width as i32);
        let y1 = self.y.clamp(0, height as i32);
        let x2 = self.x2().clamp(0, width as i32);
        let y2 = self.y2().clamp(0, height as i32);
        Self::from_bounds(x1, y1, x2, y2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_from_bounds() {
        let roi = Roi::from_bounds(100, 100, 300, 250).unwrap();
        assert_eq!(roi, Roi::new(100, 100, 200, 150));

        assert!(Roi::from_bounds(300, 100, 100, 250).is_none(), "inverted x must be rejected");
        assert!(Roi::from_bounds(100, 250, 300, 250).is_none(), "zero height must be rejected");
    }

    #[test]
    fn test_roi_bounds_and_area() {
        let roi = Roi::new(100, 200, 300, 400);
        assert_eq!(roi.x2(), 400);
        assert_eq!(roi.y2(), 600);
        assert_eq!(roi.area(), 120_000);
        assert!(roi.is_valid());
        assert!(!Roi::new(0, 0, 0, 10).is_valid());
    }

    #[test]
    fn test_roi_contains_point() {
        let roi = Roi::new(100, 100, 200, 200);
        assert!(roi.contains(100, 100));
        assert!(roi.contains(150, 150));
        assert!(!roi.contains(300, 150), "right edge is exclusive");
        assert!(!roi.contains(150, 50));
    }

    #[test]
    fn test_roi_expand_then_clamp() {
        let roi = Roi::new(10, 10, 50, 50).expand(20);
        assert_eq!(roi, Roi::new(-10, -10, 90, 90));

        let clamped = roi.clamp_to(70, 200).unwrap();
        assert_eq!(clamped, Roi::new(0, 0, 70, 80));
    }

    #[test]
    fn test_roi_clamp_outside_image() {
        let roi = Roi::new(500, 500, 10, 10);
        assert!(roi.clamp_to(100, 100).is_none(), "region outside the image has no overlap");
    }

    #[test]
    fn test_roi_serialization() {
        let roi = Roi::new(100, 200, 300, 400);
        let json = serde_json::to_string(&roi).unwrap();
        let deserialized: Roi = serde_json::from_str(&json).unwrap();
        assert_eq!(roi, deserialized);
    }
}
