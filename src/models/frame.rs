use crate::errors::ScanError;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Pixel layout of a camera buffer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 8-bit RGB
    Rgb8,
    /// Y plane followed by interleaved V/U (Android camera default)
    Nv21,
    /// Y plane, U plane, V plane
    I420,
    /// Packed 4:2:2 Y0 U Y1 V (V4L2 webcams)
    Yuyv,
}

impl PixelFormat {
    /// Expected buffer length for a frame of the given size
    pub fn buffer_len(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        let chroma = w.div_ceil(2) * h.div_ceil(2);
        match self {
            PixelFormat::Rgb8 => w * h * 3,
            PixelFormat::Nv21 | PixelFormat::I420 => w * h + 2 * chroma,
            PixelFormat::Yuyv => w.div_ceil(2) * 4 * h,
        }
    }
}

/// Raw camera frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    /// Create a frame stamped with the current time
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Wrap an already decoded RGB image
    pub fn from_rgb(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(width, height, PixelFormat::Rgb8, image.into_raw())
    }

    /// Check that the buffer matches the declared geometry
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.width == 0 || self.height == 0 {
            return Err(ScanError::InvalidFrame(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }

        let expected = self.format.buffer_len(self.width, self.height);
        if self.data.len() != expected {
            return Err(ScanError::InvalidFrame(format!(
                "{:?} frame {}x{} needs {} bytes, got {}",
                self.format,
                self.width,
                self.height,
                expected,
                self.data.len()
            )));
        }

        Ok(())
    }

    /// Convert to an RGB image, whatever the source layout
    pub fn to_rgb_image(&self) -> Result<RgbImage, ScanError> {
        self.validate()?;

        let (w, h) = (self.width as usize, self.height as usize);
        let rgb = match self.format {
            PixelFormat::Rgb8 => self.data.clone(),
            PixelFormat::Nv21 => {
                let (luma, chroma) = self.data.split_at(w * h);
                let stride = w.div_ceil(2) * 2;
                planar_to_rgb(luma, w, h, |cx, cy| {
                    let idx = cy * stride + cx * 2;
                    (chroma[idx + 1], chroma[idx])
                })
            }
            PixelFormat::I420 => {
                let (luma, chroma) = self.data.split_at(w * h);
                let plane = w.div_ceil(2) * h.div_ceil(2);
                let (u_plane, v_plane) = chroma.split_at(plane);
                let stride = w.div_ceil(2);
                planar_to_rgb(luma, w, h, |cx, cy| {
                    let idx = cy * stride + cx;
                    (u_plane[idx], v_plane[idx])
                })
            }
            PixelFormat::Yuyv => yuyv_to_rgb(&self.data, w, h),
        };

        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| ScanError::InvalidFrame("failed to build RGB image".to_string()))
    }
}

/// BT.601 YUV to RGB
fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
    let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
    let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
    [r, g, b]
}

fn planar_to_rgb<F>(luma: &[u8], w: usize, h: usize, chroma_at: F) -> Vec<u8>
where
    F: Fn(usize, usize) -> (u8, u8),
{
    let mut rgb = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            let (u, v) = chroma_at(x / 2, y / 2);
            rgb.extend_from_slice(&yuv_pixel(luma[y * w + x], u, v));
        }
    }
    rgb
}

fn yuyv_to_rgb(data: &[u8], w: usize, h: usize) -> Vec<u8> {
    let row_bytes = w.div_ceil(2) * 4;
    let mut rgb = Vec::with_capacity(w * h * 3);

    for row in data.chunks_exact(row_bytes).take(h) {
        let mut written = 0;
        for chunk in row.chunks_exact(4) {
            let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
            rgb.extend_from_slice(&yuv_pixel(y0, u, v));
            written += 1;
            if written < w {
                rgb.extend_from_slice(&yuv_pixel(y1, u, v));
                written += 1;
            }
        }
    }

    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_rgb_frame_roundtrip() {
        let image = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
        let frame = Frame::from_rgb(image.clone());

        assert_eq!(frame.format, PixelFormat::Rgb8);
        assert_eq!(frame.to_rgb_image().unwrap(), image);
    }

    #[test]
    fn test_buffer_length_validation() {
        let frame = Frame::new(4, 4, PixelFormat::Nv21, vec![0; 10]);
        let err = frame.to_rgb_image().unwrap_err();
        assert!(matches!(err, ScanError::InvalidFrame(_)), "short buffer must be rejected");

        let empty = Frame::new(0, 4, PixelFormat::Rgb8, Vec::new());
        assert!(empty.validate().is_err(), "zero-sized frame must be rejected");
    }

    #[test]
    fn test_nv21_gray_converts_to_gray() {
        // Neutral chroma (128) keeps luma as-is
        let (w, h) = (4u32, 2u32);
        let mut data = vec![100u8; (w * h) as usize];
        data.extend(vec![128u8; PixelFormat::Nv21.buffer_len(w, h) - (w * h) as usize]);

        let rgb = Frame::new(w, h, PixelFormat::Nv21, data).to_rgb_image().unwrap();
        assert_eq!(rgb.dimensions(), (4, 2));
        assert!(rgb.pixels().all(|p| p.0 == [100, 100, 100]));
    }

    #[test]
    fn test_i420_and_yuyv_dimensions() {
        let (w, h) = (6u32, 4u32);
        let i420 = Frame::new(w, h, PixelFormat::I420, vec![128; PixelFormat::I420.buffer_len(w, h)]);
        assert_eq!(i420.to_rgb_image().unwrap().dimensions(), (6, 4));

        let yuyv = Frame::new(w, h, PixelFormat::Yuyv, vec![128; PixelFormat::Yuyv.buffer_len(w, h)]);
        assert_eq!(yuyv.to_rgb_image().unwrap().dimensions(), (6, 4));
    }

    #[test]
    fn test_yuyv_red_chroma() {
        // Strong V pushes red up
        let frame = Frame::new(2, 1, PixelFormat::Yuyv, vec![80, 128, 80, 240]);
        let rgb = frame.to_rgb_image().unwrap();
        let p = rgb.get_pixel(0, 0);
        assert!(p[0] > p[1] && p[0] > p[2], "expected reddish pixel, got {:?}", p);
    }
}
