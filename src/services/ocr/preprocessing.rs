use crate::models::config::PreprocessVariant;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, Luma, RgbImage};

/// Gaussian sigma used to estimate the label background
const BACKGROUND_SIGMA: f32 = 5.0;

/// Image preprocessing for text recognition
#[derive(Debug, Clone)]
pub struct PreprocessingService {
    min_side: u32,
}

impl PreprocessingService {
    pub fn new(min_side: u32) -> Self {
        Self { min_side }
    }

    /// Upscale, then apply one variant
    pub fn prepare(&self, image: &RgbImage, variant: PreprocessVariant) -> DynamicImage {
        let base = self.upscale(&DynamicImage::ImageRgb8(image.clone()));
        match variant {
            PreprocessVariant::MildLift => base.adjust_contrast(20.0).brighten(10),
            PreprocessVariant::StrongLift => base.adjust_contrast(50.0).brighten(20),
            PreprocessVariant::BackgroundNormalized => {
                DynamicImage::ImageLuma8(normalize_background(&base.to_luma8()))
            }
        }
    }

    /// Scale up so the shorter side reaches `min_side`; larger images pass through
    pub fn upscale(&self, image: &DynamicImage) -> DynamicImage {
        let (width, height) = image.dimensions();
        let shorter = width.min(height);
        if shorter == 0 || shorter >= self.min_side {
            return image.clone();
        }

        let factor = self.min_side as f64 / shorter as f64;
        let new_width = (width as f64 * factor).round() as u32;
        let new_height = (height as f64 * factor).round() as u32;
        image.resize_exact(new_width, new_height, FilterType::Lanczos3)
    }
}

/// Flatten uneven lighting: subtract a blurred background, stretch, sharpen
///
/// Output is dark text on a light background.
pub fn normalize_background(gray: &GrayImage) -> GrayImage {
    let background = imageproc::filter::gaussian_blur_f32(gray, BACKGROUND_SIGMA);

    // Only pixels darker than their surroundings carry ink
    let ink: Vec<u8> = gray
        .pixels()
        .zip(background.pixels())
        .map(|(p, b)| b[0].saturating_sub(p[0]))
        .collect();

    let min = ink.iter().copied().min().unwrap_or(0);
    let max = ink.iter().copied().max().unwrap_or(0);
    let span = (max - min).max(1) as f32;
    let inverted: Vec<u8> = ink
        .iter()
        .map(|&v| 255 - ((v - min) as f32 * 255.0 / span).round() as u8)
        .collect();

    let (lo, hi) = percentile_bounds(&inverted, 0.02, 0.98);
    let range = hi.saturating_sub(lo).max(1) as f32;

    let mut stretched = GrayImage::new(gray.width(), gray.height());
    for (pixel, &v) in stretched.pixels_mut().zip(&inverted) {
        let s = (v as f32 - lo as f32) * 255.0 / range;
        *pixel = Luma([s.clamp(0.0, 255.0).round() as u8]);
    }

    image::imageops::unsharpen(&stretched, 1.0, 3)
}

/// Values at the `low` and `high` quantiles
fn percentile_bounds(values: &[u8], low: f32, high: f32) -> (u8, u8) {
    if values.is_empty() {
        return (0, 0);
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let at = |q: f32| sorted[((sorted.len() - 1) as f32 * q).round() as usize];
    (at(low), at(high))
}

/// Share of edge pixels in a downscaled grayscale copy
///
/// Cheap stand-in for a detector: printed labels are dense in edges, empty
/// scenes are not.
pub fn edge_density(image: &RgbImage, sample_width: u32) -> f32 {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }

    let gray = image::imageops::grayscale(image);
    let gray = if width > sample_width && sample_width > 0 {
        let sample_height = ((height as f32 * sample_width as f32 / width as f32).round() as u32).max(1);
        image::imageops::resize(&gray, sample_width, sample_height, FilterType::Triangle)
    } else {
        gray
    };

    let edges = imageproc::edges::canny(&gray, 50.0, 150.0);
    let on = edges.pixels().filter(|p| p[0] > 0).count();
    on as f32 / (edges.width() * edges.height()) as f32
}
