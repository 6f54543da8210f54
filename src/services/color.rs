use crate::models::config::ColorConfig;
use crate::models::label::DominantColor;
use image::RgbImage;

/// Average color of the centered patch
pub fn center_patch_mean(image: &RgbImage, patch_size: u32) -> Option<[f32; 3]> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return None;
    }

    let pw = patch_size.clamp(1, w);
    let ph = patch_size.clamp(1, h);
    let x0 = (w - pw) / 2;
    let y0 = (h - ph) / 2;

    let mut sum = [0u64; 3];
    for y in y0..y0 + ph {
        for x in x0..x0 + pw {
            let p = image.get_pixel(x, y);
            for c in 0..3 {
                sum[c] += p[c] as u64;
            }
        }
    }

    let n = (pw * ph) as f32;
    Some(sum.map(|s| s as f32 / n))
}

/// Classify the label color from its center patch
///
/// Rules apply in order: white, then strong green/red, then light green/red.
pub fn classify_dominant_color(image: &RgbImage, config: &ColorConfig) -> DominantColor {
    let Some([r, g, b]) = center_patch_mean(image, config.patch_size) else {
        return DominantColor::Unknown;
    };

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let brightness = (r + g + b) / 3.0;
    let saturation = if max > 0.0 { (max - min) / max } else { 0.0 };

    if brightness >= config.white_min_brightness && saturation < config.white_max_saturation {
        return DominantColor::White;
    }

    let green_lead = g - r.max(b);
    let red_lead = r - g.max(b);

    if green_lead > config.strong_margin {
        DominantColor::Green
    } else if red_lead > config.strong_margin {
        DominantColor::Red
    } else if green_lead > config.light_margin {
        DominantColor::LightGreen
    } else if red_lead > config.light_margin {
        DominantColor::LightRed
    } else {
        DominantColor::Unknown
    }
}
