use super::engine::{TextBlock, TextRecognizer};
use crate::errors::ScanError;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Recognizer backed by an OCR server speaking the `/ocr` JSON protocol
#[derive(Clone)]
pub struct HttpRecognizer {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ImageRequest {
    image_base64: String,
}

/// Single text box with its 4 corner points
#[derive(Deserialize, Clone, Debug)]
struct TextBox {
    #[serde(rename = "box")]
    bbox: Vec<Vec<f64>>,
    text: String,
}

#[derive(Deserialize)]
struct OcrResponse {
    boxes: Vec<TextBox>,
}

impl TextBox {
    /// (x_min, y_min, x_max, y_max)
    fn rect(&self) -> (f64, f64, f64, f64) {
        let xs = self.bbox.iter().filter_map(|p| p.first().copied());
        let ys = self.bbox.iter().filter_map(|p| p.get(1).copied());

        let (x_min, x_max) = xs.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let (y_min, y_max) = ys.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });

        (x_min, y_min, x_max, y_max)
    }

    fn is_well_formed(&self) -> bool {
        let (x_min, y_min, x_max, y_max) = self.rect();
        x_min.is_finite() && y_min.is_finite() && x_max >= x_min && y_max >= y_min
    }

    fn area(&self) -> f64 {
        let (x_min, y_min, x_max, y_max) = self.rect();
        (x_max - x_min) * (y_max - y_min)
    }

    /// Intersection over union with another box
    fn iou(&self, other: &TextBox) -> f64 {
        let (ax1, ay1, ax2, ay2) = self.rect();
        let (bx1, by1, bx2, by2) = other.rect();

        let ix1 = ax1.max(bx1);
        let iy1 = ay1.max(by1);
        let ix2 = ax2.min(bx2);
        let iy2 = ay2.min(by2);
        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }

        let inter = (ix2 - ix1) * (iy2 - iy1);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    fn into_block(self) -> TextBlock {
        let (x_min, y_min, x_max, y_max) = self.rect();
        TextBlock::new(
            self.text,
            x_min as f32,
            y_min as f32,
            (x_max - x_min) as f32,
            (y_max - y_min) as f32,
        )
    }
}

impl HttpRecognizer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ScanError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Check if server is healthy
    pub async fn health_check(&self) -> Result<(), ScanError> {
        let url = format!("{}/health", self.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ScanError::Recognition(format!("health check failed: {}", e)))?;
        Ok(())
    }

    /// Encode image to base64 PNG
    fn encode_image(image: &DynamicImage) -> Result<String, ScanError> {
        let mut buffer = Vec::new();
        image.write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)?;
        Ok(general_purpose::STANDARD.encode(&buffer))
    }

    /// Drop boxes overlapping a larger one by more than `iou_threshold`
    fn filter_overlapping_boxes(mut boxes: Vec<TextBox>, iou_threshold: f64) -> Vec<TextBox> {
        // Ascending, so pop() yields the largest remaining box
        boxes.sort_by(|a, b| a.area().partial_cmp(&b.area()).unwrap_or(std::cmp::Ordering::Equal));

        let mut kept: Vec<TextBox> = Vec::with_capacity(boxes.len());
        while let Some(current) = boxes.pop() {
            boxes.retain(|other| current.iou(other) <= iou_threshold);
            kept.push(current);
        }
        kept
    }

    /// Filter overlaps and sort into reading order (top-to-bottom, then left-to-right)
    fn process_boxes(boxes: Vec<TextBox>) -> Vec<TextBlock> {
        let boxes: Vec<TextBox> = boxes
            .into_iter()
            .filter(|b| b.is_well_formed() && !b.text.trim().is_empty())
            .collect();

        let mut blocks: Vec<TextBlock> = Self::filter_overlapping_boxes(boxes, 0.3)
            .into_iter()
            .map(TextBox::into_block)
            .collect();

        blocks.sort_by(|a, b| a.top.partial_cmp(&b.top).unwrap_or(std::cmp::Ordering::Equal));

        // Group blocks whose tops are within half a line height, then read each line left to right
        let mut lines: Vec<Vec<TextBlock>> = Vec::new();
        for block in blocks {
            match lines.last_mut() {
                Some(line)
                    if (block.top - line[0].top).abs() < block.height.min(line[0].height) / 2.0 =>
                {
                    line.push(block)
                }
                _ => lines.push(vec![block]),
            }
        }

        let mut blocks = Vec::new();
        for mut line in lines {
            line.sort_by(|a, b| a.left.partial_cmp(&b.left).unwrap_or(std::cmp::Ordering::Equal));
            blocks.extend(line);
        }
        blocks
    }
}

#[async_trait]
impl TextRecognizer for HttpRecognizer {
    async fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextBlock>, ScanError> {
        let image_base64 = Self::encode_image(image)?;
        let url = format!("{}/ocr", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&ImageRequest { image_base64 })
            .send()
            .await
            .map_err(|e| ScanError::Recognition(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ScanError::Recognition(format!("OCR server error: {}", error_text)));
        }

        let data: OcrResponse = response
            .json()
            .await
            .map_err(|e| ScanError::Recognition(format!("failed to parse response: {}", e)))?;

        Ok(Self::process_boxes(data.boxes))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
