use crate::errors::ScanError;
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// One recognized block of text with its bounding rectangle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            text: text.into(),
            left,
            top,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Text recognition backend
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize text blocks in reading order
    async fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextBlock>, ScanError>;

    fn name(&self) -> &'static str;
}
