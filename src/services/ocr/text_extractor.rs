use super::engine::{TextBlock, TextRecognizer};
use super::parser::{clean_text, parse_label_info};
use super::preprocessing::PreprocessingService;
use crate::models::config::{ExtractionConfig, PreprocessVariant};
use crate::models::label::ScannedLabel;
use crate::services::color::classify_dominant_color;
use image::{DynamicImage, RgbImage};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Turns a cropped label region into a [`ScannedLabel`]
///
/// Every configured preprocessing variant gets its own recognition pass.
/// The longest cleaned text wins; ties keep the earlier variant.
#[derive(Clone)]
pub struct TextExtractor {
    recognizer: Arc<dyn TextRecognizer>,
    preprocessing: PreprocessingService,
    config: ExtractionConfig,
}

impl TextExtractor {
    pub fn new(recognizer: Arc<dyn TextRecognizer>, config: ExtractionConfig) -> Self {
        Self {
            recognizer,
            preprocessing: PreprocessingService::new(config.min_side),
            config,
        }
    }

    pub fn recognizer_name(&self) -> &'static str {
        self.recognizer.name()
    }

    /// Extract label text, or `None` when no variant produced any
    pub async fn extract(&self, region: &RgbImage) -> Option<ScannedLabel> {
        if region.width() == 0 || region.height() == 0 {
            warn!("Empty label region, skipping extraction");
            return None;
        }

        let started = Instant::now();
        let prepared = self.prepare_variants(region).await?;

        let mut best: Option<(PreprocessVariant, String)> = None;
        for (variant, image) in prepared {
            let Some(text) = self.recognize_variant(variant, &image).await else {
                continue;
            };
            let chars = text.chars().count();
            debug!(?variant, chars, "Variant recognized");

            let longer = best
                .as_ref()
                .map_or(true, |(_, current)| chars > current.chars().count());
            if chars > 0 && longer {
                best = Some((variant, text));
            }
        }

        let Some((variant, text)) = best else {
            info!(elapsed_ms = started.elapsed().as_millis() as u64, "No text in any variant");
            return None;
        };

        let dominant_color = classify_dominant_color(region, &self.config.color);
        let label_info = parse_label_info(&text);
        info!(
            ?variant,
            chars = text.chars().count(),
            color = ?dominant_color,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Label text extracted"
        );

        Some(ScannedLabel::new(text, dominant_color, label_info))
    }

    /// Build every variant image on the rayon pool
    async fn prepare_variants(&self, region: &RgbImage) -> Option<Vec<(PreprocessVariant, DynamicImage)>> {
        let preprocessing = self.preprocessing.clone();
        let variants = self.config.variants.clone();
        let region = region.clone();

        let result = tokio::task::spawn_blocking(move || {
            variants
                .par_iter()
                .map(|&variant| (variant, preprocessing.prepare(&region, variant)))
                .collect::<Vec<_>>()
        })
        .await;

        match result {
            Ok(prepared) => Some(prepared),
            Err(e) => {
                warn!(error = %e, "Variant preparation task failed");
                None
            }
        }
    }

    /// One bounded recognition pass. Failures count as an empty result.
    async fn recognize_variant(&self, variant: PreprocessVariant, image: &DynamicImage) -> Option<String> {
        let timeout = self.config.recognition_timeout();
        match tokio::time::timeout(timeout, self.recognizer.recognize(image)).await {
            Ok(Ok(blocks)) => Some(self.blocks_to_text(blocks)),
            Ok(Err(e)) => {
                warn!(?variant, error = %e, "Recognition pass failed");
                None
            }
            Err(_) => {
                warn!(?variant, timeout_ms = timeout.as_millis() as u64, "Recognition pass timed out");
                None
            }
        }
    }

    /// Drop tiny blocks, join the rest line by line and clean the result
    fn blocks_to_text(&self, blocks: Vec<TextBlock>) -> String {
        let raw = blocks
            .into_iter()
            .filter(|b| b.area() >= self.config.min_block_area)
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");
        clean_text(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ScanError;
    use crate::models::label::DominantColor;
    use async_trait::async_trait;
    use image::Rgb;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Recognizer that answers each pass from a script, in call order
    struct ScriptedRecognizer {
        script: Mutex<VecDeque<Result<Vec<TextBlock>, ScanError>>>,
    }

    impl ScriptedRecognizer {
        fn new(passes: Vec<Result<Vec<TextBlock>, ScanError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(passes.into()),
            })
        }

        fn texts(texts: &[&str]) -> Arc<Self> {
            Self::new(texts.iter().map(|t| Ok(vec![block(t)])).collect())
        }
    }

    #[async_trait]
    impl TextRecognizer for ScriptedRecognizer {
        async fn recognize(&self, _image: &DynamicImage) -> Result<Vec<TextBlock>, ScanError> {
            self.script.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct SlowRecognizer;

    #[async_trait]
    impl TextRecognizer for SlowRecognizer {
        async fn recognize(&self, _image: &DynamicImage) -> Result<Vec<TextBlock>, ScanError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(vec![block("Doliprane 500 mg")])
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn block(text: &str) -> TextBlock {
        TextBlock::new(text, 0.0, 0.0, 200.0, 30.0)
    }

    fn white_region() -> RgbImage {
        RgbImage::from_pixel(160, 120, Rgb([250, 250, 250]))
    }

    fn extractor(recognizer: Arc<dyn TextRecognizer>) -> TextExtractor {
        TextExtractor::new(recognizer, ExtractionConfig::default())
    }

    #[tokio::test]
    async fn test_longest_variant_wins() {
        let recognizer = ScriptedRecognizer::texts(&["Dolip", "Doliprane 500 mg", "Doliprane"]);
        let label = extractor(recognizer).extract(&white_region()).await.unwrap();

        assert_eq!(label.text, "Doliprane 500 mg");
        assert_eq!(label.dominant_color, DominantColor::White);
        assert_eq!(label.info.dosage.as_deref(), Some("500 mg"));
        assert!(label.has_valid_text());
    }

    #[tokio::test]
    async fn test_tie_keeps_earlier_variant() {
        let recognizer = ScriptedRecognizer::texts(&["ABCDEFG", "HIJKLMN", ""]);
        let label = extractor(recognizer).extract(&white_region()).await.unwrap();
        assert_eq!(label.text, "ABCDEFG");
    }

    #[tokio::test]
    async fn test_all_variants_empty() {
        let recognizer = ScriptedRecognizer::texts(&["", "   ", "\n"]);
        assert!(extractor(recognizer).extract(&white_region()).await.is_none());
    }

    #[tokio::test]
    async fn test_text_is_cleaned() {
        let recognizer = ScriptedRecognizer::texts(&["Doliprane  500   mg", "", ""]);
        let label = extractor(recognizer).extract(&white_region()).await.unwrap();
        assert_eq!(label.text, "Doliprane 500 mg");
    }

    #[tokio::test]
    async fn test_small_blocks_dropped() {
        let tiny = TextBlock::new("noise noise noise", 0.0, 0.0, 5.0, 5.0);
        let recognizer = ScriptedRecognizer::new(vec![
            Ok(vec![tiny, block("Amoxil")]),
            Ok(Vec::new()),
            Ok(Vec::new()),
        ]);
        let label = extractor(recognizer).extract(&white_region()).await.unwrap();
        assert_eq!(label.text, "Amoxil");
    }

    #[tokio::test]
    async fn test_failed_pass_is_skipped() {
        let recognizer = ScriptedRecognizer::new(vec![
            Err(ScanError::Recognition("engine crashed".into())),
            Ok(vec![block("Paracetamol")]),
            Ok(Vec::new()),
        ]);
        let label = extractor(recognizer).extract(&white_region()).await.unwrap();
        assert_eq!(label.text, "Paracetamol");
    }

    #[tokio::test]
    async fn test_recognition_timeout_counts_as_empty() {
        let config = ExtractionConfig {
            recognition_timeout_ms: 50,
            variants: vec![PreprocessVariant::MildLift],
            ..ExtractionConfig::default()
        };
        let extractor = TextExtractor::new(Arc::new(SlowRecognizer), config);
        assert!(extractor.extract(&white_region()).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_region() {
        let recognizer = ScriptedRecognizer::texts(&["Doliprane"]);
        assert!(extractor(recognizer).extract(&RgbImage::new(0, 0)).await.is_none());
    }
}
