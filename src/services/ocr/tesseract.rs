use super::engine::{TextBlock, TextRecognizer};
use crate::errors::ScanError;
use async_trait::async_trait;
use image::DynamicImage;
use rusty_tesseract::{Args, Image};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Tesseract processes allowed to run at once
const MAX_RUNNING_PROCESSES: usize = 3;

/// Word reported by tesseract, reduced to what line grouping needs
#[derive(Debug, Clone)]
struct Word {
    block_num: i32,
    par_num: i32,
    line_num: i32,
    word_num: i32,
    left: i32,
    top: i32,
    width: i32,
    height: i32,
    text: String,
}

/// Local tesseract recognizer
///
/// Runs the system `tesseract` binary on a blocking thread and returns one
/// block per recognized line.
///
/// A caller-side timeout stops waiting but cannot kill the child process, so
/// each run holds a permit until the process exits. Once every permit is
/// taken, new passes wait (and time out) instead of spawning more processes.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    lang: String,
    psm: i32,
    running: Arc<Semaphore>,
}

impl TesseractRecognizer {
    pub fn new(lang: &str, psm: i32) -> Self {
        Self {
            lang: lang.to_string(),
            psm,
            running: Arc::new(Semaphore::new(MAX_RUNNING_PROCESSES)),
        }
    }

    fn args(&self) -> Args {
        Args {
            lang: self.lang.clone(),
            config_variables: HashMap::new(),
            dpi: Some(300),
            psm: Some(self.psm),
            oem: Some(3),
        }
    }

    fn recognize_blocking(&self, image: &DynamicImage) -> Result<Vec<TextBlock>, ScanError> {
        let tess_img = Image::from_dynamic_image(image)
            .map_err(|e| ScanError::Recognition(format!("failed to create tesseract image: {}", e)))?;

        let output = rusty_tesseract::image_to_data(&tess_img, &self.args())
            .map_err(|e| ScanError::Recognition(format!("tesseract failed: {}", e)))?;
        debug!(entries = output.data.len(), "Tesseract data");

        let words = output
            .data
            .into_iter()
            .filter(|d| d.conf > 0.0 && !d.text.trim().is_empty())
            .map(|d| Word {
                block_num: d.block_num,
                par_num: d.par_num,
                line_num: d.line_num,
                word_num: d.word_num,
                left: d.left,
                top: d.top,
                width: d.width,
                height: d.height,
                text: d.text,
            })
            .collect();

        Ok(group_lines(words))
    }
}

/// Join words into one block per (block, paragraph, line)
fn group_lines(words: Vec<Word>) -> Vec<TextBlock> {
    let mut lines: BTreeMap<(i32, i32, i32), Vec<Word>> = BTreeMap::new();
    for word in words {
        lines
            .entry((word.block_num, word.par_num, word.line_num))
            .or_default()
            .push(word);
    }

    lines
        .into_values()
        .map(|mut line| {
            line.sort_by_key(|w| w.word_num);

            let left = line.iter().map(|w| w.left).min().unwrap_or(0);
            let top = line.iter().map(|w| w.top).min().unwrap_or(0);
            let right = line.iter().map(|w| w.left + w.width).max().unwrap_or(left);
            let bottom = line.iter().map(|w| w.top + w.height).max().unwrap_or(top);
            let text = line.iter().map(|w| w.text.trim()).collect::<Vec<_>>().join(" ");

            TextBlock::new(
                text,
                left as f32,
                top as f32,
                (right - left) as f32,
                (bottom - top) as f32,
            )
        })
        .collect()
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, image: &DynamicImage) -> Result<Vec<TextBlock>, ScanError> {
        let permit = Arc::clone(&self.running)
            .acquire_owned()
            .await
            .map_err(|e| ScanError::Recognition(format!("tesseract unavailable: {}", e)))?;

        let recognizer = self.clone();
        let image = image.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            recognizer.recognize_blocking(&image)
        })
        .await
        .map_err(|e| ScanError::Recognition(format!("tesseract task failed: {}", e)))?
    }

    fn name(&self) -> &'static str {
        "tesseract"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(line: i32, num: i32, left: i32, text: &str) -> Word {
        Word {
            block_num: 1,
            par_num: 1,
            line_num: line,
            word_num: num,
            left,
            top: line * 30,
            width: 40,
            height: 20,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_words_grouped_into_lines() {
        let words = vec![
            word(2, 2, 50, "mg"),
            word(1, 1, 0, "Doliprane"),
            word(2, 1, 0, "500"),
        ];
        let blocks = group_lines(words);

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "Doliprane");
        assert_eq!(blocks[1].text, "500 mg", "words are ordered by word number");
        assert_eq!(blocks[1].left, 0.0);
        assert_eq!(blocks[1].width, 90.0);
        assert_eq!(blocks[1].area(), 90.0 * 20.0);
    }

    #[test]
    fn test_args_use_configured_language() {
        let args = TesseractRecognizer::new("fra+ara+eng", 6).args();
        assert_eq!(args.lang, "fra+ara+eng");
        assert_eq!(args.psm, Some(6));
    }

    #[tokio::test]
    async fn test_waits_while_all_processes_are_busy() {
        let recognizer = TesseractRecognizer::new("eng", 6);
        let _busy = Arc::clone(&recognizer.running)
            .acquire_many_owned(MAX_RUNNING_PROCESSES as u32)
            .await
            .unwrap();

        let blank = DynamicImage::ImageRgb8(image::RgbImage::new(20, 20));
        let pass = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            recognizer.recognize(&blank),
        )
        .await;
        assert!(pass.is_err(), "no new process while the limit is reached");
        assert_eq!(recognizer.running.available_permits(), 0);
    }

    #[tokio::test]
    #[ignore] // Needs the tesseract binary and language data
    async fn test_recognize_blank_image() {
        let recognizer = TesseractRecognizer::new("eng", 6);
        let blank = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(200, 60, image::Rgb([255, 255, 255])));
        let blocks = recognizer.recognize(&blank).await.unwrap();
        assert!(blocks.iter().all(|b| !b.text.trim().is_empty()));
    }
}
