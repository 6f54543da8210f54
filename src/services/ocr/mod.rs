pub mod engine;
pub mod http_ocr;
pub mod parser;
pub mod preprocessing;
#[cfg(feature = "tesseract")]
pub mod tesseract;
pub mod text_extractor;

// Re-export main types
pub use engine::{TextBlock, TextRecognizer};
pub use http_ocr::HttpRecognizer;
pub use parser::{clean_text, parse_label_info};
pub use preprocessing::PreprocessingService;
#[cfg(feature = "tesseract")]
pub use tesseract::TesseractRecognizer;
pub use text_extractor::TextExtractor;
