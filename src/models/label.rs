use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum trimmed length for text to count as a real label
pub const MIN_VALID_TEXT_CHARS: usize = 5;

/// Dominant color class of a label
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DominantColor {
    Green,
    LightGreen,
    Red,
    LightRed,
    White,
    #[default]
    Unknown,
}

/// Fields parsed out of label text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LabelInfo {
    pub name: Option<String>,
    pub dosage: Option<String>,
    pub lot_number: Option<String>,
    pub expiry_date: Option<String>,
    pub price: Option<String>,
    pub manufacturer: Option<String>,
    /// Dosage form such as "comprimés" or "sirop", lowercased
    #[serde(default)]
    pub form: Option<String>,
}

impl LabelInfo {
    pub fn is_empty(&self) -> bool {
        self == &LabelInfo::default()
    }
}

/// Text extracted from one label
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScannedLabel {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub dominant_color: DominantColor,
    #[serde(default)]
    pub info: LabelInfo,
}

impl ScannedLabel {
    pub fn new(text: String, dominant_color: DominantColor, info: LabelInfo) -> Self {
        Self {
            text,
            timestamp: Utc::now(),
            dominant_color,
            info,
        }
    }

    /// True when the trimmed text is longer than five characters
    pub fn has_valid_text(&self) -> bool {
        self.text.trim().chars().count() > MIN_VALID_TEXT_CHARS
    }
}
