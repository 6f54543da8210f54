use crate::models::label::LabelInfo;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Known manufacturers, matched case-insensitively anywhere in the text
const MANUFACTURERS: &[&str] = &[
    "SAIDAL",
    "Biopharm",
    "Antibiotical",
    "LAPROPHAN",
    "Sanofi",
    "Hikma",
    "Pfizer",
    "Novartis",
    "Biocare",
    "Bayer",
    "GlaxoSmithKline",
    "GSK",
    "Biogalenic",
    "Nadpharma",
];

/// Dosage forms, longer spellings first so they win the alternation
const DOSAGE_FORMS: &[&str] = &[
    "comprimés",
    "comprimée",
    "comprimé",
    "quadrispersible",
    "gélules",
    "gélule",
    "suppositoires",
    "suppositoire",
    "suspension",
    "injection",
    "solution",
    "unidoses",
    "sachets",
    "sachet",
    "pommade",
    "collyre",
    "gouttes",
    "sirop",
    "crème",
    "gel",
];

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {}: {}", pattern, e))
}

static NAME_STRIP: LazyLock<Regex> = LazyLock::new(|| regex(r"[^\w\s\-]"));

static DOSAGE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(\d+[,.]?\d*\s*mg(?:\s*/\s*\d+[,.]?\d*\s*mg)?)\b",
        r"(?i)(\d+[,.]?\d*\s*ml)\b",
        r"(?i)(\d+[,.]?\d*\s*g)\b",
        r"(?i)(\d+[,.]?\d*\s*%)",
        r"(?i)(\d+[,.]?\d*\s*mcg)\b",
    ]
    .iter()
    .map(|p| regex(p))
    .collect()
});

static LOT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bLOT\b\s*[:\s]*([A-Z0-9\-]+)",
        r"(?i)\bN°\s*CODE\b\s*[:\s]*([A-Z0-9\-]+)",
        r"(?i)\bBATCH\b\s*[:\s]*([A-Z0-9\-]+)",
    ]
    .iter()
    .map(|p| regex(p))
    .collect()
});

static EXPIRY: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:EXP|DE|DDP)\b\.?\s*[:\s]*(\d{2}[/\-]\d{2}[/\-]?\d{2,4})",
        r"(\d{2}[/\-]\d{4})",
    ]
    .iter()
    .map(|p| regex(p))
    .collect()
});

static PRICE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(\d+[,.]?\d*)\s*DA\b",
        r"(?i)\bPPA\b\s*[:\s]*(\d+[,.]?\d*)",
        r"(?i)\bPrix\b\s*[:\s]*(\d+[,.]?\d*)",
        r"(?i)\bP\.P\.A\.?\s*[:\s]*(\d+[,.]?\d*)",
    ]
    .iter()
    .map(|p| regex(p))
    .collect()
});

static FORM: LazyLock<Regex> =
    LazyLock::new(|| regex(&format!(r"(?i)\b({})\b", DOSAGE_FORMS.join("|"))));

static SPA_COMPANY: LazyLock<Regex> =
    LazyLock::new(|| regex(r"([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)\s+S\.P\.A"));

/// Normalize raw recognizer output
///
/// Collapses whitespace on every line, fixes common character confusions,
/// drops empty lines and case-insensitive duplicates (first one wins).
/// Example: "Doliprane  500   mg" -> "Doliprane 500 mg"
pub fn clean_text(raw: &str) -> String {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();

    for line in raw.lines() {
        let cleaned = line
            .split_whitespace()
            .map(correct_token)
            .collect::<Vec<_>>()
            .join(" ");
        if cleaned.is_empty() {
            continue;
        }
        if seen.insert(cleaned.to_lowercase()) {
            lines.push(cleaned);
        }
    }

    lines.join("\n")
}

/// Fix characters the recognizer commonly confuses
///
/// A standalone `ll`, `||`, `l|` or `|l` becomes `II`; an `o`/`O` touching a
/// digit becomes `0`.
pub fn correct_token(token: &str) -> String {
    if token.chars().count() == 2 && token.chars().all(|c| c == 'l' || c == '|') {
        return "II".to_string();
    }

    let mut chars: Vec<char> = token.chars().collect();
    if !chars.iter().any(|c| c.is_ascii_digit()) {
        return token.to_string();
    }

    // Two sweeps so runs like "1oo" and "oo1" are both fully corrected
    for i in 0..chars.len() {
        if is_letter_o(chars[i]) && i > 0 && chars[i - 1].is_ascii_digit() {
            chars[i] = '0';
        }
    }
    for i in (0..chars.len()).rev() {
        if is_letter_o(chars[i]) && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
            chars[i] = '0';
        }
    }

    chars.into_iter().collect()
}

fn is_letter_o(c: char) -> bool {
    c == 'o' || c == 'O'
}

/// Parse structured fields out of cleaned label text
pub fn parse_label_info(text: &str) -> LabelInfo {
    LabelInfo {
        name: parse_name(text),
        dosage: first_capture(&DOSAGE, text),
        lot_number: parse_lot_number(text),
        expiry_date: first_capture(&EXPIRY, text),
        price: first_capture(&PRICE, text).map(|p| format!("{} DA", p)),
        manufacturer: parse_manufacturer(text),
        form: FORM
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_lowercase()),
    }
}

/// First capitalized line among the first five
pub fn parse_name(text: &str) -> Option<String> {
    text.lines().take(5).find_map(|line| {
        let line = line.trim();
        if line.chars().count() <= 2 {
            return None;
        }
        let starts_upper = line.chars().next().is_some_and(char::is_uppercase);
        if !starts_upper || !line.chars().any(char::is_alphabetic) {
            return None;
        }

        let name = NAME_STRIP.replace_all(line, "");
        let name = name.trim();
        (name.chars().count() > 2).then(|| name.to_string())
    })
}

fn parse_lot_number(text: &str) -> Option<String> {
    LOT.iter()
        .filter_map(|re| re.captures(text))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .find(|lot| lot.chars().count() > 2)
}

fn parse_manufacturer(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    if let Some(known) = MANUFACTURERS.iter().find(|m| lower.contains(&m.to_lowercase())) {
        return Some(known.to_string());
    }

    SPA_COMPANY
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Group 1 of the first pattern that matches
fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}
