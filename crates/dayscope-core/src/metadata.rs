//! Date and unit inference for report files.
//!
//! Operational reports carry their date and unit in the file name
//! (`Laporan Shift Unit 7 - 1 Maret 2025.pdf`, `u3_2025-03-02.txt`) or in
//! the page header. [`infer_metadata`] looks at the file name first and only
//! consults the first [`HEADER_CHARS`] characters of the page text for the
//! fields the name does not provide.
//!
//! # Date patterns
//!
//! Tried in order; the first one that yields a real calendar date wins:
//!
//! 1. `<day> <month name> <year>` using a [`MonthVocabulary`]
//!    (Indonesian and English by default).
//! 2. ISO-like `YYYY-MM-DD`, `YYYY_MM_DD`, `YYYY/MM/DD`.
//!
//! # Unit pattern
//!
//! `unit N` or `u N` (case-insensitive, optional whitespace, not preceded by
//! a letter), normalized to `Unit N`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

/// How much of a page is scanned when the file name carries no metadata.
pub const HEADER_CHARS: usize = 500;

const MONTHS_ID: [(&str, u32); 12] = [
    ("januari", 1),
    ("februari", 2),
    ("maret", 3),
    ("april", 4),
    ("mei", 5),
    ("juni", 6),
    ("juli", 7),
    ("agustus", 8),
    ("september", 9),
    ("oktober", 10),
    ("november", 11),
    ("desember", 12),
];

const MONTHS_EN: [(&str, u32); 12] = [
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
];

const MONTHS_EN_SHORT: [(&str, u32); 11] = [
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

/// Lower-case month names mapped to month numbers.
///
/// Full names and abbreviations are tracked separately: abbreviations are
/// accepted inside explicit `day month year` dates but never on their own,
/// where words like "mar" or "may" would be ambiguous.
#[derive(Debug, Clone)]
pub struct MonthVocabulary {
    full: HashMap<String, u32>,
    short: HashMap<String, u32>,
}

impl MonthVocabulary {
    /// Indonesian and English month names, with English abbreviations.
    pub fn indonesian_english() -> Self {
        let mut vocab = Self {
            full: HashMap::new(),
            short: HashMap::new(),
        };
        for (name, month) in MONTHS_ID.iter().chain(MONTHS_EN.iter()) {
            vocab.full.insert(name.to_string(), *month);
        }
        for (name, month) in MONTHS_EN_SHORT.iter() {
            vocab.short.insert(name.to_string(), *month);
        }
        vocab
    }

    /// Builds a vocabulary from explicit `(name, month)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        Self {
            full: pairs
                .into_iter()
                .map(|(name, month)| (name.to_lowercase(), month))
                .collect(),
            short: HashMap::new(),
        }
    }

    /// Month number for a full or abbreviated name.
    pub fn month(&self, name: &str) -> Option<u32> {
        let lower = name.to_lowercase();
        self.full
            .get(&lower)
            .or_else(|| self.short.get(&lower))
            .copied()
    }

    /// Month number for a full name only.
    pub fn full_month(&self, name: &str) -> Option<u32> {
        self.full.get(&name.to_lowercase()).copied()
    }

    /// Regex alternation of every name, longest first so that `mar` never
    /// shadows `maret` or `march`.
    pub fn pattern(&self, include_short: bool) -> String {
        let mut names: Vec<&str> = self.full.keys().map(|s| s.as_str()).collect();
        if include_short {
            names.extend(self.short.keys().map(|s| s.as_str()));
        }
        names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        names.dedup();
        names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl Default for MonthVocabulary {
    fn default() -> Self {
        Self::indonesian_english()
    }
}

/// Metadata derived from a file path and one page of text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InferredMetadata {
    pub source_file: String,
    pub source_path: String,
    /// `YYYY-MM-DD`
    pub date: Option<String>,
    pub unit: Option<String>,
}

fn word_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{1,2})\s+([A-Za-z]+)\s+(\d{4})").expect("valid word-date regex")
    })
}

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(20\d{2})[-_/](\d{1,2})[-_/](\d{1,2})").expect("valid iso-date regex")
    })
}

fn unit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|[^a-z])(?:unit|u)\s*(\d+)").expect("valid unit regex")
    })
}

/// Infers `source_file`, `source_path`, `date`, and `unit` for one page.
pub fn infer_metadata(path: &str, text: &str, vocab: &MonthVocabulary) -> InferredMetadata {
    let file_name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());

    let header: String = text.chars().take(HEADER_CHARS).collect();

    InferredMetadata {
        date: detect_date(&file_name, vocab).or_else(|| detect_date(&header, vocab)),
        unit: detect_unit(&file_name).or_else(|| detect_unit(&header)),
        source_file: file_name,
        source_path: path.to_string(),
    }
}

/// Finds the first real calendar date in `text`, as `YYYY-MM-DD`.
pub fn detect_date(text: &str, vocab: &MonthVocabulary) -> Option<String> {
    for caps in word_date_re().captures_iter(text) {
        let Some(month) = vocab.month(&caps[2]) else {
            continue;
        };
        let day: u32 = caps[1].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date.to_string());
        }
    }

    for caps in iso_date_re().captures_iter(text) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(date.to_string());
        }
    }

    None
}

/// Finds a `unit N` / `u N` token and returns it as `Unit N`.
pub fn detect_unit(text: &str) -> Option<String> {
    let caps = unit_re().captures(text)?;
    let number: u64 = caps[1].parse().ok()?;
    Some(format!("Unit {}", number))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> MonthVocabulary {
        MonthVocabulary::default()
    }

    #[test]
    fn test_indonesian_date_in_filename() {
        let m = infer_metadata(
            "/data/uploads/Laporan Shift Unit 7 - 1 Maret 2025.pdf",
            "",
            &vocab(),
        );
        assert_eq!(m.source_file, "Laporan Shift Unit 7 - 1 Maret 2025.pdf");
        assert_eq!(m.date.as_deref(), Some("2025-03-01"));
        assert_eq!(m.unit.as_deref(), Some("Unit 7"));
    }

    #[test]
    fn test_english_and_short_month() {
        assert_eq!(
            detect_date("report 15 June 2025", &vocab()).as_deref(),
            Some("2025-06-15")
        );
        assert_eq!(
            detect_date("report 3 Aug 2025", &vocab()).as_deref(),
            Some("2025-08-03")
        );
    }

    #[test]
    fn test_iso_variants() {
        for name in ["u3_2025-03-02.txt", "u3_2025_03_02.txt", "u3 2025/03/02.txt"] {
            assert_eq!(
                detect_date(name, &vocab()).as_deref(),
                Some("2025-03-02"),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_word_date_wins_over_iso() {
        let d = detect_date("2025-01-09 backup of 2 Februari 2025", &vocab());
        assert_eq!(d.as_deref(), Some("2025-02-02"));
    }

    #[test]
    fn test_skips_non_month_words() {
        let d = detect_date("shift 3 operators 2025, laporan 4 April 2025", &vocab());
        assert_eq!(d.as_deref(), Some("2025-04-04"));
    }

    #[test]
    fn test_invalid_calendar_date_is_absent() {
        assert_eq!(detect_date("31 Februari 2025", &vocab()), None);
        assert_eq!(detect_date("2025-13-01", &vocab()), None);
    }

    #[test]
    fn test_unit_normalization() {
        assert_eq!(detect_unit("UNIT7 report").as_deref(), Some("Unit 7"));
        assert_eq!(detect_unit("laporan_u 3.pdf").as_deref(), Some("Unit 3"));
        assert_eq!(detect_unit("menu 3"), None);
        assert_eq!(detect_unit("no unit here"), None);
    }

    #[test]
    fn test_header_fallback() {
        let m = infer_metadata(
            "notes.txt",
            "LAPORAN HARIAN UNIT 2\nTanggal: 5 Agustus 2025\n...",
            &vocab(),
        );
        assert_eq!(m.date.as_deref(), Some("2025-08-05"));
        assert_eq!(m.unit.as_deref(), Some("Unit 2"));
    }

    #[test]
    fn test_no_match_leaves_fields_absent() {
        let m = infer_metadata("misc.txt", "nothing useful", &vocab());
        assert_eq!(m.date, None);
        assert_eq!(m.unit, None);
        assert_eq!(m.source_path, "misc.txt");
    }

    #[test]
    fn test_vocab_pattern_longest_first() {
        let p = vocab().pattern(true);
        let names: Vec<&str> = p.split('|').collect();
        let mar = names.iter().position(|s| *s == "mar").unwrap();
        let maret = names.iter().position(|s| *s == "maret").unwrap();
        assert!(maret < mar, "{}", p);
        assert!(!vocab().pattern(false).split('|').any(|s| s == "mar"));
    }
}
