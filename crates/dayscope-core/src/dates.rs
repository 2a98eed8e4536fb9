//! Natural-language date resolution.
//!
//! Two layers:
//!
//! - [`DateParser`] extracts literal calendar dates ("1 dan 5 Agustus 2025",
//!   "1–5 March", "tanggal 1, 2, dan 3 Maret 2025", "August 25, 2025").
//! - [`DateResolver`] turns a query plus its literal dates into a
//!   [`DateResolution`]: a retrieval [`DateStrategy`] and a date list.
//!
//! Resolution order (first match wins):
//!
//! | # | Condition | Strategy | Dates |
//! |---|-----------|----------|-------|
//! | 1 | literal dates present | `explicit` | the literal dates, in order |
//! | 2 | "latest / terakhir / most recent …" | `latest` | empty, caller fills |
//! | 3 | comparative + month extractable | `month_range` | every day of that month |
//! | 4 | comparative, no month | `all_available` | empty, caller fills |
//! | 5 | otherwise | `no_filter` | empty |
//!
//! Nothing here fails on unparseable input; an unrecognized date simply
//! moves the query further down the table.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

use crate::metadata::MonthVocabulary;

/// Year used when a query omits it.
pub const DEFAULT_YEAR: i32 = 2025;

const RANGE_WORDS: &str = r"(?:sampai|hingga|to|ke|-|–|—)";
const YEAR: &str = r"(\d{4}|\d{2})\b";

const LATEST_PATTERNS: &[&str] = &[
    r"\bterakhir\b",
    r"\bterbaru\b",
    r"\bpaling\s+baru\b",
    r"\blast\b",
    r"\blatest\b",
    r"\bmost\s+recent\b",
    r"\brecent\b",
    r"\blast\s+sync\b",
    r"\bsync\s+terakhir\b",
    r"\bsinkronisasi\s+terakhir\b",
];

const COMPARATIVE_PATTERNS: &[&str] = &[
    r"\bpaling\s+(?:baik|buruk|tinggi|rendah|efisien|stabil)\b",
    r"\blebih\s+(?:baik|buruk|tinggi|rendah|efisien|stabil)\b",
    r"\btren\b",
    r"\bperubahan\b",
    r"\bbandingkan\b",
    r"\bperbandingan\b",
    r"\bmana\s+yang\s+(?:lebih|paling)\b",
    r"\bter(?:tinggi|rendah|baik|buruk)\b",
    r"\b(?:best|worst|highest|lowest)\b",
    r"\b(?:better|worse|more|less)\b",
    r"\btrends?\b",
    r"\bchanges?\b",
    r"\b(?:compare|compared|comparison)\b",
    r"\bwhich\s+(?:is|was)\s+(?:better|worse|more|less)\b",
];

/// How the retrieval dates for a query were derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateStrategy {
    Explicit,
    Latest,
    MonthRange,
    AllAvailable,
    NoFilter,
}

impl DateStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateStrategy::Explicit => "explicit",
            DateStrategy::Latest => "latest",
            DateStrategy::MonthRange => "month_range",
            DateStrategy::AllAvailable => "all_available",
            DateStrategy::NoFilter => "no_filter",
        }
    }
}

impl fmt::Display for DateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of [`DateResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateResolution {
    pub dates: Vec<NaiveDate>,
    pub strategy: DateStrategy,
}

impl DateResolution {
    /// True for strategies whose dates must come from the corpus.
    pub fn needs_corpus_dates(&self) -> bool {
        matches!(
            self.strategy,
            DateStrategy::Latest | DateStrategy::AllAvailable
        )
    }

    /// Fills deferred strategies from the dates known to the corpus.
    ///
    /// `latest` becomes the most recent available date, `all_available`
    /// every available date in ascending order. Other strategies are
    /// returned unchanged.
    pub fn materialize(&self, available: &[NaiveDate]) -> DateResolution {
        let mut sorted = available.to_vec();
        sorted.sort();
        sorted.dedup();

        let dates = match self.strategy {
            DateStrategy::Latest => sorted.last().copied().into_iter().collect(),
            DateStrategy::AllAvailable => sorted,
            _ => self.dates.clone(),
        };
        DateResolution {
            dates,
            strategy: self.strategy,
        }
    }

    /// Dates as `YYYY-MM-DD` strings.
    pub fn date_strings(&self) -> Vec<String> {
        self.dates.iter().map(|d| d.to_string()).collect()
    }
}

/// Every calendar day of `month` in `year`.
pub fn month_dates(year: i32, month: u32) -> Vec<NaiveDate> {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return Vec::new();
    };
    first
        .iter_days()
        .take_while(|d| d.month() == month)
        .collect()
}

/// Literal date extraction from free text.
#[derive(Debug, Clone)]
pub struct DateParser {
    vocab: MonthVocabulary,
    default_year: i32,
    two_dates: Regex,
    range: Regex,
    unit_label: Regex,
    list: Regex,
    month_first: Regex,
}

impl DateParser {
    pub fn new(vocab: MonthVocabulary, default_year: i32) -> Result<Self, regex::Error> {
        let m = vocab.pattern(true);
        let day_month_year = format!(r"\b(\d{{1,2}})\s+({m})\b\s+{YEAR}");

        Ok(Self {
            two_dates: Regex::new(&format!(
                r"{day_month_year}\s+(?:dan|and)\s+(\d{{1,2}})\s+({m})\b\s+{YEAR}"
            ))?,
            range: Regex::new(&format!(
                r"\b(\d{{1,2}})\s*{RANGE_WORDS}\s*(\d{{1,2}})\s+({m})\b(?:\s+{YEAR})?"
            ))?,
            unit_label: Regex::new(r"(?:^|[^\p{L}\d])(?:unit|u)\s*$")?,
            list: Regex::new(&format!(
                r"\b(\d{{1,2}}(?:\s*,\s*\d{{1,2}})*(?:\s*,?\s*(?:dan|and)\s+\d{{1,2}})?)\s+({m})\b(?:\s+{YEAR})?"
            ))?,
            month_first: Regex::new(&format!(
                r"\b({m})\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
            ))?,
            vocab,
            default_year,
        })
    }

    pub fn default_year(&self) -> i32 {
        self.default_year
    }

    /// Extracts literal dates, in the order they are written.
    ///
    /// Patterns are tried in priority order and the first one that matches
    /// decides the result: two full dates joined by "dan"/"and", a day
    /// range, a day list (which includes a single date), then the English
    /// `Month D, YYYY` form. Invalid calendar days are dropped.
    pub fn parse(&self, query: &str) -> Vec<NaiveDate> {
        let q = query.to_lowercase();

        if let Some(caps) = self.two_dates.captures(&q) {
            let first = self.date(&caps[2], Some(&caps[3]), &caps[1]);
            let second = self.date(&caps[5], Some(&caps[6]), &caps[4]);
            let dates: Vec<NaiveDate> = first.into_iter().chain(second).collect();
            if !dates.is_empty() {
                return dedup_in_order(dates);
            }
        }

        // "unit 3 - 5 agustus" names unit 3 on the 5th, not days 3 to 5.
        let range = self
            .range
            .captures_iter(&q)
            .find(|caps| !self.unit_label.is_match(&q[..caps.get(0).map_or(0, |m| m.start())]));
        if let Some(caps) = range {
            let start: u32 = caps[1].parse().unwrap_or(0);
            let end: u32 = caps[2].parse().unwrap_or(0);
            let year = caps.get(4).map(|m| m.as_str());
            if start >= 1 && start <= end {
                let dates: Vec<NaiveDate> = (start..=end)
                    .filter_map(|day| self.date(&caps[3], year, &day.to_string()))
                    .collect();
                if !dates.is_empty() {
                    return dates;
                }
            }
        }

        if let Some(caps) = self.list.captures(&q) {
            let year = caps.get(3).map(|m| m.as_str());
            let dates: Vec<NaiveDate> = caps[1]
                .split(|c: char| !c.is_ascii_digit())
                .filter(|s| !s.is_empty())
                .filter_map(|day| self.date(&caps[2], year, day))
                .collect();
            if !dates.is_empty() {
                return dedup_in_order(dates);
            }
        }

        if let Some(caps) = self.month_first.captures(&q) {
            if let Some(date) = self.date(&caps[1], Some(&caps[3]), &caps[2]) {
                return vec![date];
            }
        }

        Vec::new()
    }

    fn date(&self, month: &str, year: Option<&str>, day: &str) -> Option<NaiveDate> {
        let month = self.vocab.month(month)?;
        let day: u32 = day.parse().ok()?;
        NaiveDate::from_ymd_opt(self.year(year), month, day)
    }

    /// Four-digit years are taken as written; missing or two-digit years
    /// fall back to the default year.
    fn year(&self, year: Option<&str>) -> i32 {
        match year {
            Some(y) if y.len() == 4 => y.parse().unwrap_or(self.default_year),
            _ => self.default_year,
        }
    }
}

fn dedup_in_order(dates: Vec<NaiveDate>) -> Vec<NaiveDate> {
    let mut seen = std::collections::HashSet::new();
    dates.into_iter().filter(|d| seen.insert(*d)).collect()
}

/// Decides the retrieval strategy for a query.
#[derive(Debug, Clone)]
pub struct DateResolver {
    parser: DateParser,
    latest: RegexSet,
    comparative: RegexSet,
    month_year: Regex,
    bare_month: Regex,
}

impl DateResolver {
    pub fn new(vocab: MonthVocabulary, default_year: i32) -> Result<Self, regex::Error> {
        let full = vocab.pattern(false);
        Ok(Self {
            latest: RegexSet::new(LATEST_PATTERNS)?,
            comparative: RegexSet::new(COMPARATIVE_PATTERNS)?,
            month_year: Regex::new(&format!(r"\b({full})\s+(\d{{4}})\b"))?,
            bare_month: Regex::new(&format!(r"\b(?:di|pada|bulan|in|on)\s+({full})\b"))?,
            parser: DateParser::new(vocab, default_year)?,
        })
    }

    /// Indonesian and English vocabulary, default year [`DEFAULT_YEAR`].
    pub fn with_defaults() -> Result<Self, regex::Error> {
        Self::new(MonthVocabulary::default(), DEFAULT_YEAR)
    }

    pub fn parser(&self) -> &DateParser {
        &self.parser
    }

    /// Parses literal dates and resolves in one step.
    pub fn resolve_query(&self, query: &str) -> DateResolution {
        let literal = self.parser.parse(query);
        self.resolve(query, &literal)
    }

    /// Resolves `query` given dates already extracted upstream.
    pub fn resolve(&self, query: &str, literal: &[NaiveDate]) -> DateResolution {
        if !literal.is_empty() {
            return DateResolution {
                dates: literal.to_vec(),
                strategy: DateStrategy::Explicit,
            };
        }

        if self.is_latest(query) {
            return DateResolution {
                dates: Vec::new(),
                strategy: DateStrategy::Latest,
            };
        }

        if self.is_comparative(query) {
            if let Some((year, month)) = self.extract_month(query) {
                return DateResolution {
                    dates: month_dates(year, month),
                    strategy: DateStrategy::MonthRange,
                };
            }
            return DateResolution {
                dates: Vec::new(),
                strategy: DateStrategy::AllAvailable,
            };
        }

        DateResolution {
            dates: Vec::new(),
            strategy: DateStrategy::NoFilter,
        }
    }

    pub fn is_latest(&self, query: &str) -> bool {
        self.latest.is_match(&query.to_lowercase())
    }

    pub fn is_comparative(&self, query: &str) -> bool {
        self.comparative.is_match(&query.to_lowercase())
    }

    /// `(year, month)` from "Maret 2025" anywhere in the query, or from a
    /// bare month after di/pada/bulan/in/on with the default year.
    pub fn extract_month(&self, query: &str) -> Option<(i32, u32)> {
        let q = query.to_lowercase();
        if let Some(caps) = self.month_year.captures(&q) {
            let month = self.parser.vocab.full_month(&caps[1])?;
            let year: i32 = caps[2].parse().ok()?;
            return Some((year, month));
        }
        let caps = self.bare_month.captures(&q)?;
        let month = self.parser.vocab.full_month(&caps[1])?;
        Some((self.parser.default_year, month))
    }
}
