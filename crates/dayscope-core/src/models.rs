//! Core data models shared by the ingestion and retrieval pipelines.
//!
//! These types flow through the whole system:
//!
//! ```text
//! LoadedPage ──▶ chunk_pages() ──▶ Chunk ──▶ CorpusIndex (lexical + dense)
//!                                    │
//! IngestionRecord (bookkeeping) ◀────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Approximate characters-per-token ratio used for chunk statistics.
pub const CHARS_PER_TOKEN: usize = 4;

/// Number of leading characters used as a content key when a chunk has no id.
pub const DEDUP_PREFIX_CHARS: usize = 120;

/// One page-level block of text produced by a loader.
///
/// `metadata` holds loader-supplied fields (e.g. a sheet name); on key
/// collision they take precedence over inferred metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedPage {
    pub text: String,
    pub page: Option<u32>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl LoadedPage {
    pub fn new(text: impl Into<String>, page: Option<u32>) -> Self {
        Self {
            text: text.into(),
            page,
            metadata: BTreeMap::new(),
        }
    }
}

/// Metadata attached to every [`Chunk`].
///
/// Serialized flat: well-known fields first, caller-supplied fields in
/// `extra` merged alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_file: String,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Report date as `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Position across the whole document, `0..n-1`.
    #[serde(default)]
    pub chunk_index: usize,
    /// Position within the owning page.
    #[serde(default)]
    pub chunk: usize,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// An immutable unit of retrievable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier. Empty for corpus lines written without one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Key used to collapse duplicates during merge.
    pub fn dedup_key(&self) -> String {
        if !self.id.is_empty() {
            return self.id.clone();
        }
        self.text.chars().take(DEDUP_PREFIX_CHARS).collect()
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    pub fn token_count(&self) -> usize {
        self.char_count().div_ceil(CHARS_PER_TOKEN)
    }

    /// True when the chunk carries exactly this `YYYY-MM-DD` date.
    pub fn has_date(&self, date: &str) -> bool {
        self.metadata.date.as_deref() == Some(date)
    }
}

/// A chunk with the score assigned by one search backend.
///
/// BM25 scores and cosine similarities are not comparable; merging keeps
/// backend order instead of mixing scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// Processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Uploaded,
    Processing,
    Ready,
    Error,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Uploaded => "uploaded",
            IngestStatus::Processing => "processing",
            IngestStatus::Ready => "ready",
            IngestStatus::Error => "error",
        }
    }

    /// Allowed moves: `uploaded → processing → ready | error`, and
    /// `error → processing` for an explicit retry.
    pub fn can_transition_to(&self, next: IngestStatus) -> bool {
        matches!(
            (self, next),
            (IngestStatus::Uploaded, IngestStatus::Processing)
                | (IngestStatus::Processing, IngestStatus::Ready)
                | (IngestStatus::Processing, IngestStatus::Error)
                | (IngestStatus::Error, IngestStatus::Processing)
        )
    }
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(IngestStatus::Uploaded),
            "processing" => Ok(IngestStatus::Processing),
            "ready" => Ok(IngestStatus::Ready),
            "error" => Ok(IngestStatus::Error),
            other => Err(format!("unknown ingest status '{}'", other)),
        }
    }
}

/// Per-uploaded-file bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionRecord {
    pub id: String,
    pub filename: String,
    pub stored_path: String,
    pub file_type: String,
    pub file_size: i64,
    /// SHA-256 of the uploaded bytes.
    pub content_hash: String,
    pub status: IngestStatus,
    pub chunk_count: i64,
    pub page_count: i64,
    pub error_message: Option<String>,
    /// Unix timestamp (seconds).
    pub uploaded_at: i64,
    /// Unix timestamp (seconds) of the last terminal transition.
    pub processed_at: Option<i64>,
    pub chunk_size: i64,
    pub chunk_overlap: i64,
    pub embedding_model: Option<String>,
}
