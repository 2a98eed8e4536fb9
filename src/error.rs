//! Error taxonomy for ingestion and retrieval.
//!
//! | Error | Raised by | Meaning |
//! |-------|-----------|---------|
//! | [`LoadError`] | [`extract`](crate::extract) | File unsupported or unreadable |
//! | [`IndexWriteError`] | [`corpus`](crate::corpus) | Dense or lexical write failed |
//! | [`RetrievalError`] | [`retriever`](crate::retriever) | Search could not be performed |
//! | [`IngestError`] | [`ingest`](crate::ingest) | A file could not be processed |
//!
//! An empty retrieval result is never an error.

use thiserror::Error;

use dayscope_core::embedding::EmbeddingError;
use dayscope_core::models::IngestStatus;
use dayscope_core::store::IndexError;

/// Failure to turn a stored file into page texts.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("unsupported file extension: .{0}")]
    UnsupportedExtension(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),

    #[error("XLSX extraction failed: {0}")]
    Xlsx(String),

    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("file exceeds size limit ({size} > {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },
}

/// A write to one of the two corpus views failed. The corpus has already
/// compensated, so neither view holds the batch.
#[derive(Error, Debug)]
pub enum IndexWriteError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("dense index write failed: {0}")]
    Dense(#[source] IndexError),

    #[error("lexical corpus write failed: {0}")]
    Lexical(#[source] IndexError),
}

/// Retrieval could not be performed.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The dense index or the query embedder could not be reached.
    #[error("retrieval unavailable: {0}")]
    Unavailable(String),

    #[error("lexical corpus unreadable: {0}")]
    Lexical(#[source] IndexError),

    #[error("search task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<EmbeddingError> for RetrievalError {
    fn from(err: EmbeddingError) -> Self {
        RetrievalError::Unavailable(err.to_string())
    }
}

/// Per-file ingestion failure, recorded on the record's `error_message`.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Index(#[from] IndexWriteError),

    #[error("record store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("record {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: IngestStatus,
        to: IngestStatus,
    },

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("worker failed: {0}")]
    Worker(String),
}
