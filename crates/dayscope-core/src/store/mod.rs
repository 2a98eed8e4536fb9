//! Storage abstractions behind the corpus.
//!
//! The corpus keeps two views of the same chunk set:
//!
//! - a [`DenseIndex`]: nearest-neighbour search over embedding vectors,
//!   with an equality filter on `metadata.date`;
//! - a [`CorpusLog`]: the ordered, durable chunk sequence the lexical
//!   index is rebuilt from.
//!
//! Both are traits so the app can plug in SQLite, Qdrant, or JSONL
//! backends while tests use the in-memory ones in [`memory`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::models::{Chunk, ScoredChunk};

/// Storage-layer failure.
///
/// `Unavailable` means the backend could not be reached at all; callers
/// surface it distinctly from an empty result.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index backend unavailable: {0}")]
    Unavailable(String),
    #[error("index backend rejected the request: {0}")]
    Rejected(String),
    #[error("index storage error: {0}")]
    Storage(String),
}

/// A chunk and its embedding, ready for upsert.
#[derive(Debug, Clone)]
pub struct DensePoint {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Nearest-neighbour index over chunk embeddings.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](DenseIndex::upsert) | Insert or overwrite points by [`dedup_key`](Chunk::dedup_key) |
/// | [`search`](DenseIndex::search) | Top-`k` by similarity, optional date filter |
/// | [`delete`](DenseIndex::delete) | Remove points by dedup key |
/// | [`delete_source`](DenseIndex::delete_source) | Remove every point of one document |
#[async_trait]
pub trait DenseIndex: Send + Sync {
    async fn upsert(&self, points: &[DensePoint]) -> Result<(), IndexError>;

    /// Results are ordered by descending similarity. The date filter is an
    /// equality match on `metadata.date`; callers still re-check it.
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        date: Option<&str>,
    ) -> Result<Vec<ScoredChunk>, IndexError>;

    async fn delete(&self, ids: &[String]) -> Result<(), IndexError>;

    async fn delete_source(&self, source_path: &str) -> Result<(), IndexError>;
}

/// Durable ordered chunk log backing the lexical index.
#[async_trait]
pub trait CorpusLog: Send + Sync {
    /// Every chunk, in write order.
    async fn load(&self) -> Result<Vec<Chunk>, IndexError>;

    async fn append(&self, chunks: &[Chunk]) -> Result<(), IndexError>;

    /// Replaces the whole log; used for deletions.
    async fn rewrite(&self, chunks: &[Chunk]) -> Result<(), IndexError>;
}
