//! In-memory [`DenseIndex`] and [`CorpusLog`] implementations.
//!
//! Uses `Vec` behind `std::sync::RwLock` for thread safety. Dense search is
//! brute-force cosine similarity over every stored vector.

use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ScoredChunk};

use super::{CorpusLog, DenseIndex, DensePoint, IndexError};

/// In-memory dense index for tests and embedded use.
#[derive(Default)]
pub struct InMemoryDenseIndex {
    points: RwLock<Vec<DensePoint>>,
}

impl InMemoryDenseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every stored point, in insertion order.
    pub fn ids(&self) -> Vec<String> {
        self.points
            .read()
            .unwrap()
            .iter()
            .map(|p| p.chunk.dedup_key())
            .collect()
    }
}

#[async_trait]
impl DenseIndex for InMemoryDenseIndex {
    async fn upsert(&self, points: &[DensePoint]) -> Result<(), IndexError> {
        let mut stored = self.points.write().unwrap();
        for point in points {
            let key = point.chunk.dedup_key();
            match stored.iter_mut().find(|p| p.chunk.dedup_key() == key) {
                Some(existing) => *existing = point.clone(),
                None => stored.push(point.clone()),
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        date: Option<&str>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let stored = self.points.read().unwrap();
        let mut hits: Vec<ScoredChunk> = stored
            .iter()
            .filter(|p| date.map_or(true, |d| p.chunk.has_date(d)))
            .map(|p| ScoredChunk {
                chunk: p.chunk.clone(),
                score: cosine_similarity(vector, &p.vector) as f64,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), IndexError> {
        self.points
            .write()
            .unwrap()
            .retain(|p| !ids.contains(&p.chunk.dedup_key()));
        Ok(())
    }

    async fn delete_source(&self, source_path: &str) -> Result<(), IndexError> {
        self.points
            .write()
            .unwrap()
            .retain(|p| p.chunk.metadata.source_path != source_path);
        Ok(())
    }
}

/// In-memory corpus log.
#[derive(Default)]
pub struct InMemoryCorpusLog {
    chunks: RwLock<Vec<Chunk>>,
}

impl InMemoryCorpusLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: RwLock::new(chunks),
        }
    }
}

#[async_trait]
impl CorpusLog for InMemoryCorpusLog {
    async fn load(&self) -> Result<Vec<Chunk>, IndexError> {
        Ok(self.chunks.read().unwrap().clone())
    }

    async fn append(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        self.chunks.write().unwrap().extend_from_slice(chunks);
        Ok(())
    }

    async fn rewrite(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        *self.chunks.write().unwrap() = chunks.to_vec();
        Ok(())
    }
}
