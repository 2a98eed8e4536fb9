//! Merge step of date-scoped hybrid retrieval.
//!
//! The runtime side (concurrency, timeouts, embedding the query) lives in
//! the app crate; this module holds the pure part that decides which
//! chunks reach the caller.
//!
//! # Merge algorithm
//!
//! 1. Walk the per-date results in the caller's date order.
//! 2. Within a date, take dense hits first, then lexical hits.
//! 3. Drop any chunk whose `metadata.date` differs from the date its
//!    search was scoped to.
//! 4. Drop chunks whose [`dedup_key`](Chunk::dedup_key) was already seen.
//! 5. Keep at most `per_date_limit` chunks per date.
//! 6. Truncate to `final_k`.
//!
//! A date with no surviving chunks contributes nothing; chunks from other
//! dates are never used to fill its place.

use std::collections::{BTreeMap, HashSet};

use crate::models::{Chunk, ScoredChunk};

/// Results of one date's dense + lexical search pair.
#[derive(Debug, Clone, Default)]
pub struct DateHits {
    /// `YYYY-MM-DD`
    pub date: String,
    pub dense: Vec<ScoredChunk>,
    pub lexical: Vec<ScoredChunk>,
}

/// Limits applied while merging.
#[derive(Debug, Clone, Copy)]
pub struct MergeParams {
    /// Cap on chunks contributed by a single date.
    pub per_date_limit: Option<usize>,
    pub final_k: usize,
}

/// Keeps only hits carrying `date`. Returns the survivors and how many
/// were dropped.
pub fn retain_date(hits: Vec<ScoredChunk>, date: &str) -> (Vec<ScoredChunk>, usize) {
    let before = hits.len();
    let kept: Vec<ScoredChunk> = hits.into_iter().filter(|h| h.chunk.has_date(date)).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Removes later duplicates by [`Chunk::dedup_key`], preserving order.
pub fn dedup_chunks(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|c| seen.insert(c.dedup_key()))
        .collect()
}

/// Merges per-date results in the order given. See the module docs.
pub fn merge_date_scoped(per_date: &[DateHits], params: MergeParams) -> Vec<Chunk> {
    let mut seen = HashSet::new();
    let mut merged = Vec::new();

    for hits in per_date {
        let mut taken = 0usize;
        for hit in hits.dense.iter().chain(hits.lexical.iter()) {
            if params.per_date_limit.is_some_and(|limit| taken >= limit) {
                break;
            }
            if !hit.chunk.has_date(&hits.date) {
                continue;
            }
            if seen.insert(hit.chunk.dedup_key()) {
                merged.push(hit.chunk.clone());
                taken += 1;
            }
        }
    }

    merged.truncate(params.final_k);
    merged
}

/// Merges an unfiltered dense + lexical pair.
pub fn merge_unscoped(dense: &[ScoredChunk], lexical: &[ScoredChunk], final_k: usize) -> Vec<Chunk> {
    let mut merged = dedup_chunks(
        dense
            .iter()
            .chain(lexical.iter())
            .map(|h| h.chunk.clone())
            .collect(),
    );
    merged.truncate(final_k);
    merged
}

/// Number of chunks per date. Undated chunks are counted under `"unknown"`.
pub fn date_distribution(chunks: &[Chunk]) -> BTreeMap<String, usize> {
    let mut dist = BTreeMap::new();
    for chunk in chunks {
        let key = chunk
            .metadata
            .date
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        *dist.entry(key).or_insert(0) += 1;
    }
    dist
}
