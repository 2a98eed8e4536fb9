//! In-memory BM25 ranking over the lexical corpus.
//!
//! A [`LexicalIndex`] is immutable once built. Callers that need a fresh
//! view build a new one and swap it in; readers keep using whichever
//! snapshot they already hold.
//!
//! Scoring is Okapi BM25 with `k1 = 1.2`, `b = 0.75` and the
//! non-negative IDF variant `ln(1 + (N - df + 0.5) / (df + 0.5))`.

use std::collections::{BTreeSet, HashMap};

use crate::models::{Chunk, ScoredChunk};

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Lower-cased alphanumeric terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[derive(Debug, Default)]
pub struct LexicalIndex {
    chunks: Vec<Chunk>,
    /// term → (chunk position, term frequency)
    postings: HashMap<String, Vec<(usize, u32)>>,
    doc_lens: Vec<usize>,
    avg_doc_len: f64,
}

impl LexicalIndex {
    pub fn build(chunks: Vec<Chunk>) -> Self {
        let mut postings: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        let mut doc_lens = Vec::with_capacity(chunks.len());

        for (pos, chunk) in chunks.iter().enumerate() {
            let terms = tokenize(&chunk.text);
            doc_lens.push(terms.len());

            let mut tf: HashMap<String, u32> = HashMap::new();
            for term in terms {
                *tf.entry(term).or_insert(0) += 1;
            }
            for (term, freq) in tf {
                postings.entry(term).or_default().push((pos, freq));
            }
        }

        let avg_doc_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / doc_lens.len() as f64
        };

        Self {
            chunks,
            postings,
            doc_lens,
            avg_doc_len,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Distinct `metadata.date` values, ascending.
    pub fn available_dates(&self) -> Vec<String> {
        self.chunks
            .iter()
            .filter_map(|c| c.metadata.date.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Top `k` chunks for `query`. With `date`, only chunks carrying that
    /// date are ranked, so the `k` slots are never spent on other dates.
    ///
    /// Chunks sharing no term with the query are not returned. Ties keep
    /// corpus order.
    pub fn search(&self, query: &str, k: usize, date: Option<&str>) -> Vec<ScoredChunk> {
        if k == 0 || self.chunks.is_empty() {
            return Vec::new();
        }

        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();

        let n = self.chunks.len() as f64;
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for term in &terms {
            let Some(posting) = self.postings.get(term) else {
                continue;
            };
            let df = posting.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

            for &(pos, tf) in posting {
                if let Some(date) = date {
                    if !self.chunks[pos].has_date(date) {
                        continue;
                    }
                }
                let tf = tf as f64;
                let len_norm = if self.avg_doc_len > 0.0 {
                    self.doc_lens[pos] as f64 / self.avg_doc_len
                } else {
                    1.0
                };
                let score = idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * len_norm));
                *scores.entry(pos).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(k);

        ranked
            .into_iter()
            .map(|(pos, score)| ScoredChunk {
                chunk: self.chunks[pos].clone(),
                score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn chunk(idx: usize, date: &str, text: &str) -> Chunk {
        Chunk {
            id: format!("c{}", idx),
            text: text.to_string(),
            metadata: ChunkMetadata {
                source_file: "r.txt".into(),
                source_path: "r.txt".into(),
                page: None,
                date: Some(date.to_string()),
                unit: None,
                chunk_index: idx,
                chunk: idx,
                extra: Default::default(),
            },
        }
    }

    fn index() -> LexicalIndex {
        LexicalIndex::build(vec![
            chunk(0, "2025-03-01", "NPHR unit 7 naik menjadi 2450 kcal/kWh"),
            chunk(1, "2025-03-01", "Boiler feed pump trip, load reduced"),
            chunk(2, "2025-03-02", "NPHR unit 7 turun ke 2390 kcal/kWh setelah soot blowing"),
            chunk(3, "2025-03-02", "Cooling water pump normal"),
        ])
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("NPHR: 2450 kcal/kWh"), vec!["nphr", "2450", "kcal", "kwh"]);
        assert!(tokenize("  -- ").is_empty());
    }

    #[test]
    fn test_ranks_matching_chunks() {
        let hits = index().search("nphr unit 7", 10, None);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chunk.text.contains("NPHR")));
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_date_filter_applies_before_truncation() {
        let idx = index();
        let hits = idx.search("nphr pump", 1, Some("2025-03-02"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.metadata.date.as_deref(), Some("2025-03-02"));

        assert!(idx.search("nphr", 5, Some("2025-04-01")).is_empty());
    }

    #[test]
    fn test_no_overlap_no_results() {
        assert!(index().search("turbine vibration", 5, None).is_empty());
        assert!(LexicalIndex::build(vec![]).search("nphr", 5, None).is_empty());
    }

    #[test]
    fn test_available_dates_sorted_distinct() {
        assert_eq!(index().available_dates(), vec!["2025-03-01", "2025-03-02"]);
    }

    #[test]
    fn test_rarer_term_scores_higher() {
        let hits = index().search("soot pump", 10, None);
        assert_eq!(hits[0].chunk.id, "c2");
    }
}
