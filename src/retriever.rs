//! Date-scoped hybrid retrieval.
//!
//! For a query and a list of calendar dates, every date gets its own
//! dense + lexical search pair. Pairs run as tasks on a [`JoinSet`], at
//! most `retrieval.max_concurrency` at once across the whole retriever,
//! each under `retrieval.date_timeout_secs`. Results are put back in the
//! caller's date order, re-filtered to their date, and merged by
//! [`merge_date_scoped`].
//!
//! A date whose search came back empty, failed, or timed out contributes
//! nothing. Its status is reported in [`RetrievalOutcome::dates`]; no other
//! date's chunks take its place.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use dayscope_core::models::Chunk;
use dayscope_core::search::{
    date_distribution, merge_date_scoped, merge_unscoped, retain_date, DateHits, MergeParams,
};

use crate::config::RetrievalConfig;
use crate::corpus::CorpusIndex;
use crate::error::RetrievalError;

/// What happened to one requested date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum DateStatus {
    /// Chunks of this date in the final result.
    Found(usize),
    Empty,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateReport {
    pub date: String,
    pub status: DateStatus,
    /// Index hits carrying a different date, discarded.
    pub off_date_dropped: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalOutcome {
    pub chunks: Vec<Chunk>,
    /// Chunks per date; undated chunks under `"unknown"`.
    pub distribution: BTreeMap<String, usize>,
    /// One entry per requested date, in request order.
    pub dates: Vec<DateReport>,
}

/// Result of one per-date task before merging.
enum DateSearch {
    Hits { hits: DateHits, dropped: usize },
    Failed { reason: String, unavailable: bool },
    TimedOut,
}

pub struct HybridRetriever {
    corpus: Arc<CorpusIndex>,
    config: RetrievalConfig,
    permits: Arc<Semaphore>,
}

impl HybridRetriever {
    pub fn new(corpus: Arc<CorpusIndex>, config: &RetrievalConfig) -> Self {
        Self {
            corpus,
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config: config.clone(),
        }
    }

    pub fn corpus(&self) -> &Arc<CorpusIndex> {
        &self.corpus
    }

    /// Retrieves chunks for `query`, restricted to `dates` when non-empty.
    ///
    /// Returns [`RetrievalError::Unavailable`] when the dense index or the
    /// embedder cannot be reached for any requested date. An empty corpus
    /// or a query with no matches yields an empty outcome.
    pub async fn retrieve(
        &self,
        query: &str,
        dates: &[NaiveDate],
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let mut wanted: Vec<String> = Vec::with_capacity(dates.len());
        for date in dates {
            let formatted = date.format("%Y-%m-%d").to_string();
            if !wanted.contains(&formatted) {
                wanted.push(formatted);
            }
        }

        if wanted.is_empty() {
            self.retrieve_unscoped(query).await
        } else {
            self.retrieve_scoped(query, wanted).await
        }
    }

    async fn retrieve_unscoped(&self, query: &str) -> Result<RetrievalOutcome, RetrievalError> {
        let (dense, lexical) = tokio::join!(
            self.corpus.dense_search(query, self.config.k_dense, None),
            self.corpus.lexical_search(query, self.config.k_lexical, None),
        );
        let chunks = merge_unscoped(&dense?, &lexical?, self.config.undated_final_k);

        Ok(RetrievalOutcome {
            distribution: date_distribution(&chunks),
            chunks,
            dates: Vec::new(),
        })
    }

    async fn retrieve_scoped(
        &self,
        query: &str,
        dates: Vec<String>,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let vector = Arc::new(self.corpus.embed_query(query).await?);
        let query: Arc<str> = Arc::from(query);
        let timeout = Duration::from_secs(self.config.date_timeout_secs);

        let mut tasks = JoinSet::new();
        let mut positions = HashMap::new();

        for (position, date) in dates.iter().enumerate() {
            let corpus = Arc::clone(&self.corpus);
            let permits = Arc::clone(&self.permits);
            let vector = Arc::clone(&vector);
            let query = Arc::clone(&query);
            let date = date.clone();
            let (k_dense, k_lexical) = (self.config.k_dense, self.config.k_lexical);

            let handle = tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let search = search_date(&corpus, &query, &vector, &date, k_dense, k_lexical);
                match tokio::time::timeout(timeout, search).await {
                    Ok(Ok((hits, dropped))) => DateSearch::Hits { hits, dropped },
                    Ok(Err(e)) => DateSearch::Failed {
                        unavailable: matches!(e, RetrievalError::Unavailable(_)),
                        reason: e.to_string(),
                    },
                    Err(_) => DateSearch::TimedOut,
                }
            });
            positions.insert(handle.id(), position);
        }

        let mut slots: Vec<Option<DateSearch>> = (0..dates.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => (
                    e.id(),
                    DateSearch::Failed {
                        reason: format!("search task failed: {}", e),
                        unavailable: false,
                    },
                ),
            };
            if let Some(&position) = positions.get(&id) {
                slots[position] = Some(result);
            }
        }

        let mut per_date = Vec::with_capacity(dates.len());
        let mut reports = Vec::with_capacity(dates.len());
        let mut unavailable = Vec::new();

        for (date, slot) in dates.iter().zip(slots) {
            let (hits, status, dropped) = match slot {
                Some(DateSearch::Hits { hits, dropped }) => (hits, DateStatus::Empty, dropped),
                Some(DateSearch::Failed { reason, unavailable: true }) => {
                    warn!(date = %date, error = %reason, "Date search unavailable");
                    unavailable.push(reason.clone());
                    (empty_hits(date), DateStatus::Failed(reason), 0)
                }
                Some(DateSearch::Failed { reason, .. }) => {
                    warn!(date = %date, error = %reason, "Date search failed");
                    (empty_hits(date), DateStatus::Failed(reason), 0)
                }
                Some(DateSearch::TimedOut) => {
                    warn!(date = %date, "Date search timed out");
                    (empty_hits(date), DateStatus::TimedOut, 0)
                }
                None => (
                    empty_hits(date),
                    DateStatus::Failed("search task did not report".to_string()),
                    0,
                ),
            };
            per_date.push(hits);
            reports.push(DateReport {
                date: date.clone(),
                status,
                off_date_dropped: dropped,
            });
        }

        if unavailable.len() == dates.len() {
            return Err(RetrievalError::Unavailable(unavailable.swap_remove(0)));
        }

        let chunks = merge_date_scoped(&per_date, self.merge_params());
        debug_assert!(chunks
            .iter()
            .all(|c| dates.iter().any(|d| c.has_date(d))));

        let distribution = date_distribution(&chunks);
        for report in &mut reports {
            if report.status == DateStatus::Empty {
                if let Some(&count) = distribution.get(&report.date) {
                    report.status = DateStatus::Found(count);
                }
            }
            debug!(date = %report.date, status = ?report.status, "Date result");
        }

        Ok(RetrievalOutcome {
            chunks,
            distribution,
            dates: reports,
        })
    }

    fn merge_params(&self) -> MergeParams {
        self.config.merge_params()
    }
}

fn empty_hits(date: &str) -> DateHits {
    DateHits {
        date: date.to_string(),
        ..Default::default()
    }
}

/// Dense + lexical search for one date, re-filtered to that date.
async fn search_date(
    corpus: &CorpusIndex,
    query: &str,
    vector: &[f32],
    date: &str,
    k_dense: usize,
    k_lexical: usize,
) -> Result<(DateHits, usize), RetrievalError> {
    let (dense, lexical) = tokio::join!(
        corpus.dense_search_vector(vector, k_dense, Some(date)),
        corpus.lexical_search(query, k_lexical, Some(date)),
    );

    let (dense, dense_dropped) = retain_date(dense?, date);
    let (lexical, lexical_dropped) = retain_date(lexical?, date);
    let dropped = dense_dropped + lexical_dropped;
    if dropped > 0 {
        warn!(date, dropped, "Index returned chunks from other dates");
    }
    debug!(date, dense = dense.len(), lexical = lexical.len(), "Date searched");

    Ok((
        DateHits {
            date: date.to_string(),
            dense,
            lexical,
        },
        dropped,
    ))
}
