//! Caller-facing retrieval API and the `resolve`, `retrieve` and `dates`
//! commands.
//!
//! [`SearchService`] ties the [`DateResolver`] to the [`HybridRetriever`]:
//!
//! | Method | Does |
//! |--------|------|
//! | [`resolve_dates`](SearchService::resolve_dates) | Query → dates + strategy, no corpus access |
//! | [`retrieve`](SearchService::retrieve) | Query + explicit dates → chunks |
//! | [`retrieve_for_query`](SearchService::retrieve_for_query) | Resolve, fill deferred strategies from the corpus, retrieve |

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

use dayscope_core::dates::{DateResolution, DateResolver};
use dayscope_core::metadata::MonthVocabulary;

use crate::config::Config;
use crate::corpus::CorpusIndex;
use crate::db;
use crate::error::RetrievalError;
use crate::retriever::{DateStatus, HybridRetriever, RetrievalOutcome};

const EXCERPT_CHARS: usize = 240;

/// Outcome of [`SearchService::retrieve_for_query`].
#[derive(Debug, Clone, Serialize)]
pub struct QueryRetrieval {
    pub strategy: String,
    pub dates: Vec<String>,
    #[serde(flatten)]
    pub outcome: RetrievalOutcome,
}

pub struct SearchService {
    resolver: DateResolver,
    retriever: HybridRetriever,
}

impl SearchService {
    pub fn new(config: &Config, corpus: Arc<CorpusIndex>) -> Result<Self> {
        let resolver = DateResolver::new(MonthVocabulary::default(), config.dates.default_year)?;
        Ok(Self {
            resolver,
            retriever: HybridRetriever::new(corpus, &config.retrieval),
        })
    }

    pub fn resolve_dates(&self, query: &str) -> DateResolution {
        self.resolver.resolve_query(query)
    }

    pub async fn retrieve(
        &self,
        query: &str,
        dates: &[NaiveDate],
    ) -> Result<RetrievalOutcome, RetrievalError> {
        self.retriever.retrieve(query, dates).await
    }

    /// Dates known to the corpus, oldest first.
    pub async fn available_dates(&self) -> Result<Vec<NaiveDate>, RetrievalError> {
        Ok(self
            .retriever
            .corpus()
            .available_dates()
            .await?
            .iter()
            .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .collect())
    }

    pub async fn retrieve_for_query(&self, query: &str) -> Result<QueryRetrieval, RetrievalError> {
        let mut resolution = self.resolve_dates(query);
        if resolution.needs_corpus_dates() {
            resolution = resolution.materialize(&self.available_dates().await?);
        }

        let outcome = self.retrieve(query, &resolution.dates).await?;
        Ok(QueryRetrieval {
            strategy: resolution.strategy.to_string(),
            dates: resolution.date_strings(),
            outcome,
        })
    }
}

async fn open_service(config: &Config) -> Result<(sqlx::SqlitePool, SearchService)> {
    let pool = db::connect(config).await?;
    let corpus = CorpusIndex::open(config, &pool).await?;
    let service = SearchService::new(config, corpus)?;
    Ok((pool, service))
}

/// `dayscope resolve`: prints how a query's date references resolve.
pub fn run_resolve(config: &Config, query: &str) -> Result<()> {
    let resolver = DateResolver::new(MonthVocabulary::default(), config.dates.default_year)?;
    let resolution = resolver.resolve_query(query);

    println!("strategy: {}", resolution.strategy);
    if resolution.needs_corpus_dates() {
        println!("dates: (filled from corpus at retrieval time)");
    } else if resolution.dates.is_empty() {
        println!("dates: (none)");
    } else {
        println!("dates: {}", resolution.date_strings().join(", "));
    }
    Ok(())
}

/// `dayscope retrieve`: explicit `--date` values win over dates resolved
/// from the query.
pub async fn run_retrieve(
    config: &Config,
    query: &str,
    dates: &[String],
    json: bool,
) -> Result<()> {
    let explicit: Vec<NaiveDate> = dates
        .iter()
        .map(|d| {
            NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map_err(|_| anyhow::anyhow!("invalid date '{}', expected YYYY-MM-DD", d))
        })
        .collect::<Result<_>>()?;

    let (pool, service) = open_service(config).await?;

    let result = if explicit.is_empty() {
        service.retrieve_for_query(query).await?
    } else {
        let outcome = service.retrieve(query, &explicit).await?;
        QueryRetrieval {
            strategy: "explicit".to_string(),
            dates: explicit.iter().map(|d| d.format("%Y-%m-%d").to_string()).collect(),
            outcome,
        }
    };
    pool.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("strategy: {}", result.strategy);
    if !result.dates.is_empty() {
        println!("dates: {}", result.dates.join(", "));
    }
    for report in &result.outcome.dates {
        match &report.status {
            DateStatus::Found(n) => println!("  {}  {} chunk(s)", report.date, n),
            DateStatus::Empty => println!("  {}  no data", report.date),
            DateStatus::Failed(reason) => println!("  {}  failed: {}", report.date, reason),
            DateStatus::TimedOut => println!("  {}  timed out", report.date),
        }
    }
    println!();

    if result.outcome.chunks.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, chunk) in result.outcome.chunks.iter().enumerate() {
        let meta = &chunk.metadata;
        println!(
            "{}. {} [{}]",
            i + 1,
            meta.source_file,
            meta.date.as_deref().unwrap_or("undated")
        );
        if let Some(ref unit) = meta.unit {
            println!("    unit: {}", unit);
        }
        if let Some(page) = meta.page {
            println!("    page: {}", page);
        }
        let excerpt: String = chunk.text.chars().take(EXCERPT_CHARS).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!();
    }
    Ok(())
}

/// `dayscope dates`: lists the report dates present in the corpus.
pub async fn run_dates(config: &Config) -> Result<()> {
    let (pool, service) = open_service(config).await?;
    let dates = service.available_dates().await?;
    pool.close().await;

    if dates.is_empty() {
        println!("No dated reports.");
        return Ok(());
    }
    for date in &dates {
        println!("{}", date.format("%Y-%m-%d"));
    }
    Ok(())
}
