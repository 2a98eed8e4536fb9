//! `dayscope stats`: record, chunk and corpus overview.

use anyhow::Result;
use sqlx::Row;
use std::collections::BTreeMap;

use dayscope_core::store::CorpusLog;

use crate::config::Config;
use crate::corpus_log::JsonlCorpusLog;
use crate::db;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let status_rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM ingestion_records GROUP BY status ORDER BY status",
    )
    .fetch_all(&pool)
    .await?;
    let by_status: BTreeMap<String, i64> = status_rows
        .iter()
        .map(|row| (row.get("status"), row.get("n")))
        .collect();
    let total_records: i64 = by_status.values().sum();

    let (chunk_rows, total_tokens): (i64, i64) = {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n, COALESCE(SUM(token_count), 0) AS tokens FROM record_chunks",
        )
        .fetch_one(&pool)
        .await?;
        (row.get("n"), row.get("tokens"))
    };

    let dense_vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dense_vectors")
        .fetch_one(&pool)
        .await?;

    let corpus = JsonlCorpusLog::new(&config.storage.corpus_path).load().await?;
    let mut per_date: BTreeMap<&str, usize> = BTreeMap::new();
    let mut undated = 0usize;
    for chunk in &corpus {
        match chunk.metadata.date.as_deref() {
            Some(d) => *per_date.entry(d).or_insert(0) += 1,
            None => undated += 1,
        }
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("dayscope — Corpus Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Corpus:      {}", config.storage.corpus_path.display());
    println!();
    println!("  Records:     {}", total_records);
    for (status, n) in &by_status {
        println!("    {:<11} {}", status, n);
    }
    println!();
    println!("  Chunks:      {} ({} est. tokens)", chunk_rows, total_tokens);
    println!("  Lexical:     {}", corpus.len());
    if config.dense.backend == "sqlite" {
        println!("  Dense:       {}", dense_vectors);
    } else {
        println!("  Dense:       {} ({})", config.dense.backend, config.dense.collection);
    }

    match (per_date.keys().next(), per_date.keys().next_back()) {
        (Some(first), Some(last)) => {
            println!();
            println!(
                "  Dates:       {} → {} ({} days with data)",
                first,
                last,
                per_date.len()
            );
        }
        _ => {
            println!();
            println!("  Dates:       none");
        }
    }
    if undated > 0 {
        println!("  Undated:     {} chunk(s)", undated);
    }
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
