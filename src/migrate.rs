//! Idempotent schema setup for `dayscope init`.
//!
//! | Table | Holds |
//! |-------|-------|
//! | `ingestion_records` | One row per uploaded file and its processing state |
//! | `record_chunks` | Chunk bookkeeping per record (ids, counts, text) |
//! | `dense_vectors` | Embeddings for the `sqlite` dense backend |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Applies every migration to an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_records (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            stored_path TEXT NOT NULL,
            file_type TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'uploaded',
            chunk_count INTEGER NOT NULL DEFAULT 0,
            page_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            uploaded_at INTEGER NOT NULL,
            processed_at INTEGER,
            chunk_size INTEGER NOT NULL,
            chunk_overlap INTEGER NOT NULL,
            embedding_model TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS record_chunks (
            record_id TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            char_count INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (record_id, chunk_index),
            FOREIGN KEY (record_id) REFERENCES ingestion_records(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dense_vectors (
            chunk_id TEXT PRIMARY KEY,
            source_path TEXT NOT NULL,
            date TEXT,
            chunk_json TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_status ON ingestion_records(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dense_date ON dense_vectors(date)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_dense_source ON dense_vectors(source_path)")
        .execute(pool)
        .await?;

    Ok(())
}
