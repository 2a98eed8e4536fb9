//! SQLite persistence for [`IngestionRecord`]s and their chunk rows.
//!
//! Status changes are guarded updates (`WHERE id = ? AND status = ?`), so
//! two workers can never move the same record from the same state.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use dayscope_core::models::{Chunk, IngestStatus, IngestionRecord};

use crate::config::Config;
use crate::db;
use crate::error::IngestError;

/// One row of `record_chunks`.
#[derive(Debug, Clone)]
pub struct RecordChunk {
    pub record_id: String,
    pub chunk_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub token_count: i64,
    pub char_count: i64,
}

const RECORD_COLUMNS: &str = "id, filename, stored_path, file_type, file_size, content_hash, \
     status, chunk_count, page_count, error_message, uploaded_at, processed_at, \
     chunk_size, chunk_overlap, embedding_model";

fn row_to_record(row: &SqliteRow) -> Result<IngestionRecord, sqlx::Error> {
    let status: String = row.get("status");
    let status = status
        .parse::<IngestStatus>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;

    Ok(IngestionRecord {
        id: row.get("id"),
        filename: row.get("filename"),
        stored_path: row.get("stored_path"),
        file_type: row.get("file_type"),
        file_size: row.get("file_size"),
        content_hash: row.get("content_hash"),
        status,
        chunk_count: row.get("chunk_count"),
        page_count: row.get("page_count"),
        error_message: row.get("error_message"),
        uploaded_at: row.get("uploaded_at"),
        processed_at: row.get("processed_at"),
        chunk_size: row.get("chunk_size"),
        chunk_overlap: row.get("chunk_overlap"),
        embedding_model: row.get("embedding_model"),
    })
}

pub async fn insert_record(pool: &SqlitePool, record: &IngestionRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO ingestion_records (id, filename, stored_path, file_type, file_size,
            content_hash, status, chunk_count, page_count, error_message, uploaded_at,
            processed_at, chunk_size, chunk_overlap, embedding_model)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.id)
    .bind(&record.filename)
    .bind(&record.stored_path)
    .bind(&record.file_type)
    .bind(record.file_size)
    .bind(&record.content_hash)
    .bind(record.status.as_str())
    .bind(record.chunk_count)
    .bind(record.page_count)
    .bind(&record.error_message)
    .bind(record.uploaded_at)
    .bind(record.processed_at)
    .bind(record.chunk_size)
    .bind(record.chunk_overlap)
    .bind(&record.embedding_model)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_record(pool: &SqlitePool, id: &str) -> Result<Option<IngestionRecord>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM ingestion_records WHERE id = ?",
        RECORD_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_record).transpose()
}

/// Records ordered by upload time, newest first.
pub async fn list_records(
    pool: &SqlitePool,
    status: Option<IngestStatus>,
) -> Result<Vec<IngestionRecord>, sqlx::Error> {
    let rows = match status {
        Some(s) => {
            sqlx::query(&format!(
                "SELECT {} FROM ingestion_records WHERE status = ? ORDER BY uploaded_at DESC, id",
                RECORD_COLUMNS
            ))
            .bind(s.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {} FROM ingestion_records ORDER BY uploaded_at DESC, id",
                RECORD_COLUMNS
            ))
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(row_to_record).collect()
}

/// Builds the error for a guarded update that matched no row.
async fn rejected_transition(
    pool: &SqlitePool,
    id: &str,
    to: IngestStatus,
) -> IngestError {
    match get_record(pool, id).await {
        Ok(Some(record)) => IngestError::InvalidTransition {
            id: id.to_string(),
            from: record.status,
            to,
        },
        Ok(None) => IngestError::NotFound(id.to_string()),
        Err(e) => IngestError::Store(e),
    }
}

/// Moves a record from `from` to `to`; clears any previous error message.
pub async fn transition(
    pool: &SqlitePool,
    id: &str,
    from: IngestStatus,
    to: IngestStatus,
) -> Result<(), IngestError> {
    if !from.can_transition_to(to) {
        return Err(IngestError::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        });
    }

    let result = sqlx::query(
        "UPDATE ingestion_records SET status = ?, error_message = NULL WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(id)
    .bind(from.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(rejected_transition(pool, id, to).await);
    }
    Ok(())
}

/// Stores the chunk rows and moves `processing → ready` in one transaction.
pub async fn mark_ready(
    pool: &SqlitePool,
    id: &str,
    chunks: &[Chunk],
    page_count: usize,
    embedding_model: &str,
) -> Result<(), IngestError> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM record_chunks WHERE record_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            r#"
            INSERT INTO record_chunks (record_id, chunk_id, chunk_index, content,
                token_count, char_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&chunk.id)
        .bind(chunk.metadata.chunk_index as i64)
        .bind(&chunk.text)
        .bind(chunk.token_count() as i64)
        .bind(chunk.char_count() as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    let result = sqlx::query(
        r#"
        UPDATE ingestion_records
        SET status = 'ready', chunk_count = ?, page_count = ?, processed_at = ?,
            embedding_model = ?, error_message = NULL
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(chunks.len() as i64)
    .bind(page_count as i64)
    .bind(now)
    .bind(embedding_model)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(rejected_transition(pool, id, IngestStatus::Ready).await);
    }

    tx.commit().await?;
    Ok(())
}

/// Moves `processing → error` with a message.
pub async fn mark_error(pool: &SqlitePool, id: &str, message: &str) -> Result<(), IngestError> {
    let result = sqlx::query(
        r#"
        UPDATE ingestion_records
        SET status = 'error', error_message = ?, processed_at = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(message)
    .bind(Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(rejected_transition(pool, id, IngestStatus::Error).await);
    }
    Ok(())
}

pub async fn list_record_chunks(
    pool: &SqlitePool,
    record_id: &str,
) -> Result<Vec<RecordChunk>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT record_id, chunk_id, chunk_index, content, token_count, char_count
        FROM record_chunks WHERE record_id = ? ORDER BY chunk_index
        "#,
    )
    .bind(record_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| RecordChunk {
            record_id: row.get("record_id"),
            chunk_id: row.get("chunk_id"),
            chunk_index: row.get("chunk_index"),
            content: row.get("content"),
            token_count: row.get("token_count"),
            char_count: row.get("char_count"),
        })
        .collect())
}

/// `dayscope records`: lists ingestion records.
pub async fn run_records(config: &Config, status: Option<&str>) -> anyhow::Result<()> {
    let status = status
        .map(|s| s.parse::<IngestStatus>().map_err(anyhow::Error::msg))
        .transpose()?;

    let pool = db::connect(config).await?;
    let records = list_records(&pool, status).await?;
    pool.close().await;

    if records.is_empty() {
        println!("No records.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:>6}  {:>5}  FILE",
        "ID", "STATUS", "CHUNKS", "PAGES"
    );
    for r in &records {
        println!(
            "{:<36}  {:<10}  {:>6}  {:>5}  {}",
            r.id, r.status, r.chunk_count, r.page_count, r.filename
        );
        if let Some(ref err) = r.error_message {
            println!("{:<36}  error: {}", "", err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        pool
    }

    fn record(id: &str) -> IngestionRecord {
        IngestionRecord {
            id: id.to_string(),
            filename: "laporan.txt".into(),
            stored_path: "/tmp/laporan.txt".into(),
            file_type: "txt".into(),
            file_size: 10,
            content_hash: "abc".into(),
            status: IngestStatus::Uploaded,
            chunk_count: 0,
            page_count: 0,
            error_message: None,
            uploaded_at: 1,
            processed_at: None,
            chunk_size: 1000,
            chunk_overlap: 200,
            embedding_model: None,
        }
    }

    #[tokio::test]
    async fn test_guarded_transitions() {
        let pool = pool().await;
        insert_record(&pool, &record("r1")).await.unwrap();

        transition(&pool, "r1", IngestStatus::Uploaded, IngestStatus::Processing)
            .await
            .unwrap();
        let again =
            transition(&pool, "r1", IngestStatus::Uploaded, IngestStatus::Processing).await;
        assert!(matches!(
            again,
            Err(IngestError::InvalidTransition {
                from: IngestStatus::Processing,
                ..
            })
        ));

        mark_error(&pool, "r1", "boom").await.unwrap();
        let stored = get_record(&pool, "r1").await.unwrap().unwrap();
        assert_eq!(stored.status, IngestStatus::Error);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));

        let missing = transition(&pool, "nope", IngestStatus::Error, IngestStatus::Processing).await;
        assert!(matches!(missing, Err(IngestError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_ready_requires_processing() {
        let pool = pool().await;
        insert_record(&pool, &record("r2")).await.unwrap();
        assert!(mark_ready(&pool, "r2", &[], 1, "hashing").await.is_err());
        assert!(list_record_chunks(&pool, "r2").await.unwrap().is_empty());

        transition(&pool, "r2", IngestStatus::Uploaded, IngestStatus::Processing)
            .await
            .unwrap();
        mark_ready(&pool, "r2", &[], 1, "hashing").await.unwrap();
        let listed = list_records(&pool, Some(IngestStatus::Ready)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].embedding_model.as_deref(), Some("hashing"));
    }
}
