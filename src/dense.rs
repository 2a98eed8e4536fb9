//! Dense index backends and backend selection.
//!
//! [`SqliteDenseIndex`] keeps vectors as little-endian `f32` blobs in the
//! `dense_vectors` table and scores them by brute-force cosine similarity.
//! It needs no extra service and suits corpora of a few hundred thousand
//! chunks. Larger deployments point `dense.backend` at Qdrant
//! ([`QdrantIndex`](crate::qdrant::QdrantIndex)).

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use dayscope_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use dayscope_core::models::{Chunk, ScoredChunk};
use dayscope_core::store::{DenseIndex, DensePoint, IndexError};

use crate::config::Config;
use crate::qdrant::QdrantIndex;

/// Builds the backend named by `dense.backend`. For Qdrant the collection
/// is created with `dims` if it does not exist yet.
pub async fn open_dense_index(
    config: &Config,
    pool: &SqlitePool,
    dims: usize,
) -> Result<Arc<dyn DenseIndex>> {
    match config.dense.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteDenseIndex::new(pool.clone()))),
        "qdrant" => {
            let index = QdrantIndex::new(&config.dense)?;
            index.ensure_collection(dims).await?;
            Ok(Arc::new(index))
        }
        other => anyhow::bail!("Unknown dense backend: {}", other),
    }
}

pub(crate) fn map_sqlx(err: sqlx::Error) -> IndexError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            IndexError::Unavailable(err.to_string())
        }
        other => IndexError::Storage(other.to_string()),
    }
}

/// Vectors stored in the application database.
#[derive(Clone)]
pub struct SqliteDenseIndex {
    pool: SqlitePool,
}

impl SqliteDenseIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DenseIndex for SqliteDenseIndex {
    async fn upsert(&self, points: &[DensePoint]) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        for point in points {
            let chunk_json = serde_json::to_string(&point.chunk)
                .map_err(|e| IndexError::Rejected(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO dense_vectors (chunk_id, source_path, date, chunk_json, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    source_path = excluded.source_path,
                    date = excluded.date,
                    chunk_json = excluded.chunk_json,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(point.chunk.dedup_key())
            .bind(&point.chunk.metadata.source_path)
            .bind(&point.chunk.metadata.date)
            .bind(chunk_json)
            .bind(point.vector.len() as i64)
            .bind(vec_to_blob(&point.vector))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        date: Option<&str>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let rows = match date {
            Some(d) => {
                sqlx::query("SELECT chunk_json, embedding FROM dense_vectors WHERE date = ?")
                    .bind(d)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT chunk_json, embedding FROM dense_vectors")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(map_sqlx)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk_json: String = row.get("chunk_json");
            let blob: Vec<u8> = row.get("embedding");
            let chunk: Chunk = serde_json::from_str(&chunk_json)
                .map_err(|e| IndexError::Storage(format!("corrupt dense payload: {}", e)))?;
            let score = cosine_similarity(vector, &blob_to_vec(&blob)) as f64;
            hits.push(ScoredChunk { chunk, score });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        for id in ids {
            sqlx::query("DELETE FROM dense_vectors WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn delete_source(&self, source_path: &str) -> Result<(), IndexError> {
        sqlx::query("DELETE FROM dense_vectors WHERE source_path = ?")
            .bind(source_path)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use dayscope_core::embedding::HashingEmbedder;
    use dayscope_core::models::ChunkMetadata;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn index() -> SqliteDenseIndex {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        SqliteDenseIndex::new(pool)
    }

    fn point(source: &str, idx: usize, date: &str, text: &str) -> DensePoint {
        let embedder = HashingEmbedder::new(256);
        DensePoint {
            chunk: Chunk {
                id: format!("{}#{}", source, idx),
                text: text.to_string(),
                metadata: ChunkMetadata {
                    source_file: source.into(),
                    source_path: source.into(),
                    page: None,
                    date: Some(date.into()),
                    unit: None,
                    chunk_index: idx,
                    chunk: idx,
                    extra: Default::default(),
                },
            },
            vector: embedder.embed_text(text),
        }
    }

    #[tokio::test]
    async fn test_search_filters_by_date() {
        let index = index().await;
        index
            .upsert(&[
                point("a.txt", 0, "2025-03-01", "coal feeder trip"),
                point("b.txt", 0, "2025-03-02", "coal feeder trip"),
                point("b.txt", 1, "2025-03-02", "turbine vibration"),
            ])
            .await
            .unwrap();

        let query = HashingEmbedder::new(256).embed_text("coal feeder");
        let hits = index.search(&query, 10, Some("2025-03-02")).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.chunk.has_date("2025-03-02")));
        assert_eq!(hits[0].chunk.id, "b.txt#0");

        let all = index.search(&query, 1, None).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_deletes() {
        let index = index().await;
        index
            .upsert(&[point("a.txt", 0, "2025-03-01", "old text")])
            .await
            .unwrap();
        index
            .upsert(&[point("a.txt", 0, "2025-03-01", "new text")])
            .await
            .unwrap();

        let query = HashingEmbedder::new(256).embed_text("text");
        let hits = index.search(&query, 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.text, "new text");

        index
            .upsert(&[point("b.txt", 0, "2025-03-01", "other")])
            .await
            .unwrap();
        index.delete_source("a.txt").await.unwrap();
        index.delete(&["b.txt#0".to_string()]).await.unwrap();
        assert!(index.search(&query, 10, None).await.unwrap().is_empty());
    }
}
