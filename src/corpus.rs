//! The dual-view corpus: a BM25 lexical view over the JSONL log and a
//! dense view in a [`DenseIndex`].
//!
//! # Write path
//!
//! Writers are serialized by an async mutex. A batch is embedded, upserted
//! into the dense view, then appended to the log. When a later step fails
//! the earlier ones are undone, so a chunk is in both views or in neither.
//! The BM25 structure is rebuilt from the new chunk list off the async
//! runtime and swapped in under a short write lock; readers keep using
//! the previous snapshot until then.
//!
//! # Read path
//!
//! [`lexical_search`](CorpusIndex::lexical_search) builds the BM25
//! structure on first use. [`dense_search`](CorpusIndex::dense_search)
//! reports every backend or embedding failure as
//! [`RetrievalError::Unavailable`], never as an empty result.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use dayscope_core::embedding::{embed_one, EmbeddingError, EmbeddingProvider};
use dayscope_core::lexical::LexicalIndex;
use dayscope_core::models::{Chunk, ScoredChunk};
use dayscope_core::store::{CorpusLog, DenseIndex, DensePoint, IndexError};

use crate::config::Config;
use crate::corpus_log::JsonlCorpusLog;
use crate::dense::open_dense_index;
use crate::embedding::create_provider;
use crate::error::{IndexWriteError, RetrievalError};

pub struct CorpusIndex {
    log: Arc<dyn CorpusLog>,
    dense: Arc<dyn DenseIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    writer: tokio::sync::Mutex<()>,
    lexical: RwLock<Option<Arc<LexicalIndex>>>,
}

impl CorpusIndex {
    pub fn new(
        log: Arc<dyn CorpusLog>,
        dense: Arc<dyn DenseIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            log,
            dense,
            embedder,
            writer: tokio::sync::Mutex::new(()),
            lexical: RwLock::new(None),
        }
    }

    /// Wires the configured embedding provider, dense backend and JSONL log.
    pub async fn open(config: &Config, pool: &SqlitePool) -> Result<Arc<Self>> {
        let embedder = create_provider(&config.embedding)?;
        let dense = open_dense_index(config, pool, embedder.dims()).await?;
        let log = Arc::new(JsonlCorpusLog::new(&config.storage.corpus_path));
        Ok(Arc::new(Self::new(log, dense, embedder)))
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Current BM25 snapshot, building it from the log if needed.
    pub async fn snapshot(&self) -> Result<Arc<LexicalIndex>, IndexError> {
        let cached = self.lexical.read().unwrap().clone();
        if let Some(index) = cached {
            return Ok(index);
        }

        let chunks = self.log.load().await?;
        let built = build_index(chunks).await?;

        let mut slot = self.lexical.write().unwrap();
        // Another reader may have won the race; either snapshot is current.
        Ok(Arc::clone(slot.get_or_insert(built)))
    }

    /// Drops the cached BM25 structure and rebuilds it from the log.
    /// Returns the number of chunks indexed.
    pub async fn rebuild_lexical(&self) -> Result<usize, IndexError> {
        let _guard = self.writer.lock().await;
        let built = build_index(self.log.load().await?).await?;
        let len = built.len();
        self.swap(built);
        info!(chunks = len, "Rebuilt lexical index");
        Ok(len)
    }

    fn swap(&self, index: Arc<LexicalIndex>) {
        *self.lexical.write().unwrap() = Some(index);
    }

    /// Adds a batch to both views.
    pub async fn add(&self, chunks: Vec<Chunk>) -> Result<usize, IndexWriteError> {
        let _guard = self.writer.lock().await;
        let base = self.snapshot().await.map_err(IndexWriteError::Lexical)?;
        self.write_batch(base.chunks().to_vec(), chunks).await
    }

    /// Removes every chunk of `source_path` from both views, then adds
    /// `chunks` in their place.
    pub async fn replace_source(
        &self,
        source_path: &str,
        chunks: Vec<Chunk>,
    ) -> Result<usize, IndexWriteError> {
        let _guard = self.writer.lock().await;
        let remaining = self.delete_source_locked(source_path).await?;
        self.write_batch(remaining, chunks).await
    }

    /// Deletes a document from both views. Returns how many lexical chunks
    /// were removed.
    pub async fn remove_source(&self, source_path: &str) -> Result<usize, IndexWriteError> {
        let _guard = self.writer.lock().await;
        let before = self
            .snapshot()
            .await
            .map_err(IndexWriteError::Lexical)?
            .len();
        let remaining = self.delete_source_locked(source_path).await?;
        Ok(before - remaining.len())
    }

    async fn delete_source_locked(&self, source_path: &str) -> Result<Vec<Chunk>, IndexWriteError> {
        let current = self.snapshot().await.map_err(IndexWriteError::Lexical)?;
        let (removed, remaining): (Vec<Chunk>, Vec<Chunk>) = current
            .chunks()
            .iter()
            .cloned()
            .partition(|c| c.metadata.source_path == source_path);

        if !removed.is_empty() {
            self.log
                .rewrite(&remaining)
                .await
                .map_err(IndexWriteError::Lexical)?;
        }

        if let Err(e) = self.dense.delete_source(source_path).await {
            if !removed.is_empty() {
                warn!(source = source_path, "Dense delete failed, restoring lexical log");
                if let Err(restore) = self.log.rewrite(current.chunks()).await {
                    warn!(error = %restore, "Lexical restore failed");
                }
            }
            return Err(IndexWriteError::Dense(e));
        }

        if !removed.is_empty() {
            info!(
                source = source_path,
                removed = removed.len(),
                "Removed previous chunks"
            );
            self.swap(build_index(remaining.clone()).await.map_err(IndexWriteError::Lexical)?);
        }
        Ok(remaining)
    }

    /// Embeds, upserts and appends `chunks` on top of `base`, compensating
    /// on failure. Caller holds the writer lock.
    async fn write_batch(&self, base: Vec<Chunk>, chunks: Vec<Chunk>) -> Result<usize, IndexWriteError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            ))
            .into());
        }
        let points: Vec<DensePoint> = chunks
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(chunk, vector)| DensePoint { chunk, vector })
            .collect();
        let ids: Vec<String> = chunks.iter().map(|c| c.dedup_key()).collect();

        if let Err(e) = self.dense.upsert(&points).await {
            warn!(error = %e, "Dense upsert failed, removing partial batch");
            if let Err(cleanup) = self.dense.delete(&ids).await {
                warn!(error = %cleanup, "Dense cleanup failed");
            }
            return Err(IndexWriteError::Dense(e));
        }

        if let Err(e) = self.log.append(&chunks).await {
            warn!(error = %e, "Lexical append failed, rolling back dense batch");
            if let Err(cleanup) = self.dense.delete(&ids).await {
                warn!(error = %cleanup, "Dense rollback failed");
            }
            if let Err(restore) = self.log.rewrite(&base).await {
                warn!(error = %restore, "Lexical restore failed");
            }
            return Err(IndexWriteError::Lexical(e));
        }

        let added = chunks.len();
        let mut all = base;
        all.extend(chunks);
        self.swap(build_index(all).await.map_err(IndexWriteError::Lexical)?);
        debug!(added, "Indexed batch");
        Ok(added)
    }

    /// BM25 search; the date predicate is applied before truncation to `k`.
    pub async fn lexical_search(
        &self,
        query: &str,
        k: usize,
        date: Option<&str>,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let index = self.snapshot().await.map_err(RetrievalError::Lexical)?;
        let query = query.to_string();
        let date = date.map(str::to_string);
        let hits =
            tokio::task::spawn_blocking(move || index.search(&query, k, date.as_deref())).await?;
        Ok(hits)
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
        Ok(embed_one(self.embedder.as_ref(), query).await?)
    }

    /// Nearest neighbours of an already embedded query.
    pub async fn dense_search_vector(
        &self,
        vector: &[f32],
        k: usize,
        date: Option<&str>,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        self.dense
            .search(vector, k, date)
            .await
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))
    }

    pub async fn dense_search(
        &self,
        query: &str,
        k: usize,
        date: Option<&str>,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let vector = self.embed_query(query).await?;
        self.dense_search_vector(&vector, k, date).await
    }

    /// Sorted distinct report dates present in the corpus.
    pub async fn available_dates(&self) -> Result<Vec<String>, RetrievalError> {
        Ok(self
            .snapshot()
            .await
            .map_err(RetrievalError::Lexical)?
            .available_dates())
    }

    pub async fn len(&self) -> Result<usize, IndexError> {
        Ok(self.snapshot().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len().await? == 0)
    }
}

async fn build_index(chunks: Vec<Chunk>) -> Result<Arc<LexicalIndex>, IndexError> {
    tokio::task::spawn_blocking(move || Arc::new(LexicalIndex::build(chunks)))
        .await
        .map_err(|e| IndexError::Storage(format!("lexical build task failed: {}", e)))
}
