//! Ingestion pipeline: uploaded file → record → chunks → corpus.
//!
//! ```text
//! submit ──▶ uploaded ──process──▶ processing ──▶ ready
//!                                      │
//!                                      └──────▶ error ──retry──▶ processing
//! ```
//!
//! [`IngestionPipeline::ingest`] submits a batch and processes every file
//! on its own task, at most `ingest.workers` at a time. A failure (or a
//! panic) in one file marks that record `error` and never affects its
//! siblings.

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use dayscope_core::chunk::{chunk_pages, ChunkOptions};
use dayscope_core::metadata::MonthVocabulary;
use dayscope_core::models::{IngestStatus, IngestionRecord};

use crate::config::Config;
use crate::corpus::CorpusIndex;
use crate::db;
use crate::error::{IngestError, LoadError};
use crate::extract;
use crate::records;

/// Raw upload as received from a caller.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Reads a local file, keeping its file name.
    pub async fn from_path(path: &Path) -> Result<Self, IngestError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| IngestError::Io {
            source,
            context: format!("reading {}", path.display()),
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { filename, bytes })
    }
}

/// A stored upload with its `uploaded` record.
#[derive(Debug, Clone)]
pub struct SubmittedFile {
    pub record_id: String,
    pub filename: String,
    pub stored_path: PathBuf,
    pub file_type: String,
}

impl From<&IngestionRecord> for SubmittedFile {
    fn from(record: &IngestionRecord) -> Self {
        Self {
            record_id: record.id.clone(),
            filename: record.filename.clone(),
            stored_path: PathBuf::from(&record.stored_path),
            file_type: record.file_type.clone(),
        }
    }
}

/// Final state of one file of a batch.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub record_id: String,
    pub filename: String,
    pub status: IngestStatus,
    pub chunk_count: usize,
    pub error: Option<String>,
}

/// What [`IngestionPipeline::submit`] did with one upload.
#[derive(Debug, Clone)]
pub enum Submission {
    /// Stored with an `uploaded` record.
    Stored(SubmittedFile),
    /// Not stored for processing; its record (if it could be written) is
    /// already `error`.
    Rejected(FileOutcome),
}

impl Submission {
    pub fn record_id(&self) -> &str {
        match self {
            Submission::Stored(file) => &file.record_id,
            Submission::Rejected(outcome) => &outcome.record_id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub files: Vec<FileOutcome>,
    pub total_chunks: usize,
}

impl BatchReport {
    pub fn ready(&self) -> usize {
        self.count(IngestStatus::Ready)
    }

    pub fn failed(&self) -> usize {
        self.count(IngestStatus::Error)
    }

    fn count(&self, status: IngestStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }
}

/// Strips any directory part, including Windows separators.
fn base_name(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

pub struct IngestionPipeline {
    pool: SqlitePool,
    corpus: Arc<CorpusIndex>,
    upload_dir: PathBuf,
    chunking: ChunkOptions,
    vocab: MonthVocabulary,
    workers: usize,
    max_file_bytes: u64,
}

impl IngestionPipeline {
    pub fn new(config: &Config, pool: SqlitePool, corpus: Arc<CorpusIndex>) -> Self {
        Self {
            pool,
            corpus,
            upload_dir: config.storage.upload_dir.clone(),
            chunking: config.chunk_options(),
            vocab: MonthVocabulary::default(),
            workers: config.ingest.workers.max(1),
            max_file_bytes: config.ingest.max_file_bytes,
        }
    }

    pub fn corpus(&self) -> &Arc<CorpusIndex> {
        &self.corpus
    }

    /// Stores each file under the upload directory and creates its
    /// record. Nothing is parsed yet.
    ///
    /// Only a missing upload directory fails the whole call. A file that
    /// cannot be stored, or whose base name already appeared earlier in
    /// the same batch, comes back as [`Submission::Rejected`] with an
    /// `error` record; the first file of a given name is the one indexed.
    pub async fn submit(&self, files: Vec<UploadedFile>) -> Result<Vec<Submission>, IngestError> {
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|source| IngestError::Io {
                source,
                context: format!("creating {}", self.upload_dir.display()),
            })?;

        let mut seen = HashSet::new();
        let mut submissions = Vec::with_capacity(files.len());
        for file in files {
            submissions.push(self.store(file, &mut seen).await);
        }
        Ok(submissions)
    }

    async fn store(&self, file: UploadedFile, seen: &mut HashSet<String>) -> Submission {
        let id = Uuid::new_v4().to_string();

        let Some(filename) = base_name(&file.filename) else {
            let message = format!("invalid file name: {:?}", file.filename);
            return self.reject(id, &file.filename, None, &file.bytes, message).await;
        };

        if !seen.insert(filename.clone()) {
            // Kept beside the first copy so a retry can still index it.
            let stored_path = self.upload_dir.join(format!("{}-{}", id, filename));
            let kept = tokio::fs::write(&stored_path, &file.bytes).await.is_ok();
            let message = format!("duplicate file name in batch: {}", filename);
            return self
                .reject(id, &filename, kept.then_some(stored_path), &file.bytes, message)
                .await;
        }

        let stored_path = self.upload_dir.join(&filename);
        if let Err(e) = tokio::fs::write(&stored_path, &file.bytes).await {
            let message = format!("writing {}: {}", stored_path.display(), e);
            return self.reject(id, &filename, None, &file.bytes, message).await;
        }

        let record = self.new_record(id, &filename, &stored_path, &file.bytes, IngestStatus::Uploaded);
        match records::insert_record(&self.pool, &record).await {
            Ok(()) => {
                info!(record = %record.id, file = %filename, "Uploaded");
                Submission::Stored(SubmittedFile::from(&record))
            }
            Err(e) => {
                warn!(record = %record.id, file = %filename, error = %e, "Could not store record");
                Submission::Rejected(FileOutcome {
                    record_id: record.id,
                    filename,
                    status: IngestStatus::Error,
                    chunk_count: 0,
                    error: Some(IngestError::Store(e).to_string()),
                })
            }
        }
    }

    /// Writes an `error` record for an upload that will not be processed.
    async fn reject(
        &self,
        id: String,
        filename: &str,
        stored_path: Option<PathBuf>,
        bytes: &[u8],
        message: String,
    ) -> Submission {
        let path = stored_path.unwrap_or_default();
        let mut record = self.new_record(id, filename, &path, bytes, IngestStatus::Error);
        record.error_message = Some(message.clone());
        record.processed_at = Some(record.uploaded_at);

        warn!(record = %record.id, file = %filename, error = %message, "Upload rejected");
        if let Err(e) = records::insert_record(&self.pool, &record).await {
            warn!(record = %record.id, error = %e, "Could not store rejected record");
        }

        Submission::Rejected(FileOutcome {
            record_id: record.id,
            filename: filename.to_string(),
            status: IngestStatus::Error,
            chunk_count: 0,
            error: Some(message),
        })
    }

    fn new_record(
        &self,
        id: String,
        filename: &str,
        stored_path: &Path,
        bytes: &[u8],
        status: IngestStatus,
    ) -> IngestionRecord {
        IngestionRecord {
            id,
            filename: filename.to_string(),
            stored_path: stored_path.display().to_string(),
            file_type: extract::extension_of(filename),
            file_size: bytes.len() as i64,
            content_hash: format!("{:x}", Sha256::digest(bytes)),
            status,
            chunk_count: 0,
            page_count: 0,
            error_message: None,
            uploaded_at: chrono::Utc::now().timestamp(),
            processed_at: None,
            chunk_size: self.chunking.chunk_size as i64,
            chunk_overlap: self.chunking.chunk_overlap as i64,
            embedding_model: None,
        }
    }

    /// Processes an `uploaded` file to `ready` (or `error`). Returns the
    /// number of chunks indexed.
    pub async fn process(&self, file: &SubmittedFile) -> Result<usize, IngestError> {
        records::transition(
            &self.pool,
            &file.record_id,
            IngestStatus::Uploaded,
            IngestStatus::Processing,
        )
        .await?;
        self.run(file).await
    }

    /// Re-processes a record in `error` from its stored file.
    pub async fn retry(&self, record_id: &str) -> Result<usize, IngestError> {
        let record = records::get_record(&self.pool, record_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(record_id.to_string()))?;

        records::transition(
            &self.pool,
            record_id,
            IngestStatus::Error,
            IngestStatus::Processing,
        )
        .await?;
        info!(record = record_id, file = %record.filename, "Retrying");
        self.run(&SubmittedFile::from(&record)).await
    }

    /// Body of `process`/`retry`; the record is already `processing`.
    async fn run(&self, file: &SubmittedFile) -> Result<usize, IngestError> {
        let mut indexed = false;
        match self.index_file(file, &mut indexed).await {
            Ok(count) => {
                info!(record = %file.record_id, file = %file.filename, chunks = count, "Ready");
                Ok(count)
            }
            Err(err) => {
                if indexed {
                    if let Err(e) = self.corpus.remove_source(&file.filename).await {
                        warn!(file = %file.filename, error = %e, "Rollback of indexed chunks failed");
                    }
                }
                warn!(record = %file.record_id, file = %file.filename, error = %err, "Processing failed");
                records::mark_error(&self.pool, &file.record_id, &err.to_string()).await?;
                Err(err)
            }
        }
    }

    async fn index_file(&self, file: &SubmittedFile, indexed: &mut bool) -> Result<usize, IngestError> {
        let size = tokio::fs::metadata(&file.stored_path)
            .await
            .map_err(|source| LoadError::Io {
                path: file.stored_path.display().to_string(),
                source,
            })?
            .len();
        if size > self.max_file_bytes {
            return Err(LoadError::TooLarge {
                size,
                limit: self.max_file_bytes,
            }
            .into());
        }

        let path = file.stored_path.clone();
        let file_type = file.file_type.clone();
        let document = tokio::task::spawn_blocking(move || extract::load(&path, &file_type))
            .await
            .map_err(|e| IngestError::Worker(e.to_string()))??;

        let chunks = chunk_pages(&document.pages, &file.filename, &self.chunking, &self.vocab);

        self.corpus
            .replace_source(&file.filename, chunks.clone())
            .await?;
        *indexed = true;

        records::mark_ready(
            &self.pool,
            &file.record_id,
            &chunks,
            document.page_count,
            self.corpus.embedder().model_name(),
        )
        .await?;

        Ok(chunks.len())
    }

    /// Submits `files` and processes them concurrently.
    pub async fn ingest(self: &Arc<Self>, files: Vec<UploadedFile>) -> Result<BatchReport, IngestError> {
        let submissions = self.submit(files).await?;
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut positions = HashMap::new();

        for (position, submission) in submissions.iter().enumerate() {
            let Submission::Stored(file) = submission else {
                continue;
            };
            let pipeline = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let file = file.clone();
            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                pipeline.process(&file).await
            });
            positions.insert(handle.id(), position);
        }

        let mut results: Vec<Option<Result<usize, String>>> = vec![None; submissions.len()];
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, result)) => {
                    if let Some(&position) = positions.get(&id) {
                        results[position] = Some(result.map_err(|e| e.to_string()));
                    }
                }
                Err(join_err) => {
                    let Some(&position) = positions.get(&join_err.id()) else {
                        continue;
                    };
                    let record_id = submissions[position].record_id();
                    let message = format!("worker failed: {}", join_err);
                    warn!(record = %record_id, error = %message, "Worker panicked");
                    if let Err(e) = records::mark_error(&self.pool, record_id, &message).await {
                        warn!(record = %record_id, error = %e, "Could not mark record as failed");
                    }
                    results[position] = Some(Err(message));
                }
            }
        }

        let mut report = BatchReport::default();
        for (submission, result) in submissions.into_iter().zip(results) {
            let file = match submission {
                Submission::Stored(file) => file,
                Submission::Rejected(outcome) => {
                    report.files.push(outcome);
                    continue;
                }
            };
            let outcome = match result {
                Some(Ok(count)) => {
                    report.total_chunks += count;
                    FileOutcome {
                        record_id: file.record_id,
                        filename: file.filename,
                        status: IngestStatus::Ready,
                        chunk_count: count,
                        error: None,
                    }
                }
                Some(Err(message)) => FileOutcome {
                    record_id: file.record_id,
                    filename: file.filename,
                    status: IngestStatus::Error,
                    chunk_count: 0,
                    error: Some(message),
                },
                None => FileOutcome {
                    record_id: file.record_id,
                    filename: file.filename,
                    status: IngestStatus::Error,
                    chunk_count: 0,
                    error: Some("worker did not report".to_string()),
                },
            };
            report.files.push(outcome);
        }

        info!(
            files = report.files.len(),
            ready = report.ready(),
            failed = report.failed(),
            chunks = report.total_chunks,
            "Batch complete"
        );
        Ok(report)
    }
}

async fn open_pipeline(config: &Config) -> anyhow::Result<(SqlitePool, Arc<IngestionPipeline>)> {
    let pool = db::connect(config).await?;
    let corpus = CorpusIndex::open(config, &pool).await?;
    let pipeline = Arc::new(IngestionPipeline::new(config, pool.clone(), corpus));
    Ok((pool, pipeline))
}

/// `dayscope ingest`: uploads and processes local files.
pub async fn run_ingest(config: &Config, paths: &[PathBuf]) -> anyhow::Result<()> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(UploadedFile::from_path(path).await?);
    }

    let (pool, pipeline) = open_pipeline(config).await?;
    let report = pipeline.ingest(files).await?;
    pool.close().await;

    for file in &report.files {
        match &file.error {
            None => println!(
                "  {}  {}  {} chunk(s)",
                file.record_id, file.filename, file.chunk_count
            ),
            Some(err) => println!("  {}  {}  error: {}", file.record_id, file.filename, err),
        }
    }
    println!(
        "ingest: {} file(s), {} ready, {} failed, {} chunk(s)",
        report.files.len(),
        report.ready(),
        report.failed(),
        report.total_chunks
    );

    if report.failed() > 0 && report.ready() == 0 {
        anyhow::bail!("no file was ingested");
    }
    Ok(())
}

/// `dayscope retry`: re-processes a failed record.
pub async fn run_retry(config: &Config, record_id: &str) -> anyhow::Result<()> {
    let (pool, pipeline) = open_pipeline(config).await?;
    let result = pipeline.retry(record_id).await;
    pool.close().await;

    let count = result?;
    println!("retry: {} ready, {} chunk(s)", record_id, count);
    Ok(())
}
