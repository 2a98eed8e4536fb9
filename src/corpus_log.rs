//! JSONL persistence for the lexical corpus.
//!
//! One chunk per line, `{"id", "text", "metadata"}`, in write order. New
//! batches are appended; deletions rewrite the file through a temporary
//! sibling and a rename so a crash never leaves a truncated corpus.
//! Callers serialize writers.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use dayscope_core::models::Chunk;
use dayscope_core::store::{CorpusLog, IndexError};

pub struct JsonlCorpusLog {
    path: PathBuf,
}

impl JsonlCorpusLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn ensure_parent(&self) -> Result<(), IndexError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
        }
        Ok(())
    }
}

fn io_err(err: std::io::Error) -> IndexError {
    IndexError::Storage(err.to_string())
}

fn encode(chunks: &[Chunk]) -> Result<String, IndexError> {
    let mut out = String::new();
    for chunk in chunks {
        let line = serde_json::to_string(chunk).map_err(|e| IndexError::Rejected(e.to_string()))?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

#[async_trait]
impl CorpusLog for JsonlCorpusLog {
    async fn load(&self) -> Result<Vec<Chunk>, IndexError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e)),
        };

        let mut chunks = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(line).map_err(|e| {
                IndexError::Storage(format!(
                    "{}:{}: {}",
                    self.path.display(),
                    lineno + 1,
                    e
                ))
            })?;
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    async fn append(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        if chunks.is_empty() {
            return Ok(());
        }
        self.ensure_parent().await?;
        let payload = encode(chunks)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(payload.as_bytes()).await.map_err(io_err)?;
        file.sync_data().await.map_err(io_err)?;
        Ok(())
    }

    async fn rewrite(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        self.ensure_parent().await?;
        let payload = encode(chunks)?;
        let tmp = self.temp_path();

        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(payload.as_bytes()).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dayscope_core::models::ChunkMetadata;
    use tempfile::TempDir;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                source_file: "a.txt".into(),
                source_path: "a.txt".into(),
                page: None,
                date: Some("2025-03-01".into()),
                unit: Some("Unit 1".into()),
                chunk_index: 0,
                chunk: 0,
                extra: Default::default(),
            },
        }
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let log = JsonlCorpusLog::new(dir.path().join("corpus.jsonl"));
        assert!(log.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_then_rewrite() {
        let dir = TempDir::new().unwrap();
        let log = JsonlCorpusLog::new(dir.path().join("nested/corpus.jsonl"));

        log.append(&[chunk("a", "first")]).await.unwrap();
        log.append(&[chunk("b", "second")]).await.unwrap();
        let ids: Vec<String> = log.load().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        log.rewrite(&[chunk("b", "second")]).await.unwrap();
        let loaded = log.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text, "second");
        assert!(!log.temp_path().exists());
    }

    #[tokio::test]
    async fn test_reads_lines_without_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corpus.jsonl");
        std::fs::write(
            &path,
            "{\"text\":\"legacy\",\"metadata\":{\"source_file\":\"x.pdf\",\"source_path\":\"x.pdf\",\"chunk_index\":0,\"chunk\":0}}\n\n",
        )
        .unwrap();
        let loaded = JsonlCorpusLog::new(&path).load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].id.is_empty());
        assert_eq!(loaded[0].dedup_key(), "legacy");
    }

    #[tokio::test]
    async fn test_corrupt_line_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corpus.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        assert!(JsonlCorpusLog::new(&path).load().await.is_err());
    }
}
