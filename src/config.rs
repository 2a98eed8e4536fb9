use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use dayscope_core::chunk::ChunkOptions;
use dayscope_core::search::MergeParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub dates: DatesConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub dense: DenseConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Uploaded files are written here before processing.
    pub upload_dir: PathBuf,
    /// JSONL lexical corpus.
    pub corpus_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Files processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_workers() -> usize {
    3
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k_dense: usize,
    #[serde(default = "default_k")]
    pub k_lexical: usize,
    #[serde(default = "default_per_date_limit")]
    pub per_date_limit: usize,
    #[serde(default = "default_final_k")]
    pub final_k: usize,
    /// Result cap when no date restriction applies.
    #[serde(default = "default_undated_final_k")]
    pub undated_final_k: usize,
    /// Simultaneous per-date searches.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_date_timeout_secs")]
    pub date_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_dense: default_k(),
            k_lexical: default_k(),
            per_date_limit: default_per_date_limit(),
            final_k: default_final_k(),
            undated_final_k: default_undated_final_k(),
            max_concurrency: default_max_concurrency(),
            date_timeout_secs: default_date_timeout_secs(),
        }
    }
}

fn default_k() -> usize {
    15
}
fn default_per_date_limit() -> usize {
    5
}
fn default_final_k() -> usize {
    20
}
fn default_undated_final_k() -> usize {
    8
}
fn default_max_concurrency() -> usize {
    3
}
fn default_date_timeout_secs() -> u64 {
    30
}

impl RetrievalConfig {
    pub fn merge_params(&self) -> MergeParams {
        MergeParams {
            per_date_limit: Some(self.per_date_limit),
            final_k: self.final_k,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatesConfig {
    /// Year assumed when a query or file name omits it.
    #[serde(default = "default_year")]
    pub default_year: i32,
}

impl Default for DatesConfig {
    fn default() -> Self {
        Self {
            default_year: default_year(),
        }
    }
}

fn default_year() -> i32 {
    dayscope_core::dates::DEFAULT_YEAR
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for `ollama` (and OpenAI-compatible gateways).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hashing".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Dimensionality used by the hashing provider when none is configured.
pub const DEFAULT_HASHING_DIMS: usize = 256;

#[derive(Debug, Deserialize, Clone)]
pub struct DenseConfig {
    /// `sqlite` (vectors in the local database) or `qdrant`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Environment variable holding the Qdrant API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DenseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            collection: default_collection(),
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_collection() -> String {
    "reports".to_string()
}

impl Config {
    pub fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions {
            chunk_size: self.chunking.chunk_size,
            chunk_overlap: self.chunking.chunk_overlap,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parses and validates a TOML config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.ingest.workers == 0 {
        anyhow::bail!("ingest.workers must be >= 1");
    }

    // Validate retrieval
    if config.retrieval.final_k == 0 || config.retrieval.undated_final_k == 0 {
        anyhow::bail!("retrieval.final_k and retrieval.undated_final_k must be >= 1");
    }
    if config.retrieval.max_concurrency == 0 {
        anyhow::bail!("retrieval.max_concurrency must be >= 1");
    }
    if config.retrieval.date_timeout_secs == 0 {
        anyhow::bail!("retrieval.date_timeout_secs must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" => {}
        "ollama" | "openai" => {
            if config.embedding.dims.unwrap_or(0) == 0 {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, ollama, or openai.",
            other
        ),
    }

    match config.dense.backend.as_str() {
        "sqlite" => {}
        "qdrant" => {
            if config.dense.url.is_none() {
                anyhow::bail!("dense.url must be set when backend is 'qdrant'");
            }
        }
        other => anyhow::bail!(
            "Unknown dense backend: '{}'. Must be sqlite or qdrant.",
            other
        ),
    }

    Ok(config)
}
