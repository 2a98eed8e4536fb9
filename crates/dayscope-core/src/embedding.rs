//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, a deterministic offline [`HashingEmbedder`], and pure helper
//! functions for vector serialization and similarity computation.
//!
//! Network-backed providers (Ollama, OpenAI) live in the `dayscope` app
//! crate.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::lexical::tokenize;

/// Failure to produce embeddings.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

/// Trait for embedding providers.
///
/// `embed` must be deterministic for identical text within one model
/// version; the dense index relies on stored and query vectors being
/// comparable.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"bge-m3"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embeds a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Embeds a single text.
pub async fn embed_one(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Vec<f32>, EmbeddingError> {
    provider
        .embed(&[text.to_string()])
        .await?
        .pop()
        .ok_or_else(|| EmbeddingError::Malformed("empty embedding batch".into()))
}

/// Feature-hashing embedder: each term is hashed into one of `dims`
/// signed buckets and the result is L2-normalized.
///
/// Needs no model or network, so it backs offline deployments and tests.
/// Texts sharing terms land close together.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dims];
        for term in tokenize(text) {
            let digest = Sha256::digest(term.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vec[idx] += sign;
        }
        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Packs a vector as little-endian `f32` bytes for the `dense_vectors.embedding`
/// column.
///
/// ```rust
/// use dayscope_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let blob = vec_to_blob(&[0.5f32, -1.0]);
/// assert_eq!(blob.len(), 8);
/// assert_eq!(blob_to_vec(&blob), vec![0.5, -1.0]);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .filter_map(|b| b.try_into().ok().map(f32::from_le_bytes))
        .collect()
}

/// Cosine of the angle between `a` and `b`, in `[-1, 1]`.
///
/// Vectors of different length, or with no magnitude, score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, sq_a, sq_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, sq_a, sq_b), (x, y)| {
            (dot + x * y, sq_a + x * x, sq_b + y * y)
        });

    let denom = (sq_a * sq_b).sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_keeps_values() {
        let vec = vec![0.25f32, -7.5, 0.0, 1e-3];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
        assert_eq!(blob_to_vec(&[0, 0, 128, 63, 1]), vec![1.0]);
    }

    #[test]
    fn test_cosine_bounds() {
        let v = [0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 2.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[2.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs_score_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_hashing_embedder_deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_text("NPHR unit 7 naik");
        assert_eq!(a, e.embed_text("NPHR unit 7 naik"));
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(e.embed_text("").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_hashing_embedder_similarity_tracks_overlap() {
        let e = HashingEmbedder::new(256);
        let q = e.embed_text("nphr unit 7");
        let close = e.embed_text("nphr unit 7 turun");
        let far = e.embed_text("cooling water pump normal");
        assert!(cosine_similarity(&q, &close) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn test_embed_one() {
        let e = HashingEmbedder::new(16);
        let v = embed_one(&e, "boiler").await.unwrap();
        assert_eq!(v, e.embed_text("boiler"));
    }
}
