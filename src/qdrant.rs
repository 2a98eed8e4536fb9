//! Qdrant REST backend for the dense index.
//!
//! Each point's payload is the serialized [`Chunk`], so the date filter is
//! a plain `must` match on `metadata.date` and search results need no
//! second lookup.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use dayscope_core::models::{Chunk, ScoredChunk};
use dayscope_core::store::{DenseIndex, DensePoint, IndexError};

use crate::config::DenseConfig;

pub struct QdrantIndex {
    http: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchEntry>,
}

#[derive(Deserialize)]
struct SearchEntry {
    score: f64,
    payload: Option<serde_json::Value>,
}

impl QdrantIndex {
    pub fn new(config: &DenseConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("dense.url required for qdrant backend"))?;
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| anyhow::anyhow!("{} environment variable not set", var))?,
            ),
            None => None,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key,
        })
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        action: &str,
    ) -> Result<reqwest::Response, IndexError> {
        let response = builder
            .send()
            .await
            .map_err(|e| IndexError::Unavailable(format!("qdrant {}: {}", action, e)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("qdrant {} failed ({}): {}", action, status, body);
        if status.is_server_error() {
            Err(IndexError::Unavailable(message))
        } else {
            Err(IndexError::Rejected(message))
        }
    }

    /// Creates the collection with cosine distance unless it already exists.
    pub async fn ensure_collection(&self, dims: usize) -> Result<(), IndexError> {
        let body = json!({ "vectors": { "size": dims, "distance": "Cosine" } });
        let response = self
            .request(reqwest::Method::PUT, self.endpoint(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Unavailable(format!("qdrant collection: {}", e)))?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::CONFLICT => Ok(()),
            // Qdrant answers 400 "already exists" on some versions.
            StatusCode::BAD_REQUEST => {
                let text = response.text().await.unwrap_or_default();
                if text.contains("already exists") {
                    Ok(())
                } else {
                    Err(IndexError::Rejected(format!("qdrant collection: {}", text)))
                }
            }
            other => Err(IndexError::Unavailable(format!(
                "qdrant collection error ({})",
                other
            ))),
        }
    }
}

/// Qdrant accepts only UUIDs or integers as point ids.
fn point_id(key: &str) -> String {
    match Uuid::parse_str(key) {
        Ok(id) => id.to_string(),
        Err(_) => Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string(),
    }
}

fn match_filter(key: &str, value: &str) -> serde_json::Value {
    json!({ "must": [ { "key": key, "match": { "value": value } } ] })
}

#[async_trait]
impl DenseIndex for QdrantIndex {
    async fn upsert(&self, points: &[DensePoint]) -> Result<(), IndexError> {
        if points.is_empty() {
            return Ok(());
        }
        let body_points: Vec<serde_json::Value> = points
            .iter()
            .map(|p| {
                json!({
                    "id": point_id(&p.chunk.dedup_key()),
                    "vector": p.vector,
                    "payload": p.chunk,
                })
            })
            .collect();

        let builder = self
            .request(reqwest::Method::PUT, self.endpoint("/points?wait=true"))
            .json(&json!({ "points": body_points }));
        self.send(builder, "upsert").await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        date: Option<&str>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let mut body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(d) = date {
            body["filter"] = match_filter("metadata.date", d);
        }

        let builder = self
            .request(reqwest::Method::POST, self.endpoint("/points/search"))
            .json(&body);
        let response = self.send(builder, "search").await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| IndexError::Unavailable(format!("qdrant search response: {}", e)))?;

        let mut hits = Vec::with_capacity(parsed.result.len());
        for entry in parsed.result {
            let Some(payload) = entry.payload else {
                continue;
            };
            let chunk: Chunk = serde_json::from_value(payload)
                .map_err(|e| IndexError::Storage(format!("unexpected qdrant payload: {}", e)))?;
            hits.push(ScoredChunk {
                chunk,
                score: entry.score,
            });
        }
        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Ok(());
        }
        let points: Vec<String> = ids.iter().map(|id| point_id(id)).collect();
        let builder = self
            .request(reqwest::Method::POST, self.endpoint("/points/delete?wait=true"))
            .json(&json!({ "points": points }));
        self.send(builder, "delete").await?;
        Ok(())
    }

    async fn delete_source(&self, source_path: &str) -> Result<(), IndexError> {
        let builder = self
            .request(reqwest::Method::POST, self.endpoint("/points/delete?wait=true"))
            .json(&json!({ "filter": match_filter("metadata.source_path", source_path) }));
        self.send(builder, "delete").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_keeps_uuid_and_hashes_others() {
        let id = Uuid::new_v4().to_string();
        assert_eq!(point_id(&id), id);
        let derived = point_id("Laporan harian unit 3");
        assert!(Uuid::parse_str(&derived).is_ok());
        assert_eq!(derived, point_id("Laporan harian unit 3"));
    }

    #[test]
    fn test_date_filter_shape() {
        let filter = match_filter("metadata.date", "2025-03-01");
        assert_eq!(filter["must"][0]["key"], "metadata.date");
        assert_eq!(filter["must"][0]["match"]["value"], "2025-03-01");
    }

    #[test]
    fn test_new_requires_url() {
        let config = DenseConfig {
            backend: "qdrant".into(),
            ..DenseConfig::default()
        };
        assert!(QdrantIndex::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let config = DenseConfig {
            backend: "qdrant".into(),
            url: Some("http://127.0.0.1:9".into()),
            timeout_secs: 2,
            ..DenseConfig::default()
        };
        let index = QdrantIndex::new(&config).unwrap();
        let err = index.search(&[0.0, 1.0], 5, None).await.unwrap_err();
        assert!(matches!(err, IndexError::Unavailable(_)));
    }
}
