//! [`VectorIndex`] backed by a Chroma server (HTTP API v1).
//!
//! Vectors are computed on our side through the [`EmbeddingEmitter`] and
//! sent as explicit embeddings, so Chroma never runs its own embedding
//! function. The collection is created with cosine space; hit scores are
//! `1 - distance` clamped to `[0, 1]`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::VectorIndex;
use crate::config::IndexConfig;
use crate::embedding::EmbeddingEmitter;
use crate::inference::post_json_with_retry;
use crate::models::{IndexDocument, SearchHit};

const MAX_RETRIES: u32 = 3;

pub struct ChromaIndex {
    client: reqwest::Client,
    url: String,
    collection: String,
    collection_id: OnceCell<String>,
    emitter: EmbeddingEmitter,
}

impl ChromaIndex {
    pub fn new(config: &IndexConfig, emitter: EmbeddingEmitter) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("index.url required for chroma backend"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            collection_id: OnceCell::new(),
            emitter,
        })
    }

    async fn collection_id(&self) -> Result<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let body = serde_json::json!({
                    "name": self.collection,
                    "get_or_create": true,
                    "metadata": { "hnsw:space": "cosine" },
                });
                let json = post_json_with_retry(
                    &self.client,
                    &format!("{}/api/v1/collections", self.url),
                    None,
                    &body,
                    MAX_RETRIES,
                    "Chroma",
                )
                .await?;
                json.get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("Invalid Chroma response: missing collection id"))
            })
            .await?;
        Ok(id.as_str())
    }

    async fn post(&self, op: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let id = self.collection_id().await?;
        post_json_with_retry(
            &self.client,
            &format!("{}/api/v1/collections/{}/{}", self.url, id, op),
            None,
            body,
            MAX_RETRIES,
            "Chroma",
        )
        .await
        .with_context(|| format!("Chroma {} failed", op))
    }
}

#[async_trait]
impl VectorIndex for ChromaIndex {
    fn name(&self) -> &str {
        "chroma"
    }

    async fn initialize(&self) -> Result<()> {
        self.collection_id().await.map(|_| ())
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/api/v1/heartbeat", self.url))
            .send()
            .await
            .map_err(|e| anyhow!("Chroma not reachable at {}: {}", self.url, e))?;
        if !resp.status().is_success() {
            bail!("Chroma heartbeat returned {}", resp.status());
        }
        Ok(())
    }

    async fn store(&self, documents: &[IndexDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({
            "ids": documents.iter().map(|d| &d.id).collect::<Vec<_>>(),
            "embeddings": documents.iter().map(|d| &d.vector).collect::<Vec<_>>(),
            "metadatas": documents.iter().map(|d| &d.metadata).collect::<Vec<_>>(),
            "documents": documents.iter().map(|d| &d.content).collect::<Vec<_>>(),
        });
        self.post("upsert", &body).await.map(|_| ())
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query_vec = self.emitter.embed(text).await?;
        self.search_vector(&query_vec, limit).await
    }

    async fn search_vector(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let body = serde_json::json!({
            "query_embeddings": [vector],
            "n_results": limit,
            "include": ["documents", "metadatas", "distances", "embeddings"],
        });
        let json = self.post("query", &body).await?;
        parse_query_response(&json)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = serde_json::json!({ "ids": ids });
        self.post("delete", &body).await.map(|_| ())
    }

    async fn count(&self) -> Result<usize> {
        let id = self.collection_id().await?;
        let resp = self
            .client
            .get(format!("{}/api/v1/collections/{}/count", self.url, id))
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("Chroma count returned {}", resp.status());
        }
        let json: serde_json::Value = resp.json().await?;
        json.as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| anyhow!("Invalid Chroma count response"))
    }
}

/// Chroma answers column-wise, one inner array per query embedding.
fn parse_query_response(json: &serde_json::Value) -> Result<Vec<SearchHit>> {
    let first = |key: &str| -> Vec<serde_json::Value> {
        json.get(key)
            .and_then(|v| v.get(0))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    };

    let ids = first("ids");
    let documents = first("documents");
    let metadatas = first("metadatas");
    let distances = first("distances");
    let embeddings = first("embeddings");

    let mut hits = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        let id = id
            .as_str()
            .ok_or_else(|| anyhow!("Invalid Chroma response: id is not a string"))?;
        let distance = distances.get(i).and_then(|d| d.as_f64()).unwrap_or(1.0);
        let metadata: BTreeMap<String, String> = metadatas
            .get(i)
            .and_then(|m| m.as_object())
            .map(|m| {
                m.iter()
                    .map(|(k, v)| {
                        let value = match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default();
        let vector = embeddings
            .get(i)
            .and_then(|e| e.as_array())
            .map(|e| e.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
            .unwrap_or_default();

        hits.push(SearchHit {
            document: IndexDocument {
                id: id.to_string(),
                content: documents
                    .get(i)
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string(),
                vector,
                metadata,
            },
            score: (1.0 - distance).clamp(0.0, 1.0),
            distance,
        });
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_response() {
        let json = serde_json::json!({
            "ids": [["k1", "k2"]],
            "documents": [["dd delete line", "yy yank line"]],
            "metadatas": [[{ "keys": "dd", "has_plugin": false }, { "keys": "yy" }]],
            "distances": [[0.1, 0.75]],
            "embeddings": [[[1.0, 0.0], [0.0, 1.0]]],
        });
        let hits = parse_query_response(&json).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "k1");
        assert!((hits[0].score - 0.9).abs() < 1e-9);
        assert_eq!(hits[0].document.meta("keys"), Some("dd"));
        assert_eq!(hits[0].document.meta("has_plugin"), Some("false"));
        assert_eq!(hits[1].document.vector, vec![0.0, 1.0]);
    }

    #[test]
    fn test_parse_query_response_clamps_large_distance() {
        let json = serde_json::json!({
            "ids": [["k1"]],
            "distances": [[1.6]],
        });
        let hits = parse_query_response(&json).unwrap();
        assert_eq!(hits[0].score, 0.0);
        assert!(hits[0].document.content.is_empty());
    }

    #[test]
    fn test_parse_query_response_empty() {
        let hits = parse_query_response(&serde_json::json!({})).unwrap();
        assert!(hits.is_empty());
    }
}
