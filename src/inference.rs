//! Inference service abstraction and implementations.
//!
//! Defines the [`InferenceService`] trait (text embedding + text
//! generation) and concrete backends:
//! - **[`DisabledInference`]**: returns errors; used when no provider is configured.
//! - **[`OllamaInference`]**: calls a local Ollama instance (`/api/embed`, `/api/generate`).
//! - **[`OpenAIInference`]**: calls an OpenAI-compatible API (`/v1/embeddings`, `/v1/chat/completions`).
//!
//! # Retry Strategy
//!
//! HTTP backends use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::InferenceConfig;

/// Parameters for one text-generation call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Output of a text-generation call.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    pub text: String,
    pub token_count: u32,
}

/// Text embedding and generation, as a black-box service.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Short backend label for logs and health output.
    fn name(&self) -> &str;

    /// Embed one text. Fails on empty input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, returning vectors in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation>;

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ============ Disabled ============

/// An inference backend that always fails.
///
/// Used when `inference.provider = "disabled"`. Queries still work in
/// this mode only if the index can embed on its own; generation always
/// falls back to similarity ranking.
pub struct DisabledInference;

#[async_trait]
impl InferenceService for DisabledInference {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Inference provider is disabled")
    }

    async fn generate(&self, _request: &GenerateRequest) -> Result<Generation> {
        bail!("Inference provider is disabled")
    }

    async fn health_check(&self) -> Result<()> {
        bail!("Inference provider is disabled")
    }
}

// ============ Shared HTTP plumbing ============

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// POST a JSON body with retry/backoff and return the parsed JSON reply.
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut req = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    tracing::warn!(%status, attempt, "{} request failed, retrying", label);
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error ({}): {}", label, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", label)))
}

fn parse_vector(value: &serde_json::Value) -> Result<Vec<f32>> {
    Ok(value
        .as_array()
        .ok_or_else(|| anyhow!("embedding is not an array"))?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ Ollama ============

/// Inference backend using a local Ollama instance.
///
/// Default URL is `http://localhost:11434`. Both the embedding and the
/// generation model must already be pulled.
pub struct OllamaInference {
    client: reqwest::Client,
    url: String,
    embedding_model: String,
    generation_model: String,
    max_retries: u32,
}

impl OllamaInference {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let embedding_model = config
            .embedding_model
            .clone()
            .ok_or_else(|| anyhow!("inference.embedding_model required for Ollama provider"))?;
        let generation_model = config
            .generation_model
            .clone()
            .ok_or_else(|| anyhow!("inference.generation_model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            embedding_model,
            generation_model,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl InferenceService for OllamaInference {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            bail!("cannot embed empty text");
        }
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_embeddings(&json, texts.len())
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation> {
        let body = serde_json::json!({
            "model": self.generation_model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/generate", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_generation(&json)
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .map_err(|e| anyhow!("Ollama not reachable at {}: {}", self.url, e))?;
        if !resp.status().is_success() {
            bail!("Ollama health check returned {}", resp.status());
        }
        Ok(())
    }
}

fn parse_ollama_embeddings(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let result = embeddings
        .iter()
        .map(parse_vector)
        .collect::<Result<Vec<_>>>()?;
    if result.len() != expected {
        bail!(
            "Invalid Ollama response: expected {} embeddings, got {}",
            expected,
            result.len()
        );
    }
    Ok(result)
}

fn parse_ollama_generation(json: &serde_json::Value) -> Result<Generation> {
    let text = json
        .get("response")
        .and_then(|r| r.as_str())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing response text"))?;
    let token_count = json
        .get("eval_count")
        .and_then(|c| c.as_u64())
        .unwrap_or(0) as u32;
    Ok(Generation {
        text: text.to_string(),
        token_count,
    })
}

// ============ OpenAI-compatible ============

/// Inference backend for OpenAI-compatible HTTP APIs.
///
/// Requires the `OPENAI_API_KEY` environment variable. `inference.url`
/// overrides the base URL (default `https://api.openai.com`).
pub struct OpenAIInference {
    client: reqwest::Client,
    url: String,
    api_key: String,
    embedding_model: String,
    generation_model: String,
    max_retries: u32,
}

impl OpenAIInference {
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let embedding_model = config
            .embedding_model
            .clone()
            .ok_or_else(|| anyhow!("inference.embedding_model required for OpenAI provider"))?;
        let generation_model = config
            .generation_model
            .clone()
            .ok_or_else(|| anyhow!("inference.generation_model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            embedding_model,
            generation_model,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl InferenceService for OpenAIInference {
    fn name(&self) -> &str {
        "openai"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            bail!("cannot embed empty text");
        }
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/embeddings", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_embeddings(&json)
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation> {
        let body = serde_json::json!({
            "model": self.generation_model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/chat/completions", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_generation(&json)
    }

    async fn health_check(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/v1/models", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("OpenAI health check returned {}", resp.status());
        }
        Ok(())
    }
}

/// Extracts `data[].embedding`, ordered by each item's `index`.
fn parse_openai_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, parse_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_openai_generation(json: &serde_json::Value) -> Result<Generation> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))?;
    let token_count = json
        .pointer("/usage/completion_tokens")
        .and_then(|c| c.as_u64())
        .unwrap_or(0) as u32;
    Ok(Generation {
        text: text.to_string(),
        token_count,
    })
}

/// Create the [`InferenceService`] named by `config.provider`.
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledInference`] |
/// | `"ollama"` | [`OllamaInference`] |
/// | `"openai"` | [`OpenAIInference`] |
pub fn create_inference(config: &InferenceConfig) -> Result<Arc<dyn InferenceService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledInference)),
        "ollama" => Ok(Arc::new(OllamaInference::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIInference::new(config)?)),
        other => bail!("Unknown inference provider: {}", other),
    }
}
