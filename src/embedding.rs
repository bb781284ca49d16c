//! Embedding emitter and vector utilities.
//!
//! [`EmbeddingEmitter`] wraps an [`InferenceService`] and applies the
//! input policy shared by indexing and querying: whitespace is collapsed,
//! the text is trimmed and truncated to `inference.max_input_chars`
//! characters. Empty input is rejected before any service call.
//!
//! Also provides [`cosine_similarity`], used by the in-memory index.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::inference::{GenerateRequest, Generation, InferenceService};

/// Collapse runs of whitespace to single spaces and cap at `max_chars`.
///
/// # Example
///
/// ```rust
/// use keysense::embedding::normalize_input;
///
/// assert_eq!(normalize_input("  delete\n\tline  ", 100), "delete line");
/// assert_eq!(normalize_input("abcdef", 3), "abc");
/// ```
pub fn normalize_input(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    collapsed.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Normalizing front-end for the inference service.
#[derive(Clone)]
pub struct EmbeddingEmitter {
    service: Arc<dyn InferenceService>,
    max_input_chars: usize,
}

impl EmbeddingEmitter {
    pub fn new(service: Arc<dyn InferenceService>, max_input_chars: usize) -> Self {
        Self {
            service,
            max_input_chars: max_input_chars.max(1),
        }
    }

    pub fn service(&self) -> &Arc<dyn InferenceService> {
        &self.service
    }

    /// Embed one text after normalization.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = normalize_input(text, self.max_input_chars);
        if input.is_empty() {
            bail!("cannot embed empty text");
        }
        self.service.embed(&input).await
    }

    /// Embed a batch in one service call, preserving input order.
    ///
    /// Fails without calling the service if any input normalizes to empty.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<String> = texts
            .iter()
            .map(|t| normalize_input(t, self.max_input_chars))
            .collect();
        if let Some(pos) = inputs.iter().position(|t| t.is_empty()) {
            bail!("cannot embed empty text (batch item {})", pos);
        }
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self.service.embed_batch(&inputs).await?;
        if vectors.len() != inputs.len() {
            bail!(
                "embedding service returned {} vectors for {} inputs",
                vectors.len(),
                inputs.len()
            );
        }
        Ok(vectors)
    }

    pub async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Generation> {
        let request = GenerateRequest {
            prompt: prompt.to_string(),
            max_tokens,
            temperature,
        };
        self.service.generate(&request).await
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every input it sees and returns `[len]` vectors.
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InferenceService for Recording {
        fn name(&self) -> &str {
            "recording"
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(vec![text.len() as f32])
        }
        async fn generate(&self, request: &GenerateRequest) -> Result<Generation> {
            Ok(Generation {
                text: request.prompt.to_uppercase(),
                token_count: 1,
            })
        }
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
    }

    fn emitter(max: usize) -> (Arc<Recording>, EmbeddingEmitter) {
        let svc = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let emitter = EmbeddingEmitter::new(svc.clone(), max);
        (svc, emitter)
    }

    #[test]
    fn test_normalize_input_multibyte_truncation() {
        assert_eq!(normalize_input("ééé", 2), "éé");
        assert_eq!(normalize_input("   ", 10), "");
    }

    #[tokio::test]
    async fn test_embed_normalizes_before_call() {
        let (svc, emitter) = emitter(5);
        emitter.embed("  go   to\tline ").await.unwrap();
        assert_eq!(svc.seen.lock().unwrap().as_slice(), ["go to"]);
    }

    #[tokio::test]
    async fn test_embed_rejects_empty() {
        let (svc, emitter) = emitter(100);
        assert!(emitter.embed(" \n ").await.is_err());
        assert!(svc.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embed_batch_rejects_any_empty() {
        let (svc, emitter) = emitter(100);
        let texts = vec!["dd".to_string(), "  ".to_string()];
        assert!(emitter.embed_batch(&texts).await.is_err());
        assert!(svc.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_passes_through() {
        let (_svc, emitter) = emitter(100);
        let gen = emitter.generate("hi", 16, 0.1).await.unwrap();
        assert_eq!(gen.text, "HI");
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
