//! Deterministic inference double shared by unit and integration tests.
//!
//! Compiled for `cfg(test)` and behind the `test-util` feature.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::embedding::EmbeddingEmitter;
use crate::inference::{GenerateRequest, Generation, InferenceService};

const DIMS: usize = 1 << 16;

/// Bag-of-words embedder with scripted generation output.
#[derive(Default)]
pub struct FakeInference {
    /// Text returned by `generate`; `None` makes generation fail.
    pub generation: Mutex<Option<String>>,
    /// Any embed input containing this substring fails.
    pub fail_embed_on: Mutex<Option<String>>,
    /// Every embed call fails while set.
    pub embed_down: AtomicBool,
    /// Any embed input containing the substring sleeps for the delay first.
    pub slow_embed_on: Mutex<Option<(String, Duration)>>,
    pub embed_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeInference {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_generation(text: &str) -> Arc<Self> {
        let fake = Self::default();
        *fake.generation.lock().unwrap() = Some(text.to_string());
        Arc::new(fake)
    }

    pub fn emitter(self: &Arc<Self>) -> EmbeddingEmitter {
        EmbeddingEmitter::new(self.clone(), 2000)
    }

    pub fn embed_count(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn slow_down(&self, needle: &str, delay: Duration) {
        *self.slow_embed_on.lock().unwrap() = Some((needle.to_string(), delay));
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            v[(hasher.finish() as usize) % DIMS] += 1.0;
        }
        v
    }
}

#[async_trait]
impl InferenceService for FakeInference {
    fn name(&self) -> &str {
        "fake"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if text.trim().is_empty() {
            bail!("cannot embed empty text");
        }
        if self.embed_down.load(Ordering::SeqCst) {
            bail!("embedding service unreachable");
        }
        if let Some(needle) = self.fail_embed_on.lock().unwrap().as_deref() {
            if text.contains(needle) {
                bail!("embedding service unreachable");
            }
        }
        let delay = self
            .slow_embed_on
            .lock()
            .unwrap()
            .as_ref()
            .filter(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, delay)| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Self::vector(text))
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        match self.generation.lock().unwrap().clone() {
            Some(text) => Ok(Generation {
                token_count: text.split_whitespace().count() as u32,
                text,
            }),
            None => bail!("generation service unreachable"),
        }
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
