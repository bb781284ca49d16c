//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the contract between the core pipeline
//! and whatever holds the vectors. The core never inspects storage
//! layout or the ANN algorithm; it only stores, deletes, and searches.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`store`](VectorIndex::store) | Idempotent upsert by document id |
//! | [`search`](VectorIndex::search) | Similarity search by query text |
//! | [`search_vector`](VectorIndex::search_vector) | Similarity search by a precomputed query vector |
//! | [`delete`](VectorIndex::delete) | Remove documents by id |
//! | [`count`](VectorIndex::count) | Number of stored documents |
//!
//! Backends: [`memory::InMemoryIndex`] (brute-force cosine) and
//! [`chroma::ChromaIndex`] (Chroma HTTP API).

pub mod chroma;
pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::IndexConfig;
use crate::embedding::EmbeddingEmitter;
use crate::models::{IndexDocument, SearchHit};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Insert or replace documents by id.
    async fn store(&self, documents: &[IndexDocument]) -> Result<()>;

    /// Return up to `limit` hits ranked by similarity to `text`,
    /// scores in `[0.0, 1.0]`, most similar first.
    async fn search(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Same as [`search`](VectorIndex::search) for a query that is
    /// already embedded. Makes no inference calls.
    async fn search_vector(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>>;

    /// Remove documents by id. Unknown ids are ignored.
    async fn delete(&self, ids: &[String]) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}

/// Create the [`VectorIndex`] named by `config.backend`.
///
/// Both backends embed query text for [`VectorIndex::search`] through `emitter`.
pub fn create_index(
    config: &IndexConfig,
    emitter: EmbeddingEmitter,
) -> Result<Arc<dyn VectorIndex>> {
    match config.backend.as_str() {
        "memory" => match &config.path {
            Some(path) => Ok(Arc::new(memory::InMemoryIndex::open(emitter, path)?)),
            None => Ok(Arc::new(memory::InMemoryIndex::new(emitter))),
        },
        "chroma" => Ok(Arc::new(chroma::ChromaIndex::new(config, emitter)?)),
        other => bail!("Unknown index backend: {}", other),
    }
}
