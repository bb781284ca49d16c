//! In-memory [`VectorIndex`] for tests and single-process use.
//!
//! Documents live in a `Vec` behind `std::sync::RwLock`, in insertion
//! order. Search is brute-force cosine similarity over every vector;
//! equal scores keep insertion order.
//!
//! With a snapshot path ([`InMemoryIndex::open`]) the document list is
//! loaded from a JSON file at startup and rewritten after every store or
//! delete. Writes go to a temp file that is renamed over the snapshot.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use super::VectorIndex;
use crate::embedding::{cosine_similarity, EmbeddingEmitter};
use crate::models::{IndexDocument, SearchHit};

pub struct InMemoryIndex {
    emitter: EmbeddingEmitter,
    docs: RwLock<Vec<IndexDocument>>,
    snapshot: Option<PathBuf>,
}

impl InMemoryIndex {
    pub fn new(emitter: EmbeddingEmitter) -> Self {
        Self {
            emitter,
            docs: RwLock::new(Vec::new()),
            snapshot: None,
        }
    }

    /// An index persisted to `path`, loading its documents if the file exists.
    pub fn open(emitter: EmbeddingEmitter, path: &Path) -> Result<Self> {
        let docs = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read index snapshot: {}", path.display()))?;
            let docs: Vec<IndexDocument> = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid index snapshot: {}", path.display()))?;
            tracing::info!(documents = docs.len(), path = %path.display(), "Loaded index snapshot");
            docs
        } else {
            Vec::new()
        };
        Ok(Self {
            emitter,
            docs: RwLock::new(docs),
            snapshot: Some(path.to_path_buf()),
        })
    }

    fn save(&self, docs: &[IndexDocument]) -> Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(docs)?)
            .with_context(|| format!("Failed to write index snapshot: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace index snapshot: {}", path.display()))?;
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<IndexDocument>>> {
        self.docs.read().map_err(|_| anyhow!("index lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<IndexDocument>>> {
        self.docs.write().map_err(|_| anyhow!("index lock poisoned"))
    }

    /// Fetch a stored document by id.
    pub fn get(&self, id: &str) -> Result<Option<IndexDocument>> {
        Ok(self.read()?.iter().find(|d| d.id == id).cloned())
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> Result<()> {
        self.read().map(|_| ())
    }

    async fn store(&self, documents: &[IndexDocument]) -> Result<()> {
        let mut docs = self.write()?;
        for doc in documents {
            match docs.iter_mut().find(|d| d.id == doc.id) {
                Some(existing) => *existing = doc.clone(),
                None => docs.push(doc.clone()),
            }
        }
        self.save(&docs)
    }

    async fn search(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let query_vec = self.emitter.embed(text).await?;
        self.search_vector(&query_vec, limit).await
    }

    async fn search_vector(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let docs = self.read()?;
        let mut hits: Vec<SearchHit> = docs
            .iter()
            .map(|doc| {
                let sim = cosine_similarity(vector, &doc.vector) as f64;
                SearchHit {
                    document: doc.clone(),
                    score: sim.clamp(0.0, 1.0),
                    distance: 1.0 - sim,
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut docs = self.write()?;
        docs.retain(|d| !ids.contains(&d.id));
        self.save(&docs)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}
