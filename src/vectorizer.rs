//! Incremental vectorization: keybinding records → index documents.
//!
//! Coordinates the sync flow: change detection → content building →
//! batched embedding → index store/delete → fingerprint commit.
//!
//! # Durability
//!
//! The fingerprint table is the durability boundary. A fingerprint is
//! written only after the index call for its record has succeeded, one
//! batch at a time. When a batch fails, earlier batches stay committed
//! and the failing batch's records stay unsynced, so the next
//! incremental run picks them up again.
//!
//! # Locking
//!
//! Embedding runs without holding the sync gate. Only the index write
//! and the matching fingerprint commit run under the exclusive guard.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::SyncConfig;
use crate::embedding::{normalize_input, EmbeddingEmitter};
use crate::error::KeysenseError;
use crate::fingerprint::ChangeDetector;
use crate::index::VectorIndex;
use crate::models::{IndexDocument, KeybindingRecord, SyncReport};

/// Shared/exclusive gate between queries and index writes.
pub type SyncGate = Arc<RwLock<()>>;

/// Metadata keys the vectorizer owns; caller metadata cannot override them.
pub const RESERVED_KEYS: &[&str] = &[
    "id",
    "keys",
    "command",
    "description",
    "mode",
    "plugin",
    "has_plugin",
    "has_description",
    "synced_at",
];

/// Canonical searchable text for a record.
///
/// Field order: keys, command, description, `mode:`, `plugin:`, then
/// caller metadata as `key:value` in key order. Whitespace is collapsed
/// and the result capped at `max_chars`.
pub fn build_content(record: &KeybindingRecord, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for field in [&record.keys, &record.command, &record.description] {
        if !field.trim().is_empty() {
            parts.push(field.clone());
        }
    }
    if !record.mode.trim().is_empty() {
        parts.push(format!("mode:{}", record.mode.trim()));
    }
    if let Some(plugin) = record.plugin.as_deref().filter(|p| !p.trim().is_empty()) {
        parts.push(format!("plugin:{}", plugin.trim()));
    }
    for (key, value) in &record.metadata {
        if !value.trim().is_empty() {
            parts.push(format!("{}:{}", key, value.trim()));
        }
    }
    normalize_input(&parts.join(" "), max_chars)
}

/// Structured metadata stored alongside the vector.
pub fn build_metadata(record: &KeybindingRecord, synced_at: &str) -> BTreeMap<String, String> {
    let mut meta: BTreeMap<String, String> = record
        .metadata
        .iter()
        .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    meta.insert("id".to_string(), record.id.clone());
    meta.insert("keys".to_string(), record.keys.clone());
    meta.insert("command".to_string(), record.command.clone());
    meta.insert("description".to_string(), record.description.clone());
    meta.insert("mode".to_string(), record.mode.clone());

    let plugin = record.plugin.as_deref().filter(|p| !p.is_empty());
    if let Some(p) = plugin {
        meta.insert("plugin".to_string(), p.to_string());
    }
    meta.insert("has_plugin".to_string(), plugin.is_some().to_string());
    meta.insert(
        "has_description".to_string(),
        (!record.description.trim().is_empty()).to_string(),
    );
    meta.insert("synced_at".to_string(), synced_at.to_string());
    meta
}

pub struct IncrementalVectorizer {
    emitter: EmbeddingEmitter,
    index: Arc<dyn VectorIndex>,
    detector: ChangeDetector,
    gate: SyncGate,
    batch_size: usize,
    max_content_chars: usize,
}

impl IncrementalVectorizer {
    pub fn new(
        config: &SyncConfig,
        emitter: EmbeddingEmitter,
        index: Arc<dyn VectorIndex>,
        detector: ChangeDetector,
        gate: SyncGate,
    ) -> Self {
        Self {
            emitter,
            index,
            detector,
            gate,
            batch_size: config.batch_size.max(1),
            max_content_chars: config.max_content_chars.max(1),
        }
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    fn prepare(
        &self,
        record: &KeybindingRecord,
        synced_at: &str,
    ) -> Result<(String, BTreeMap<String, String>)> {
        let content = build_content(record, self.max_content_chars);
        if content.is_empty() {
            return Err(KeysenseError::EmptyContent {
                id: record.id.clone(),
            }
            .into());
        }
        Ok((content, build_metadata(record, synced_at)))
    }

    /// Build and embed a single document. Does not touch the index.
    pub async fn vectorize_one(&self, record: &KeybindingRecord) -> Result<IndexDocument> {
        let synced_at = chrono::Utc::now().to_rfc3339();
        let (content, metadata) = self.prepare(record, &synced_at)?;
        let vector = self
            .emitter
            .embed(&content)
            .await
            .with_context(|| format!("embedding failed for '{}'", record.id))?;
        Ok(IndexDocument {
            id: record.id.clone(),
            content,
            vector,
            metadata,
        })
    }

    /// Embed and store `records` in batches of `sync.batch_size`.
    ///
    /// Records whose content is empty are skipped with a warning and left
    /// unsynced. Returns `(stored, skipped)`.
    pub async fn batch_vectorize_and_store(
        &self,
        records: &[KeybindingRecord],
    ) -> Result<(usize, usize)> {
        let mut stored = 0usize;
        let mut skipped = 0usize;
        let total_batches = records.len().div_ceil(self.batch_size);

        for (batch_no, batch) in records.chunks(self.batch_size).enumerate() {
            let synced_at = chrono::Utc::now().to_rfc3339();
            let mut ready: Vec<&KeybindingRecord> = Vec::with_capacity(batch.len());
            let mut contents = Vec::with_capacity(batch.len());
            let mut metadatas = Vec::with_capacity(batch.len());

            for record in batch {
                match self.prepare(record, &synced_at) {
                    Ok((content, metadata)) => {
                        ready.push(record);
                        contents.push(content);
                        metadatas.push(metadata);
                    }
                    Err(e) => {
                        tracing::warn!(id = %record.id, "skipping record: {}", e);
                        skipped += 1;
                    }
                }
            }
            if ready.is_empty() {
                continue;
            }

            let vectors = self.emitter.embed_batch(&contents).await.with_context(|| {
                format!(
                    "embedding batch {}/{} failed ({} records already stored)",
                    batch_no + 1,
                    total_batches,
                    stored
                )
            })?;

            let documents: Vec<IndexDocument> = ready
                .iter()
                .zip(contents)
                .zip(metadatas)
                .zip(vectors)
                .map(|(((record, content), metadata), vector)| IndexDocument {
                    id: record.id.clone(),
                    content,
                    vector,
                    metadata,
                })
                .collect();

            {
                let _guard = self.gate.write().await;
                self.index
                    .store(&documents)
                    .await
                    .map_err(|e| KeysenseError::dependency(self.index.name(), e))
                    .with_context(|| {
                        format!("index store failed for batch {}/{}", batch_no + 1, total_batches)
                    })?;
                let committed: Vec<KeybindingRecord> = ready.iter().map(|r| (*r).clone()).collect();
                self.detector.commit(&committed).await?;
            }

            stored += documents.len();
            tracing::debug!(
                batch = batch_no + 1,
                of = total_batches,
                size = documents.len(),
                "stored batch"
            );
        }

        Ok((stored, skipped))
    }

    /// Store every record regardless of the fingerprint table.
    pub async fn index_all(&self, records: &[KeybindingRecord]) -> Result<SyncReport> {
        let (stored, skipped) = self.batch_vectorize_and_store(records).await?;
        tracing::info!(stored, skipped, "full index build complete");
        Ok(SyncReport {
            total_processed: records.len(),
            changed_count: stored,
            deleted_count: 0,
            skipped_count: skipped,
        })
    }

    /// Bring the index in line with `current`, touching only what changed.
    pub async fn incremental_update(&self, current: &[KeybindingRecord]) -> Result<SyncReport> {
        let changes = {
            let _guard = self.gate.read().await;
            self.detector.diff(current).await?
        };

        if !changes.deleted.is_empty() {
            let _guard = self.gate.write().await;
            self.index
                .delete(&changes.deleted)
                .await
                .map_err(|e| KeysenseError::dependency(self.index.name(), e))
                .context("index delete failed")?;
            self.detector.forget(&changes.deleted).await?;
        }

        let by_id: HashMap<&str, &KeybindingRecord> = current
            .iter()
            .rev()
            .map(|r| (r.id.as_str(), r))
            .collect();
        let to_store: Vec<KeybindingRecord> = changes
            .changed
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|r| (*r).clone()))
            .collect();

        let (stored, skipped) = self.batch_vectorize_and_store(&to_store).await?;

        let report = SyncReport {
            total_processed: current.len(),
            changed_count: stored,
            deleted_count: changes.deleted.len(),
            skipped_count: skipped,
        };
        tracing::info!(
            total = report.total_processed,
            changed = report.changed_count,
            deleted = report.deleted_count,
            skipped = report.skipped_count,
            "incremental sync complete"
        );
        Ok(report)
    }

    /// Repopulate the fingerprint table from `records` without touching the index.
    pub async fn rebuild_hash_store(&self, records: &[KeybindingRecord]) -> Result<usize> {
        let _guard = self.gate.write().await;
        let count = self.detector.rebuild(records).await?;
        tracing::info!(count, "fingerprint table rebuilt");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_empty_content;
    use crate::hash_store::MemoryHashStore;
    use crate::index::memory::InMemoryIndex;
    use crate::testing::FakeInference;

    struct Rig {
        fake: Arc<FakeInference>,
        index: Arc<InMemoryIndex>,
        vectorizer: IncrementalVectorizer,
    }

    fn rig(batch_size: usize) -> Rig {
        let fake = FakeInference::new();
        let index = Arc::new(InMemoryIndex::new(fake.emitter()));
        let config = SyncConfig {
            batch_size,
            ..Default::default()
        };
        let vectorizer = IncrementalVectorizer::new(
            &config,
            fake.emitter(),
            index.clone(),
            ChangeDetector::new(Arc::new(MemoryHashStore::new())),
            Arc::new(RwLock::new(())),
        );
        Rig {
            fake,
            index,
            vectorizer,
        }
    }

    fn records() -> Vec<KeybindingRecord> {
        vec![
            KeybindingRecord::new("k1", "dd", "delete line", "n"),
            KeybindingRecord::new("k2", "yy", "yank line", "n"),
            KeybindingRecord::new("k3", "p", "paste after cursor", "n"),
        ]
    }

    #[test]
    fn test_build_content_order_and_tags() {
        let r = KeybindingRecord::new("k", "gc", "toggle   comment", "v")
            .with_description("Comment\nselection")
            .with_plugin("commentary")
            .with_meta("source", "user")
            .with_meta("empty", " ");
        assert_eq!(
            build_content(&r, 1000),
            "gc toggle comment Comment selection mode:v plugin:commentary source:user"
        );
    }

    #[test]
    fn test_build_content_capped() {
        let r = KeybindingRecord::new("k", "dd", "delete line", "n");
        assert_eq!(build_content(&r, 6), "dd del");
    }

    #[test]
    fn test_build_metadata_protects_reserved_keys() {
        let r = KeybindingRecord::new("k1", "dd", "delete line", "n")
            .with_meta("keys", "evil")
            .with_meta("source", "user");
        let meta = build_metadata(&r, "2026-01-01T00:00:00Z");
        assert_eq!(meta["keys"], "dd");
        assert_eq!(meta["source"], "user");
        assert_eq!(meta["has_plugin"], "false");
        assert_eq!(meta["has_description"], "false");
        assert_eq!(meta["synced_at"], "2026-01-01T00:00:00Z");
        assert!(!meta.contains_key("plugin"));
    }

    #[tokio::test]
    async fn test_vectorize_one_empty_content() {
        let rig = rig(8);
        let r = KeybindingRecord::new("blank", " ", "", "");
        let err = rig.vectorizer.vectorize_one(&r).await.unwrap_err();
        assert!(is_empty_content(&err));
    }

    #[tokio::test]
    async fn test_vectorize_one_builds_document() {
        let rig = rig(8);
        let doc = rig.vectorizer.vectorize_one(&records()[0]).await.unwrap();
        assert_eq!(doc.id, "k1");
        assert_eq!(doc.content, "dd delete line mode:n");
        assert_eq!(doc.vector, FakeInference::vector("dd delete line mode:n"));
        assert_eq!(rig.index.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_incremental_update_is_idempotent() {
        let rig = rig(2);
        let first = rig.vectorizer.incremental_update(&records()).await.unwrap();
        assert_eq!(first.changed_count, 3);
        assert_eq!(rig.index.count().await.unwrap(), 3);

        let calls = rig.fake.embed_calls.load(std::sync::atomic::Ordering::SeqCst);
        let second = rig.vectorizer.incremental_update(&records()).await.unwrap();
        assert_eq!(second.changed_count, 0);
        assert_eq!(second.deleted_count, 0);
        assert_eq!(
            rig.fake.embed_calls.load(std::sync::atomic::Ordering::SeqCst),
            calls
        );
    }

    #[tokio::test]
    async fn test_incremental_update_add_modify_delete() {
        let rig = rig(8);
        rig.vectorizer.incremental_update(&records()).await.unwrap();

        let mut next = records();
        next[0].description = "Delete the line under the cursor".to_string();
        next.remove(2);
        next.push(KeybindingRecord::new("k4", "u", "undo", "n"));

        let report = rig.vectorizer.incremental_update(&next).await.unwrap();
        assert_eq!(report.changed_count, 2);
        assert_eq!(report.deleted_count, 1);
        assert_eq!(rig.index.count().await.unwrap(), 3);
        assert!(rig.index.get("k3").unwrap().is_none());
        assert!(rig
            .index
            .get("k1")
            .unwrap()
            .unwrap()
            .content
            .contains("under the cursor"));
        assert!(rig.vectorizer.detector().get("k3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_records_unsynced() {
        let rig = rig(1);
        *rig.fake.fail_embed_on.lock().unwrap() = Some("yank".to_string());

        let err = rig.vectorizer.incremental_update(&records()).await;
        assert!(err.is_err());
        // First batch committed, failing batch and everything after it not.
        assert_eq!(rig.index.count().await.unwrap(), 1);
        assert!(rig.vectorizer.detector().get("k1").await.unwrap().is_some());
        assert!(rig.vectorizer.detector().get("k2").await.unwrap().is_none());
        assert!(rig.vectorizer.detector().get("k3").await.unwrap().is_none());

        *rig.fake.fail_embed_on.lock().unwrap() = None;
        let report = rig.vectorizer.incremental_update(&records()).await.unwrap();
        assert_eq!(report.changed_count, 2);
        assert_eq!(rig.index.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_empty_records_skipped_not_committed() {
        let rig = rig(8);
        let mut set = records();
        set.push(KeybindingRecord::new("blank", "", "", ""));
        let report = rig.vectorizer.incremental_update(&set).await.unwrap();
        assert_eq!(report.changed_count, 3);
        assert_eq!(report.skipped_count, 1);
        assert_eq!(rig.index.count().await.unwrap(), 3);
        assert!(rig.vectorizer.detector().get("blank").await.unwrap().is_none());

        let again = rig.vectorizer.incremental_update(&set).await.unwrap();
        assert_eq!(again.changed_count, 0);
        assert_eq!(again.deleted_count, 0);
        assert_eq!(again.skipped_count, 1);
    }

    #[tokio::test]
    async fn test_rebuild_hash_store_leaves_index_alone() {
        let rig = rig(8);
        let count = rig.vectorizer.rebuild_hash_store(&records()).await.unwrap();
        assert_eq!(count, 3);
        assert_eq!(rig.index.count().await.unwrap(), 0);
        let report = rig.vectorizer.incremental_update(&records()).await.unwrap();
        assert_eq!(report.changed_count, 0);
    }

    #[tokio::test]
    async fn test_identical_content_distinct_ids() {
        let rig = rig(8);
        let twins = vec![
            KeybindingRecord::new("a", "dd", "delete line", "n"),
            KeybindingRecord::new("b", "dd", "delete line", "n"),
        ];
        rig.vectorizer.index_all(&twins).await.unwrap();
        assert_eq!(rig.index.count().await.unwrap(), 2);
        let hits = rig.index.search("delete line", 10).await.unwrap();
        let mut ids: Vec<&str> = hits.iter().map(|h| h.document.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
