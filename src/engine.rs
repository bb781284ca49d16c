//! Engine facade.
//!
//! Builds every component from a [`Config`], wires the retrieval agent
//! and the vectorizer to the same [`SyncGate`], and exposes the
//! operations used by the CLI and the HTTP server.
//!
//! # Lifecycle
//!
//! ```text
//! Engine::new ─▶ initialize ─▶ query / update_index / ... ─▶ close
//! ```

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agent::RetrievalAgent;
use crate::config::Config;
use crate::embedding::EmbeddingEmitter;
use crate::error::KeysenseError;
use crate::fingerprint::ChangeDetector;
use crate::hash_store::{create_hash_store, HashStore};
use crate::index::{create_index, VectorIndex};
use crate::inference::{create_inference, InferenceService};
use crate::models::{KeybindingRecord, QueryResponse, SyncReport};
use crate::vectorizer::{IncrementalVectorizer, SyncGate};

#[derive(Debug, Clone, Serialize)]
pub struct LastSync {
    pub report: SyncReport,
    pub duration_ms: u64,
    pub finished_at: String,
    /// `incremental` or `full`.
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub index_backend: String,
    pub inference_provider: String,
    pub documents: usize,
    pub fingerprints: usize,
    pub queries_served: u64,
    pub last_sync: Option<LastSync>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    fn from_result(name: &str, result: Result<()>) -> Self {
        match result {
            Ok(()) => Self {
                name: name.to_string(),
                ok: true,
                error: None,
            },
            Err(e) => Self {
                name: name.to_string(),
                ok: false,
                error: Some(format!("{:#}", e)),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// `ok` when every component is healthy, `degraded` otherwise.
    pub status: String,
    pub version: String,
    pub index: ComponentHealth,
    pub inference: ComponentHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency: Option<String>,
}

pub struct Engine {
    config: Config,
    inference: Arc<dyn InferenceService>,
    index: Arc<dyn VectorIndex>,
    hash_store: Arc<dyn HashStore>,
    vectorizer: IncrementalVectorizer,
    agent: RetrievalAgent,
    queries_served: AtomicU64,
    last_sync: Mutex<Option<LastSync>>,
}

impl Engine {
    /// Build every component named by `config`.
    pub async fn new(config: Config) -> Result<Self> {
        let inference = create_inference(&config.inference)?;
        let emitter = EmbeddingEmitter::new(inference.clone(), config.inference.max_input_chars);
        let index = create_index(&config.index, emitter)?;
        let hash_store = create_hash_store(&config.sync).await?;
        Self::with_components(config, inference, index, hash_store)
    }

    /// Assemble an engine around already-built components.
    pub fn with_components(
        config: Config,
        inference: Arc<dyn InferenceService>,
        index: Arc<dyn VectorIndex>,
        hash_store: Arc<dyn HashStore>,
    ) -> Result<Self> {
        let gate: SyncGate = Arc::new(RwLock::new(()));
        let emitter = EmbeddingEmitter::new(inference.clone(), config.inference.max_input_chars);

        let vectorizer = IncrementalVectorizer::new(
            &config.sync,
            emitter.clone(),
            index.clone(),
            ChangeDetector::new(hash_store.clone()),
            gate.clone(),
        );
        let agent = RetrievalAgent::new(
            config.query.clone(),
            config.retrieval.clone(),
            config.index.search_limit,
            emitter,
            index.clone(),
            gate,
        )?;

        Ok(Self {
            config,
            inference,
            index,
            hash_store,
            vectorizer,
            agent,
            queries_served: AtomicU64::new(0),
            last_sync: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn initialize(&self) -> Result<()> {
        self.inference
            .initialize()
            .await
            .map_err(|e| KeysenseError::dependency(self.inference.name(), e))?;
        self.index
            .initialize()
            .await
            .map_err(|e| KeysenseError::dependency(self.index.name(), e))?;
        info!(
            index = self.index.name(),
            inference = self.inference.name(),
            "Engine initialized"
        );
        Ok(())
    }

    /// Release backend resources. Every component is closed even if an
    /// earlier one fails; the first error is returned.
    pub async fn close(&self) -> Result<()> {
        let results = [
            self.index.close().await,
            self.inference.close().await,
            self.hash_store.close().await,
        ];
        for result in results {
            result?;
        }
        Ok(())
    }

    pub async fn query(&self, query: &str) -> QueryResponse {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
        self.agent.process(query).await
    }

    /// Incremental sync against the full current record set.
    pub async fn update_index(&self, records: &[KeybindingRecord]) -> Result<SyncReport> {
        let started = Instant::now();
        let report = self.vectorizer.incremental_update(records).await?;
        self.record_sync(&report, started, "incremental");
        Ok(report)
    }

    /// Vectorize and store every record regardless of fingerprints.
    pub async fn index_all(&self, records: &[KeybindingRecord]) -> Result<SyncReport> {
        let started = Instant::now();
        let report = self.vectorizer.index_all(records).await?;
        self.record_sync(&report, started, "full");
        Ok(report)
    }

    /// Recompute the fingerprint table from `records` without touching
    /// the index. Returns the number of fingerprints written.
    pub async fn rebuild_hash_store(&self, records: &[KeybindingRecord]) -> Result<usize> {
        self.vectorizer.rebuild_hash_store(records).await
    }

    fn record_sync(&self, report: &SyncReport, started: Instant, kind: &str) {
        let last = LastSync {
            report: report.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            finished_at: Utc::now().to_rfc3339(),
            kind: kind.to_string(),
        };
        debug!(
            kind,
            processed = report.total_processed,
            changed = report.changed_count,
            deleted = report.deleted_count,
            skipped = report.skipped_count,
            duration_ms = last.duration_ms,
            "Recorded sync stats"
        );
        match self.last_sync.lock() {
            Ok(mut slot) => *slot = Some(last),
            Err(_) => warn!("Sync stats lock poisoned, dropping last sync record"),
        }
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        let last_sync = self.last_sync.lock().map(|s| s.clone()).unwrap_or_default();
        Ok(EngineStats {
            index_backend: self.index.name().to_string(),
            inference_provider: self.inference.name().to_string(),
            documents: self.index.count().await?,
            fingerprints: self.hash_store.len().await?,
            queries_served: self.queries_served.load(Ordering::Relaxed),
            last_sync,
        })
    }

    pub async fn health(&self) -> HealthReport {
        let index = ComponentHealth::from_result(self.index.name(), self.index.health_check().await);
        let inference =
            ComponentHealth::from_result(self.inference.name(), self.inference.health_check().await);

        let consistency = match self.check_consistency().await {
            Ok(()) => None,
            Err(e) => Some(format!("{:#}", e)),
        };

        let status = if index.ok && inference.ok && consistency.is_none() {
            "ok"
        } else {
            "degraded"
        };

        HealthReport {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            index,
            inference,
            consistency,
        }
    }

    /// Fails when the fingerprint table lists more records than the index
    /// holds, e.g. a persistent table paired with an in-memory index after
    /// a restart. A full `index_all` repairs it.
    async fn check_consistency(&self) -> Result<()> {
        let fingerprints = self.hash_store.len().await?;
        let documents = self.index.count().await?;
        if fingerprints > documents {
            return Err(KeysenseError::Consistency(format!(
                "{} fingerprints but only {} indexed documents; run a full re-index",
                fingerprints, documents
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_store::MemoryHashStore;
    use crate::index::memory::InMemoryIndex;
    use crate::models::QueryOutcome;
    use crate::testing::FakeInference;

    fn engine(fake: &Arc<FakeInference>) -> (Engine, Arc<MemoryHashStore>) {
        let store = Arc::new(MemoryHashStore::new());
        let index = Arc::new(InMemoryIndex::new(fake.emitter()));
        let engine =
            Engine::with_components(Config::default(), fake.clone(), index, store.clone()).unwrap();
        (engine, store)
    }

    fn records() -> Vec<KeybindingRecord> {
        vec![
            KeybindingRecord::new("n:dd", "dd", "delete line", "n")
                .with_description("Delete the current line"),
            KeybindingRecord::new("n:yy", "yy", "yank line", "n")
                .with_description("Copy the current line"),
        ]
    }

    #[tokio::test]
    async fn test_stats_track_syncs_and_queries() {
        let fake = FakeInference::new();
        let (engine, _) = engine(&fake);
        engine.initialize().await.unwrap();

        let report = engine.update_index(&records()).await.unwrap();
        assert_eq!(report.changed_count, 2);

        engine.query("delete current line").await;
        engine.query("").await;

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.fingerprints, 2);
        assert_eq!(stats.queries_served, 2);
        let last = stats.last_sync.unwrap();
        assert_eq!(last.kind, "incremental");
        assert_eq!(last.report, report);

        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_flags_stale_fingerprints() {
        let fake = FakeInference::new();
        let (engine, store) = engine(&fake);
        assert_eq!(engine.health().await.status, "ok");

        store.set("ghost", "abc").await.unwrap();
        let health = engine.health().await;
        assert_eq!(health.status, "degraded");
        assert!(health.consistency.unwrap().contains("1 fingerprints"));
        assert!(health.index.ok);
    }

    #[tokio::test]
    async fn test_rebuild_then_query() {
        let fake = FakeInference::new();
        let (engine, _) = engine(&fake);
        engine.index_all(&records()).await.unwrap();
        assert_eq!(engine.rebuild_hash_store(&records()).await.unwrap(), 2);

        let response = engine.query("delete current line").await;
        assert_ne!(response.outcome, QueryOutcome::Failed);
    }
}
