//! Persistence for the fingerprint table.
//!
//! The [`HashStore`] trait is the read/write contract of the table:
//! get/set/delete by id plus full enumeration for diffing and rebuilds.
//! Two implementations:
//! - [`MemoryHashStore`]: `HashMap` behind a lock; lost on restart.
//! - [`SqliteHashStore`]: `fingerprints` table in SQLite; batch writes
//!   are transactional, so a batch's fingerprints land together or not at all.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::config::SyncConfig;
use crate::{db, migrate};

#[async_trait]
pub trait HashStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<String>>;

    async fn set(&self, id: &str, hash: &str) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Snapshot of every `id → hash` entry.
    async fn all(&self) -> Result<HashMap<String, String>>;

    async fn clear(&self) -> Result<()>;

    async fn len(&self) -> Result<usize> {
        Ok(self.all().await?.len())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        for (id, hash) in entries {
            self.set(id, hash).await?;
        }
        Ok(())
    }

    async fn delete_many(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.delete(id).await?;
        }
        Ok(())
    }

    /// Discard every entry and insert `entries`.
    async fn replace_all(&self, entries: &[(String, String)]) -> Result<()> {
        self.clear().await?;
        self.set_many(entries).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ============ In-memory ============

#[derive(Default)]
pub struct MemoryHashStore {
    table: RwLock<HashMap<String, String>>,
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("hash store lock poisoned")
}

#[async_trait]
impl HashStore for MemoryHashStore {
    async fn get(&self, id: &str) -> Result<Option<String>> {
        Ok(self.table.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn set(&self, id: &str, hash: &str) -> Result<()> {
        self.table
            .write()
            .map_err(poisoned)?
            .insert(id.to_string(), hash.to_string());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.table.write().map_err(poisoned)?.remove(id);
        Ok(())
    }

    async fn all(&self) -> Result<HashMap<String, String>> {
        Ok(self.table.read().map_err(poisoned)?.clone())
    }

    async fn clear(&self) -> Result<()> {
        self.table.write().map_err(poisoned)?.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.table.read().map_err(poisoned)?.len())
    }

    async fn replace_all(&self, entries: &[(String, String)]) -> Result<()> {
        let mut table = self.table.write().map_err(poisoned)?;
        table.clear();
        table.extend(entries.iter().cloned());
        Ok(())
    }
}

// ============ SQLite ============

pub struct SqliteHashStore {
    pool: SqlitePool,
}

impl SqliteHashStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const UPSERT_SQL: &str = r#"
    INSERT INTO fingerprints (id, hash, updated_at) VALUES (?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET hash = excluded.hash, updated_at = excluded.updated_at
"#;

#[async_trait]
impl HashStore for SqliteHashStore {
    async fn get(&self, id: &str) -> Result<Option<String>> {
        let hash: Option<String> = sqlx::query_scalar("SELECT hash FROM fingerprints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hash)
    }

    async fn set(&self, id: &str, hash: &str) -> Result<()> {
        sqlx::query(UPSERT_SQL)
            .bind(id)
            .bind(hash)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM fingerprints WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn all(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT id, hash FROM fingerprints")
            .fetch_all(&self.pool)
            .await?;
        let mut table = HashMap::with_capacity(rows.len());
        for row in rows {
            table.insert(row.try_get("id")?, row.try_get("hash")?);
        }
        Ok(table)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM fingerprints")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fingerprints")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for (id, hash) in entries {
            sqlx::query(UPSERT_SQL)
                .bind(id)
                .bind(hash)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_many(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM fingerprints WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_all(&self, entries: &[(String, String)]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM fingerprints")
            .execute(&mut *tx)
            .await?;
        for (id, hash) in entries {
            sqlx::query(UPSERT_SQL)
                .bind(id)
                .bind(hash)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// Create the [`HashStore`] named by `config.hash_store`.
pub async fn create_hash_store(config: &SyncConfig) -> Result<Arc<dyn HashStore>> {
    match config.hash_store.as_str() {
        "memory" => Ok(Arc::new(MemoryHashStore::new())),
        "sqlite" => Ok(Arc::new(SqliteHashStore::open(&config.db_path).await?)),
        other => anyhow::bail!("Unknown hash store: {}", other),
    }
}
