//! Content fingerprints and change detection for incremental sync.
//!
//! [`fingerprint`] hashes every field that affects a record's searchable
//! content (SHA-256, length-prefixed fields, metadata in key order). The
//! record `id` is deliberately not part of the hash: two records with the
//! same content hash identically.
//!
//! [`ChangeDetector`] owns the persisted fingerprint table and classifies
//! a candidate set against it:
//!
//! | Condition | Classification |
//! |-----------|----------------|
//! | id not in table | changed (new) |
//! | id in table, hash differs | changed (modified) |
//! | id in table, hash equal | unchanged (skipped) |
//! | id in table, not in candidate set | deleted |

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::hash_store::HashStore;
use crate::models::KeybindingRecord;

fn update_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

/// Stable hex-encoded SHA-256 over a record's searchable fields.
pub fn fingerprint(record: &KeybindingRecord) -> String {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, &record.keys);
    update_field(&mut hasher, &record.command);
    update_field(&mut hasher, &record.description);
    update_field(&mut hasher, &record.mode);
    match &record.plugin {
        Some(plugin) => {
            hasher.update([1u8]);
            update_field(&mut hasher, plugin);
        }
        None => hasher.update([0u8]),
    }
    hasher.update((record.metadata.len() as u64).to_le_bytes());
    for (key, value) in &record.metadata {
        update_field(&mut hasher, key);
        update_field(&mut hasher, value);
    }
    hex::encode(hasher.finalize())
}

/// Result of diffing a candidate set against the fingerprint table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// New or modified ids, in candidate order.
    pub changed: Vec<String>,
    /// Ids present in the table but missing from the candidate set, sorted.
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Pure diff of `current` against a fingerprint snapshot.
///
/// When an id occurs more than once in `current`, the first occurrence
/// is the one compared.
pub fn diff(current: &[KeybindingRecord], table: &HashMap<String, String>) -> ChangeSet {
    let mut seen: HashSet<&str> = HashSet::with_capacity(current.len());
    let mut changed = Vec::new();

    for record in current {
        if !seen.insert(record.id.as_str()) {
            continue;
        }
        match table.get(&record.id) {
            Some(stored) if *stored == fingerprint(record) => {}
            _ => changed.push(record.id.clone()),
        }
    }

    let mut deleted: Vec<String> = table
        .keys()
        .filter(|id| !seen.contains(id.as_str()))
        .cloned()
        .collect();
    deleted.sort();

    ChangeSet { changed, deleted }
}

/// Owner of the fingerprint table.
///
/// All mutation goes through [`commit`](ChangeDetector::commit),
/// [`forget`](ChangeDetector::forget), and
/// [`rebuild`](ChangeDetector::rebuild); callers invoke these only after
/// the matching index write has succeeded.
#[derive(Clone)]
pub struct ChangeDetector {
    store: Arc<dyn HashStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn HashStore>) -> Self {
        Self { store }
    }

    pub async fn diff(&self, current: &[KeybindingRecord]) -> Result<ChangeSet> {
        let table = self.store.all().await?;
        Ok(diff(current, &table))
    }

    /// Record the fingerprints of records that were just stored.
    pub async fn commit(&self, records: &[KeybindingRecord]) -> Result<()> {
        let entries: Vec<(String, String)> = records
            .iter()
            .map(|r| (r.id.clone(), fingerprint(r)))
            .collect();
        self.store.set_many(&entries).await
    }

    /// Drop fingerprints for ids that were just deleted from the index.
    pub async fn forget(&self, ids: &[String]) -> Result<()> {
        self.store.delete_many(ids).await
    }

    /// Replace the whole table with fingerprints of `records`.
    pub async fn rebuild(&self, records: &[KeybindingRecord]) -> Result<usize> {
        let mut entries: HashMap<String, String> = HashMap::with_capacity(records.len());
        for record in records {
            entries
                .entry(record.id.clone())
                .or_insert_with(|| fingerprint(record));
        }
        let count = entries.len();
        self.store
            .replace_all(&entries.into_iter().collect::<Vec<_>>())
            .await?;
        Ok(count)
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.len().await
    }

    pub async fn get(&self, id: &str) -> Result<Option<String>> {
        self.store.get(id).await
    }
}
