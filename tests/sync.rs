mod common;

use tempfile::TempDir;

use common::{engine, keymap, sqlite_engine};
use keysense::fingerprint::fingerprint;
use keysense::models::{KeybindingRecord, SyncReport};
use keysense::testing::FakeInference;

#[tokio::test]
async fn test_resync_of_unchanged_keymap_is_a_no_op() {
    let fake = FakeInference::new();
    let engine = engine(&fake);

    let first = engine.update_index(&keymap()).await.unwrap();
    assert_eq!(
        first,
        SyncReport {
            total_processed: 5,
            changed_count: 5,
            deleted_count: 0,
            skipped_count: 0,
        }
    );

    let calls = fake.embed_count();
    let second = engine.update_index(&keymap()).await.unwrap();
    assert_eq!(second.total_processed, 5);
    assert_eq!(second.changed_count, 0);
    assert_eq!(second.deleted_count, 0);
    assert_eq!(fake.embed_count(), calls);
}

#[tokio::test]
async fn test_modify_add_delete() {
    let fake = FakeInference::new();
    let engine = engine(&fake);
    engine.update_index(&keymap()).await.unwrap();

    let mut next = keymap();
    next[1].description = "Yank the current line".to_string();
    next.retain(|r| r.id != "n:x");
    next.push(KeybindingRecord::new("n:u", "u", "undo", "n").with_description("Undo last change"));

    let report = engine.update_index(&next).await.unwrap();
    assert_eq!(report.total_processed, 5);
    assert_eq!(report.changed_count, 2);
    assert_eq!(report.deleted_count, 1);

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.documents, 5);
    assert_eq!(stats.fingerprints, 5);

    let response = engine.query("undo last change").await;
    assert_eq!(response.results[0].keybinding.keys, "u");
}

#[tokio::test]
async fn test_record_without_content_is_skipped_and_retried() {
    let fake = FakeInference::new();
    let engine = engine(&fake);
    let mut records = keymap();
    records.push(KeybindingRecord::new("blank", " ", "", ""));

    let report = engine.update_index(&records).await.unwrap();
    assert_eq!(report.changed_count, 5);
    assert_eq!(report.skipped_count, 1);
    assert_eq!(engine.stats().await.unwrap().documents, 5);

    // Never committed, so it is retried, but nothing is written.
    let calls = fake.embed_count();
    let again = engine.update_index(&records).await.unwrap();
    assert_eq!(again.changed_count, 0);
    assert_eq!(again.deleted_count, 0);
    assert_eq!(again.skipped_count, 1);
    assert_eq!(fake.embed_count(), calls);
}

#[tokio::test]
async fn test_fingerprints_survive_restart() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("data").join("keysense.sqlite");
    let fake = FakeInference::new();

    {
        let engine = sqlite_engine(&fake, &db).await;
        let report = engine.update_index(&keymap()).await.unwrap();
        assert_eq!(report.changed_count, 5);
        engine.close().await.unwrap();
    }

    // Fresh in-memory index, persisted fingerprints: nothing looks changed,
    // and health reports the mismatch.
    let engine = sqlite_engine(&fake, &db).await;
    let report = engine.update_index(&keymap()).await.unwrap();
    assert_eq!(report.changed_count, 0);

    let health = engine.health().await;
    assert_eq!(health.status, "degraded");
    assert!(health.consistency.is_some());

    // A full re-index repairs it.
    let full = engine.index_all(&keymap()).await.unwrap();
    assert_eq!(full.changed_count, 5);
    assert_eq!(engine.health().await.status, "ok");
    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_rebuild_hash_store_marks_records_synced() {
    let fake = FakeInference::new();
    let engine = engine(&fake);
    let records = keymap();

    let written = engine.rebuild_hash_store(&records).await.unwrap();
    assert_eq!(written, records.len());

    let stats = engine.stats().await.unwrap();
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.fingerprints, records.len());
    assert_eq!(fake.embed_count(), 0);

    let report = engine.update_index(&records).await.unwrap();
    assert_eq!(report.changed_count, 0);
}

#[test]
fn test_fingerprint_ignores_id() {
    let a = KeybindingRecord::new("one", "dd", "delete line", "n");
    let b = KeybindingRecord::new("two", "dd", "delete line", "n");
    assert_eq!(fingerprint(&a), fingerprint(&b));
}
