mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{engine, engine_with_store, keymap, test_config};
use keysense::hash_store::MemoryHashStore;
use keysense::models::{IntentType, KeybindingRecord, QueryOutcome};
use keysense::testing::FakeInference;

#[tokio::test]
async fn test_delete_current_line_ranks_dd_first() {
    let fake = FakeInference::new();
    let engine = engine(&fake);
    engine.update_index(&keymap()).await.unwrap();

    let response = engine.query("delete current line").await;

    assert_eq!(response.outcome, QueryOutcome::Degraded);
    assert_eq!(response.results[0].keybinding.keys, "dd");
    assert_eq!(response.results[0].keybinding.command, "delete line");
    assert!(response.error.is_none());

    let processed = response.processed.unwrap();
    assert_eq!(processed.intent.unwrap().intent_type, IntentType::Editing);
    assert!(processed.synonyms.contains(&"remove".to_string()));
}

#[tokio::test]
async fn test_generated_analysis_drives_ranking() {
    let fake = FakeInference::with_generation(
        "KEYS: yy\nSCORE: 0.2\nEXPLANATION: Copies, does not delete.\n\
         KEYS: dd\nSCORE: 0.97\nEXPLANATION: Deletes the line under the cursor.\n\
         REASONING: dd is the direct answer.\nALTERNATIVES: D, cc",
    );
    let engine = engine(&fake);
    engine.update_index(&keymap()).await.unwrap();

    let response = engine.query("delete current line").await;

    assert_eq!(response.outcome, QueryOutcome::Answered);
    assert_eq!(response.results[0].keybinding.keys, "dd");
    assert!((response.results[0].relevance - 0.97).abs() < 1e-9);
    assert_eq!(
        response.results[0].explanation,
        "Deletes the line under the cursor."
    );
    assert_eq!(response.reasoning, "dd is the direct answer.");
    assert_eq!(response.alternatives, vec!["D", "cc"]);

    let yy = response
        .results
        .iter()
        .find(|r| r.keybinding.keys == "yy")
        .unwrap();
    assert!((yy.relevance - 0.2).abs() < 1e-9);
}

#[tokio::test]
async fn test_empty_query_is_rejected_without_backend_calls() {
    let fake = FakeInference::new();
    let engine = engine(&fake);

    for query in ["", "   ", "\n\t"] {
        let response = engine.query(query).await;
        assert_eq!(response.outcome, QueryOutcome::Rejected);
        assert!(response.results.is_empty());
        assert!(!response.reasoning.is_empty());
        assert!(response.error.is_none());
    }
    assert_eq!(fake.embed_count(), 0);
}

#[tokio::test]
async fn test_user_boost_is_clamped() {
    let fake = FakeInference::with_generation("KEYS: <leader>w\nSCORE: 0.95\nEXPLANATION: Your save mapping.");
    let engine = engine(&fake);
    engine.update_index(&keymap()).await.unwrap();

    let response = engine.query("save the file").await;

    let top = &response.results[0];
    assert_eq!(top.keybinding.keys, "<leader>w");
    assert_eq!(top.keybinding.source.as_deref(), Some("user"));
    assert_eq!(top.relevance, 1.0);
    for result in &response.results {
        assert!((0.0..=1.0).contains(&result.relevance));
    }
}

#[tokio::test]
async fn test_raising_threshold_never_adds_results() {
    let mut previous: Option<HashSet<String>> = None;
    for threshold in [0.0, 0.1, 0.2, 0.3, 0.4, 0.6, 0.9] {
        let fake = FakeInference::new();
        let mut config = test_config();
        config.retrieval.similarity_threshold = threshold;
        let engine = engine_with_store(&fake, config, Arc::new(MemoryHashStore::new()));
        engine.update_index(&keymap()).await.unwrap();

        let response = engine.query("delete current line").await;
        let ids: HashSet<String> = response
            .results
            .iter()
            .map(|r| r.keybinding.id.clone())
            .collect();

        if ids.is_empty() {
            assert_eq!(response.outcome, QueryOutcome::NoMatches);
        }
        if let Some(prev) = &previous {
            assert!(ids.is_subset(prev), "threshold {} added results", threshold);
        }
        previous = Some(ids);
    }
}

#[tokio::test]
async fn test_identical_content_distinct_ids_both_returned() {
    let fake = FakeInference::new();
    let engine = engine(&fake);
    let records = vec![
        KeybindingRecord::new("buffer-1:dd", "dd", "delete line", "n"),
        KeybindingRecord::new("buffer-2:dd", "dd", "delete line", "n"),
    ];
    let report = engine.update_index(&records).await.unwrap();
    assert_eq!(report.changed_count, 2);

    let response = engine.query("delete line").await;
    let ids: HashSet<&str> = response
        .results
        .iter()
        .map(|r| r.keybinding.id.as_str())
        .collect();
    assert!(ids.contains("buffer-1:dd"));
    assert!(ids.contains("buffer-2:dd"));
}

#[tokio::test]
async fn test_search_failure_is_reported_not_raised() {
    let fake = FakeInference::new();
    let engine = engine(&fake);
    engine.update_index(&keymap()).await.unwrap();

    fake.embed_down.store(true, Ordering::SeqCst);
    let response = engine.query("delete current line").await;

    assert_eq!(response.outcome, QueryOutcome::Failed);
    assert!(response.results.is_empty());
    assert!(response
        .error
        .as_deref()
        .unwrap()
        .contains("embedding service unreachable"));
}

#[tokio::test]
async fn test_no_matches_above_threshold() {
    let fake = FakeInference::new();
    let mut config = test_config();
    config.retrieval.similarity_threshold = 0.3;
    let engine = engine_with_store(&fake, config, Arc::new(MemoryHashStore::new()));
    engine.update_index(&keymap()).await.unwrap();

    let response = engine.query("fold nested code blocks").await;

    assert_eq!(response.outcome, QueryOutcome::NoMatches);
    assert!(response.results.is_empty());
    assert!(response.error.is_none());
}

#[tokio::test]
async fn test_queries_run_alongside_sync() {
    let fake = FakeInference::new();
    let engine = Arc::new(engine(&fake));
    engine.update_index(&keymap()).await.unwrap();

    let mut edited = keymap();
    edited[0].description = "Delete the current line linewise".to_string();

    let sync = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.update_index(&edited).await })
    };
    let queries: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.query("delete current line").await })
        })
        .collect();

    let report = sync.await.unwrap().unwrap();
    assert_eq!(report.changed_count, 1);
    for q in queries {
        let response = q.await.unwrap();
        assert_eq!(response.outcome, QueryOutcome::Degraded);
        assert_eq!(response.results[0].keybinding.keys, "dd");
    }
}

#[tokio::test]
async fn test_slow_query_embedding_does_not_stall_other_queries() {
    let fake = FakeInference::new();
    let engine = Arc::new(engine(&fake));
    engine.update_index(&keymap()).await.unwrap();
    fake.slow_down("sluggish", Duration::from_millis(800));

    let slow = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.query("sluggish delete current line").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A sync queued while the slow query is still embedding.
    let mut edited = keymap();
    edited[1].description = "Copy the current line".to_string();
    let sync = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.update_index(&edited).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let fast = engine.query("delete current line").await;
    let elapsed = started.elapsed();

    assert!(
        elapsed < Duration::from_millis(400),
        "query waited {:?} behind another query's embedding",
        elapsed
    );
    assert_eq!(fast.results[0].keybinding.keys, "dd");
    assert_eq!(sync.await.unwrap().unwrap().changed_count, 1);
    assert_eq!(slow.await.unwrap().outcome, QueryOutcome::Degraded);
}
