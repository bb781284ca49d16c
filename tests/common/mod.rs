//! Shared engine and keymap fixtures over `keysense::testing::FakeInference`.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use keysense::config::Config;
use keysense::engine::Engine;
use keysense::hash_store::{HashStore, MemoryHashStore, SqliteHashStore};
use keysense::index::memory::InMemoryIndex;
use keysense::models::{KeybindingRecord, SOURCE_BUILTIN, SOURCE_USER};
use keysense::testing::FakeInference;

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retrieval.similarity_threshold = 0.1;
    config.query.generated_terms = false;
    config
}

pub fn engine_with_store(
    fake: &Arc<FakeInference>,
    config: Config,
    store: Arc<dyn HashStore>,
) -> Engine {
    let index = Arc::new(InMemoryIndex::new(fake.emitter()));
    Engine::with_components(config, fake.clone(), index, store).unwrap()
}

pub fn engine(fake: &Arc<FakeInference>) -> Engine {
    engine_with_store(fake, test_config(), Arc::new(MemoryHashStore::new()))
}

pub async fn sqlite_engine(fake: &Arc<FakeInference>, db: &Path) -> Engine {
    let store = SqliteHashStore::open(db).await.unwrap();
    engine_with_store(fake, test_config(), Arc::new(store))
}

pub fn keymap() -> Vec<KeybindingRecord> {
    vec![
        KeybindingRecord::new("n:dd", "dd", "delete line", "n")
            .with_description("Delete the current line")
            .with_meta("source", SOURCE_BUILTIN),
        KeybindingRecord::new("n:yy", "yy", "yank line", "n")
            .with_description("Copy current line into register")
            .with_meta("source", SOURCE_BUILTIN),
        KeybindingRecord::new("n:x", "x", "delete char", "n")
            .with_description("Delete character under cursor")
            .with_meta("source", SOURCE_BUILTIN),
        KeybindingRecord::new("n:gg", "gg", "goto first line", "n")
            .with_description("Jump to the top of the file")
            .with_meta("source", SOURCE_BUILTIN),
        KeybindingRecord::new("n:<leader>w", "<leader>w", "write", "n")
            .with_description("Save the file")
            .with_plugin("core")
            .with_meta("source", SOURCE_USER),
    ]
}
