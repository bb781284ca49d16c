//! # keysense CLI (`ks`)
//!
//! ## Usage
//!
//! ```bash
//! ks --config ./config/keysense.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ks init` | Create the fingerprint table |
//! | `ks query "<text>"` | Ask which keybinding does something |
//! | `ks update <records.json>` | Sync the index against a record snapshot |
//! | `ks rebuild-hashes <records.json>` | Recompute fingerprints without re-embedding |
//! | `ks health` | Check the index and inference backends |
//! | `ks stats` | Show index and fingerprint counts |
//! | `ks serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use keysense::config::{self, Config};
use keysense::engine::Engine;
use keysense::hash_store::{HashStore, SqliteHashStore};
use keysense::models::{KeybindingRecord, QueryResponse};
use keysense::server;

/// keysense: natural-language search over editor keybindings.
#[derive(Parser)]
#[command(name = "ks", version)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/keysense.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the fingerprint table (SQLite hash store only).
    Init,

    /// Answer a question such as "delete current line".
    Query {
        query: String,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Sync the index against a JSON array of keybinding records.
    ///
    /// Records whose fingerprint is unchanged are skipped; ids missing
    /// from the file are deleted from the index.
    Update {
        records: PathBuf,

        /// Re-embed every record instead of diffing fingerprints.
        #[arg(long)]
        full: bool,
    },

    /// Recompute the fingerprint table from a record file.
    ///
    /// Use after the index was populated out of band. The index itself is
    /// not touched.
    RebuildHashes { records: PathBuf },

    /// Check the index and inference backends.
    Health,

    /// Show document and fingerprint counts.
    Stats,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn load(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        Ok(Config::default())
    }
}

fn read_records(path: &Path) -> Result<Vec<KeybindingRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse records file: {}", path.display()))
}

fn print_response(response: &QueryResponse) {
    if response.results.is_empty() {
        println!("{}", response.reasoning);
        if let Some(err) = &response.error {
            println!("error: {}", err);
        }
        return;
    }

    for (i, result) in response.results.iter().enumerate() {
        let kb = &result.keybinding;
        println!(
            "{}. [{:.2}] {}  {}  (mode: {})",
            i + 1,
            result.relevance,
            kb.keys,
            kb.command,
            if kb.mode.is_empty() { "-" } else { kb.mode.as_str() }
        );
        if !kb.description.is_empty() {
            println!("    {}", kb.description);
        }
        println!("    {}", result.explanation);
    }
    println!();
    println!("{}", response.reasoning);
    if !response.alternatives.is_empty() {
        println!("Alternatives: {}", response.alternatives.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load(&cli.config)?;

    if let Commands::Init = cli.command {
        if cfg.sync.hash_store == "sqlite" {
            let store = SqliteHashStore::open(&cfg.sync.db_path).await?;
            store.close().await?;
            println!(
                "Fingerprint table initialized at {}",
                cfg.sync.db_path.display()
            );
        } else {
            println!("Hash store is in-memory; nothing to initialize.");
        }
        return Ok(());
    }

    let engine = Engine::new(cfg).await?;
    engine.initialize().await?;

    match cli.command {
        Commands::Init => {}
        Commands::Query { query, json } => {
            let response = engine.query(&query).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Commands::Update { records, full } => {
            let records = read_records(&records)?;
            let report = if full {
                engine.index_all(&records).await?
            } else {
                engine.update_index(&records).await?
            };
            println!("Processed: {}", report.total_processed);
            println!("Changed:   {}", report.changed_count);
            println!("Deleted:   {}", report.deleted_count);
            println!("Skipped:   {}", report.skipped_count);
        }
        Commands::RebuildHashes { records } => {
            let records = read_records(&records)?;
            let written = engine.rebuild_hash_store(&records).await?;
            println!("Rebuilt {} fingerprints.", written);
        }
        Commands::Health => {
            let health = engine.health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Commands::Stats => {
            let stats = engine.stats().await?;
            println!("keysense stats");
            println!("==============");
            println!("  Index:         {}", stats.index_backend);
            println!("  Inference:     {}", stats.inference_provider);
            println!("  Documents:     {}", stats.documents);
            println!("  Fingerprints:  {}", stats.fingerprints);
        }
        Commands::Serve => {
            let engine = Arc::new(engine);
            server::run_server(engine.clone()).await?;
            engine.close().await?;
            return Ok(());
        }
    }

    engine.close().await?;
    Ok(())
}
