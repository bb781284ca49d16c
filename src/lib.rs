//! # keysense
//!
//! Natural-language search over editor keybindings.
//!
//! keysense keeps a vector index of keybinding records in sync with the
//! editor's current mappings, and answers questions such as "delete
//! current line" with ranked keybindings and a short explanation.
//!
//! ## Architecture
//!
//! ```text
//!  records ──▶ ChangeDetector ──▶ IncrementalVectorizer ──▶ VectorIndex
//!              (fingerprints)      (embed, store, commit)       │
//!                                                                │
//!  query ──▶ QueryProcessor ──▶ RetrievalAgent ◀─────────────────┘
//!            (intent, expand)    (search, generate, rank)
//! ```
//!
//! Queries and index writes share one read/write gate: any number of
//! queries search concurrently, while each index write and its
//! fingerprint commit run exclusively.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`inference`] | Embedding/generation service backends |
//! | [`embedding`] | Input normalization and the embedding emitter |
//! | [`index`] | Vector index backends |
//! | [`fingerprint`] | Content hashing and change detection |
//! | [`hash_store`] | Fingerprint table persistence |
//! | [`vectorizer`] | Incremental sync into the index |
//! | [`query`] | Intent classification and query expansion |
//! | [`analysis`] | Parser for generated analysis text |
//! | [`agent`] | Query answering |
//! | [`engine`] | Facade wiring everything together |
//! | [`server`] | HTTP server |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema migrations |

pub mod agent;
pub mod analysis;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod hash_store;
pub mod index;
pub mod inference;
pub mod migrate;
pub mod models;
pub mod query;
pub mod server;
pub mod vectorizer;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
