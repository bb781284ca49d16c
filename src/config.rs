use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `"memory"` or `"chroma"`.
    #[serde(default = "default_index_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// JSON snapshot file for the memory backend. Without it the memory
    /// index lives only as long as the process.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            url: None,
            path: None,
            collection: default_collection(),
            search_limit: default_search_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_index_backend() -> String {
    "memory".to_string()
}
fn default_collection() -> String {
    "keybindings".to_string()
}
fn default_search_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct InferenceConfig {
    /// `"disabled"`, `"ollama"`, or `"openai"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub generation_model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Inputs longer than this (in chars) are truncated before embedding.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            embedding_model: None,
            generation_model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl InferenceConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_input_chars() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    /// `"memory"` or `"sqlite"`.
    #[serde(default = "default_hash_store")]
    pub hash_store: String,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_content_chars: default_max_content_chars(),
            hash_store: default_hash_store(),
            db_path: default_db_path(),
        }
    }
}

fn default_batch_size() -> usize {
    32
}
fn default_max_content_chars() -> usize {
    1000
}
fn default_hash_store() -> String {
    "memory".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/keysense.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    /// Confidence assigned to a pattern match.
    #[serde(default = "default_pattern_confidence")]
    pub pattern_confidence: f64,
    /// Pattern matches above this skip inference classification.
    #[serde(default = "default_intent_confidence_threshold")]
    pub intent_confidence_threshold: f64,
    /// Used when a generated confidence is missing or malformed.
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
    #[serde(default = "default_max_expansion_terms")]
    pub max_expansion_terms: usize,
    #[serde(default = "default_intent_boost_factor")]
    pub intent_boost_factor: f64,
    #[serde(default = "default_high_confidence_threshold")]
    pub high_confidence_threshold: f64,
    #[serde(default = "default_high_confidence_bonus")]
    pub high_confidence_bonus: f64,
    #[serde(default = "default_synonym_boost")]
    pub synonym_boost: f64,
    /// Ask the generation service for related terms during expansion.
    #[serde(default = "default_true")]
    pub generated_terms: bool,
    /// Analysis taking longer than this is abandoned and the query is
    /// searched verbatim.
    #[serde(default = "default_query_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            pattern_confidence: default_pattern_confidence(),
            intent_confidence_threshold: default_intent_confidence_threshold(),
            default_confidence: default_confidence(),
            max_expansion_terms: default_max_expansion_terms(),
            intent_boost_factor: default_intent_boost_factor(),
            high_confidence_threshold: default_high_confidence_threshold(),
            high_confidence_bonus: default_high_confidence_bonus(),
            synonym_boost: default_synonym_boost(),
            generated_terms: default_true(),
            timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_pattern_confidence() -> f64 {
    0.8
}
fn default_intent_confidence_threshold() -> f64 {
    0.7
}
fn default_confidence() -> f64 {
    0.5
}
fn default_max_expansion_terms() -> usize {
    10
}
fn default_intent_boost_factor() -> f64 {
    0.2
}
fn default_high_confidence_threshold() -> f64 {
    0.8
}
fn default_high_confidence_bonus() -> f64 {
    0.1
}
fn default_synonym_boost() -> f64 {
    0.05
}
fn default_true() -> bool {
    true
}
fn default_query_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Added to the relevance of user-defined mappings.
    #[serde(default = "default_user_boost")]
    pub user_boost: f64,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_generation_max_tokens")]
    pub generation_max_tokens: u32,
    #[serde(default = "default_generation_temperature")]
    pub generation_temperature: f32,
    /// Hits rendered by an intent-specific formatter.
    #[serde(default = "default_intent_hits")]
    pub intent_hits: usize,
    #[serde(default = "default_user_hits")]
    pub user_hits: usize,
    #[serde(default = "default_builtin_hits")]
    pub builtin_hits: usize,
    /// Built-in cap once user mappings are present.
    #[serde(default = "default_builtin_hits_reduced")]
    pub builtin_hits_reduced: usize,
    #[serde(default = "default_knowledge_hits")]
    pub knowledge_hits: usize,
    /// Knowledge cap once user or built-in hits are present.
    #[serde(default = "default_knowledge_hits_reduced")]
    pub knowledge_hits_reduced: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            user_boost: default_user_boost(),
            max_context_chars: default_max_context_chars(),
            generation_max_tokens: default_generation_max_tokens(),
            generation_temperature: default_generation_temperature(),
            intent_hits: default_intent_hits(),
            user_hits: default_user_hits(),
            builtin_hits: default_builtin_hits(),
            builtin_hits_reduced: default_builtin_hits_reduced(),
            knowledge_hits: default_knowledge_hits(),
            knowledge_hits_reduced: default_knowledge_hits_reduced(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.3
}
fn default_user_boost() -> f64 {
    0.15
}
fn default_max_context_chars() -> usize {
    4000
}
fn default_generation_max_tokens() -> u32 {
    512
}
fn default_generation_temperature() -> f32 {
    0.1
}
fn default_intent_hits() -> usize {
    5
}
fn default_user_hits() -> usize {
    5
}
fn default_builtin_hits() -> usize {
    5
}
fn default_builtin_hits_reduced() -> usize {
    3
}
fn default_knowledge_hits() -> usize {
    3
}
fn default_knowledge_hits_reduced() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.index.backend.as_str() {
        "memory" => {}
        "chroma" => {
            if config.index.url.is_none() {
                bail!("index.url must be set when backend is 'chroma'");
            }
        }
        other => bail!(
            "Unknown index backend: '{}'. Must be memory or chroma.",
            other
        ),
    }
    if config.index.search_limit == 0 {
        bail!("index.search_limit must be > 0");
    }

    match config.inference.provider.as_str() {
        "disabled" | "ollama" | "openai" => {}
        other => bail!(
            "Unknown inference provider: '{}'. Must be disabled, ollama, or openai.",
            other
        ),
    }
    if config.inference.is_enabled() {
        if config.inference.embedding_model.is_none() {
            bail!(
                "inference.embedding_model must be specified when provider is '{}'",
                config.inference.provider
            );
        }
        if config.inference.generation_model.is_none() {
            bail!(
                "inference.generation_model must be specified when provider is '{}'",
                config.inference.provider
            );
        }
    }

    if config.sync.batch_size == 0 {
        bail!("sync.batch_size must be > 0");
    }
    if config.sync.max_content_chars == 0 {
        bail!("sync.max_content_chars must be > 0");
    }
    match config.sync.hash_store.as_str() {
        "memory" | "sqlite" => {}
        other => bail!(
            "Unknown hash store: '{}'. Must be memory or sqlite.",
            other
        ),
    }
    // Persisted fingerprints over a volatile index would mark every record
    // synced after a restart while the index is empty.
    if config.sync.hash_store == "sqlite"
        && config.index.backend == "memory"
        && config.index.path.is_none()
    {
        bail!("index.path must be set when a sqlite hash store is used with the memory index");
    }

    let unit = [
        ("query.pattern_confidence", config.query.pattern_confidence),
        (
            "query.intent_confidence_threshold",
            config.query.intent_confidence_threshold,
        ),
        ("query.default_confidence", config.query.default_confidence),
        (
            "query.high_confidence_threshold",
            config.query.high_confidence_threshold,
        ),
        (
            "retrieval.similarity_threshold",
            config.retrieval.similarity_threshold,
        ),
        ("retrieval.user_boost", config.retrieval.user_boost),
    ];
    for (name, value) in unit {
        if !(0.0..=1.0).contains(&value) {
            bail!("{} must be in [0.0, 1.0]", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.index.backend, "memory");
        assert_eq!(config.sync.batch_size, 32);
        assert!((config.retrieval.similarity_threshold - 0.3).abs() < 1e-9);
        assert!(!config.inference.is_enabled());
    }

    #[test]
    fn test_partial_sections() {
        let file = write_config(
            r#"
[sync]
batch_size = 4

[retrieval]
similarity_threshold = 0.5
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.sync.batch_size, 4);
        assert_eq!(config.sync.max_content_chars, 1000);
        assert!((config.retrieval.similarity_threshold - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let file = write_config("[retrieval]\nsimilarity_threshold = 1.5\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("similarity_threshold"));
    }

    #[test]
    fn test_rejects_zero_batch() {
        let file = write_config("[sync]\nbatch_size = 0\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_enabled_provider_requires_models() {
        let file = write_config("[inference]\nprovider = \"ollama\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("embedding_model"));
    }

    #[test]
    fn test_chroma_requires_url() {
        let file = write_config("[index]\nbackend = \"chroma\"\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_sqlite_hashes_need_persistent_index() {
        let file = write_config("[sync]\nhash_store = \"sqlite\"\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("index.path"));

        let file = write_config(
            "[index]\npath = \"./data/index.json\"\n\n[sync]\nhash_store = \"sqlite\"\n",
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.index.path, Some(PathBuf::from("./data/index.json")));

        let file = write_config(
            "[index]\nbackend = \"chroma\"\nurl = \"http://localhost:8000\"\n\n[sync]\nhash_store = \"sqlite\"\n",
        );
        assert!(load_config(file.path()).is_ok());
    }

    #[test]
    fn test_example_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/keysense.example.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.query.timeout_secs, 20);
        assert_eq!(config.retrieval.builtin_hits_reduced, 3);
        assert_eq!(config.server.bind, "127.0.0.1:7341");
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/keysense.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
