//! Core data models used throughout keysense.
//!
//! These types represent the keybinding records, index documents, query
//! analysis, and ranked results that flow through the sync and retrieval
//! pipelines.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Metadata key marking where a keybinding came from.
pub const META_SOURCE: &str = "source";
/// `source` value for mappings defined in the user's own configuration.
pub const SOURCE_USER: &str = "user";
/// `source` value for keybindings shipped with the editor.
pub const SOURCE_BUILTIN: &str = "builtin";
/// `source` value for general documentation / help content.
pub const SOURCE_KNOWLEDGE: &str = "knowledge";

/// A keybinding snapshot as handed to the sync engine.
///
/// Identity is `id`; everything else contributes to the searchable
/// content and to the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeybindingRecord {
    pub id: String,
    pub keys: String,
    pub command: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl KeybindingRecord {
    pub fn new(id: &str, keys: &str, command: &str, mode: &str) -> Self {
        Self {
            id: id.to_string(),
            keys: keys.to_string(),
            command: command.to_string(),
            description: String::new(),
            mode: mode.to_string(),
            plugin: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_plugin(mut self, plugin: &str) -> Self {
        self.plugin = Some(plugin.to_string());
        self
    }

    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// A document as stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    /// Canonical searchable text derived from a [`KeybindingRecord`].
    pub content: String,
    pub vector: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
}

impl IndexDocument {
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn meta_or_empty(&self, key: &str) -> &str {
        self.meta(key).unwrap_or("")
    }

    /// True when the document was tagged as a user-defined mapping.
    pub fn is_user_sourced(&self) -> bool {
        self.meta(META_SOURCE) == Some(SOURCE_USER) || self.meta("user_defined") == Some("true")
    }

    /// True when the document is a keybinding shipped with the editor.
    pub fn is_builtin(&self) -> bool {
        self.meta(META_SOURCE) == Some(SOURCE_BUILTIN) || self.meta("builtin") == Some("true")
    }
}

/// A single similarity-search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document: IndexDocument,
    /// Similarity in `[0.0, 1.0]`, higher is more similar.
    pub score: f64,
    pub distance: f64,
}

/// Classified purpose of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentType {
    Navigation,
    Editing,
    Visual,
    Search,
    Window,
    Buffer,
    Command,
    Motion,
    Macro,
    General,
}

impl IntentType {
    pub const ALL: [IntentType; 10] = [
        IntentType::Navigation,
        IntentType::Editing,
        IntentType::Visual,
        IntentType::Search,
        IntentType::Window,
        IntentType::Buffer,
        IntentType::Command,
        IntentType::Motion,
        IntentType::Macro,
        IntentType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::Navigation => "navigation",
            IntentType::Editing => "editing",
            IntentType::Visual => "visual",
            IntentType::Search => "search",
            IntentType::Window => "window",
            IntentType::Buffer => "buffer",
            IntentType::Command => "command",
            IntentType::Motion => "motion",
            IntentType::Macro => "macro",
            IntentType::General => "general",
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        IntentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| anyhow::anyhow!("Unknown intent category: '{}'", s.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryIntent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    pub keywords: Vec<String>,
    pub context: BTreeMap<String, String>,
    pub suggestions: Vec<String>,
}

impl QueryIntent {
    pub fn new(intent_type: IntentType, confidence: f64) -> Self {
        Self {
            intent_type,
            confidence: confidence.clamp(0.0, 1.0),
            keywords: Vec::new(),
            context: BTreeMap::new(),
            suggestions: Vec::new(),
        }
    }
}

/// The analysed form of one query. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedQuery {
    pub original: String,
    pub expanded: String,
    pub intent: Option<QueryIntent>,
    pub synonyms: Vec<String>,
    pub search_terms: Vec<String>,
    pub boost_factors: HashMap<String, f64>,
}

impl ProcessedQuery {
    /// A query that went through no analysis; searched verbatim.
    pub fn verbatim(query: &str) -> Self {
        Self {
            original: query.to_string(),
            expanded: query.to_string(),
            intent: None,
            synonyms: Vec::new(),
            search_terms: Vec::new(),
            boost_factors: HashMap::new(),
        }
    }
}

/// The keybinding fields shown to a caller for one result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeybindingView {
    pub id: String,
    pub keys: String,
    pub command: String,
    pub description: String,
    pub mode: String,
    pub plugin: Option<String>,
    pub source: Option<String>,
}

impl KeybindingView {
    pub fn from_document(doc: &IndexDocument) -> Self {
        Self {
            id: doc.id.clone(),
            keys: doc.meta_or_empty("keys").to_string(),
            command: doc.meta_or_empty("command").to_string(),
            description: doc.meta_or_empty("description").to_string(),
            mode: doc.meta_or_empty("mode").to_string(),
            plugin: doc.meta("plugin").map(str::to_string),
            source: doc.meta(META_SOURCE).map(str::to_string),
        }
    }
}

/// Final output unit of a query.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub keybinding: KeybindingView,
    /// Relevance in `[0.0, 1.0]`.
    pub relevance: f64,
    pub explanation: String,
}

/// How a query terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Results ranked with the help of generated analysis.
    Answered,
    /// Generation failed; results ranked from similarity alone.
    Degraded,
    /// Search succeeded but nothing cleared the similarity threshold.
    NoMatches,
    /// Input rejected before any work was done.
    Rejected,
    /// The mandatory search step failed.
    Failed,
}

/// Response object for one query. Always produced, never an `Err`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub outcome: QueryOutcome,
    pub results: Vec<RankedResult>,
    pub reasoning: String,
    pub alternatives: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<ProcessedQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn empty(query: &str, outcome: QueryOutcome, reasoning: impl Into<String>) -> Self {
        Self {
            query: query.to_string(),
            outcome,
            results: Vec::new(),
            reasoning: reasoning.into(),
            alternatives: Vec::new(),
            processed: None,
            error: None,
        }
    }
}

/// Summary of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub total_processed: usize,
    /// Records embedded and stored in this run.
    pub changed_count: usize,
    pub deleted_count: usize,
    /// Records left unsynced because they had no embeddable content.
    pub skipped_count: usize,
}
