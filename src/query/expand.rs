//! Query expansion: static synonym table, per-intent keyword table and
//! best-effort generated related terms.

use std::collections::HashSet;

use crate::models::IntentType;

const SYNONYMS: &[(&str, &[&str])] = &[
    ("delete", &["remove", "erase", "cut"]),
    ("remove", &["delete", "erase"]),
    ("erase", &["delete", "remove"]),
    ("copy", &["yank", "duplicate"]),
    ("yank", &["copy"]),
    ("paste", &["put"]),
    ("put", &["paste"]),
    ("undo", &["revert"]),
    ("redo", &["repeat"]),
    ("move", &["go", "jump", "navigate"]),
    ("go", &["move", "jump"]),
    ("jump", &["goto", "move"]),
    ("line", &["row"]),
    ("search", &["find", "grep"]),
    ("find", &["search", "locate"]),
    ("replace", &["substitute", "change"]),
    ("change", &["modify", "replace"]),
    ("select", &["highlight", "visual"]),
    ("window", &["pane", "split"]),
    ("buffer", &["file"]),
    ("file", &["buffer"]),
    ("save", &["write"]),
    ("quit", &["exit", "close"]),
    ("close", &["quit"]),
    ("indent", &["shift"]),
    ("start", &["beginning"]),
    ("top", &["beginning"]),
    ("bottom", &["end"]),
];

fn intent_keywords(intent: IntentType) -> &'static [&'static str] {
    match intent {
        IntentType::Navigation => &["jump", "goto", "scroll"],
        IntentType::Editing => &["delete", "insert", "change", "yank"],
        IntentType::Visual => &["select", "visual", "highlight"],
        IntentType::Search => &["search", "find", "pattern"],
        IntentType::Window => &["window", "split", "pane"],
        IntentType::Buffer => &["buffer", "file", "switch"],
        IntentType::Command => &["command", "ex", "execute"],
        IntentType::Motion => &["motion", "word", "cursor"],
        IntentType::Macro => &["macro", "record", "register"],
        IntentType::General => &[],
    }
}

fn tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Collects expansion terms, dropping duplicates and words already in
/// the query, up to a fixed limit.
pub struct TermCollector {
    seen: HashSet<String>,
    terms: Vec<String>,
    limit: usize,
}

impl TermCollector {
    pub fn new(query: &str, limit: usize) -> Self {
        Self {
            seen: tokens(query).into_iter().collect(),
            terms: Vec::new(),
            limit,
        }
    }

    pub fn push(&mut self, term: &str) {
        let term = term.trim().to_lowercase();
        if term.is_empty() || self.terms.len() >= self.limit {
            return;
        }
        if self.seen.insert(term.clone()) {
            self.terms.push(term);
        }
    }

    pub fn is_full(&self) -> bool {
        self.terms.len() >= self.limit
    }

    pub fn into_terms(self) -> Vec<String> {
        self.terms
    }
}

/// Add synonym-table and intent-keyword terms for `query`.
pub fn collect_static_terms(
    collector: &mut TermCollector,
    query: &str,
    intent: Option<IntentType>,
) {
    for token in tokens(query) {
        if let Some((_, synonyms)) = SYNONYMS.iter().find(|(word, _)| *word == token) {
            for s in synonyms.iter() {
                collector.push(s);
            }
        }
    }
    if let Some(intent) = intent {
        for k in intent_keywords(intent) {
            collector.push(k);
        }
    }
}

pub fn related_terms_prompt(query: &str) -> String {
    format!(
        "List 3 to 5 short search terms related to this text-editor keybinding question.\n\
         Question: \"{}\"\n\
         Reply with the terms only, comma-separated.\n",
        query.replace('"', "'")
    )
}

/// Pull up to five short terms out of generated text.
///
/// Accepts comma- or newline-separated lists with optional bullets or
/// numbering. Entries longer than three words are dropped.
pub fn parse_related_terms(text: &str) -> Vec<String> {
    text.split(|c| c == ',' || c == '\n')
        .map(|t| {
            t.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
                .trim()
                .trim_matches(|c| c == '"' || c == '\'' || c == '`' || c == '.')
                .to_lowercase()
        })
        .filter(|t| !t.is_empty() && t.split_whitespace().count() <= 3 && !t.contains(':'))
        .take(5)
        .collect()
}

/// `query` followed by `terms`, or `query` alone.
pub fn join_expanded(query: &str, terms: &[String]) -> String {
    if terms.is_empty() {
        query.to_string()
    } else {
        format!("{} {}", query, terms.join(" "))
    }
}
