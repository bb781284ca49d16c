//! Intent classification.
//!
//! Two sources: an ordered table of trigger patterns over the
//! lower-cased query (first match wins, fixed confidence), and a
//! generated classification in a fixed `KEY: value` layout. See
//! [`merge`] for how the two combine.

use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;

use super::extract_search_terms;
use crate::models::{IntentType, QueryIntent};

/// Confidence of the catch-all intent and of unparseable classifications.
pub const GENERIC_CONFIDENCE: f64 = 0.3;

const PATTERNS: &[(IntentType, &str)] = &[
    (
        IntentType::Navigation,
        r"\b(go\s*to|goto|jump|navigate|scroll|top of|bottom of|beginning of|start of|end of|next|previous|prev)\b",
    ),
    (
        IntentType::Editing,
        r"\b(delete|remove|insert|change|replace|edit|yank|copy|paste|cut|undo|redo|indent|join|substitute|append|duplicate)\b",
    ),
    (
        IntentType::Visual,
        r"\b(select|selection|visual|highlight)\b",
    ),
    (
        IntentType::Search,
        r"\b(search|find|grep|look\s+for|occurrences?|pattern)\b",
    ),
    (
        IntentType::Window,
        r"\b(windows?|split|panes?|vsplit|resize|tabs?)\b",
    ),
    (
        IntentType::Buffer,
        r"\b(buffers?|files?|save|open|close|quit|exit)\b",
    ),
    (
        IntentType::Command,
        r"(^:|\b(command|ex|run|execute)\b)",
    ),
    (
        IntentType::Motion,
        r"\b(move|motion|words?|char|character|paragraph|sentence|cursor)\b",
    ),
    (
        IntentType::Macro,
        r"\b(macros?|record|recording|replay|repeat)\b",
    ),
];

/// Ordered pattern table compiled once per processor.
pub struct PatternClassifier {
    patterns: Vec<(IntentType, Regex)>,
    confidence: f64,
}

impl PatternClassifier {
    pub fn new(confidence: f64) -> Result<Self> {
        let patterns = PATTERNS
            .iter()
            .map(|(intent, pattern)| Ok((*intent, Regex::new(pattern)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns,
            confidence,
        })
    }

    /// First matching category, or `None`.
    pub fn classify(&self, query: &str) -> Option<QueryIntent> {
        let normalized = query.to_lowercase();
        for (intent_type, regex) in &self.patterns {
            if let Some(m) = regex.find(&normalized) {
                let mut intent = QueryIntent::new(*intent_type, self.confidence);
                intent.keywords = extract_search_terms(&normalized);
                intent
                    .context
                    .insert("matched".to_string(), m.as_str().trim().to_string());
                intent
                    .context
                    .insert("source".to_string(), "pattern".to_string());
                return Some(intent);
            }
        }
        None
    }
}

/// Intent built from the raw query tokens when nothing else is available.
pub fn catch_all(query: &str) -> QueryIntent {
    let mut intent = QueryIntent::new(IntentType::General, GENERIC_CONFIDENCE);
    intent.keywords = extract_search_terms(query);
    intent
        .context
        .insert("source".to_string(), "fallback".to_string());
    intent
}

pub fn classification_prompt(query: &str) -> String {
    let categories: Vec<&str> = IntentType::ALL.iter().map(|t| t.as_str()).collect();
    format!(
        "You classify questions about text-editor keybindings.\n\
         Categories: {}\n\n\
         Query: \"{}\"\n\n\
         Answer with exactly these lines and nothing else:\n\
         CATEGORY: <one category>\n\
         CONFIDENCE: <number between 0 and 1>\n\
         KEYWORDS: <comma-separated keywords>\n\
         CONTEXT: <key=value pairs, comma-separated>\n\
         SUGGESTIONS: <comma-separated keybindings that may help>\n",
        categories.join(", "),
        query.replace('"', "'")
    )
}

/// Parse a confidence value such as `0.85`, `.9`, `85%` or `0.8.`.
///
/// Percent values and plain numbers from 2 to 100 are read as percentages.
/// Plain numbers between 1 and 2 are a slight overshoot and clamp to 1.
/// Anything else falls back to `default`.
pub fn parse_confidence(raw: &str, default: f64) -> f64 {
    let token = raw
        .split_whitespace()
        .next()
        .unwrap_or("")
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ')'));
    let (number, percent) = match token.strip_suffix('%') {
        Some(n) => (n, true),
        None => (token, false),
    };
    match number.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => {
            if percent {
                (v / 100.0).min(1.0)
            } else if v <= 1.0 {
                v
            } else if v < 2.0 {
                1.0
            } else if v <= 100.0 {
                v / 100.0
            } else {
                default
            }
        }
        _ => default,
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().trim_matches(|c| c == '"' || c == '`').to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
        .collect()
}

/// Tolerant parse of a generated classification.
///
/// Unknown lines are ignored. A missing or unrecognised `CATEGORY`
/// yields a low-confidence general intent; a missing or malformed
/// `CONFIDENCE` yields `default_confidence`.
pub fn parse_classification(text: &str, query: &str, default_confidence: f64) -> QueryIntent {
    let mut category: Option<IntentType> = None;
    let mut confidence: Option<f64> = None;
    let mut keywords = Vec::new();
    let mut context = BTreeMap::new();
    let mut suggestions = Vec::new();

    for line in text.lines() {
        let line = line.trim().trim_start_matches(&['-', '*', '#', ' '][..]);
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_uppercase().as_str() {
            "CATEGORY" | "INTENT" => {
                category = value
                    .split(|c: char| !c.is_alphanumeric())
                    .find(|w| !w.is_empty())
                    .and_then(|w| w.parse().ok());
            }
            "CONFIDENCE" => confidence = Some(parse_confidence(value, default_confidence)),
            "KEYWORDS" => keywords = split_list(value).into_iter().map(|k| k.to_lowercase()).collect(),
            "CONTEXT" => {
                for pair in value.split(',') {
                    if let Some((k, v)) = pair.split_once('=') {
                        let (k, v) = (k.trim(), v.trim());
                        if !k.is_empty() && !v.is_empty() {
                            context.insert(k.to_string(), v.to_string());
                        }
                    }
                }
            }
            "SUGGESTIONS" => suggestions = split_list(value),
            _ => {}
        }
    }

    let Some(intent_type) = category else {
        return catch_all(query);
    };

    let mut intent = QueryIntent::new(intent_type, confidence.unwrap_or(default_confidence));
    intent.keywords = if keywords.is_empty() {
        extract_search_terms(query)
    } else {
        keywords
    };
    intent.context = context;
    intent
        .context
        .insert("source".to_string(), "inference".to_string());
    intent.suggestions = suggestions;
    intent
}

fn union(into: &mut Vec<String>, from: &[String]) {
    for item in from {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

/// Combine a pattern result with a generated one.
///
/// Same category: confidence is the mean of both, capped at 1.0, and
/// keywords/suggestions/context are unioned. Different categories: the
/// more confident result wins, the pattern result on ties.
pub fn merge(pattern: Option<QueryIntent>, inferred: QueryIntent) -> QueryIntent {
    let Some(pattern) = pattern else {
        return inferred;
    };

    if pattern.intent_type == inferred.intent_type {
        let mut merged = pattern;
        merged.confidence = ((merged.confidence + inferred.confidence) / 2.0).min(1.0);
        union(&mut merged.keywords, &inferred.keywords);
        union(&mut merged.suggestions, &inferred.suggestions);
        for (k, v) in inferred.context {
            merged.context.entry(k).or_insert(v);
        }
        merged
            .context
            .insert("source".to_string(), "pattern+inference".to_string());
        merged
    } else if inferred.confidence > pattern.confidence {
        inferred
    } else {
        pattern
    }
}
