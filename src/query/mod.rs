//! Query analysis: intent classification, expansion, search-term
//! extraction and boost computation.
//!
//! [`QueryProcessor::process`] never fails. Every inference-backed step
//! has a deterministic fallback, so the worst case is a
//! [`ProcessedQuery`] built from patterns and tables alone.

pub mod context;
pub mod expand;
pub mod intent;

use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::QueryConfig;
use crate::embedding::EmbeddingEmitter;
use crate::models::{ProcessedQuery, QueryIntent};

use expand::TermCollector;
use intent::PatternClassifier;

const CLASSIFY_MAX_TOKENS: u32 = 150;
const RELATED_TERMS_MAX_TOKENS: u32 = 60;

const STOP_WORDS: &[&str] = &[
    "the", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by", "from",
    "as", "is", "are", "was", "were", "be", "how", "do", "does", "can", "you", "it", "this",
    "that", "what", "which", "my", "me", "want", "would", "should",
];

/// Lower-case whitespace tokens of `query`, minus stop words and
/// single-character tokens.
pub fn extract_search_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Named ranking adjustments derived from the intent and expansion.
pub fn compute_boosts(
    intent: Option<&QueryIntent>,
    synonyms: &[String],
    config: &QueryConfig,
) -> HashMap<String, f64> {
    let mut boosts = HashMap::new();
    if let Some(intent) = intent {
        boosts.insert(
            format!("intent_{}", intent.intent_type),
            config.intent_boost_factor * intent.confidence,
        );
        if intent.confidence > config.high_confidence_threshold {
            boosts.insert("high_confidence".to_string(), config.high_confidence_bonus);
        }
    }
    if !synonyms.is_empty() {
        boosts.insert("synonym_expansion".to_string(), config.synonym_boost);
    }
    boosts
}

pub struct QueryProcessor {
    config: QueryConfig,
    emitter: EmbeddingEmitter,
    patterns: PatternClassifier,
    temperature: f32,
}

impl QueryProcessor {
    pub fn new(config: QueryConfig, emitter: EmbeddingEmitter, temperature: f32) -> Result<Self> {
        let patterns = PatternClassifier::new(config.pattern_confidence)?;
        Ok(Self {
            config,
            emitter,
            patterns,
            temperature,
        })
    }

    pub async fn process(&self, query: &str) -> ProcessedQuery {
        let intent = self.classify_intent(query).await;
        let (expanded, synonyms) = self.expand_query(query, Some(&intent)).await;
        let search_terms = extract_search_terms(&expanded);
        let boost_factors = compute_boosts(Some(&intent), &synonyms, &self.config);

        debug!(
            intent = %intent.intent_type,
            confidence = intent.confidence,
            expansions = synonyms.len(),
            "Processed query"
        );

        ProcessedQuery {
            original: query.to_string(),
            expanded,
            intent: Some(intent),
            synonyms,
            search_terms,
            boost_factors,
        }
    }

    /// Pattern match first; a confident match is returned as-is.
    /// Otherwise ask the generation service and merge both results.
    pub async fn classify_intent(&self, query: &str) -> QueryIntent {
        let pattern = self.patterns.classify(query);
        if let Some(p) = &pattern {
            if p.confidence > self.config.intent_confidence_threshold {
                return p.clone();
            }
        }

        let prompt = intent::classification_prompt(query);
        match self
            .emitter
            .generate(&prompt, CLASSIFY_MAX_TOKENS, self.temperature)
            .await
        {
            Ok(generation) => {
                let inferred =
                    intent::parse_classification(&generation.text, query, self.config.default_confidence);
                intent::merge(pattern, inferred)
            }
            Err(e) => {
                warn!(error = %e, "Intent classification unavailable, using patterns only");
                pattern.unwrap_or_else(|| intent::catch_all(query))
            }
        }
    }

    /// Returns the expanded query string and the added terms.
    pub async fn expand_query(
        &self,
        query: &str,
        intent: Option<&QueryIntent>,
    ) -> (String, Vec<String>) {
        let mut collector = TermCollector::new(query, self.config.max_expansion_terms);
        expand::collect_static_terms(&mut collector, query, intent.map(|i| i.intent_type));

        if self.config.generated_terms && !collector.is_full() {
            let prompt = expand::related_terms_prompt(query);
            match self
                .emitter
                .generate(&prompt, RELATED_TERMS_MAX_TOKENS, self.temperature)
                .await
            {
                Ok(generation) => {
                    for term in expand::parse_related_terms(&generation.text) {
                        collector.push(&term);
                    }
                }
                Err(e) => warn!(error = %e, "Related-term generation failed, skipping"),
            }
        }

        let terms = collector.into_terms();
        (expand::join_expanded(query, &terms), terms)
    }
}
