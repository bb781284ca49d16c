//! Retrieval agent: query → analysis → search → context → generation →
//! ranked results.
//!
//! Only the similarity search is mandatory. Query analysis that fails or
//! times out degrades to a verbatim search, and generation that fails
//! degrades to similarity-only ranking. Every call returns a
//! [`QueryResponse`]; errors are reported through its `outcome` and
//! `error` fields rather than as `Err`.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::analysis::{parse_analysis, Analysis};
use crate::config::{QueryConfig, RetrievalConfig};
use crate::embedding::EmbeddingEmitter;
use crate::error::KeysenseError;
use crate::index::VectorIndex;
use crate::models::{
    KeybindingView, ProcessedQuery, QueryOutcome, QueryResponse, RankedResult, SearchHit,
    SOURCE_BUILTIN, SOURCE_KNOWLEDGE, SOURCE_USER,
};
use crate::query::context::build_context;
use crate::query::QueryProcessor;
use crate::vectorizer::SyncGate;

pub struct RetrievalAgent {
    config: RetrievalConfig,
    search_limit: usize,
    processing_timeout: Duration,
    processor: QueryProcessor,
    index: Arc<dyn VectorIndex>,
    emitter: EmbeddingEmitter,
    gate: SyncGate,
}

impl RetrievalAgent {
    pub fn new(
        query_config: QueryConfig,
        config: RetrievalConfig,
        search_limit: usize,
        emitter: EmbeddingEmitter,
        index: Arc<dyn VectorIndex>,
        gate: SyncGate,
    ) -> anyhow::Result<Self> {
        let processing_timeout = Duration::from_secs(query_config.timeout_secs);
        let processor =
            QueryProcessor::new(query_config, emitter.clone(), config.generation_temperature)?;
        Ok(Self {
            config,
            search_limit,
            processing_timeout,
            processor,
            index,
            emitter,
            gate,
        })
    }

    pub async fn process(&self, query: &str) -> QueryResponse {
        if query.trim().is_empty() {
            return QueryResponse::empty(
                query,
                QueryOutcome::Rejected,
                KeysenseError::EmptyQuery.to_string(),
            );
        }

        let processed =
            match tokio::time::timeout(self.processing_timeout, self.processor.process(query)).await
            {
                Ok(processed) => processed,
                Err(_) => {
                    warn!(
                        timeout_secs = self.processing_timeout.as_secs(),
                        "Query analysis timed out, searching verbatim"
                    );
                    ProcessedQuery::verbatim(query)
                }
            };

        // Embed before taking the gate; only the lookup is guarded.
        let hits = match self.emitter.embed(&processed.expanded).await {
            Ok(vector) => {
                let _guard = self.gate.read().await;
                self.index.search_vector(&vector, self.search_limit).await
            }
            Err(e) => Err(e),
        };
        let hits = match hits {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Similarity search failed");
                let mut response = QueryResponse::empty(
                    query,
                    QueryOutcome::Failed,
                    "The keybinding index could not be searched.",
                );
                response.error = Some(format!("{:#}", e));
                response.processed = Some(processed);
                return response;
            }
        };

        let total = hits.len();
        let relevant: Vec<SearchHit> = hits
            .into_iter()
            .filter(|h| h.score >= self.config.similarity_threshold)
            .collect();

        if relevant.is_empty() {
            info!(hits = total, "No hits above similarity threshold");
            let mut response = QueryResponse::empty(
                query,
                QueryOutcome::NoMatches,
                format!(
                    "No keybindings matched the query with similarity of at least {:.2}.",
                    self.config.similarity_threshold
                ),
            );
            response.processed = Some(processed);
            return response;
        }

        let context = build_context(
            query,
            processed.intent.as_ref(),
            &relevant,
            &self.config,
        );
        let prompt = analysis_prompt(query, &context);

        let generated = match self
            .emitter
            .generate(
                &prompt,
                self.config.generation_max_tokens,
                self.config.generation_temperature,
            )
            .await
        {
            Ok(g) if !g.text.trim().is_empty() => Some(g.text),
            Ok(_) => {
                warn!("Generation returned no text, ranking by similarity");
                None
            }
            Err(e) => {
                warn!(error = %e, "Generation failed, ranking by similarity");
                None
            }
        };

        let (outcome, analysis) = match generated {
            Some(text) => (QueryOutcome::Answered, parse_analysis(&text)),
            None => (QueryOutcome::Degraded, Analysis::default()),
        };

        let results = rank_results(&relevant, &analysis, self.config.user_boost);

        let reasoning = if !analysis.reasoning.is_empty() {
            analysis.reasoning.clone()
        } else if outcome == QueryOutcome::Degraded {
            format!(
                "Analysis was unavailable; {} keybinding(s) ranked by similarity alone.",
                results.len()
            )
        } else {
            format!("Ranked {} keybinding(s) by similarity and analysis.", results.len())
        };

        let alternatives = if !analysis.alternatives.is_empty() {
            analysis.alternatives
        } else {
            processed
                .intent
                .as_ref()
                .map(|i| i.suggestions.clone())
                .unwrap_or_default()
        };

        info!(
            outcome = ?outcome,
            results = results.len(),
            "Query answered"
        );

        QueryResponse {
            query: query.to_string(),
            outcome,
            results,
            reasoning,
            alternatives,
            processed: Some(processed),
            error: None,
        }
    }
}

fn analysis_prompt(query: &str, context: &str) -> String {
    format!(
        "You help users find text-editor keybindings.\n\n\
         {}\n\n\
         Question: \"{}\"\n\n\
         For each keybinding above that answers the question, write:\n\
         KEYS: <keys>\n\
         COMMAND: <command>\n\
         DESCRIPTION: <what it does>\n\
         MODE: <mode>\n\
         SCORE: <relevance between 0 and 1>\n\
         EXPLANATION: <one sentence>\n\n\
         Then finish with:\n\
         REASONING: <one sentence on the overall answer>\n\
         ALTERNATIVES: <comma-separated other keys worth trying>\n",
        context,
        query.replace('"', "'")
    )
}

fn mode_name(mode: &str) -> &str {
    match mode {
        "n" => "normal",
        "i" => "insert",
        "v" | "x" => "visual",
        "s" => "select",
        "o" => "operator-pending",
        "c" => "command-line",
        "t" => "terminal",
        other => other,
    }
}

/// Explanation for a hit the analysis did not cover, e.g.
/// "`dd` (normal mode): Delete the current line; built-in, matched with similarity 0.82."
fn default_explanation(kb: &KeybindingView, score: f64) -> String {
    let mut text = format!("`{}`", kb.keys);
    if !kb.mode.is_empty() {
        text.push_str(&format!(" ({} mode)", mode_name(&kb.mode)));
    }
    let what = if kb.description.is_empty() {
        &kb.command
    } else {
        &kb.description
    };
    if !what.is_empty() {
        text.push_str(": ");
        text.push_str(what);
    }

    let mut notes = Vec::new();
    match kb.source.as_deref() {
        Some(SOURCE_USER) => notes.push("your mapping".to_string()),
        Some(SOURCE_BUILTIN) => notes.push("built-in".to_string()),
        Some(SOURCE_KNOWLEDGE) => notes.push("from documentation".to_string()),
        _ => {}
    }
    if let Some(plugin) = &kb.plugin {
        notes.push(format!("plugin {}", plugin));
    }
    notes.push(format!("matched with similarity {:.2}", score));

    format!("{}; {}.", text, notes.join(", "))
}

/// Turn hits into ranked results.
///
/// A recommendation with matching keys supplies the base relevance and
/// explanation; otherwise the similarity score is used. User-defined
/// mappings get `user_boost`. Relevance is clamped to `[0, 1]` and the
/// sort is stable, so equal relevance keeps search order.
pub fn rank_results(hits: &[SearchHit], analysis: &Analysis, user_boost: f64) -> Vec<RankedResult> {
    let mut results: Vec<RankedResult> = hits
        .iter()
        .map(|hit| {
            let keybinding = KeybindingView::from_document(&hit.document);
            let rec = analysis.recommendation_for(&keybinding.keys);

            let mut relevance = rec.and_then(|r| r.score).unwrap_or(hit.score);
            if hit.document.is_user_sourced() {
                relevance += user_boost;
            }

            let explanation = match rec.filter(|r| !r.explanation.is_empty()) {
                Some(r) => r.explanation.clone(),
                None => default_explanation(&keybinding, hit.score),
            };

            RankedResult {
                keybinding,
                relevance: relevance.clamp(0.0, 1.0),
                explanation,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(Ordering::Equal)
    });
    results
}
