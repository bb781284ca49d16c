//! Prompt context assembly from retrieved hits.
//!
//! Intent-specific formatters live in a lookup table keyed by
//! [`IntentType`]; anything without an entry (including `General`) goes
//! through the bucketed general formatter.

use std::fmt::Write as _;

use crate::config::RetrievalConfig;
use crate::models::{IntentType, QueryIntent, SearchHit};

struct IntentFormatter {
    intent: IntentType,
    heading: &'static str,
    guidance: &'static str,
}

const INTENT_FORMATTERS: &[IntentFormatter] = &[
    IntentFormatter {
        intent: IntentType::Navigation,
        heading: "Navigation keybindings",
        guidance: "Prefer bindings that move the view or jump to a location.",
    },
    IntentFormatter {
        intent: IntentType::Editing,
        heading: "Editing keybindings",
        guidance: "Prefer bindings that modify text directly, and note the mode they run in.",
    },
    IntentFormatter {
        intent: IntentType::Visual,
        heading: "Selection keybindings",
        guidance: "Prefer bindings that start or act on a visual selection.",
    },
    IntentFormatter {
        intent: IntentType::Search,
        heading: "Search keybindings",
        guidance: "Prefer bindings that search, match or replace patterns.",
    },
    IntentFormatter {
        intent: IntentType::Window,
        heading: "Window keybindings",
        guidance: "Prefer bindings that create, move between or resize windows.",
    },
    IntentFormatter {
        intent: IntentType::Buffer,
        heading: "Buffer keybindings",
        guidance: "Prefer bindings that open, switch, save or close buffers.",
    },
    IntentFormatter {
        intent: IntentType::Command,
        heading: "Command keybindings",
        guidance: "Prefer bindings that run ex commands or command-line actions.",
    },
    IntentFormatter {
        intent: IntentType::Motion,
        heading: "Motion keybindings",
        guidance: "Prefer cursor motions and text objects.",
    },
    IntentFormatter {
        intent: IntentType::Macro,
        heading: "Macro keybindings",
        guidance: "Prefer bindings that record, replay or edit macros and registers.",
    },
];

fn formatter_for(intent: IntentType) -> Option<&'static IntentFormatter> {
    INTENT_FORMATTERS.iter().find(|f| f.intent == intent)
}

fn push_keybinding(out: &mut String, index: usize, hit: &SearchHit) {
    let doc = &hit.document;
    let _ = write!(
        out,
        "{}. Keys: {} | Command: {} | Mode: {}",
        index,
        doc.meta_or_empty("keys"),
        doc.meta_or_empty("command"),
        doc.meta_or_empty("mode"),
    );
    if let Some(desc) = doc.meta("description").filter(|d| !d.is_empty()) {
        let _ = write!(out, " | Description: {}", desc);
    }
    if let Some(plugin) = doc.meta("plugin").filter(|p| !p.is_empty()) {
        let _ = write!(out, " | Plugin: {}", plugin);
    }
    let _ = writeln!(out, " | Similarity: {:.2}", hit.score);
}

fn push_knowledge(out: &mut String, index: usize, hit: &SearchHit) {
    let _ = writeln!(out, "{}. {}", index, hit.document.content);
}

/// Cut `text` to at most `max_chars` characters, ending in `...` when cut.
pub fn truncate_context(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Render the context block for the generation prompt.
pub fn build_context(
    query: &str,
    intent: Option<&QueryIntent>,
    hits: &[SearchHit],
    config: &RetrievalConfig,
) -> String {
    let text = match intent.and_then(|i| formatter_for(i.intent_type)) {
        Some(formatter) => format_for_intent(formatter, query, hits, config),
        None => format_general(query, hits, config),
    };
    truncate_context(&text, config.max_context_chars)
}

fn format_for_intent(
    formatter: &IntentFormatter,
    query: &str,
    hits: &[SearchHit],
    config: &RetrievalConfig,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", formatter.heading);
    let _ = writeln!(out, "Query: \"{}\"", query);
    let _ = writeln!(out, "{}\n", formatter.guidance);
    for (i, hit) in hits.iter().take(config.intent_hits).enumerate() {
        push_keybinding(&mut out, i + 1, hit);
    }
    out
}

fn format_general(query: &str, hits: &[SearchHit], config: &RetrievalConfig) -> String {
    let mut user = Vec::new();
    let mut builtin = Vec::new();
    let mut knowledge = Vec::new();
    for hit in hits {
        if hit.document.is_user_sourced() {
            user.push(hit);
        } else if hit.document.is_builtin() {
            builtin.push(hit);
        } else {
            knowledge.push(hit);
        }
    }

    let builtin_cap = if user.is_empty() {
        config.builtin_hits
    } else {
        config.builtin_hits_reduced
    };
    let knowledge_cap = if user.is_empty() && builtin.is_empty() {
        config.knowledge_hits
    } else {
        config.knowledge_hits_reduced
    };

    let mut out = String::new();
    let _ = writeln!(out, "Query: \"{}\"", query);

    if !user.is_empty() {
        let _ = writeln!(out, "\nUser-defined mappings:");
        for (i, hit) in user.iter().take(config.user_hits).enumerate() {
            push_keybinding(&mut out, i + 1, hit);
        }
    }
    if !builtin.is_empty() && builtin_cap > 0 {
        let _ = writeln!(out, "\nBuilt-in keybindings:");
        for (i, hit) in builtin.iter().take(builtin_cap).enumerate() {
            push_keybinding(&mut out, i + 1, hit);
        }
    }
    if !knowledge.is_empty() && knowledge_cap > 0 {
        let _ = writeln!(out, "\nRelated documentation:");
        for (i, hit) in knowledge.iter().take(knowledge_cap).enumerate() {
            push_knowledge(&mut out, i + 1, hit);
        }
    }
    out
}
