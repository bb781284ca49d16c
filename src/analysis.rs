//! Parser for the generated analysis of retrieved keybindings.
//!
//! Expected layout, one field per line:
//!
//! ```text
//! KEYS: dd
//! COMMAND: delete line
//! DESCRIPTION: Delete the current line
//! MODE: n
//! SCORE: 0.95
//! EXPLANATION: Deletes the whole line under the cursor.
//! REASONING: ...
//! ALTERNATIVES: D, cc
//! ```
//!
//! A `KEYS:` line starts a new recommendation. Lines that match no field
//! are ignored, so any text parses; unusable text yields an empty
//! [`Analysis`].

use crate::query::intent::parse_confidence;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recommendation {
    pub keys: String,
    pub command: String,
    pub description: String,
    pub mode: String,
    pub score: Option<f64>,
    pub explanation: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub recommendations: Vec<Recommendation>,
    pub reasoning: String,
    pub alternatives: Vec<String>,
}

impl Analysis {
    /// Recommendation whose keys match `keys`, ignoring surrounding
    /// backticks and whitespace.
    pub fn recommendation_for(&self, keys: &str) -> Option<&Recommendation> {
        let wanted = clean(keys);
        if wanted.is_empty() {
            return None;
        }
        self.recommendations.iter().find(|r| clean(&r.keys) == wanted)
    }
}

fn clean(value: &str) -> &str {
    value.trim().trim_matches('`').trim()
}

pub fn parse_analysis(text: &str) -> Analysis {
    let mut analysis = Analysis::default();
    let mut current: Option<Recommendation> = None;

    for line in text.lines() {
        let line = line.trim().trim_start_matches(&['-', '*', '#', ' '][..]);
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        let key = key.trim().trim_matches('*').to_uppercase();

        match key.as_str() {
            "KEYS" | "KEY" => {
                if let Some(done) = current.take() {
                    analysis.recommendations.push(done);
                }
                current = Some(Recommendation {
                    keys: clean(value).to_string(),
                    ..Recommendation::default()
                });
            }
            "COMMAND" => {
                if let Some(r) = current.as_mut() {
                    r.command = value.to_string();
                }
            }
            "DESCRIPTION" => {
                if let Some(r) = current.as_mut() {
                    r.description = value.to_string();
                }
            }
            "MODE" => {
                if let Some(r) = current.as_mut() {
                    r.mode = value.to_string();
                }
            }
            "SCORE" | "RELEVANCE" => {
                if let Some(r) = current.as_mut() {
                    let score = parse_confidence(value, f64::NAN);
                    r.score = (!score.is_nan()).then_some(score);
                }
            }
            "EXPLANATION" => {
                if let Some(r) = current.as_mut() {
                    r.explanation = value.to_string();
                }
            }
            "REASONING" => analysis.reasoning = value.to_string(),
            "ALTERNATIVES" => {
                analysis.alternatives = value
                    .split(',')
                    .map(|a| clean(a).to_string())
                    .filter(|a| !a.is_empty() && !a.eq_ignore_ascii_case("none"))
                    .collect();
            }
            _ => {}
        }
    }

    if let Some(done) = current.take() {
        analysis.recommendations.push(done);
    }
    analysis
}
