//! Keyword topic classifier.
//!
//! A [`TopicRules`] value maps topic labels to trigger phrases. Matching is
//! case-insensitive and anchored at a word boundary on the left only, so a
//! phrase also matches longer words it prefixes (`privatiza` matches
//! `privatização`, `deputad` matches `deputada`). Phrases starting with a
//! non-word character such as `#csmg3` match anywhere.
//!
//! A text may match several topics. Text matching none gets the single
//! label [`UNCLASSIFIED`].

use anyhow::{bail, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

/// Label assigned when no topic matches.
pub const UNCLASSIFIED: &str = "other";

/// Built-in topic table.
const BUILTIN_TOPICS: &[(&str, &[&str])] = &[
    (
        "privatization",
        &[
            "privatiza",
            "privatização",
            "desestatiza",
            "vender",
            "liquidação",
            "referendo",
            "pec",
            "cal a boca",
            "cala a boca",
            "golpe",
        ],
    ),
    (
        "protest",
        &[
            "protest",
            "manifest",
            "vândal",
            "ato",
            "resistên",
            "galerias",
            "essetreménosso",
        ],
    ),
    (
        "investment_stock",
        &[
            "#csmg3",
            "ação",
            "bolsa",
            "invest",
            "dividend",
            "preço",
            "recorde de investimento",
        ],
    ),
    (
        "service_issue",
        &[
            "falta água",
            "sem água",
            "vazamento",
            "água todo dia",
            "obra",
            "agência virtual",
            "copasa digital",
            "precari",
        ],
    ),
    (
        "politics_government",
        &[
            "zema",
            "governo",
            "governador",
            "lula",
            "assembleia",
            "almg",
            "deputad",
        ],
    ),
];

#[derive(Debug, Clone)]
struct Topic {
    label: String,
    keywords: Vec<String>,
    pattern: Regex,
}

/// Immutable topic → trigger-phrase configuration.
#[derive(Debug, Clone)]
pub struct TopicRules {
    topics: Vec<Topic>,
}

impl TopicRules {
    /// The default topic table.
    pub fn builtin() -> Self {
        let topics = BUILTIN_TOPICS
            .iter()
            .map(|(label, keywords)| {
                let keywords: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
                // Escaped literals always compile.
                let pattern = compile(&keywords).expect("built-in topic patterns are valid");
                Topic {
                    label: label.to_string(),
                    keywords,
                    pattern,
                }
            })
            .collect();
        Self { topics }
    }

    /// Build and validate rules from a label → phrases table.
    pub fn from_table(table: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        if table.is_empty() {
            bail!("topic table must contain at least one topic");
        }

        let mut topics = Vec::with_capacity(table.len());
        for (label, keywords) in table {
            let label = label.trim();
            if label.is_empty() {
                bail!("topic labels must not be empty");
            }
            if label == UNCLASSIFIED {
                bail!("topic label '{}' is reserved", UNCLASSIFIED);
            }
            if keywords.is_empty() {
                bail!("topic '{}' has no keywords", label);
            }
            if keywords.iter().any(|k| k.trim().is_empty()) {
                bail!("topic '{}' has a blank keyword", label);
            }

            let keywords: Vec<String> = keywords.iter().map(|k| k.trim().to_lowercase()).collect();
            let pattern = compile(&keywords)?;
            topics.push(Topic {
                label: label.to_string(),
                keywords,
                pattern,
            });
        }

        Ok(Self { topics })
    }

    /// Topic labels in table order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(|t| t.label.as_str())
    }

    /// Trigger phrases for `label`.
    pub fn keywords(&self, label: &str) -> Option<&[String]> {
        self.topics
            .iter()
            .find(|t| t.label == label)
            .map(|t| t.keywords.as_slice())
    }

    /// Labels whose phrases occur in `text`, or `{"other"}`.
    pub fn classify(&self, text: &str) -> BTreeSet<String> {
        let lowered = text.to_lowercase();
        let mut matched: BTreeSet<String> = self
            .topics
            .iter()
            .filter(|t| t.pattern.is_match(&lowered))
            .map(|t| t.label.clone())
            .collect();

        if matched.is_empty() {
            matched.insert(UNCLASSIFIED.to_string());
        }
        matched
    }
}

impl Default for TopicRules {
    fn default() -> Self {
        Self::builtin()
    }
}

/// One alternation per topic: `(?i)(?:\bprivatiza|\bvender|#csmg3)`.
fn compile(keywords: &[String]) -> Result<Regex> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| {
            let escaped = regex::escape(&k.to_lowercase());
            let starts_with_word_char = k
                .chars()
                .next()
                .map(|c| c.is_alphanumeric() || c == '_')
                .unwrap_or(false);
            if starts_with_word_char {
                format!(r"\b{}", escaped)
            } else {
                escaped
            }
        })
        .collect();
    Ok(Regex::new(&format!("(?i)(?:{})", alternatives.join("|")))?)
}
