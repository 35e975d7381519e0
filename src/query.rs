//! Search expression builder.
//!
//! Filter clauses are appended to the base term in a fixed order:
//! reshare exclusion, reply exclusion, language. The base term is passed
//! through verbatim; the search API is responsible for rejecting malformed
//! queries.

use crate::config::QueryConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryBuilder {
    pub base: String,
    pub language: Option<String>,
    pub exclude_replies: bool,
    pub exclude_reshares: bool,
}

impl QueryBuilder {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            ..Self::default()
        }
    }

    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            base: config.base.clone(),
            language: config.language.clone(),
            exclude_replies: config.exclude_replies,
            exclude_reshares: config.exclude_reshares,
        }
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn exclude_replies(mut self, exclude: bool) -> Self {
        self.exclude_replies = exclude;
        self
    }

    pub fn exclude_reshares(mut self, exclude: bool) -> Self {
        self.exclude_reshares = exclude;
        self
    }

    pub fn build(&self) -> String {
        build_query(
            &self.base,
            self.language.as_deref(),
            self.exclude_replies,
            self.exclude_reshares,
        )
    }
}

/// Compose the query string. An empty language code counts as absent.
pub fn build_query(
    base: &str,
    language: Option<&str>,
    exclude_replies: bool,
    exclude_reshares: bool,
) -> String {
    let mut parts = vec![base.to_string()];
    if exclude_reshares {
        parts.push("-is:retweet".to_string());
    }
    if exclude_replies {
        parts.push("-is:reply".to_string());
    }
    if let Some(lang) = language.map(str::trim).filter(|l| !l.is_empty()) {
        parts.push(format!("lang:{}", lang));
    }
    parts.join(" ")
}
