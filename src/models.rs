//! Core data models used throughout the harvester.
//!
//! [`RawPost`] and [`AuthorProfile`] are what a search backend hands back;
//! [`Record`] is the flat row persisted in the record table.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Engagement counters as reported by the search API at fetch time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngagementCounts {
    pub retweet_count: Option<u64>,
    pub reply_count: Option<u64>,
    pub like_count: Option<u64>,
    pub quote_count: Option<u64>,
}

/// A single search hit before mapping to a [`Record`].
#[derive(Debug, Clone, Default)]
pub struct RawPost {
    pub id: String,
    pub text: Option<String>,
    pub created_at: Option<String>,
    pub author_id: Option<String>,
    pub metrics: Option<EngagementCounts>,
    pub lang: Option<String>,
}

/// Author profile delivered alongside a page of hits.
#[derive(Debug, Clone, Default)]
pub struct AuthorProfile {
    pub id: String,
    pub username: Option<String>,
    pub name: Option<String>,
    pub verified: Option<bool>,
}

/// One page returned by a search backend.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub posts: Vec<RawPost>,
    pub authors: Vec<AuthorProfile>,
    pub next_token: Option<String>,
}

/// Creation-time range a fetch is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Parameters of one bounded fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub page_size: u32,
    pub next_token: Option<String>,
    pub window: Option<TimeWindow>,
    pub since_id: Option<String>,
}

/// Result of the optional count-estimation capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CountEstimate {
    Supported { total_estimated: u64 },
    Unsupported { reason: String },
}

impl CountEstimate {
    pub fn unsupported(reason: impl Into<String>) -> Self {
        CountEstimate::Unsupported {
            reason: reason.into(),
        }
    }
}

/// One harvested post, as stored in the record table.
///
/// Field order is the column order of the CSV file. `None` means the value
/// was not delivered by the API and is written as an empty cell.
///
/// Reading is lenient about the spellings other CSV writers use for the
/// typed columns: `True`/`False` for flags and `5.0` for counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub tweet_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub author_username: Option<String>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    pub author_verified: Option<bool>,
    #[serde(default, deserialize_with = "de_count")]
    pub retweet_count: Option<u64>,
    #[serde(default, deserialize_with = "de_count")]
    pub reply_count: Option<u64>,
    #[serde(default, deserialize_with = "de_count")]
    pub like_count: Option<u64>,
    #[serde(default, deserialize_with = "de_count")]
    pub quote_count: Option<u64>,
    #[serde(default)]
    pub language: Option<String>,
}

impl Record {
    /// Parse `created_at` for ordering.
    ///
    /// Accepts RFC 3339 (what the API returns) and the space-separated form
    /// `YYYY-MM-DD HH:MM:SS[+zz:zz]` found in tables written by other tools.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        let raw = self.created_at.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

fn de_flag<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<bool>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    let Some(raw) = raw else { return Ok(None) };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" | "1" => Ok(Some(true)),
        "false" | "0" => Ok(Some(false)),
        _ => Err(serde::de::Error::custom(format!(
            "invalid boolean '{}'",
            raw
        ))),
    }
}

fn de_count<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u64>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    let Some(raw) = raw else { return Ok(None) };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(n) = trimmed.parse::<u64>() {
        return Ok(Some(n));
    }
    // Integral floats, as written by tools that store counters as f64.
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
            Ok(Some(f as u64))
        }
        _ => Err(serde::de::Error::custom(format!(
            "invalid count '{}'",
            raw
        ))),
    }
}
