//! Monthly usage ledger.
//!
//! Tracks how many items were persisted per calendar month (UTC) against the
//! configured cap. The ledger is best-effort: a missing or corrupt file reads
//! as empty history, which at worst allows over-collection.
//!
//! ```json
//! {
//!   "2025-11": { "retrieved": 120, "cap": 1500 }
//! }
//! ```
//!
//! Writes replace the whole file via a temp file and rename. Concurrent
//! writers against the same path are not supported.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::store::write_atomic;

/// Usage within one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePeriod {
    #[serde(default)]
    pub retrieved: u64,
    pub cap: u64,
}

/// Period key → usage. Serialized as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageLedger {
    pub periods: BTreeMap<String, UsagePeriod>,
}

impl UsageLedger {
    pub fn retrieved_in(&self, period: &str) -> u64 {
        self.periods.get(period).map(|p| p.retrieved).unwrap_or(0)
    }
}

/// Calendar-month key (`YYYY-MM`) for an instant.
pub fn period_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// File-backed ledger.
#[derive(Debug, Clone)]
pub struct UsageStore {
    path: PathBuf,
}

impl UsageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the ledger. Never fails: absence and corruption both give an
    /// empty ledger.
    pub fn load(&self) -> UsageLedger {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return UsageLedger::default(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Usage ledger unreadable, treating as empty");
                return UsageLedger::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(ledger) => ledger,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Usage ledger corrupt, treating as empty");
                UsageLedger::default()
            }
        }
    }

    pub fn remaining_quota(&self, cap: u64) -> u64 {
        self.remaining_quota_at(cap, Utc::now())
    }

    pub fn remaining_quota_at(&self, cap: u64, now: DateTime<Utc>) -> u64 {
        let used = self.load().retrieved_in(&period_key(now));
        cap.saturating_sub(used)
    }

    pub fn record_usage(&self, count: u64, cap: u64) -> Result<()> {
        self.record_usage_at(count, cap, Utc::now())
    }

    /// Add `count` to the period containing `now` and overwrite its cap.
    pub fn record_usage_at(&self, count: u64, cap: u64, now: DateTime<Utc>) -> Result<()> {
        let mut ledger = self.load();
        let key = period_key(now);
        let period = ledger
            .periods
            .entry(key.clone())
            .or_insert(UsagePeriod { retrieved: 0, cap });
        period.retrieved = period.retrieved.saturating_add(count);
        period.cap = cap;
        let retrieved = period.retrieved;

        let json = serde_json::to_string_pretty(&ledger)?;
        write_atomic(&self.path, json.as_bytes())
            .with_context(|| format!("Failed to write usage ledger: {}", self.path.display()))?;

        tracing::debug!(period = %key, added = count, retrieved, cap, "Usage recorded");
        Ok(())
    }

    /// The current month's entry, if any.
    pub fn current_period(&self) -> Option<(String, UsagePeriod)> {
        let key = period_key(Utc::now());
        self.load().periods.get(&key).map(|p| (key, *p))
    }
}
