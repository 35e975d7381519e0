//! Error type for the search backend and the persisted stores.
//!
//! Orchestration and CLI code uses `anyhow`; the variants here exist for
//! failures a caller has to tell apart (a transient fetch error ends a
//! session with partial results, a corrupt record table aborts the run).

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarvestError>;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by search API (reset at {reset_at:?})")]
    RateLimited { reset_at: Option<i64> },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Record table {} is unreadable: {message}", path.display())]
    CorruptStore { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<reqwest::Error> for HarvestError {
    fn from(err: reqwest::Error) -> Self {
        HarvestError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(err: serde_json::Error) -> Self {
        HarvestError::Parse(err.to_string())
    }
}
