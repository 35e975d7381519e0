use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::classify::TopicRules;
use crate::store::MergePolicy;

/// Hard ceiling on hits per request imposed by the search API.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_records_file")]
    pub records_file: String,
    #[serde(default = "default_usage_file")]
    pub usage_file: String,
    #[serde(default = "default_annotated_file")]
    pub annotated_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            records_file: default_records_file(),
            usage_file: default_usage_file(),
            annotated_file: default_annotated_file(),
        }
    }
}

impl StorageConfig {
    pub fn records_path(&self) -> PathBuf {
        self.output_dir.join(&self.records_file)
    }

    pub fn usage_path(&self) -> PathBuf {
        self.output_dir.join(&self.usage_file)
    }

    pub fn annotated_path(&self) -> PathBuf {
        self.output_dir.join(&self.annotated_file)
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_records_file() -> String {
    "copasa_tweets.csv".to_string()
}
fn default_usage_file() -> String {
    "usage.json".to_string()
}
fn default_annotated_file() -> String {
    "copasa_tweets_annotated.csv".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    #[serde(default = "default_monthly_cap")]
    pub monthly_cap: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            monthly_cap: default_monthly_cap(),
        }
    }
}

fn default_monthly_cap() -> u64 {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_base")]
    pub base: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub exclude_replies: bool,
    #[serde(default)]
    pub exclude_reshares: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            base: default_base(),
            language: None,
            exclude_replies: false,
            exclude_reshares: false,
        }
    }
}

fn default_base() -> String {
    "COPASA".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_paginate")]
    pub paginate: bool,
    /// Per-session item limit. Defaults to the remaining monthly quota.
    #[serde(default)]
    pub total_limit: Option<u64>,
    #[serde(default)]
    pub merge_policy: MergePolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            page_size: default_page_size(),
            paginate: default_paginate(),
            total_limit: None,
            merge_policy: MergePolicy::default(),
        }
    }
}

fn default_window_days() -> i64 {
    7
}
fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}
fn default_paginate() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_wait_on_rate_limit")]
    pub wait_on_rate_limit: bool,
    #[serde(default = "default_max_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    #[serde(default = "default_max_rate_limit_wait_secs")]
    pub max_rate_limit_wait_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            wait_on_rate_limit: default_wait_on_rate_limit(),
            max_rate_limit_retries: default_max_rate_limit_retries(),
            max_rate_limit_wait_secs: default_max_rate_limit_wait_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.twitter.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_wait_on_rate_limit() -> bool {
    true
}
fn default_max_rate_limit_retries() -> u32 {
    3
}
fn default_max_rate_limit_wait_secs() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    /// Topics that mark a post as being about the tracked subject.
    #[serde(default = "default_subject_topics")]
    pub subject_topics: Vec<String>,
    /// Replaces the built-in topic table when non-empty.
    #[serde(default)]
    pub topics: BTreeMap<String, Vec<String>>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            subject_topics: default_subject_topics(),
            topics: BTreeMap::new(),
        }
    }
}

fn default_subject_topics() -> Vec<String> {
    vec![
        "privatization".to_string(),
        "protest".to_string(),
        "politics_government".to_string(),
    ]
}

impl ClassifierConfig {
    /// Build the topic rules: the configured table, or the built-in one.
    pub fn rules(&self) -> Result<TopicRules> {
        if self.topics.is_empty() {
            Ok(TopicRules::builtin())
        } else {
            TopicRules::from_table(&self.topics).context("Invalid [classifier.topics] table")
        }
    }
}

impl Config {
    /// Apply `X_MONTHLY_CAP` and `OUTPUT_DIR` on top of file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(cap) = std::env::var("X_MONTHLY_CAP") {
            self.quota.monthly_cap = cap
                .trim()
                .parse()
                .with_context(|| format!("X_MONTHLY_CAP is not a number: '{}'", cap))?;
        }
        if let Ok(dir) = std::env::var("OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.storage.output_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }
}

/// Load and validate the config file, falling back to defaults when the
/// file does not exist.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::debug!(path = %path.display(), "Config file not found, using defaults");
        Config::default()
    };

    config.apply_env_overrides()?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.quota.monthly_cap == 0 {
        anyhow::bail!("quota.monthly_cap must be > 0");
    }

    if config.query.base.trim().is_empty() {
        anyhow::bail!("query.base must not be empty");
    }

    if config.retrieval.page_size == 0 {
        anyhow::bail!("retrieval.page_size must be > 0");
    }

    // The recent-search endpoint only reaches back seven days.
    if !(1..=7).contains(&config.retrieval.window_days) {
        anyhow::bail!("retrieval.window_days must be in [1, 7]");
    }

    if config.retrieval.total_limit == Some(0) {
        anyhow::bail!("retrieval.total_limit must be >= 1 when set");
    }

    if config.storage.records_file.trim().is_empty() {
        anyhow::bail!("storage.records_file must not be empty");
    }

    config.classifier.rules()?;

    Ok(())
}
