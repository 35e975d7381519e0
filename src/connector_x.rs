//! X (Twitter) API v2 search backend.
//!
//! Implements [`SearchBackend`] over the recent-search endpoints with a
//! blocking HTTP client:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | [`search`](SearchBackend::search) | `GET /2/tweets/search/recent` |
//! | [`estimate_count`](SearchBackend::estimate_count) | `GET /2/tweets/counts/recent` |
//!
//! # Configuration
//!
//! ```toml
//! [api]
//! base_url = "https://api.twitter.com"
//! timeout_secs = 30
//! wait_on_rate_limit = true
//! max_rate_limit_retries = 3
//! max_rate_limit_wait_secs = 900
//! ```
//!
//! # Environment Variables
//!
//! - `X_BEARER_TOKEN`: required (app-only bearer token)
//!
//! # Rate limits
//!
//! On HTTP 429 the client sleeps until the `x-rate-limit-reset` instant
//! (60 s when the header is missing, never more than
//! `max_rate_limit_wait_secs`) and retries, up to `max_rate_limit_retries`
//! times. With `wait_on_rate_limit = false` a 429 is returned immediately
//! as [`HarvestError::RateLimited`].
//!
//! # Counts endpoint
//!
//! The counts endpoint is not available on every access tier. Any failure
//! there is reported as [`CountEstimate::Unsupported`].

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::backend::SearchBackend;
use crate::config::ApiConfig;
use crate::error::{HarvestError, Result};
use crate::models::{
    AuthorProfile, CountEstimate, EngagementCounts, RawPost, SearchPage, SearchRequest,
    TimeWindow,
};

const SEARCH_PATH: &str = "/2/tweets/search/recent";
const COUNTS_PATH: &str = "/2/tweets/counts/recent";

const TWEET_FIELDS: &str = "created_at,public_metrics,author_id,lang";
const USER_FIELDS: &str = "username,name,verified";

/// The endpoint rejects fewer than 10 results per page.
const MIN_PAGE_SIZE: u32 = 10;

/// `end_time` must be at least this far in the past.
const END_TIME_MARGIN_SECS: i64 = 10;

/// How far back the recent-search endpoint reaches.
const RECENT_SEARCH_DAYS: i64 = 7;

pub struct XApiClient {
    client: reqwest::blocking::Client,
    token: String,
    config: ApiConfig,
}

impl XApiClient {
    pub fn new(token: String, config: &ApiConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            token,
            config: config.clone(),
        })
    }

    /// Build a client with the bearer token from `X_BEARER_TOKEN`.
    pub fn from_env(config: &ApiConfig) -> Result<Self> {
        let token = std::env::var("X_BEARER_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                HarvestError::MissingCredentials(
                    "X_BEARER_TOKEN environment variable not set".to_string(),
                )
            })?;
        Self::new(token, config)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        let mut waits = 0u32;

        loop {
            tracing::debug!(%url, "GET");
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .query(params)
                .send()?;

            let status = resp.status();
            if status.as_u16() == 429 {
                let reset_at = resp
                    .headers()
                    .get("x-rate-limit-reset")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<i64>().ok());

                if !self.config.wait_on_rate_limit || waits >= self.config.max_rate_limit_retries {
                    return Err(HarvestError::RateLimited { reset_at });
                }

                let wait = rate_limit_wait(
                    reset_at,
                    Utc::now().timestamp(),
                    self.config.max_rate_limit_wait_secs,
                );
                tracing::warn!(wait_secs = wait.as_secs(), attempt = waits + 1, "Rate limited, waiting");
                std::thread::sleep(wait);
                waits += 1;
                continue;
            }

            if !status.is_success() {
                let body = resp.text().unwrap_or_default();
                return Err(HarvestError::Api {
                    status: status.as_u16(),
                    message: body.chars().take(500).collect(),
                });
            }

            let body = resp.text()?;
            return Ok(serde_json::from_str(&body)?);
        }
    }
}

impl SearchBackend for XApiClient {
    fn name(&self) -> &str {
        "x"
    }

    fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        let params = search_params(request, Utc::now());
        let resp: SearchResponse = self.get_json(SEARCH_PATH, &params)?;
        Ok(resp.into_page())
    }

    fn estimate_count(&self, query: &str) -> CountEstimate {
        let params = vec![
            ("query", query.to_string()),
            ("granularity", "day".to_string()),
        ];
        match self.get_json::<CountsResponse>(COUNTS_PATH, &params) {
            Ok(resp) => CountEstimate::Supported {
                total_estimated: resp.total(),
            },
            Err(e) => CountEstimate::unsupported(e.to_string()),
        }
    }
}

/// Query parameters for one search request.
fn search_params(request: &SearchRequest, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("query", request.query.clone()),
        (
            "max_results",
            request.page_size.max(MIN_PAGE_SIZE).to_string(),
        ),
        ("tweet.fields", TWEET_FIELDS.to_string()),
        ("expansions", "author_id".to_string()),
        ("user.fields", USER_FIELDS.to_string()),
    ];

    if let Some(ref token) = request.next_token {
        params.push(("next_token", token.clone()));
    }
    if let Some(window) = request.window {
        let window = clamp_window(window, now);
        params.push(("start_time", format_time(window.start)));
        params.push(("end_time", format_time(window.end)));
    }
    if let Some(ref since_id) = request.since_id {
        params.push(("since_id", since_id.clone()));
    }

    params
}

/// Fit a window into the range the endpoint accepts at `now`.
fn clamp_window(window: TimeWindow, now: DateTime<Utc>) -> TimeWindow {
    let latest_end = now - Duration::seconds(END_TIME_MARGIN_SECS);
    let earliest_start = now - Duration::days(RECENT_SEARCH_DAYS) + Duration::minutes(1);

    let end = window.end.min(latest_end);
    let start = window.start.max(earliest_start).min(end - Duration::seconds(1));
    TimeWindow { start, end }
}

fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// How long to sleep after a 429.
fn rate_limit_wait(reset_at: Option<i64>, now: i64, max_wait_secs: u64) -> std::time::Duration {
    let secs = match reset_at {
        Some(reset) => (reset - now).max(0) as u64 + 1,
        None => 60,
    };
    std::time::Duration::from_secs(secs.min(max_wait_secs))
}

// ============ Response types ============

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<ApiTweet>,
    #[serde(default)]
    includes: Option<Includes>,
    #[serde(default)]
    meta: Option<SearchMeta>,
}

#[derive(Debug, Deserialize)]
struct ApiTweet {
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    public_metrics: Option<PublicMetrics>,
    #[serde(default)]
    lang: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    retweet_count: Option<u64>,
    #[serde(default)]
    reply_count: Option<u64>,
    #[serde(default)]
    like_count: Option<u64>,
    #[serde(default)]
    quote_count: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<ApiUser>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    verified: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SearchMeta {
    #[serde(default)]
    next_token: Option<String>,
}

impl SearchResponse {
    fn into_page(self) -> SearchPage {
        let posts = self
            .data
            .into_iter()
            .map(|t| RawPost {
                id: t.id,
                text: t.text,
                created_at: t.created_at,
                author_id: t.author_id,
                metrics: t.public_metrics.map(|m| EngagementCounts {
                    retweet_count: m.retweet_count,
                    reply_count: m.reply_count,
                    like_count: m.like_count,
                    quote_count: m.quote_count,
                }),
                lang: t.lang,
            })
            .collect();

        let authors = self
            .includes
            .unwrap_or_default()
            .users
            .into_iter()
            .map(|u| AuthorProfile {
                id: u.id,
                username: u.username,
                name: u.name,
                verified: u.verified,
            })
            .collect();

        SearchPage {
            posts,
            authors,
            next_token: self.meta.and_then(|m| m.next_token),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CountsResponse {
    #[serde(default)]
    data: Vec<CountBucket>,
}

#[derive(Debug, Deserialize)]
struct CountBucket {
    #[serde(default)]
    tweet_count: u64,
}

impl CountsResponse {
    fn total(&self) -> u64 {
        self.data.iter().map(|b| b.tweet_count).sum()
    }
}
