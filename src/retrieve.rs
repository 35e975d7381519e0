//! Paginated retrieval against a [`SearchBackend`].
//!
//! One session is a strict sequential loop: page N+1 cannot be requested
//! before page N's continuation token is known.
//!
//! ```text
//! START ──▶ FETCHING ──┬──▶ FETCHING (next token, under limit)
//!                      ├──▶ EXHAUSTED (empty page or no next token)
//!                      ├──▶ CAPPED (collected >= total limit)
//!                      ├──▶ SINGLE_PAGE (pagination disabled)
//!                      └──▶ ERRORED (backend error)
//! ```
//!
//! Every terminal state returns what was collected so far; earlier pages
//! stay valid when a later fetch fails. No retry happens here.
//!
//! A page with zero hits is taken to mean the window is exhausted, even if
//! the backend also returned a continuation token. This has not been checked
//! against the search API's documented behaviour.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::backend::SearchBackend;
use crate::config::MAX_PAGE_SIZE;
use crate::models::{
    AuthorProfile, CountEstimate, RawPost, Record, SearchRequest, TimeWindow,
};
use crate::progress::{HarvestProgressEvent, HarvestProgressReporter};

/// Inputs for one retrieval session.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub query: String,
    /// Requested hits per page; clamped to [`MAX_PAGE_SIZE`].
    pub page_size: u32,
    /// Follow continuation tokens. When false, exactly one page is fetched.
    pub paginate: bool,
    /// Stop paginating once this many records are collected.
    pub total_limit: u64,
    pub window: Option<TimeWindow>,
    /// Only return posts with an identifier above this one.
    pub since_id: Option<String>,
}

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminalReason {
    Exhausted,
    Capped,
    SinglePage,
    Errored { message: String },
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Exhausted => write!(f, "exhausted"),
            TerminalReason::Capped => write!(f, "capped"),
            TerminalReason::SinglePage => write!(f, "single page"),
            TerminalReason::Errored { message } => write!(f, "errored: {}", message),
        }
    }
}

/// Metadata describing a finished session. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalSession {
    pub backend: String,
    pub query: String,
    pub page_size: u32,
    pub paginate: bool,
    pub total_limit: u64,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub since_id: Option<String>,
    pub pages: u32,
    pub collected: usize,
    pub next_token: Option<String>,
    pub estimate: CountEstimate,
    pub terminal: TerminalReason,
}

/// Records collected by a session plus its metadata.
///
/// `records` may contain the same identifier more than once when pages
/// overlap; the store resolves duplicates.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub records: Vec<Record>,
    pub session: RetrievalSession,
}

/// Clamp a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn clamp_page_size(requested: u32) -> u32 {
    requested.clamp(1, MAX_PAGE_SIZE)
}

/// Run one retrieval session.
pub fn retrieve(
    backend: &dyn SearchBackend,
    params: &RetrievalParams,
    progress: &dyn HarvestProgressReporter,
) -> Retrieval {
    let estimate = backend.estimate_count(&params.query);
    match &estimate {
        CountEstimate::Supported { total_estimated } => {
            tracing::info!(query = %params.query, total_estimated, "Count estimate")
        }
        CountEstimate::Unsupported { reason } => {
            tracing::info!(query = %params.query, %reason, "Count estimate unavailable, using pagination")
        }
    }
    progress.report(HarvestProgressEvent::Estimated {
        query: params.query.clone(),
        estimate: match &estimate {
            CountEstimate::Supported { total_estimated } => Some(*total_estimated),
            CountEstimate::Unsupported { .. } => None,
        },
    });

    let page_size = clamp_page_size(params.page_size);
    let mut collected: Vec<Record> = Vec::new();
    let mut pages: u32 = 0;
    let mut next_token: Option<String> = None;

    let terminal = loop {
        let request = SearchRequest {
            query: params.query.clone(),
            page_size,
            next_token: next_token.clone(),
            window: params.window,
            since_id: params.since_id.clone(),
        };

        let page = match backend.search(&request) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(backend = backend.name(), pages, error = %e, "Search failed, stopping session");
                break TerminalReason::Errored {
                    message: e.to_string(),
                };
            }
        };

        if page.posts.is_empty() {
            tracing::info!(pages, "Page returned no data");
            break TerminalReason::Exhausted;
        }

        pages += 1;
        let page_items = page.posts.len();
        let authors: HashMap<&str, &AuthorProfile> =
            page.authors.iter().map(|a| (a.id.as_str(), a)).collect();
        collected.extend(page.posts.iter().map(|post| to_record(post, &authors)));
        next_token = page.next_token.clone();

        tracing::info!(page = pages, page_items, collected = collected.len(), "Fetched page");
        progress.report(HarvestProgressEvent::Page {
            page: pages,
            page_items,
            collected: collected.len(),
        });

        if !params.paginate {
            break TerminalReason::SinglePage;
        }
        if next_token.is_none() {
            tracing::info!("No more pages");
            break TerminalReason::Exhausted;
        }
        if collected.len() as u64 >= params.total_limit {
            tracing::info!(total_limit = params.total_limit, "Reached total limit");
            break TerminalReason::Capped;
        }
    };

    progress.report(HarvestProgressEvent::Finished {
        terminal: terminal.to_string(),
        collected: collected.len(),
    });

    let session = RetrievalSession {
        backend: backend.name().to_string(),
        query: params.query.clone(),
        page_size,
        paginate: params.paginate,
        total_limit: params.total_limit,
        window_start: params.window.map(|w| w.start),
        window_end: params.window.map(|w| w.end),
        since_id: params.since_id.clone(),
        pages,
        collected: collected.len(),
        next_token,
        estimate,
        terminal,
    };

    Retrieval {
        records: collected,
        session,
    }
}

/// Map a search hit to a table row, joining the author profile by id.
pub fn to_record(post: &RawPost, authors: &HashMap<&str, &AuthorProfile>) -> Record {
    let author = post
        .author_id
        .as_deref()
        .and_then(|id| authors.get(id).copied());
    let metrics = post.metrics.clone().unwrap_or_default();

    Record {
        tweet_id: post.id.clone(),
        text: flatten_text(post.text.as_deref().unwrap_or_default()),
        created_at: post.created_at.clone(),
        author_id: post.author_id.clone(),
        author_username: author.and_then(|a| a.username.clone()),
        author_name: author.and_then(|a| a.name.clone()),
        author_verified: author.and_then(|a| a.verified),
        retweet_count: metrics.retweet_count,
        reply_count: metrics.reply_count,
        like_count: metrics.like_count,
        quote_count: metrics.quote_count,
        language: post.lang.clone(),
    }
}

/// Replace line breaks with spaces and trim.
pub fn flatten_text(text: &str) -> String {
    text.replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HarvestError, Result};
    use crate::models::{EngagementCounts, SearchPage};
    use crate::progress::NoProgress;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct ScriptedBackend {
        pages: RefCell<VecDeque<std::result::Result<SearchPage, String>>>,
        requests: RefCell<Vec<SearchRequest>>,
        estimate: CountEstimate,
    }

    impl ScriptedBackend {
        fn new(pages: Vec<std::result::Result<SearchPage, String>>) -> Self {
            Self {
                pages: RefCell::new(pages.into()),
                requests: RefCell::new(Vec::new()),
                estimate: CountEstimate::unsupported("not on this tier"),
            }
        }
    }

    impl SearchBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
            self.requests.borrow_mut().push(request.clone());
            match self.pages.borrow_mut().pop_front() {
                Some(Ok(page)) => Ok(page),
                Some(Err(msg)) => Err(HarvestError::Network(msg)),
                None => Ok(SearchPage::default()),
            }
        }

        fn estimate_count(&self, _query: &str) -> CountEstimate {
            self.estimate.clone()
        }
    }

    fn post(id: &str) -> RawPost {
        RawPost {
            id: id.to_string(),
            text: Some(format!("post {}", id)),
            created_at: Some("2025-11-01T10:00:00.000Z".to_string()),
            author_id: Some("u1".to_string()),
            metrics: None,
            lang: Some("pt".to_string()),
        }
    }

    fn page(ids: &[&str], next: Option<&str>) -> std::result::Result<SearchPage, String> {
        Ok(SearchPage {
            posts: ids.iter().map(|id| post(id)).collect(),
            authors: Vec::new(),
            next_token: next.map(str::to_string),
        })
    }

    fn params(paginate: bool, total_limit: u64) -> RetrievalParams {
        RetrievalParams {
            query: "COPASA".to_string(),
            page_size: 100,
            paginate,
            total_limit,
            window: None,
            since_id: None,
        }
    }

    #[test]
    fn page_size_is_capped_at_ceiling() {
        let backend = ScriptedBackend::new(vec![page(&["1"], Some("t1")), page(&["2"], None)]);
        let mut p = params(true, 1000);
        p.page_size = 500;
        let retrieval = retrieve(&backend, &p, &NoProgress);

        assert_eq!(retrieval.session.page_size, 100);
        let requests = backend.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.page_size <= 100));
    }

    #[test]
    fn follows_tokens_until_no_next_token() {
        let backend = ScriptedBackend::new(vec![
            page(&["1", "2"], Some("t1")),
            page(&["3"], Some("t2")),
            page(&["4"], None),
        ]);
        let retrieval = retrieve(&backend, &params(true, 1000), &NoProgress);

        assert_eq!(retrieval.session.terminal, TerminalReason::Exhausted);
        assert_eq!(retrieval.session.pages, 3);
        assert_eq!(retrieval.records.len(), 4);

        let tokens: Vec<Option<String>> = backend
            .requests
            .borrow()
            .iter()
            .map(|r| r.next_token.clone())
            .collect();
        assert_eq!(
            tokens,
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[test]
    fn empty_page_means_exhausted() {
        let backend = ScriptedBackend::new(vec![
            page(&["1"], Some("t1")),
            Ok(SearchPage {
                next_token: Some("t2".to_string()),
                ..SearchPage::default()
            }),
        ]);
        let retrieval = retrieve(&backend, &params(true, 1000), &NoProgress);

        assert_eq!(retrieval.session.terminal, TerminalReason::Exhausted);
        assert_eq!(retrieval.session.pages, 1);
        assert_eq!(retrieval.records.len(), 1);
        assert_eq!(backend.requests.borrow().len(), 2);
    }

    #[test]
    fn stops_at_total_limit() {
        let backend = ScriptedBackend::new(vec![
            page(&["1", "2"], Some("t1")),
            page(&["3", "4"], Some("t2")),
            page(&["5", "6"], Some("t3")),
        ]);
        let retrieval = retrieve(&backend, &params(true, 3), &NoProgress);

        assert_eq!(retrieval.session.terminal, TerminalReason::Capped);
        assert_eq!(retrieval.session.pages, 2);
        assert_eq!(retrieval.records.len(), 4);
        assert_eq!(retrieval.session.next_token.as_deref(), Some("t2"));
    }

    #[test]
    fn single_page_when_not_paginating() {
        let backend = ScriptedBackend::new(vec![page(&["1"], Some("t1")), page(&["2"], None)]);
        let retrieval = retrieve(&backend, &params(false, 1000), &NoProgress);

        assert_eq!(retrieval.session.terminal, TerminalReason::SinglePage);
        assert_eq!(backend.requests.borrow().len(), 1);
        assert_eq!(retrieval.records.len(), 1);
    }

    #[test]
    fn error_keeps_earlier_pages() {
        let backend = ScriptedBackend::new(vec![
            page(&["1", "2"], Some("t1")),
            Err("connection reset".to_string()),
        ]);
        let retrieval = retrieve(&backend, &params(true, 1000), &NoProgress);

        assert!(matches!(
            retrieval.session.terminal,
            TerminalReason::Errored { ref message } if message.contains("connection reset")
        ));
        assert_eq!(retrieval.session.pages, 1);
        assert_eq!(retrieval.records.len(), 2);
    }

    #[test]
    fn error_on_first_page_yields_nothing() {
        let backend = ScriptedBackend::new(vec![Err("503".to_string())]);
        let retrieval = retrieve(&backend, &params(true, 1000), &NoProgress);

        assert!(matches!(
            retrieval.session.terminal,
            TerminalReason::Errored { .. }
        ));
        assert_eq!(retrieval.session.pages, 0);
        assert!(retrieval.records.is_empty());
    }

    #[test]
    fn unsupported_estimate_does_not_affect_control_flow() {
        let backend = ScriptedBackend::new(vec![page(&["1"], None)]);
        let retrieval = retrieve(&backend, &params(true, 1000), &NoProgress);
        assert!(matches!(
            retrieval.session.estimate,
            CountEstimate::Unsupported { .. }
        ));
        assert_eq!(retrieval.records.len(), 1);
    }

    struct RecordingProgress {
        events: RefCell<Vec<HarvestProgressEvent>>,
    }

    impl HarvestProgressReporter for RecordingProgress {
        fn report(&self, event: HarvestProgressEvent) {
            self.events.borrow_mut().push(event);
        }
    }

    #[test]
    fn supported_estimate_reaches_session_and_progress() {
        let mut backend = ScriptedBackend::new(vec![page(&["1", "2"], None)]);
        backend.estimate = CountEstimate::Supported {
            total_estimated: 1234,
        };
        let progress = RecordingProgress {
            events: RefCell::new(Vec::new()),
        };
        let retrieval = retrieve(&backend, &params(true, 1000), &progress);

        assert_eq!(
            retrieval.session.estimate,
            CountEstimate::Supported {
                total_estimated: 1234
            }
        );
        assert_eq!(retrieval.session.terminal, TerminalReason::Exhausted);
        assert_eq!(retrieval.records.len(), 2);

        let events = progress.events.borrow();
        assert!(matches!(
            &events[0],
            HarvestProgressEvent::Estimated { query, estimate: Some(1234) } if query == "COPASA"
        ));
        assert!(matches!(
            events[1],
            HarvestProgressEvent::Page {
                page: 1,
                page_items: 2,
                collected: 2
            }
        ));
        assert!(matches!(
            &events[2],
            HarvestProgressEvent::Finished { terminal, collected: 2 } if terminal == "exhausted"
        ));
    }

    #[test]
    fn passes_window_and_since_id() {
        let backend = ScriptedBackend::new(vec![page(&["1"], None)]);
        let end = Utc::now();
        let window = TimeWindow {
            start: end - chrono::Duration::days(7),
            end,
        };
        let mut p = params(true, 1000);
        p.window = Some(window);
        p.since_id = Some("100".to_string());
        let retrieval = retrieve(&backend, &p, &NoProgress);

        let requests = backend.requests.borrow();
        assert_eq!(requests[0].window, Some(window));
        assert_eq!(requests[0].since_id.as_deref(), Some("100"));
        assert_eq!(retrieval.session.window_end, Some(end));
    }

    #[test]
    fn maps_author_profile_and_metrics() {
        let author = AuthorProfile {
            id: "u1".to_string(),
            username: Some("maria".to_string()),
            name: Some("Maria".to_string()),
            verified: Some(false),
        };
        let authors: HashMap<&str, &AuthorProfile> = [("u1", &author)].into_iter().collect();
        let mut raw = post("9");
        raw.text = Some("  linha um\nlinha dois\r\nfim \n".to_string());
        raw.metrics = Some(EngagementCounts {
            retweet_count: Some(1),
            reply_count: Some(2),
            like_count: Some(3),
            quote_count: Some(4),
        });

        let record = to_record(&raw, &authors);
        assert_eq!(record.text, "linha um linha dois fim");
        assert_eq!(record.author_username.as_deref(), Some("maria"));
        assert_eq!(record.author_verified, Some(false));
        assert_eq!(record.like_count, Some(3));
        assert_eq!(record.quote_count, Some(4));
    }

    #[test]
    fn missing_author_and_fields_map_to_unknown() {
        let authors = HashMap::new();
        let raw = RawPost {
            id: "5".to_string(),
            ..RawPost::default()
        };
        let record = to_record(&raw, &authors);
        assert_eq!(record.tweet_id, "5");
        assert_eq!(record.text, "");
        assert_eq!(record.author_username, None);
        assert_eq!(record.author_name, None);
        assert_eq!(record.author_verified, None);
        assert_eq!(record.like_count, None);
        assert_eq!(record.created_at, None);
    }
}
