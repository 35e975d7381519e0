//! End-to-end harvest sessions against a scripted search backend.

use std::cell::RefCell;
use std::collections::VecDeque;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use post_harvest::backend::SearchBackend;
use post_harvest::config::Config;
use post_harvest::error::{HarvestError, Result};
use post_harvest::harvest::{run_harvest_at, HarvestContext, HarvestOptions, HarvestReport};
use post_harvest::models::{AuthorProfile, RawPost, SearchPage, SearchRequest};
use post_harvest::progress::NoProgress;
use post_harvest::retrieve::TerminalReason;
use post_harvest::store::load_records;
use post_harvest::usage::UsageStore;

type Scripted = std::result::Result<SearchPage, String>;

struct ScriptedBackend {
    pages: RefCell<VecDeque<Scripted>>,
    requests: RefCell<Vec<SearchRequest>>,
}

impl ScriptedBackend {
    fn new(pages: Vec<Scripted>) -> Self {
        Self {
            pages: RefCell::new(pages.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.borrow().len()
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
            Some(Err(msg)) => Err(HarvestError::Api {
                status: 503,
                message: msg,
            }),
            None => Ok(SearchPage::default()),
        }
    }
}

fn post(id: &str, day: u32) -> RawPost {
    RawPost {
        id: id.to_string(),
        text: Some(format!("COPASA post {}\nsegunda linha", id)),
        created_at: Some(format!("2025-11-{:02}T10:00:00.000Z", day)),
        author_id: Some("u1".to_string()),
        metrics: None,
        lang: Some("pt".to_string()),
    }
}

fn page(posts: Vec<RawPost>, next: Option<&str>) -> Scripted {
    Ok(SearchPage {
        posts,
        authors: vec![AuthorProfile {
            id: "u1".to_string(),
            username: Some("maria".to_string()),
            name: Some("Maria".to_string()),
            verified: Some(false),
        }],
        next_token: next.map(str::to_string),
    })
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 10, 12, 0, 0).unwrap()
}

fn setup() -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.output_dir = tmp.path().join("data");
    config.quota.monthly_cap = 100;
    (tmp, config)
}

fn harvest(config: &Config, backend: &ScriptedBackend, options: &HarvestOptions) -> HarvestReport {
    let ctx = HarvestContext {
        config,
        backend,
        progress: &NoProgress,
    };
    run_harvest_at(&ctx, options, now()).unwrap()
}

fn completed(report: HarvestReport) -> (usize, post_harvest::retrieve::RetrievalSession) {
    match report {
        HarvestReport::Completed {
            newly_added,
            session,
            ..
        } => (newly_added, session),
        other => panic!("expected completed run, got {:?}", other),
    }
}

fn ledger_retrieved(config: &Config) -> u64 {
    UsageStore::new(config.storage.usage_path())
        .load()
        .retrieved_in("2025-11")
}

#[test]
fn failure_before_first_page_writes_nothing() {
    let (_tmp, config) = setup();
    let backend = ScriptedBackend::new(vec![Err("service unavailable".to_string())]);

    let (newly_added, session) = completed(harvest(&config, &backend, &HarvestOptions::default()));

    assert_eq!(newly_added, 0);
    assert!(matches!(session.terminal, TerminalReason::Errored { .. }));
    assert!(!config.storage.records_path().exists());
    assert!(!config.storage.usage_path().exists());
}

#[test]
fn failure_before_first_page_leaves_existing_ledger_alone() {
    let (_tmp, config) = setup();
    let ledger = UsageStore::new(config.storage.usage_path());
    ledger.record_usage_at(7, 100, now()).unwrap();
    let before = std::fs::read(config.storage.usage_path()).unwrap();

    let backend = ScriptedBackend::new(vec![Err("boom".to_string())]);
    harvest(&config, &backend, &HarvestOptions::default());

    assert_eq!(std::fs::read(config.storage.usage_path()).unwrap(), before);
}

#[test]
fn duplicate_across_pages_is_stored_once() {
    let (_tmp, config) = setup();
    let backend = ScriptedBackend::new(vec![
        page(vec![post("1", 1), post("2", 2)], Some("t1")),
        page(vec![post("2", 2), post("3", 3)], None),
    ]);

    let (newly_added, session) = completed(harvest(&config, &backend, &HarvestOptions::default()));

    assert_eq!(session.terminal, TerminalReason::Exhausted);
    assert_eq!(session.collected, 4);
    assert_eq!(newly_added, 3);

    let stored = load_records(&config.storage.records_path()).unwrap();
    let ids: Vec<&str> = stored.iter().map(|r| r.tweet_id.as_str()).collect();
    assert_eq!(ids, vec!["3", "2", "1"]);
    assert_eq!(stored[0].text, "COPASA post 3 segunda linha");
    assert_eq!(stored[0].author_username.as_deref(), Some("maria"));
    assert_eq!(ledger_retrieved(&config), 3);
}

#[test]
fn overlapping_runs_only_charge_new_rows() {
    let (_tmp, config) = setup();
    let r1 = || page(vec![post("1", 1), post("2", 2)], None);
    let r2 = || page(vec![post("2", 2), post("3", 3)], None);

    let (first, _) = completed(harvest(&config, &ScriptedBackend::new(vec![r1()]), &HarvestOptions::default()));
    let (second, _) = completed(harvest(&config, &ScriptedBackend::new(vec![r2()]), &HarvestOptions::default()));
    let after_second = std::fs::read(config.storage.records_path()).unwrap();
    let (third, _) = completed(harvest(&config, &ScriptedBackend::new(vec![r1()]), &HarvestOptions::default()));

    assert_eq!((first, second, third), (2, 1, 0));
    assert_eq!(std::fs::read(config.storage.records_path()).unwrap(), after_second);
    assert_eq!(ledger_retrieved(&config), 3);
}

#[test]
fn exhausted_quota_skips_fetching() {
    let (_tmp, config) = setup();
    UsageStore::new(config.storage.usage_path())
        .record_usage_at(100, 100, now())
        .unwrap();
    let backend = ScriptedBackend::new(vec![page(vec![post("1", 1)], None)]);

    let report = harvest(&config, &backend, &HarvestOptions::default());

    assert!(matches!(report, HarvestReport::QuotaExhausted { cap: 100 }));
    assert_eq!(backend.calls(), 0);
    assert!(!config.storage.records_path().exists());
}

#[test]
fn remaining_quota_caps_the_session() {
    let (_tmp, config) = setup();
    UsageStore::new(config.storage.usage_path())
        .record_usage_at(97, 100, now())
        .unwrap();
    let backend = ScriptedBackend::new(vec![
        page(vec![post("1", 1), post("2", 1)], Some("t1")),
        page(vec![post("3", 2), post("4", 2)], Some("t2")),
        page(vec![post("5", 3), post("6", 3)], Some("t3")),
    ]);

    let (newly_added, session) = completed(harvest(&config, &backend, &HarvestOptions::default()));

    assert_eq!(session.total_limit, 3);
    assert_eq!(session.terminal, TerminalReason::Capped);
    assert_eq!(backend.calls(), 2);
    assert_eq!(newly_added, 4);
    assert_eq!(ledger_retrieved(&config), 101);
}

#[test]
fn explicit_limit_never_exceeds_remaining_quota() {
    let (_tmp, mut config) = setup();
    config.retrieval.total_limit = Some(500);
    let backend = ScriptedBackend::new(vec![page(vec![post("1", 1)], None)]);

    let (_, session) = completed(harvest(&config, &backend, &HarvestOptions::default()));
    assert_eq!(session.total_limit, 100);

    let backend = ScriptedBackend::new(vec![page(vec![post("2", 1)], None)]);
    let options = HarvestOptions {
        limit: Some(5),
        ..HarvestOptions::default()
    };
    let (_, session) = completed(harvest(&config, &backend, &options));
    assert_eq!(session.total_limit, 5);
}

#[test]
fn error_after_first_page_persists_partial_results() {
    let (_tmp, config) = setup();
    let backend = ScriptedBackend::new(vec![
        page(vec![post("1", 1), post("2", 2)], Some("t1")),
        Err("rate limit window exceeded".to_string()),
    ]);

    let (newly_added, session) = completed(harvest(&config, &backend, &HarvestOptions::default()));

    assert!(matches!(session.terminal, TerminalReason::Errored { .. }));
    assert_eq!(newly_added, 2);
    assert_eq!(load_records(&config.storage.records_path()).unwrap().len(), 2);
    assert_eq!(ledger_retrieved(&config), 2);
}

#[test]
fn dry_run_writes_nothing() {
    let (_tmp, config) = setup();
    let backend = ScriptedBackend::new(vec![page(vec![post("1", 1)], None)]);
    let options = HarvestOptions {
        dry_run: true,
        ..HarvestOptions::default()
    };

    let (newly_added, session) = completed(harvest(&config, &backend, &options));

    assert_eq!(session.collected, 1);
    assert_eq!(newly_added, 0);
    assert!(!config.storage.records_path().exists());
    assert!(!config.storage.usage_path().exists());
}

#[test]
fn query_window_and_page_size_reach_the_backend() {
    let (_tmp, mut config) = setup();
    config.query.language = Some("pt".to_string());
    config.query.exclude_replies = true;
    config.query.exclude_reshares = true;
    config.retrieval.page_size = 500;
    let backend = ScriptedBackend::new(vec![page(vec![post("1", 1)], None)]);
    let options = HarvestOptions {
        window_days: Some(3),
        since_id: Some("42".to_string()),
        paginate: Some(false),
        ..HarvestOptions::default()
    };

    let (_, session) = completed(harvest(&config, &backend, &options));

    assert_eq!(session.terminal, TerminalReason::SinglePage);
    let requests = backend.requests.borrow();
    assert_eq!(requests[0].query, "COPASA -is:retweet -is:reply lang:pt");
    assert_eq!(requests[0].page_size, 100);
    assert_eq!(requests[0].since_id.as_deref(), Some("42"));
    let window = requests[0].window.unwrap();
    assert_eq!(window.end, now());
    assert_eq!(window.start, now() - chrono::Duration::days(3));
}

#[test]
fn corrupt_table_aborts_without_charging_usage() {
    let (_tmp, config) = setup();
    std::fs::create_dir_all(&config.storage.output_dir).unwrap();
    std::fs::write(config.storage.records_path(), "tweet_id,reply_count\n1,many\n").unwrap();
    let backend = ScriptedBackend::new(vec![page(vec![post("2", 2)], None)]);

    let ctx = HarvestContext {
        config: &config,
        backend: &backend,
        progress: &NoProgress,
    };
    let err = run_harvest_at(&ctx, &HarvestOptions::default(), now()).unwrap_err();

    assert!(err.to_string().contains("Failed to save records"));
    assert!(!config.storage.usage_path().exists());
}
