//! Harvest session orchestration.
//!
//! Coordinates one run: quota check → query → paginated retrieval →
//! merge into the record table → usage ledger update. Everything a run
//! needs is passed in through [`HarvestContext`], so tests can swap in a
//! fake backend.
//!
//! The ledger is charged with the number of rows actually added to the
//! table, not the number fetched: overlapping windows on repeated runs
//! return posts that are already stored.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::backend::SearchBackend;
use crate::config::Config;
use crate::models::{CountEstimate, TimeWindow};
use crate::progress::HarvestProgressReporter;
use crate::query::QueryBuilder;
use crate::retrieve::{retrieve, RetrievalParams, RetrievalSession};
use crate::store::merge_and_save;
use crate::usage::UsageStore;

/// Explicit dependencies of a harvest run.
pub struct HarvestContext<'a> {
    pub config: &'a Config,
    pub backend: &'a dyn SearchBackend,
    pub progress: &'a dyn HarvestProgressReporter,
}

/// Per-run overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    /// Fetch but do not write the table or the ledger.
    pub dry_run: bool,
    pub limit: Option<u64>,
    pub paginate: Option<bool>,
    pub since_id: Option<String>,
    pub window_days: Option<i64>,
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HarvestReport {
    /// Nothing was fetched because the monthly cap is used up.
    QuotaExhausted { cap: u64 },
    Completed {
        remaining_before: u64,
        newly_added: usize,
        dry_run: bool,
        session: RetrievalSession,
    },
}

/// Run one harvest session.
pub fn run_harvest(ctx: &HarvestContext<'_>, options: &HarvestOptions) -> Result<HarvestReport> {
    run_harvest_at(ctx, options, Utc::now())
}

pub fn run_harvest_at(
    ctx: &HarvestContext<'_>,
    options: &HarvestOptions,
    now: DateTime<Utc>,
) -> Result<HarvestReport> {
    let config = ctx.config;
    let cap = config.quota.monthly_cap;
    let ledger = UsageStore::new(config.storage.usage_path());

    let remaining = ledger.remaining_quota_at(cap, now);
    if remaining == 0 {
        tracing::warn!(cap, "Monthly cap reached, skipping harvest");
        return Ok(HarvestReport::QuotaExhausted { cap });
    }

    let query = QueryBuilder::from_config(&config.query).build();
    let window_days = options.window_days.unwrap_or(config.retrieval.window_days);
    let window = TimeWindow {
        start: now - Duration::days(window_days),
        end: now,
    };
    let total_limit = options
        .limit
        .or(config.retrieval.total_limit)
        .unwrap_or(remaining)
        .min(remaining);

    tracing::info!(%query, remaining, total_limit, window_days, "Starting harvest");

    let params = RetrievalParams {
        query,
        page_size: config.retrieval.page_size,
        paginate: options.paginate.unwrap_or(config.retrieval.paginate),
        total_limit,
        window: Some(window),
        since_id: options.since_id.clone(),
    };
    let retrieval = retrieve(ctx.backend, &params, ctx.progress);

    if retrieval.records.is_empty() || options.dry_run {
        return Ok(HarvestReport::Completed {
            remaining_before: remaining,
            newly_added: 0,
            dry_run: options.dry_run,
            session: retrieval.session,
        });
    }

    let records_path = config.storage.records_path();
    let newly_added = merge_and_save(
        &retrieval.records,
        &records_path,
        config.retrieval.merge_policy,
    )
    .with_context(|| format!("Failed to save records to {}", records_path.display()))?;

    ledger.record_usage_at(newly_added as u64, cap, now)?;
    tracing::info!(newly_added, "Usage updated");

    Ok(HarvestReport::Completed {
        remaining_before: remaining,
        newly_added,
        dry_run: false,
        session: retrieval.session,
    })
}

/// Print a run report to stdout.
pub fn print_report(report: &HarvestReport) {
    match report {
        HarvestReport::QuotaExhausted { cap } => {
            println!("harvest stopped: monthly cap reached (cap={})", cap);
        }
        HarvestReport::Completed {
            remaining_before,
            newly_added,
            dry_run,
            session,
        } => {
            if *dry_run {
                println!("harvest {} (dry-run)", session.backend);
            } else {
                println!("harvest {}", session.backend);
            }
            println!("  query: {}", session.query);
            if let (Some(start), Some(end)) = (session.window_start, session.window_end) {
                println!("  window: {} .. {}", start.to_rfc3339(), end.to_rfc3339());
            }
            println!("  remaining quota: {}", remaining_before);
            match &session.estimate {
                CountEstimate::Supported { total_estimated } => {
                    println!("  estimate: {}", total_estimated)
                }
                CountEstimate::Unsupported { .. } => {
                    println!("  estimate: unsupported")
                }
            }
            println!("  pages: {}", session.pages);
            println!("  collected: {}", session.collected);
            println!("  terminal: {}", session.terminal);
            if !dry_run {
                println!("  newly added: {}", newly_added);
            }
            println!("ok");
        }
    }
}
