//! # Post Harvest CLI (`harvest`)
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest run` | Fetch new posts, merge them into the table, update usage |
//! | `harvest usage` | Show this month's usage against the cap |
//! | `harvest estimate` | Ask the counts endpoint for a 7-day estimate |
//! | `harvest query` | Print the search expression built from config |
//! | `harvest analyze` | Classify stored posts and write an annotated copy |
//!
//! ## Environment
//!
//! - `X_BEARER_TOKEN`: API credential (required by `run` and `estimate`)
//! - `X_MONTHLY_CAP`: overrides `quota.monthly_cap`
//! - `OUTPUT_DIR`: overrides `storage.output_dir`
//! - `RUST_LOG`: log filter (default `post_harvest=info`)

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use post_harvest::analyze;
use post_harvest::backend::SearchBackend;
use post_harvest::config;
use post_harvest::connector_x::XApiClient;
use post_harvest::harvest::{self, HarvestContext, HarvestOptions};
use post_harvest::models::CountEstimate;
use post_harvest::progress::ProgressMode;
use post_harvest::query::QueryBuilder;
use post_harvest::usage::{period_key, UsageStore};

/// Post Harvest: quota-aware incremental harvester for keyword-matched posts.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Quota-aware incremental harvester for keyword-matched social media posts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/harvest.toml`. Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest posts matching the configured query.
    ///
    /// Checks the monthly quota, pages through the search API, merges new
    /// posts into the record table, and charges the ledger with the rows
    /// that were actually added.
    Run {
        /// Fetch without writing the table or the usage ledger.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of posts to collect (never above remaining quota).
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        limit: Option<u64>,

        /// Fetch a single page only.
        #[arg(long)]
        no_paginate: bool,

        /// Only return posts newer than this post id.
        #[arg(long)]
        since_id: Option<String>,

        /// Window length in days (1-7).
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=7))]
        window_days: Option<i64>,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY, `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show this month's usage against the cap.
    Usage,

    /// Ask the search API for a count estimate of the configured query.
    Estimate,

    /// Print the search expression built from config.
    Query,

    /// Classify stored posts by topic and write an annotated copy.
    Analyze {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("post_harvest=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Run {
            dry_run,
            limit,
            no_paginate,
            since_id,
            window_days,
            json,
            progress,
        } => {
            let client = XApiClient::from_env(&cfg.api)?;
            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let ctx = HarvestContext {
                config: &cfg,
                backend: &client,
                progress: reporter.as_ref(),
            };
            let options = HarvestOptions {
                dry_run,
                limit,
                paginate: if no_paginate { Some(false) } else { None },
                since_id,
                window_days,
            };

            let report = harvest::run_harvest(&ctx, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                harvest::print_report(&report);
            }
        }
        Commands::Usage => {
            let store = UsageStore::new(cfg.storage.usage_path());
            let cap = cfg.quota.monthly_cap;
            let (period, retrieved) = match store.current_period() {
                Some((period, usage)) => (period, usage.retrieved),
                None => (period_key(chrono::Utc::now()), 0),
            };
            println!("usage {}", period);
            println!("  ledger: {}", store.path().display());
            println!("  retrieved: {}", retrieved);
            println!("  cap: {}", cap);
            println!("  remaining: {}", store.remaining_quota(cap));
        }
        Commands::Estimate => {
            let client = XApiClient::from_env(&cfg.api)?;
            let query = QueryBuilder::from_config(&cfg.query).build();
            match client.estimate_count(&query) {
                CountEstimate::Supported { total_estimated } => {
                    println!("estimate {}: {} (7-day window)", query, total_estimated);
                }
                CountEstimate::Unsupported { reason } => {
                    println!("estimate {}: unsupported ({})", query, reason);
                }
            }
        }
        Commands::Query => {
            println!("{}", QueryBuilder::from_config(&cfg.query).build());
        }
        Commands::Analyze { json } => {
            analyze::run_analyze(&cfg, json)?;
        }
    }

    Ok(())
}
