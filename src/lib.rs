//! # Post Harvest
//!
//! Quota-aware incremental harvester for keyword-matched social media posts.
//!
//! Each run asks the usage ledger how much of the monthly cap is left,
//! pages through the search API within a time window, merges the results
//! into a deduplicated CSV table, and charges the ledger with the rows that
//! were actually new. A keyword classifier buckets the stored posts into
//! topics for reporting.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────┐
//! │  Usage   │──▶│  Query   │──▶│ Paginated  │──▶│  Merge   │
//! │  Ledger  │   │ Builder  │   │ Retriever  │   │  Store   │
//! └────▲─────┘   └──────────┘   └─────┬──────┘   └────┬─────┘
//!      │                              │               │
//!      │                        ┌─────▼──────┐        │
//!      │                        │  Search    │        │
//!      │                        │  Backend   │        │
//!      │                        └────────────┘        │
//!      └───────────── newly added rows ───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export X_BEARER_TOKEN=...
//! harvest run                   # harvest the last 7 days
//! harvest usage                 # show this month's quota usage
//! harvest analyze               # topic breakdown of stored posts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Backend and store error type |
//! | [`usage`] | Monthly usage ledger |
//! | [`query`] | Search expression builder |
//! | [`backend`] | Search backend trait |
//! | [`connector_x`] | X API v2 backend |
//! | [`retrieve`] | Paginated retrieval session |
//! | [`store`] | Merge-persist record table |
//! | [`classify`] | Keyword topic classifier |
//! | [`analyze`] | Topic report over the stored table |
//! | [`harvest`] | Session orchestration |
//! | [`progress`] | Progress reporting |
//!
//! ## Limitations
//!
//! Runs are assumed to be single-writer. Two concurrent runs against the
//! same output directory may lose ledger updates or table rows.

pub mod analyze;
pub mod backend;
pub mod classify;
pub mod config;
pub mod connector_x;
pub mod error;
pub mod harvest;
pub mod models;
pub mod progress;
pub mod query;
pub mod retrieve;
pub mod store;
pub mod usage;
