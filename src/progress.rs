//! Harvest progress reporting.
//!
//! Reports page-by-page progress during `harvest run` so users can see how
//! much has been collected and why the session stopped. Progress is emitted
//! on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a retrieval session.
#[derive(Clone, Debug)]
pub enum HarvestProgressEvent {
    /// The count estimate has been requested (or found unsupported).
    Estimated { query: String, estimate: Option<u64> },
    /// A page was fetched.
    Page {
        page: u32,
        page_items: usize,
        collected: usize,
    },
    /// The session reached a terminal state.
    Finished { terminal: String, collected: usize },
}

/// Reports harvest progress. Implementations write to stderr (human or JSON).
pub trait HarvestProgressReporter {
    /// Emit a progress event. Called from the retriever.
    fn report(&self, event: HarvestProgressEvent);
}

/// Human-friendly progress on stderr: "harvest  page 3  1,234 collected (this page: 100)".
pub struct StderrProgress;

impl HarvestProgressReporter for StderrProgress {
    fn report(&self, event: HarvestProgressEvent) {
        let line = match &event {
            HarvestProgressEvent::Estimated { query, estimate } => match estimate {
                Some(n) => format!("harvest {}  estimated {} posts\n", query, format_number(*n)),
                None => format!("harvest {}  estimate unavailable\n", query),
            },
            HarvestProgressEvent::Page {
                page,
                page_items,
                collected,
            } => format!(
                "harvest  page {}  {} collected (this page: {})\n",
                page,
                format_number(*collected as u64),
                page_items
            ),
            HarvestProgressEvent::Finished {
                terminal,
                collected,
            } => format!(
                "harvest  {}  {} collected\n",
                terminal,
                format_number(*collected as u64)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl HarvestProgressReporter for JsonProgress {
    fn report(&self, event: HarvestProgressEvent) {
        let obj = match &event {
            HarvestProgressEvent::Estimated { query, estimate } => serde_json::json!({
                "event": "estimate",
                "query": query,
                "estimate": estimate,
            }),
            HarvestProgressEvent::Page {
                page,
                page_items,
                collected,
            } => serde_json::json!({
                "event": "page",
                "page": page,
                "page_items": page_items,
                "collected": collected,
            }),
            HarvestProgressEvent::Finished {
                terminal,
                collected,
            } => serde_json::json!({
                "event": "finished",
                "terminal": terminal,
                "collected": collected,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl HarvestProgressReporter for NoProgress {
    fn report(&self, _event: HarvestProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn HarvestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
