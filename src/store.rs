//! Merge-persist store for the record table.
//!
//! The table is a CSV file with one row per [`Record`]. Each harvest merges
//! the newly fetched batch into the existing table and writes the complete
//! result back, newest first.
//!
//! # Merge semantics
//!
//! Existing rows come first, new rows after; duplicates by `tweet_id` are
//! resolved by a [`MergePolicy`]. With the default
//! [`MergePolicy::PreferExisting`] a row that is already stored is never
//! overwritten, so engagement counters captured on an earlier run stay as
//! they were.
//!
//! # Failure behaviour
//!
//! A table that exists but cannot be parsed aborts the merge with
//! [`HarvestError::CorruptStore`]: overwriting it would silently drop the
//! stored history. Writes go to a temp file in the same directory which is
//! then renamed over the table, so a crash leaves either the old or the new
//! file.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;

use crate::error::{HarvestError, Result};
use crate::models::Record;

/// Which row survives when two rows share an identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The first occurrence (the stored row) wins; new data only fills gaps.
    #[default]
    PreferExisting,
    /// The latest occurrence wins.
    PreferNewest,
}

/// Read the record table. An absent file is an empty table.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(HarvestError::CorruptStore {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        }
    };

    let mut reader = csv::Reader::from_reader(file);
    let mut records = Vec::new();
    for row in reader.deserialize::<Record>() {
        let record = row.map_err(|e| HarvestError::CorruptStore {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Serialize records as CSV with a header row.
pub fn records_to_csv(records: &[Record]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| HarvestError::Io(e.into_error()))
}

/// Merge `existing` and `new` under `policy`.
///
/// Returns the merged table (sorted newest first) and the number of
/// distinct identifiers in `new` that were not in `existing`.
pub fn merge_records(
    existing: Vec<Record>,
    new: Vec<Record>,
    policy: MergePolicy,
) -> (Vec<Record>, usize) {
    let known: HashSet<&str> = existing.iter().map(|r| r.tweet_id.as_str()).collect();
    let newly_added = new
        .iter()
        .map(|r| r.tweet_id.as_str())
        .filter(|id| !known.contains(id))
        .collect::<HashSet<_>>()
        .len();

    let mut merged: Vec<Record> = Vec::with_capacity(existing.len() + new.len());
    let mut slots: HashMap<String, usize> = HashMap::new();

    for record in existing.into_iter().chain(new) {
        match slots.get(&record.tweet_id) {
            Some(&slot) => {
                if policy == MergePolicy::PreferNewest {
                    merged[slot] = record;
                }
            }
            None => {
                slots.insert(record.tweet_id.clone(), merged.len());
                merged.push(record);
            }
        }
    }

    sort_newest_first(&mut merged);
    (merged, newly_added)
}

/// Stable sort by `created_at` descending; unparseable timestamps go last.
pub fn sort_newest_first(records: &mut [Record]) {
    records.sort_by_cached_key(|r| Reverse(r.created_at_utc()));
}

/// Merge `new` into the table at `path` and write it back.
///
/// Returns how many records were newly persisted. An empty batch is a
/// no-op that leaves the file untouched.
pub fn merge_and_save(new: &[Record], path: &Path, policy: MergePolicy) -> Result<usize> {
    if new.is_empty() {
        tracing::info!("No records to save");
        return Ok(0);
    }

    let existing = load_records(path)?;
    let existing_rows = existing.len();
    let (merged, newly_added) = merge_records(existing, new.to_vec(), policy);

    let bytes = records_to_csv(&merged)?;
    write_atomic(path, &bytes)?;

    tracing::info!(
        path = %path.display(),
        rows = merged.len(),
        previous_rows = existing_rows,
        newly_added,
        "Record table saved"
    );
    Ok(newly_added)
}

/// Replace `path` with `bytes` via a temp file in the same directory.
///
/// An existing file keeps its permissions. On failure the previous file is
/// left as it was and the temp file is removed.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.is_file() {
            tmp.as_file().set_permissions(meta.permissions())?;
        }
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
