//! Topic breakdown over the persisted record table.
//!
//! Classifies every stored post, counts posts per topic, and writes an
//! annotated copy of the table with an extra `topics` column. The primary
//! table is only read.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::classify::TopicRules;
use crate::config::Config;
use crate::models::Record;
use crate::store::{load_records, write_atomic};

/// Separator between labels in the annotated `topics` column.
pub const TOPIC_SEPARATOR: &str = ";";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicReport {
    pub total: usize,
    /// Sorted by count descending, then label.
    pub topics: Vec<TopicCount>,
    pub subject_topics: Vec<String>,
    /// Distinct posts carrying at least one subject topic.
    pub subject_posts: usize,
}

impl TopicReport {
    pub fn subject_percent(&self) -> f64 {
        percent(self.subject_posts, self.total)
    }
}

fn percent(n: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        n as f64 / total as f64 * 100.0
    }
}

/// Classify every record.
pub fn classify_records(records: &[Record], rules: &TopicRules) -> Vec<BTreeSet<String>> {
    records.iter().map(|r| rules.classify(&r.text)).collect()
}

/// Aggregate per-topic counts from classified records.
pub fn build_report(
    records: &[Record],
    assignments: &[BTreeSet<String>],
    subject_topics: &[String],
) -> TopicReport {
    let total = records.len();
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut subject_ids: HashSet<&str> = HashSet::new();

    for (record, labels) in records.iter().zip(assignments) {
        for label in labels {
            *counts.entry(label.as_str()).or_insert(0) += 1;
        }
        if labels.iter().any(|l| subject_topics.contains(l)) {
            subject_ids.insert(record.tweet_id.as_str());
        }
    }

    let mut topics: Vec<TopicCount> = counts
        .into_iter()
        .map(|(topic, count)| TopicCount {
            topic: topic.to_string(),
            count,
            percent: percent(count, total),
        })
        .collect();
    topics.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.topic.cmp(&b.topic)));

    TopicReport {
        total,
        topics,
        subject_topics: subject_topics.to_vec(),
        subject_posts: subject_ids.len(),
    }
}

#[derive(Serialize)]
struct AnnotatedRow<'a> {
    tweet_id: &'a str,
    text: &'a str,
    created_at: Option<&'a str>,
    author_id: Option<&'a str>,
    author_username: Option<&'a str>,
    author_name: Option<&'a str>,
    author_verified: Option<bool>,
    retweet_count: Option<u64>,
    reply_count: Option<u64>,
    like_count: Option<u64>,
    quote_count: Option<u64>,
    language: Option<&'a str>,
    topics: String,
}

impl<'a> AnnotatedRow<'a> {
    fn new(r: &'a Record, labels: &BTreeSet<String>) -> Self {
        Self {
            tweet_id: &r.tweet_id,
            text: &r.text,
            created_at: r.created_at.as_deref(),
            author_id: r.author_id.as_deref(),
            author_username: r.author_username.as_deref(),
            author_name: r.author_name.as_deref(),
            author_verified: r.author_verified,
            retweet_count: r.retweet_count,
            reply_count: r.reply_count,
            like_count: r.like_count,
            quote_count: r.quote_count,
            language: r.language.as_deref(),
            topics: labels
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(TOPIC_SEPARATOR),
        }
    }
}

/// Write the table plus a `topics` column to `path`.
pub fn write_annotated(
    records: &[Record],
    assignments: &[BTreeSet<String>],
    path: &Path,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for (record, labels) in records.iter().zip(assignments) {
        writer.serialize(AnnotatedRow::new(record, labels))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush annotated table: {}", e))?;
    write_atomic(path, &bytes)
        .with_context(|| format!("Failed to write annotated table: {}", path.display()))?;
    Ok(())
}

/// Run the analyze command: classify the stored table, print the breakdown
/// and write the annotated copy.
pub fn run_analyze(config: &Config, json: bool) -> Result<()> {
    let records_path = config.storage.records_path();
    if !records_path.exists() {
        println!("Data file not found: {}", records_path.display());
        return Ok(());
    }

    let records = load_records(&records_path)?;
    let rules = config.classifier.rules()?;
    let assignments = classify_records(&records, &rules);
    let report = build_report(&records, &assignments, &config.classifier.subject_topics);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if records.is_empty() {
        return Ok(());
    }

    let annotated_path = config.storage.annotated_path();
    write_annotated(&records, &assignments, &annotated_path)?;
    tracing::info!(path = %annotated_path.display(), rows = records.len(), "Annotated table written");
    if !json {
        println!();
        println!("Annotated data saved to {}", annotated_path.display());
    }

    Ok(())
}

fn print_report(report: &TopicReport) {
    println!("Total posts: {}", report.total);
    println!();
    println!("Counts by topic:");
    for t in &report.topics {
        println!("- {}: {} ({:.1}%)", t.topic, t.count, t.percent);
    }
    println!();
    println!(
        "Posts about the subject ({}): {} ({:.1}%)",
        report.subject_topics.join("/"),
        report.subject_posts,
        report.subject_percent()
    );
}
