// src/sink.rs

use crate::model::{CommitFailure, CommitStats};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Column names, in row order.
pub const HEADER: [&str; 18] = [
    "id",
    "authorEmail",
    "authorName",
    "isMerge",
    "createdAt",
    "insertions",
    "deletions",
    "filesChanged",
    "hunkChanges",
    "newWork",
    "contribute",
    "legacy-3-6mo",
    "legacy-6-12mo",
    "legacy-12-24mo",
    "legacy-24-48mo",
    "legacy->48mo",
    "refactoring",
    "summary",
];

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("cannot create {}: {source}", .path.display())]
    Open { path: PathBuf, source: std::io::Error },

    #[error("cannot write row: {0}")]
    Write(#[from] csv::Error),

    #[error("cannot flush output: {0}")]
    Flush(#[from] std::io::Error),
}

/// Receives outcomes in walker order.
pub trait RecordSink {
    fn write_stats(&mut self, stats: &CommitStats) -> Result<(), SinkError>;

    /// Failed commits get no row, so they are never mistaken for real zero counts.
    fn record_failure(&mut self, failure: &CommitFailure) -> Result<(), SinkError> {
        warn!(commit = %failure.id, attempts = failure.attempts, reason = %failure.reason, "commit skipped");
        Ok(())
    }
}

/// Writes one CSV row per commit and flushes after each one.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
    skipped: usize,
}

impl CsvSink<File> {
    /// Truncates `path` and writes the header.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        let file = File::create(path).map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        CsvSink::new(file)
    }
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> Result<Self, SinkError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(CsvSink {
            writer,
            rows: 0,
            skipped: 0,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    #[cfg(test)]
    pub fn get_ref(&self) -> &W {
        self.writer.get_ref()
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn write_stats(&mut self, stats: &CommitStats) -> Result<(), SinkError> {
        self.writer.write_record(row(stats))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    fn record_failure(&mut self, failure: &CommitFailure) -> Result<(), SinkError> {
        self.skipped += 1;
        warn!(commit = %failure.id, attempts = failure.attempts, reason = %failure.reason, "commit skipped, no row written");
        Ok(())
    }
}

fn row(stats: &CommitStats) -> [String; 18] {
    let b = &stats.buckets;
    [
        stats.id.to_string(),
        stats.author_email.clone(),
        stats.author_name.clone(),
        stats.is_merge.to_string(),
        stats.created_at.to_string(),
        stats.insertions.to_string(),
        stats.deletions.to_string(),
        stats.files_changed.to_string(),
        stats.hunk_changes.to_string(),
        stats.new_work.to_string(),
        b.other_recent.to_string(),
        b.legacy_3_6.to_string(),
        b.legacy_6_12.to_string(),
        b.legacy_12_24.to_string(),
        b.legacy_24_48.to_string(),
        b.legacy_over_48.to_string(),
        b.self_recent.to_string(),
        sanitize_summary(&stats.summary),
    ]
}

/// Replaces characters that would need CSV quoting.
fn sanitize_summary(summary: &str) -> String {
    summary
        .chars()
        .map(|c| match c {
            ',' => '.',
            '"' => '\'',
            '\r' | '\n' => ' ',
            other => other,
        })
        .collect()
}
