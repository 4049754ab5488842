// src/model.rs

use chrono::Duration;
use git2::Oid;

/// Lines whose prior owner is within this many months count as recent.
const RECENT_MONTHS: f64 = 1.0;

/// Length of one bucket month.
pub fn month() -> Duration {
    Duration::days(30)
}

/// Age/ownership bucket of one attributed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeBucket {
    /// Rewrote own work from the last month ("refactoring")
    SelfRecent,
    /// Rewrote someone else's work from the last month ("contribute")
    OtherRecent,
    Legacy1To3,
    Legacy3To6,
    Legacy6To12,
    Legacy12To24,
    Legacy24To48,
    LegacyOver48,
}

impl AgeBucket {
    /// Buckets by elapsed months. Only the freshest horizon is split by author.
    pub fn classify(age: Duration, same_author: bool) -> Self {
        let months = age.num_seconds() as f64 / month().num_seconds() as f64;
        match months {
            m if m <= RECENT_MONTHS && same_author => AgeBucket::SelfRecent,
            m if m <= RECENT_MONTHS => AgeBucket::OtherRecent,
            m if m <= 3.0 => AgeBucket::Legacy1To3,
            m if m <= 6.0 => AgeBucket::Legacy3To6,
            m if m <= 12.0 => AgeBucket::Legacy6To12,
            m if m <= 24.0 => AgeBucket::Legacy12To24,
            m if m <= 48.0 => AgeBucket::Legacy24To48,
            _ => AgeBucket::LegacyOver48,
        }
    }
}

/// Per-bucket line counters for one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Buckets {
    pub self_recent: u64,
    pub other_recent: u64,
    pub legacy_1_3: u64,
    pub legacy_3_6: u64,
    pub legacy_6_12: u64,
    pub legacy_12_24: u64,
    pub legacy_24_48: u64,
    pub legacy_over_48: u64,
}

impl Buckets {
    pub fn increment(&mut self, bucket: AgeBucket) {
        let counter = match bucket {
            AgeBucket::SelfRecent => &mut self.self_recent,
            AgeBucket::OtherRecent => &mut self.other_recent,
            AgeBucket::Legacy1To3 => &mut self.legacy_1_3,
            AgeBucket::Legacy3To6 => &mut self.legacy_3_6,
            AgeBucket::Legacy6To12 => &mut self.legacy_6_12,
            AgeBucket::Legacy12To24 => &mut self.legacy_12_24,
            AgeBucket::Legacy24To48 => &mut self.legacy_24_48,
            AgeBucket::LegacyOver48 => &mut self.legacy_over_48,
        };
        *counter += 1;
    }

    /// Number of attributed lines across all buckets
    pub fn total(&self) -> u64 {
        self.self_recent
            + self.other_recent
            + self.legacy_1_3
            + self.legacy_3_6
            + self.legacy_6_12
            + self.legacy_12_24
            + self.legacy_24_48
            + self.legacy_over_48
    }
}

/// Statistics for one analyzed commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStats {
    pub id: Oid,
    pub author_email: String,
    pub author_name: String,
    /// True for anything but exactly one parent, so root commits count too
    pub is_merge: bool,
    /// Author time, unix seconds
    pub created_at: i64,
    pub insertions: u64,
    pub deletions: u64,
    pub files_changed: u64,
    pub hunk_changes: u64,
    pub new_work: u64,
    pub buckets: Buckets,
    /// Old-side lines the blame result did not cover
    pub unattributed: u64,
    pub summary: String,
}

impl CommitStats {
    pub fn new(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        CommitStats {
            id: commit.id(),
            author_email: String::from_utf8_lossy(author.email_bytes()).into_owned(),
            author_name: String::from_utf8_lossy(author.name_bytes()).into_owned(),
            is_merge: commit.parent_count() != 1,
            created_at: author.when().seconds(),
            insertions: 0,
            deletions: 0,
            files_changed: 0,
            hunk_changes: 0,
            new_work: 0,
            buckets: Buckets::default(),
            unattributed: 0,
            summary: commit
                .summary_bytes()
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .unwrap_or_default(),
        }
    }

    pub fn apply_diff_stats(&mut self, stats: &git2::DiffStats) {
        self.insertions += stats.insertions() as u64;
        self.deletions += stats.deletions() as u64;
        self.files_changed += stats.files_changed() as u64;
    }
}

/// A commit that could not be analyzed, even after retrying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFailure {
    pub id: Oid,
    pub reason: String,
    pub attempts: u32,
}

/// What the classifier hands to the sink for one walked commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Analyzed(CommitStats),
    Failed(CommitFailure),
}

impl Outcome {
    pub fn id(&self) -> Oid {
        match self {
            Outcome::Analyzed(stats) => stats.id,
            Outcome::Failed(failure) => failure.id,
        }
    }
}
