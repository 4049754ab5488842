// src/analyzer.rs

use crate::model::*;
use chrono::Duration;
use git2::{
    Blame, BlameOptions, Commit, Diff, DiffDelta, DiffHunk, FileMode, Oid, Patch, Repository,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Content libgit2 renders for a gitlink entry in a diff.
const SUBMODULE_MARKER: &[u8] = b"Subproject commit";

/// How many times a failing commit is retried before it is reported.
const RETRIES: u32 = 1;

/// Blame never looks further back than the first ancestor this much older than the commit.
fn lookback() -> Duration {
    Duration::weeks(3)
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("cannot load commit {id}: {source}")]
    Load { id: Oid, source: git2::Error },

    #[error("cannot walk ancestors of {id}: {source}")]
    Ancestry { id: Oid, source: git2::Error },

    #[error("cannot diff {id} against {}: {source}", .parent.map_or("the empty tree".to_string(), |p| p.to_string()))]
    Diff {
        id: Oid,
        parent: Option<Oid>,
        source: git2::Error,
    },

    #[error("cannot blame {} at {newest}: {source}", .path.display())]
    Blame {
        path: PathBuf,
        newest: Oid,
        source: git2::Error,
    },

    #[error("delta without an old path in {id}")]
    MissingPath { id: Oid },
}

/// Range of history blame may search for one parent.
struct Window {
    newest: Oid,
    oldest: Oid,
}

/// Computes [`CommitStats`] for commits of one repository.
pub struct Classifier<'repo> {
    repo: &'repo Repository,
}

impl<'repo> Classifier<'repo> {
    pub fn new(repo: &'repo Repository) -> Self {
        Classifier { repo }
    }

    /// Runs [`Classifier::analyze`], retrying once, and folds the result into an [`Outcome`].
    pub fn classify(&self, id: Oid) -> Outcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.analyze(id) {
                Ok(stats) => return Outcome::Analyzed(stats),
                Err(err) if attempts <= RETRIES => {
                    warn!(commit = %id, error = %err, "analysis failed, retrying");
                }
                Err(err) => {
                    warn!(commit = %id, error = %err, attempts, "giving up on commit");
                    return Outcome::Failed(CommitFailure {
                        id,
                        reason: err.to_string(),
                        attempts,
                    });
                }
            }
        }
    }

    /// Diffs `id` against each parent and buckets every removed line by the age and
    /// author of the commit that last touched it.
    ///
    /// All diff and blame structures are dropped before this returns.
    pub fn analyze(&self, id: Oid) -> Result<CommitStats, AnalyzeError> {
        let commit = self
            .repo
            .find_commit(id)
            .map_err(|source| AnalyzeError::Load { id, source })?;
        let mut stats = CommitStats::new(&commit);

        if commit.parent_count() == 0 {
            // Nothing to attribute against: the whole tree is new work.
            let diff = self.diff(&commit, None)?;
            stats.apply_diff_stats(&diff.stats().map_err(diff_err(id, None))?);
            self.tally(&commit, &diff, None, &mut stats)?;
            return Ok(stats);
        }

        let oldest = attribution_floor(&commit)?;
        for parent in commit.parents() {
            let parent_id = parent.id();
            let diff = self.diff(&commit, Some(&parent))?;
            stats.apply_diff_stats(&diff.stats().map_err(diff_err(id, Some(parent_id)))?);
            let window = Window {
                newest: parent_id,
                oldest,
            };
            self.tally(&commit, &diff, Some(&window), &mut stats)?;
        }

        debug!(
            commit = %id,
            attributed = stats.buckets.total(),
            unattributed = stats.unattributed,
            legacy_1_3mo = stats.buckets.legacy_1_3,
            "commit classified"
        );
        Ok(stats)
    }

    fn diff(&self, commit: &Commit<'repo>, parent: Option<&Commit<'repo>>) -> Result<Diff<'repo>, AnalyzeError> {
        let parent_id = parent.map(Commit::id);
        let tree = commit.tree().map_err(diff_err(commit.id(), parent_id))?;
        let parent_tree = parent
            .map(Commit::tree)
            .transpose()
            .map_err(diff_err(commit.id(), parent_id))?;

        self.repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
            .map_err(diff_err(commit.id(), parent_id))
    }

    /// Walks every hunk of `diff`. Without a window only hunk counters move.
    fn tally(
        &self,
        commit: &Commit<'repo>,
        diff: &Diff<'repo>,
        window: Option<&Window>,
        stats: &mut CommitStats,
    ) -> Result<(), AnalyzeError> {
        let id = commit.id();
        let parent = window.map(|w| w.newest);
        let author_time = commit.author().when().seconds();

        for delta_idx in 0..diff.deltas().len() {
            let Some(patch) = Patch::from_diff(diff, delta_idx).map_err(diff_err(id, parent))? else {
                continue;
            };
            let delta = patch.delta();
            let submodule = is_submodule(&delta);

            for hunk_idx in 0..patch.num_hunks() {
                let (hunk, line_count) = patch.hunk(hunk_idx).map_err(diff_err(id, parent))?;
                stats.hunk_changes += 1;
                if hunk.new_lines() > hunk.old_lines() {
                    stats.new_work += u64::from(hunk.new_lines() - hunk.old_lines());
                }

                let Some(window) = window else { continue };
                if submodule {
                    debug!(commit = %id, path = ?delta.new_file().path(), "submodule change ignored");
                    continue;
                }

                let mut blame: Option<Blame<'repo>> = None;
                for line_idx in 0..line_count {
                    let line = patch
                        .line_in_hunk(hunk_idx, line_idx)
                        .map_err(diff_err(id, parent))?;

                    if line.content().starts_with(SUBMODULE_MARKER) {
                        debug!(commit = %id, "submodule pointer line ignored");
                        if line.origin() == '+' {
                            stats.new_work += 1;
                        }
                        continue;
                    }

                    let (Some(old_lineno), None) = (line.old_lineno(), line.new_lineno()) else {
                        continue;
                    };

                    if blame.is_none() {
                        let path = delta
                            .old_file()
                            .path()
                            .ok_or(AnalyzeError::MissingPath { id })?;
                        blame = Some(self.blame_hunk(path, &hunk, window)?);
                    }
                    let Some(blame) = blame.as_ref() else { continue };

                    match blame.get_line(old_lineno as usize) {
                        Some(origin) => {
                            let signature = origin.final_signature();
                            let age = Duration::seconds(author_time - signature.when().seconds());
                            let same_author = signature.email_bytes() == stats.author_email.as_bytes();
                            stats.buckets.increment(AgeBucket::classify(age, same_author));
                        }
                        None => {
                            warn!(commit = %id, line = old_lineno, "blame did not cover removed line");
                            stats.unattributed += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Blames the old-side lines of `hunk` within `window`.
    fn blame_hunk(&self, path: &Path, hunk: &DiffHunk<'_>, window: &Window) -> Result<Blame<'repo>, AnalyzeError> {
        let first = hunk.old_start() as usize;
        let last = first + (hunk.old_lines() as usize).max(1) - 1;

        let mut opts = BlameOptions::new();
        opts.newest_commit(window.newest)
            .oldest_commit(window.oldest)
            .min_line(first)
            .max_line(last);

        self.repo
            .blame_file(path, Some(&mut opts))
            .map_err(|source| AnalyzeError::Blame {
                path: path.to_path_buf(),
                newest: window.newest,
                source,
            })
    }
}

/// Follows first parents back from `commit` to the first ancestor authored more than
/// [`lookback`] before it, or to the root when history is shorter.
fn attribution_floor(commit: &Commit<'_>) -> Result<Oid, AnalyzeError> {
    let horizon = commit.author().when().seconds() - lookback().num_seconds();
    let mut current = commit.clone();
    while current.author().when().seconds() > horizon && current.parent_count() > 0 {
        current = current.parent(0).map_err(|source| AnalyzeError::Ancestry {
            id: commit.id(),
            source,
        })?;
    }
    Ok(current.id())
}

fn is_submodule(delta: &DiffDelta<'_>) -> bool {
    matches!(delta.old_file().mode(), FileMode::Commit)
        || matches!(delta.new_file().mode(), FileMode::Commit)
}

fn diff_err(id: Oid, parent: Option<Oid>) -> impl Fn(git2::Error) -> AnalyzeError {
    move |source| AnalyzeError::Diff { id, parent, source }
}
