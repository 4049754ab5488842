// src/pipeline.rs

//! Walker → classifier workers → sink, over rendezvous channels.
//!
//! ```text
//!   walker ──(seq, oid)──▶ worker × N ──(seq, outcome)──▶ reorder ──▶ sink
//!     ▲                                                       │
//!     └──────────────────────── credits ◀─────────────────────┘
//! ```
//!
//! Every stage opens its own [`Session`]. Channels have zero capacity, so a
//! stage hands over one item at a time. Credits cap how far the walker may run
//! ahead of the sink, which bounds the reorder buffer when workers finish out
//! of order. A commit's diff and blame data live only inside one
//! [`Classifier::analyze`] call.

use crate::analyzer::Classifier;
use crate::cli::WalkOrder;
use crate::model::{CommitFailure, Outcome};
use crate::session::Session;
use crate::sink::RecordSink;
use crate::walker::CommitWalker;
use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use git2::Oid;
use indicatif::ProgressBar;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub repo_path: PathBuf,
    /// Most commits the walker may emit
    pub max_commits: usize,
    pub order: WalkOrder,
    /// Classifier workers, at least one
    pub workers: usize,
}

impl PipelineConfig {
    /// Jobs allowed between the walker and the sink.
    fn in_flight(&self) -> usize {
        self.workers.max(1) * 2
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub walked: usize,
    pub analyzed: usize,
    pub failed: usize,
    /// Lines in the 1-3 month bucket, which has no CSV column
    pub legacy_1_3mo: u64,
    pub elapsed: Duration,
}

struct Job {
    seq: usize,
    id: Oid,
}

/// Holds completions until every earlier sequence number has been released.
#[derive(Debug, Default)]
pub struct ReorderBuffer<T> {
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        ReorderBuffer {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, seq: usize, item: T) {
        self.pending.insert(seq, item);
    }

    /// Next item in order, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<T> {
        let item = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(item)
    }

    pub fn released(&self) -> usize {
        self.next
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Runs the whole pipeline, delivering one outcome per walked commit to `sink` in walk order.
pub fn run<S: RecordSink>(config: &PipelineConfig, sink: &mut S, progress: &ProgressBar) -> Result<RunSummary> {
    let start = Instant::now();

    // Startup failures must surface before any stage is spawned.
    {
        let session = Session::open(&config.repo_path)?;
        let planned = CommitWalker::new(session.repo(), config.order, config.max_commits)
            .with_context(|| format!("cannot walk history of {}", config.repo_path.display()))?
            .take_while(Result::is_ok)
            .count();
        progress.set_length(planned as u64);
    }

    let (job_tx, job_rx) = bounded::<Job>(0);
    let (done_tx, done_rx) = bounded::<(usize, Outcome)>(0);
    let (credit_tx, credit_rx) = bounded::<()>(config.in_flight());
    for _ in 0..config.in_flight() {
        credit_tx.send(()).context("credit channel closed during setup")?;
    }

    info!(
        repo = %config.repo_path.display(),
        max_commits = config.max_commits,
        workers = config.workers,
        "pipeline started"
    );

    let mut summary = thread::scope(|scope| -> Result<RunSummary> {
        let walker = scope.spawn(move || walk(config, job_tx, credit_rx));

        let workers: Vec<_> = (0..config.workers.max(1))
            .map(|worker| {
                let jobs = job_rx.clone();
                let done = done_tx.clone();
                scope.spawn(move || classify(config, worker, jobs, done))
            })
            .collect();
        // Only the stages keep channel ends; the sink loop ends once they are gone.
        drop(job_rx);
        drop(done_tx);

        let drained = drain(done_rx, credit_tx, sink, progress);

        let walked = walker
            .join()
            .map_err(|_| anyhow!("walker stage panicked"))?
            .context("commit walk failed")?;
        for worker in workers {
            worker
                .join()
                .map_err(|_| anyhow!("classifier worker panicked"))?
                .context("classifier worker failed")?;
        }
        let mut summary = drained?;
        if summary.analyzed + summary.failed != walked {
            bail!(
                "walked {walked} commits but delivered {}",
                summary.analyzed + summary.failed
            );
        }
        summary.walked = walked;
        Ok(summary)
    })?;

    summary.elapsed = start.elapsed();
    info!(
        walked = summary.walked,
        analyzed = summary.analyzed,
        failed = summary.failed,
        elapsed = ?summary.elapsed,
        "pipeline finished"
    );
    Ok(summary)
}

/// Walker stage. Returns how many ids it emitted.
fn walk(config: &PipelineConfig, jobs: Sender<Job>, credits: Receiver<()>) -> Result<usize> {
    let session = Session::open(&config.repo_path)?;
    let walker = CommitWalker::new(session.repo(), config.order, config.max_commits)?;

    let mut emitted = 0;
    for (seq, id) in walker.enumerate() {
        let id = id.with_context(|| format!("revwalk failed after {seq} commits"))?;
        // Both fail only when the sink side has shut down.
        if credits.recv().is_err() || jobs.send(Job { seq, id }).is_err() {
            break;
        }
        emitted += 1;
    }
    debug!(emitted, "walker finished");
    Ok(emitted)
}

/// Classifier stage. Each worker owns its repository session.
fn classify(config: &PipelineConfig, worker: usize, jobs: Receiver<Job>, done: Sender<(usize, Outcome)>) -> Result<()> {
    let session = Session::open(&config.repo_path)?;
    let classifier = Classifier::new(session.repo());

    for job in jobs {
        debug!(worker, seq = job.seq, commit = %job.id, "classifying");
        let outcome = guarded(job.id, || classifier.classify(job.id));
        if done.send((job.seq, outcome)).is_err() {
            break;
        }
    }
    Ok(())
}

/// Turns a panic inside `classify` into a failed outcome, so the sink never waits on a lost sequence number.
fn guarded(id: Oid, classify: impl FnOnce() -> Outcome) -> Outcome {
    panic::catch_unwind(AssertUnwindSafe(classify)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        warn!(commit = %id, %message, "classifier panicked");
        Outcome::Failed(CommitFailure {
            id,
            reason: format!("classifier panicked: {message}"),
            attempts: 1,
        })
    })
}

/// Sink stage, run on the calling thread.
fn drain<S: RecordSink>(
    done: Receiver<(usize, Outcome)>,
    credits: Sender<()>,
    sink: &mut S,
    progress: &ProgressBar,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let mut reorder = ReorderBuffer::new();

    for (seq, outcome) in done {
        reorder.push(seq, outcome);
        while let Some(outcome) = reorder.pop_ready() {
            match &outcome {
                Outcome::Analyzed(stats) => {
                    sink.write_stats(stats)
                        .with_context(|| format!("cannot record commit {}", stats.id))?;
                    summary.analyzed += 1;
                    summary.legacy_1_3mo += stats.buckets.legacy_1_3;
                }
                Outcome::Failed(failure) => {
                    sink.record_failure(failure)
                        .with_context(|| format!("cannot record failure of {}", failure.id))?;
                    summary.failed += 1;
                }
            }
            let id = outcome.id();
            progress.set_message(id.to_string()[..12].to_string());
            progress.inc(1);
            debug!(commit = %id, "delivered");
            // The walker may be done already; a closed credit channel is fine.
            credits.send(()).ok();
        }
    }

    if !reorder.is_empty() {
        bail!(
            "commit {} never completed; later results were held back",
            reorder.released()
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommitStats;
    use crate::sink::{CsvSink, SinkError};
    use crate::fixture::{Fixture, ALICE, BASE, BOB, DAY};

    #[derive(Default)]
    struct Collect {
        ids: Vec<Oid>,
        failures: Vec<Oid>,
    }

    impl RecordSink for Collect {
        fn write_stats(&mut self, stats: &CommitStats) -> Result<(), SinkError> {
            self.ids.push(stats.id);
            Ok(())
        }

        fn record_failure(&mut self, failure: &CommitFailure) -> Result<(), SinkError> {
            self.failures.push(failure.id);
            Ok(())
        }
    }

    struct Broken;

    impl RecordSink for Broken {
        fn write_stats(&mut self, _: &CommitStats) -> Result<(), SinkError> {
            Err(SinkError::Flush(std::io::Error::other("disk full")))
        }
    }

    fn config(fixture: &Fixture, max_commits: usize, workers: usize) -> PipelineConfig {
        PipelineConfig {
            repo_path: fixture.path().to_path_buf(),
            max_commits,
            order: WalkOrder::Time,
            workers,
        }
    }

    /// A history where every commit rewrites earlier lines, so blame has work to do.
    fn busy_history(fixture: &Fixture, count: usize) -> Vec<Oid> {
        let mut ids: Vec<Oid> = Vec::new();
        for i in 0..count {
            let content: String = (0..20).map(|line| format!("v{} line {line}\n", i + line % 3)).collect();
            let author = if i % 2 == 0 { ALICE } else { BOB };
            let parents: Vec<Oid> = ids.last().copied().into_iter().collect();
            ids.push(fixture.snapshot(&parents, &[("f.txt", content.as_str())], author, BASE + i as i64 * 9 * DAY, "step"));
        }
        ids
    }

    #[test]
    fn reorder_buffer_releases_in_sequence() {
        let mut buffer = ReorderBuffer::new();
        buffer.push(2, "c");
        buffer.push(1, "b");
        assert_eq!(buffer.pop_ready(), None);
        buffer.push(0, "a");
        assert_eq!(buffer.pop_ready(), Some("a"));
        assert_eq!(buffer.pop_ready(), Some("b"));
        assert_eq!(buffer.pop_ready(), Some("c"));
        assert_eq!(buffer.pop_ready(), None);
        assert!(buffer.is_empty());
        assert_eq!(buffer.released(), 3);
    }

    #[test]
    fn delivers_in_walk_order_with_many_workers() {
        let fixture = Fixture::new();
        let ids = busy_history(&fixture, 12);
        let expected: Vec<Oid> = ids.iter().rev().copied().collect();

        for workers in [1, 4] {
            let mut sink = Collect::default();
            let summary = run(&config(&fixture, 100, workers), &mut sink, &ProgressBar::hidden()).unwrap();
            assert_eq!(sink.ids, expected);
            assert!(sink.failures.is_empty());
            assert_eq!(summary.walked, 12);
            assert_eq!(summary.analyzed, 12);
        }
    }

    #[test]
    fn cap_bounds_the_run() {
        let fixture = Fixture::new();
        let ids = fixture.linear(8);
        let mut sink = Collect::default();
        let summary = run(&config(&fixture, 3, 2), &mut sink, &ProgressBar::hidden()).unwrap();
        assert_eq!(sink.ids, vec![ids[7], ids[6], ids[5]]);
        assert_eq!(summary.walked, 3);
    }

    #[test]
    fn output_is_byte_identical_across_runs() {
        let fixture = Fixture::new();
        busy_history(&fixture, 8);

        let render = |workers| {
            let mut sink = CsvSink::new(Vec::new()).unwrap();
            run(&config(&fixture, 50, workers), &mut sink, &ProgressBar::hidden()).unwrap();
            sink.get_ref().clone()
        };
        let first = render(1);
        assert_eq!(first, render(1));
        assert_eq!(first, render(3));
        assert_eq!(String::from_utf8(first).unwrap().lines().count(), 9);
    }

    #[test]
    fn unopenable_repository_fails_before_work() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            repo_path: dir.path().to_path_buf(),
            max_commits: 5,
            order: WalkOrder::Time,
            workers: 1,
        };
        let mut sink = Collect::default();
        assert!(run(&config, &mut sink, &ProgressBar::hidden()).is_err());
        assert!(sink.ids.is_empty());
    }

    #[test]
    fn sink_failure_aborts_without_deadlock() {
        let fixture = Fixture::new();
        fixture.linear(6);
        let err = run(&config(&fixture, 10, 2), &mut Broken, &ProgressBar::hidden()).unwrap_err();
        assert!(format!("{err:#}").contains("disk full"));
    }

    #[test]
    fn unreadable_commit_is_skipped_and_order_kept() {
        let fixture = Fixture::new();
        let a = fixture.snapshot(&[], &[("f.txt", "a\n")], ALICE, BASE, "a");
        let b = fixture.snapshot(&[a], &[("f.txt", "a\n"), ("secret.txt", "only in b\n")], BOB, BASE + DAY, "b");
        let c = fixture.snapshot(&[b], &[("f.txt", "a\nc\n"), ("secret.txt", "only in b\n")], ALICE, BASE + 2 * DAY, "c");
        // c leaves secret.txt untouched, so only b needs the missing blob.
        fixture.drop_object(fixture.repo.blob(b"only in b\n").unwrap());

        let mut sink = Collect::default();
        let summary = run(&config(&fixture, 10, 2), &mut sink, &ProgressBar::hidden()).unwrap();
        assert_eq!(sink.ids, vec![c, a]);
        assert_eq!(sink.failures, vec![b]);
        assert_eq!(summary.walked, 3);
        assert_eq!(summary.failed, 1);

        let mut csv = CsvSink::new(Vec::new()).unwrap();
        run(&config(&fixture, 10, 2), &mut csv, &ProgressBar::hidden()).unwrap();
        assert_eq!(csv.rows(), 2);
        assert_eq!(csv.skipped(), 1);
        let text = String::from_utf8(csv.get_ref().clone()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(!text.contains(&b.to_string()));
    }

    #[test]
    fn classifier_panic_becomes_failed_outcome() {
        let id = Oid::from_str("3333333333333333333333333333333333333333").unwrap();
        let reasons = [
            guarded(id, || panic!("hunk out of range")),
            guarded(id, || panic!("line {} out of range", 7)),
        ];
        for (outcome, expected) in reasons.into_iter().zip(["hunk out of range", "line 7 out of range"]) {
            match outcome {
                Outcome::Failed(failure) => {
                    assert_eq!(failure.id, id);
                    assert_eq!(failure.attempts, 1);
                    assert_eq!(failure.reason, format!("classifier panicked: {expected}"));
                }
                Outcome::Analyzed(_) => panic!("panic was not contained"),
            }
        }
    }

    #[test]
    fn progress_length_matches_walkable_history() {
        let fixture = Fixture::new();
        fixture.linear(3);
        let bar = ProgressBar::hidden();
        run(&config(&fixture, 10, 1), &mut Collect::default(), &bar).unwrap();
        assert_eq!(bar.length(), Some(3));
        assert_eq!(bar.position(), 3);
    }
}
