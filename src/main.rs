// src/main.rs

mod analyzer;
mod cli;
#[cfg(test)]
mod fixture;
mod model;
mod pipeline;
mod session;
mod sink;
mod walker;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let start_time = Instant::now();
    info!("Started");

    match &args.commit {
        Some(rev) => analyze_one(&args, rev)?,
        None => analyze_history(&args)?,
    }

    info!("Finished");
    println!("Total time: {:.2?}", start_time.elapsed());
    Ok(())
}

fn analyze_history(args: &Args) -> Result<()> {
    let config = pipeline::PipelineConfig {
        repo_path: args.repo.clone(),
        max_commits: usize::try_from(args.max_commits).unwrap_or(usize::MAX),
        order: args.order,
        workers: usize::from(args.workers),
    };
    let mut sink = sink::CsvSink::create(&args.output)?;

    let bar = ProgressBar::new(args.max_commits);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .context("invalid progress template")?,
    );
    let result = pipeline::run(&config, &mut sink, &bar);
    bar.finish_and_clear();
    let summary = result?;

    println!(
        "Analyzed {} commits ({} skipped) in {:.2?}; {} lines fell in the 1-3 month bucket.",
        summary.analyzed, summary.failed, summary.elapsed, summary.legacy_1_3mo
    );
    println!("Wrote {} rows to {}", sink.rows(), args.output.display());
    if sink.skipped() > 0 {
        warn!(skipped = sink.skipped(), "some commits could not be analyzed and have no row");
    }
    Ok(())
}

fn analyze_one(args: &Args, rev: &str) -> Result<()> {
    let session = session::Session::open(&args.repo)?;
    let commit = session
        .repo()
        .revparse_single(rev)
        .and_then(|object| object.peel_to_commit())
        .with_context(|| format!("{rev} does not name a commit"))?;

    let stats = analyzer::Classifier::new(session.repo())
        .analyze(commit.id())
        .with_context(|| format!("cannot analyze {}", commit.id()))?;
    info!(commit = %stats.id, ?stats, "analyzed single commit");

    let mut sink = sink::CsvSink::create(&args.output)?;
    sink::RecordSink::write_stats(&mut sink, &stats)?;
    println!("Wrote {} to {}", stats.id, args.output.display());
    Ok(())
}
