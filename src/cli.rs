// src/cli.rs

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the git repository to analyze
    #[arg(short, long, value_parser = existing_dir)]
    pub repo: PathBuf,

    /// CSV file to write, one row per analyzed commit
    #[arg(short, long, default_value = "output.csv")]
    pub output: PathBuf,

    /// Maximum number of commits to analyze, counted from HEAD
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_commits: u64,

    /// Commit traversal order
    #[arg(long, value_enum, default_value_t = WalkOrder::Time)]
    pub order: WalkOrder,

    /// Number of classifier workers, each with its own repository handle
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub workers: u16,

    /// Analyze a single commit instead of walking history
    #[arg(long)]
    pub commit: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Debug, Copy, Default, PartialEq, Eq)]
pub enum WalkOrder {
    /// Newest first by commit time
    #[default]
    Time,
    /// Children before parents, ties broken by commit time
    Topological,
}

fn existing_dir(raw: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(raw);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("{} is not a directory", path.display()))
    }
}
