// src/walker.rs

use crate::cli::WalkOrder;
use git2::{Oid, Repository, Revwalk, Sort};

impl WalkOrder {
    fn sorting(self) -> Sort {
        match self {
            WalkOrder::Time => Sort::TIME,
            WalkOrder::Topological => Sort::TOPOLOGICAL | Sort::TIME,
        }
    }
}

/// Commit ids reachable from HEAD, capped at `limit`.
///
/// Single pass: once exhausted (or capped) it stays exhausted.
pub struct CommitWalker<'repo> {
    revwalk: Revwalk<'repo>,
    remaining: usize,
}

impl<'repo> CommitWalker<'repo> {
    pub fn new(repo: &'repo Repository, order: WalkOrder, limit: usize) -> Result<Self, git2::Error> {
        let mut revwalk = repo.revwalk()?;
        revwalk.set_sorting(order.sorting())?;
        revwalk.push_head()?;
        Ok(CommitWalker {
            revwalk,
            remaining: limit,
        })
    }
}

impl Iterator for CommitWalker<'_> {
    type Item = Result<Oid, git2::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let next = self.revwalk.next()?;
        self.remaining -= 1;
        if next.is_err() {
            // A broken walk ends the stream after reporting once.
            self.remaining = 0;
        }
        Some(next)
    }
}
