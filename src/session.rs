// src/session.rs

use git2::Repository;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to open git repository at {path}: {source}")]
    Open { path: PathBuf, source: git2::Error },

    #[error("cannot resolve HEAD of {path}: {source}")]
    Head { path: PathBuf, source: git2::Error },
}

/// A repository handle owned by exactly one pipeline stage.
///
/// libgit2 handles are not safe to share, so every stage opens its own and
/// drops it when the stage ends.
pub struct Session {
    repo: Repository,
}

impl Session {
    /// Opens the repository and checks that HEAD points at a commit.
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        let repo = Repository::open(path).map_err(|source| SessionError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let head = repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map(|commit| commit.id())
            .map_err(|source| SessionError::Head {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), %head, "opened repository session");
        Ok(Session { repo })
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }
}
