// src/fixture.rs

//! Throwaway repositories with hand-picked authors and timestamps.

use git2::{FileMode, Oid, Repository, Signature, Time};
use std::path::Path;
use tempfile::TempDir;

pub const BASE: i64 = 1_600_000_000;
pub const DAY: i64 = 86_400;

pub const ALICE: (&str, &str) = ("Alice", "alice@example.com");
pub const BOB: (&str, &str) = ("Bob", "bob@example.com");

pub struct Fixture {
    dir: TempDir,
    pub repo: Repository,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        Fixture { dir, repo }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Builds a flat tree holding exactly `files`.
    pub fn tree(&self, files: &[(&str, &str)]) -> Oid {
        self.tree_with_gitlink(files, None)
    }

    pub fn tree_with_gitlink(&self, files: &[(&str, &str)], gitlink: Option<(&str, Oid)>) -> Oid {
        let mut builder = self.repo.treebuilder(None).unwrap();
        for (name, content) in files {
            let blob = self.repo.blob(content.as_bytes()).unwrap();
            builder.insert(*name, blob, FileMode::Blob.into()).unwrap();
        }
        if let Some((name, target)) = gitlink {
            builder.insert(name, target, FileMode::Commit.into()).unwrap();
        }
        builder.write().unwrap()
    }

    /// Commits `tree` on top of `parents` and moves `main` (and HEAD) to it.
    pub fn commit(
        &self,
        parents: &[Oid],
        tree: Oid,
        author: (&str, &str),
        when: i64,
        message: &str,
    ) -> Oid {
        let sig = Signature::new(author.0, author.1, &Time::new(when, 0)).unwrap();
        let tree = self.repo.find_tree(tree).unwrap();
        let parents: Vec<_> = parents
            .iter()
            .map(|id| self.repo.find_commit(*id).unwrap())
            .collect();
        let parent_refs: Vec<_> = parents.iter().collect();
        let id = self
            .repo
            .commit(None, &sig, &sig, message, &tree, &parent_refs)
            .unwrap();
        self.repo
            .reference("refs/heads/main", id, true, "fixture")
            .unwrap();
        self.repo.set_head("refs/heads/main").unwrap();
        id
    }

    pub fn snapshot(
        &self,
        parents: &[Oid],
        files: &[(&str, &str)],
        author: (&str, &str),
        when: i64,
        message: &str,
    ) -> Oid {
        let tree = self.tree(files);
        self.commit(parents, tree, author, when, message)
    }

    /// A linear history of `count` commits, one day apart, each touching `log.txt`.
    pub fn linear(&self, count: usize) -> Vec<Oid> {
        let mut ids: Vec<Oid> = Vec::with_capacity(count);
        let mut content = String::new();
        for i in 0..count {
            content.push_str(&format!("entry {i}\n"));
            let parents: Vec<Oid> = ids.last().copied().into_iter().collect();
            let id = self.snapshot(
                &parents,
                &[("log.txt", content.as_str())],
                ALICE,
                BASE + i as i64 * DAY,
                &format!("commit {i}"),
            );
            ids.push(id);
        }
        ids
    }

    /// Deletes the loose object `id`, leaving a hole in the object database.
    pub fn drop_object(&self, id: Oid) {
        let hex = id.to_string();
        let path = self.repo.path().join("objects").join(&hex[..2]).join(&hex[2..]);
        std::fs::remove_file(path).unwrap();
    }
}

pub fn numbered_lines(count: usize) -> String {
    (1..=count).map(|i| format!("line {i}\n")).collect()
}
