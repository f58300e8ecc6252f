//! Scripted in-memory gateway for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use histmine_core::{
    Author, BlamedLine, ChangeKind, CommitDescriptor, CommitId, Edit, FileDiff, MinerError,
    TreeEntry,
};

use crate::gateway::Gateway;

pub fn alice() -> Author {
    Author::new("alice", "alice@example.com")
}

pub fn bob() -> Author {
    Author::new("bob", "bob@example.com")
}

pub fn added(path: &str, edits: Vec<Edit>) -> FileDiff {
    file_diff(path, ChangeKind::Added, edits)
}

pub fn modified(path: &str, edits: Vec<Edit>) -> FileDiff {
    file_diff(path, ChangeKind::Modified, edits)
}

pub fn deleted(path: &str, edits: Vec<Edit>) -> FileDiff {
    file_diff(path, ChangeKind::Deleted, edits)
}

pub fn renamed(from: &str, to: &str, edits: Vec<Edit>) -> FileDiff {
    FileDiff {
        path: to.to_string(),
        old_path: from.to_string(),
        kind: ChangeKind::Renamed {
            from: from.to_string(),
        },
        edits,
    }
}

fn file_diff(path: &str, kind: ChangeKind, edits: Vec<Edit>) -> FileDiff {
    FileDiff {
        path: path.to_string(),
        old_path: path.to_string(),
        kind,
        edits,
    }
}

pub fn blamed(line_index: u32, author: &Author, commit: &str, byte_length: u64) -> BlamedLine {
    blamed_at(line_index, author, commit, 0, byte_length)
}

pub fn blamed_at(
    line_index: u32,
    author: &Author,
    commit: &str,
    timestamp: i64,
    byte_length: u64,
) -> BlamedLine {
    BlamedLine {
        line_index,
        origin_commit: CommitId::new(commit),
        origin_author: author.clone(),
        origin_timestamp: timestamp,
        byte_length,
    }
}

type DiffKey = (Option<String>, String);

/// Gateway answering from scripted commits, diffs, trees and blame.
///
/// Unscripted diffs between known commits are empty; unknown commits are
/// corrupt history. Every call is counted per method and per commit.
#[derive(Default)]
pub struct MockGateway {
    commits: Vec<CommitDescriptor>,
    diffs: HashMap<DiffKey, Vec<FileDiff>>,
    trees: HashMap<String, Vec<TreeEntry>>,
    blames: HashMap<String, Vec<BlamedLine>>,
    contents: HashMap<(String, String), Vec<u8>>,
    panic_on: Option<String>,
    fail_on: Option<String>,
    unavailable: bool,
    calls: Mutex<BTreeMap<&'static str, usize>>,
    touched: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit; the last one added is `HEAD`.
    pub fn add_commit(&mut self, id: &str, timestamp: i64, author: Author, parents: &[&str]) {
        self.commits.push(CommitDescriptor {
            id: CommitId::new(id),
            timestamp,
            author,
            parents: parents.iter().map(|p| CommitId::new(*p)).collect(),
        });
    }

    pub fn descriptor(&self, id: &str) -> CommitDescriptor {
        self.commits
            .iter()
            .find(|c| c.id.as_str() == id)
            .cloned()
            .unwrap_or_else(|| panic!("unknown commit {id}"))
    }

    pub fn set_diff(&mut self, old: Option<&str>, new: &str, files: Vec<FileDiff>) {
        self.diffs
            .insert((old.map(str::to_string), new.to_string()), files);
    }

    pub fn set_tree(&mut self, commit: &str, entries: &[(&str, &str, u64)]) {
        let entries = entries
            .iter()
            .map(|(path, blob, size)| TreeEntry {
                path: path.to_string(),
                blob_id: blob.to_string(),
                byte_size: *size,
            })
            .collect();
        self.trees.insert(commit.to_string(), entries);
    }

    pub fn set_blame(&mut self, path: &str, lines: Vec<BlamedLine>) {
        self.blames.insert(path.to_string(), lines);
    }

    pub fn set_content(&mut self, commit: &str, path: &str, content: &str) {
        self.contents
            .insert((commit.to_string(), path.to_string()), content.as_bytes().to_vec());
    }

    /// Panic whenever `target` is diffed as a commit or blamed as a path.
    pub fn panic_on(&mut self, target: &str) {
        self.panic_on = Some(target.to_string());
    }

    /// Fail with a transient error whenever `target` is diffed or blamed.
    pub fn fail_on(&mut self, target: &str) {
        self.fail_on = Some(target.to_string());
    }

    /// Make reference resolution fail.
    pub fn make_unavailable(&mut self) {
        self.unavailable = true;
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(method).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Whether any diff, count or tree call targeted `commit`.
    pub fn touched(&self, commit: &str) -> bool {
        self.touched
            .lock()
            .map(|t| t.iter().any(|c| c == commit))
            .unwrap_or(false)
    }

    fn count(&self, method: &'static str, target: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(method).or_default() += 1;
        }
        if let Ok(mut touched) = self.touched.lock() {
            touched.push(target.to_string());
        }
    }

    fn check(&self, target: &str) -> Result<(), MinerError> {
        if self.panic_on.as_deref() == Some(target) {
            panic!("scripted panic on {target}");
        }
        if self.fail_on.as_deref() == Some(target) {
            return Err(MinerError::Transient(format!("scripted failure on {target}")));
        }
        Ok(())
    }

    fn known(&self, id: &str) -> Result<(), MinerError> {
        if self.commits.iter().any(|c| c.id.as_str() == id) {
            Ok(())
        } else {
            Err(MinerError::CorruptHistory {
                commit: id.to_string(),
                reason: "unknown commit".into(),
            })
        }
    }

    fn scripted_diff(&self, old: Option<&CommitId>, new: &CommitId) -> Result<Vec<FileDiff>, MinerError> {
        if let Some(old) = old {
            self.known(old.as_str())?;
        }
        self.known(new.as_str())?;
        self.check(new.as_str())?;
        let key = (old.map(|o| o.to_string()), new.to_string());
        Ok(self.diffs.get(&key).cloned().unwrap_or_default())
    }
}

impl Gateway for MockGateway {
    fn resolve(&self, reference: &str) -> Result<CommitId, MinerError> {
        if self.unavailable {
            return Err(MinerError::CorruptHistory {
                commit: reference.to_string(),
                reason: "repository is gone".into(),
            });
        }
        if reference == "HEAD" {
            return self.commits.last().map(|c| c.id.clone()).ok_or_else(|| {
                MinerError::CorruptHistory {
                    commit: reference.to_string(),
                    reason: "empty history".into(),
                }
            });
        }
        self.known(reference)?;
        Ok(CommitId::new(reference))
    }

    fn history(&self, _reference: &str) -> Result<Vec<CommitDescriptor>, MinerError> {
        Ok(self.commits.clone())
    }

    fn changed_paths(&self, old: Option<&CommitId>, new: &CommitId) -> Result<Vec<String>, MinerError> {
        self.count("changed_paths", new.as_str());
        Ok(self
            .scripted_diff(old, new)?
            .into_iter()
            .map(|file| file.path)
            .collect())
    }

    fn diff(&self, old: Option<&CommitId>, new: &CommitId) -> Result<Vec<FileDiff>, MinerError> {
        self.count("diff", new.as_str());
        self.scripted_diff(old, new)
    }

    fn tree_entries(&self, commit: &CommitId) -> Result<Vec<TreeEntry>, MinerError> {
        self.count("tree_entries", commit.as_str());
        self.known(commit.as_str())?;
        Ok(self.trees.get(commit.as_str()).cloned().unwrap_or_default())
    }

    fn blame(&self, path: &str, _start: &CommitId) -> Result<Option<Vec<BlamedLine>>, MinerError> {
        self.count("blame", path);
        self.check(path)?;
        Ok(self.blames.get(path).cloned())
    }

    fn file_content(&self, commit: &CommitId, path: &str) -> Result<Option<Vec<u8>>, MinerError> {
        self.count("file_content", path);
        Ok(self
            .contents
            .get(&(commit.to_string(), path.to_string()))
            .cloned())
    }
}
