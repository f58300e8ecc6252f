//! Git history extraction via git2.
//!
//! Implements [`Gateway`] on top of a local repository: revision walks,
//! zero-context tree diffs, tree listings and blame.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use git2::{
    BlameOptions, Commit, Diff, DiffFindOptions, DiffOptions, ErrorCode, ObjectType, Oid, Patch,
    Repository, Sort, TreeWalkMode, TreeWalkResult,
};
use histmine_core::{
    Author, BlamedLine, ChangeKind, CommitDescriptor, CommitId, Edit, FileDiff, MinerError,
    RepositoryConfig, TreeEntry,
};
use tracing::debug;

use crate::gateway::{is_binary, split_lines, Gateway};

/// git2-backed [`Gateway`].
///
/// `git2::Repository` is not `Sync`, so the gateway keeps a small pool of
/// handles: each call checks one out, opening a new handle when the pool is
/// empty, and returns it afterwards. Concurrent workers therefore never share
/// a handle.
///
/// # Examples
///
/// ```no_run
/// use histmine_core::RepositoryConfig;
/// use histmine_pulse::gateway::Gateway;
/// use histmine_pulse::git::GitGateway;
///
/// let gateway = GitGateway::open(RepositoryConfig::default()).unwrap();
/// let head = gateway.resolve("HEAD").unwrap();
/// println!("HEAD is {}", head.short());
/// ```
pub struct GitGateway {
    path: PathBuf,
    handles: Mutex<Vec<Repository>>,
}

impl GitGateway {
    /// Open the repository described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`MinerError::RepositoryUnavailable`] if the repository cannot
    /// be opened.
    pub fn open(config: RepositoryConfig) -> Result<Self, MinerError> {
        let repo = Repository::open(&config.path).map_err(|e| {
            MinerError::RepositoryUnavailable(format!(
                "failed to open repository at {}: {e}",
                config.path.display()
            ))
        })?;
        debug!(target: "histmine::git", path = %config.path.display(), "opened repository");
        Ok(Self {
            path: config.path,
            handles: Mutex::new(vec![repo]),
        })
    }

    /// Repository path this gateway reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_repo<T>(
        &self,
        f: impl FnOnce(&Repository) -> Result<T, MinerError>,
    ) -> Result<T, MinerError> {
        let pooled = self.handles.lock().ok().and_then(|mut pool| pool.pop());
        let repo = match pooled {
            Some(repo) => repo,
            None => Repository::open(&self.path)
                .map_err(|e| MinerError::Transient(format!("failed to open repository: {e}")))?,
        };
        let result = f(&repo);
        if let Ok(mut pool) = self.handles.lock() {
            pool.push(repo);
        }
        result
    }
}

impl Gateway for GitGateway {
    fn resolve(&self, reference: &str) -> Result<CommitId, MinerError> {
        self.with_repo(|repo| {
            let commit = repo
                .revparse_single(reference)
                .and_then(|obj| obj.peel_to_commit())
                .map_err(|e| MinerError::CorruptHistory {
                    commit: reference.to_string(),
                    reason: format!("failed to resolve reference: {e}"),
                })?;
            Ok(CommitId::new(commit.id().to_string()))
        })
    }

    fn history(&self, reference: &str) -> Result<Vec<CommitDescriptor>, MinerError> {
        self.with_repo(|repo| {
            let start = repo
                .revparse_single(reference)
                .and_then(|obj| obj.peel_to_commit())
                .map_err(|e| MinerError::CorruptHistory {
                    commit: reference.to_string(),
                    reason: format!("failed to resolve reference: {e}"),
                })?;

            let mut revwalk = repo
                .revwalk()
                .map_err(|e| MinerError::Transient(format!("failed to create revwalk: {e}")))?;
            revwalk.set_sorting(Sort::TIME).ok();
            revwalk
                .push(start.id())
                .map_err(|e| MinerError::Transient(format!("failed to push oid: {e}")))?;

            let mut commits = Vec::new();
            for oid_result in revwalk {
                let oid =
                    oid_result.map_err(|e| MinerError::Transient(format!("revwalk error: {e}")))?;
                let commit = repo.find_commit(oid).map_err(|e| MinerError::CorruptHistory {
                    commit: oid.to_string(),
                    reason: format!("failed to find commit: {e}"),
                })?;
                commits.push(describe(&commit));
            }
            Ok(commits)
        })
    }

    fn changed_paths(&self, old: Option<&CommitId>, new: &CommitId) -> Result<Vec<String>, MinerError> {
        self.with_repo(|repo| {
            let diff = tree_diff(repo, old, new, false)?;
            Ok(diff
                .deltas()
                .map(|delta| {
                    let path = delta_path(delta.new_file().path());
                    if path.is_empty() {
                        delta_path(delta.old_file().path())
                    } else {
                        path
                    }
                })
                .filter(|path| !path.is_empty())
                .collect())
        })
    }

    fn diff(&self, old: Option<&CommitId>, new: &CommitId) -> Result<Vec<FileDiff>, MinerError> {
        self.with_repo(|repo| {
            let diff = tree_diff(repo, old, new, true)?;
            let mut files = Vec::with_capacity(diff.deltas().len());

            for (idx, delta) in diff.deltas().enumerate() {
                let old_path = delta_path(delta.old_file().path());
                let new_path = delta_path(delta.new_file().path());

                let (path, kind) = match delta.status() {
                    git2::Delta::Added => (new_path.clone(), ChangeKind::Added),
                    // Use old path for deleted files
                    git2::Delta::Deleted => (old_path.clone(), ChangeKind::Deleted),
                    git2::Delta::Modified => (new_path.clone(), ChangeKind::Modified),
                    git2::Delta::Renamed => (
                        new_path.clone(),
                        ChangeKind::Renamed {
                            from: old_path.clone(),
                        },
                    ),
                    _ => (new_path.clone(), ChangeKind::Other),
                };
                if path.is_empty() {
                    continue;
                }

                let mut edits = Vec::new();
                let patch = Patch::from_diff(&diff, idx)
                    .map_err(|e| MinerError::Transient(format!("failed to build patch: {e}")))?;
                if let Some(patch) = patch {
                    for hunk_idx in 0..patch.num_hunks() {
                        let (hunk, _) = patch.hunk(hunk_idx).map_err(|e| {
                            MinerError::Transient(format!("failed to read hunk: {e}"))
                        })?;
                        edits.push(Edit::from_hunk(
                            hunk.old_start(),
                            hunk.old_lines(),
                            hunk.new_start(),
                            hunk.new_lines(),
                        ));
                    }
                }

                let old_path = if old_path.is_empty() {
                    path.clone()
                } else {
                    old_path
                };
                files.push(FileDiff {
                    path,
                    old_path,
                    kind,
                    edits,
                });
            }

            Ok(files)
        })
    }

    fn tree_entries(&self, commit: &CommitId) -> Result<Vec<TreeEntry>, MinerError> {
        self.with_repo(|repo| {
            let tree = find_commit(repo, commit)?
                .tree()
                .map_err(|e| MinerError::Transient(format!("failed to get commit tree: {e}")))?;
            let odb = repo
                .odb()
                .map_err(|e| MinerError::Transient(format!("failed to open object db: {e}")))?;

            let mut entries = Vec::new();
            let mut failure = None;
            let walked = tree.walk(TreeWalkMode::PreOrder, |root, entry| {
                if entry.kind() != Some(ObjectType::Blob) {
                    return TreeWalkResult::Ok;
                }
                let Some(name) = entry.name() else {
                    return TreeWalkResult::Ok;
                };
                match odb.read_header(entry.id()) {
                    Ok((size, _)) => {
                        entries.push(TreeEntry {
                            path: format!("{root}{name}"),
                            blob_id: entry.id().to_string(),
                            byte_size: size as u64,
                        });
                        TreeWalkResult::Ok
                    }
                    Err(e) => {
                        failure = Some(e);
                        TreeWalkResult::Abort
                    }
                }
            });
            if let Some(e) = failure {
                return Err(MinerError::Transient(format!("failed to read blob header: {e}")));
            }
            walked.map_err(|e| MinerError::Transient(format!("failed to walk tree: {e}")))?;
            Ok(entries)
        })
    }

    fn blame(&self, path: &str, start: &CommitId) -> Result<Option<Vec<BlamedLine>>, MinerError> {
        self.with_repo(|repo| {
            let Some(content) = read_blob(repo, start, path)? else {
                return Ok(None);
            };
            if content.is_empty() || is_binary(&content) {
                return Ok(None);
            }
            let line_lengths: Vec<u64> = split_lines(&content)
                .iter()
                .map(|line| line.len() as u64)
                .collect();

            let mut opts = BlameOptions::new();
            opts.newest_commit(parse_oid(start)?);
            let blame = match repo.blame_file(Path::new(path), Some(&mut opts)) {
                Ok(blame) => blame,
                Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
                Err(e) => {
                    return Err(MinerError::Transient(format!(
                        "failed to blame {path}: {e}"
                    )))
                }
            };

            let mut lines = Vec::with_capacity(line_lengths.len());
            let mut committed_at: HashMap<Oid, i64> = HashMap::new();
            for hunk in blame.iter() {
                let origin_commit = CommitId::new(hunk.final_commit_id().to_string());
                let signature = hunk.final_signature();
                let origin_timestamp = *committed_at
                    .entry(hunk.final_commit_id())
                    .or_insert_with(|| {
                        repo.find_commit(hunk.final_commit_id())
                            .map(|c| c.committer().when().seconds())
                            .unwrap_or_else(|_| signature.when().seconds())
                    });
                let origin_author = Author::new(
                    signature.name().unwrap_or("unknown"),
                    signature.email().unwrap_or("unknown"),
                );
                let first = hunk.final_start_line().saturating_sub(1);
                for offset in 0..hunk.lines_in_hunk() {
                    let line_index = first + offset;
                    lines.push(BlamedLine {
                        line_index: line_index as u32,
                        origin_commit: origin_commit.clone(),
                        origin_author: origin_author.clone(),
                        origin_timestamp,
                        byte_length: line_lengths.get(line_index).copied().unwrap_or(0),
                    });
                }
            }
            Ok(Some(lines))
        })
    }

    fn file_content(&self, commit: &CommitId, path: &str) -> Result<Option<Vec<u8>>, MinerError> {
        self.with_repo(|repo| read_blob(repo, commit, path))
    }
}

fn describe(commit: &Commit) -> CommitDescriptor {
    let author = commit.author();
    CommitDescriptor {
        id: CommitId::new(commit.id().to_string()),
        timestamp: commit.committer().when().seconds(),
        author: Author::new(
            author.name().unwrap_or("unknown"),
            author.email().unwrap_or("unknown"),
        ),
        parents: commit
            .parent_ids()
            .map(|oid| CommitId::new(oid.to_string()))
            .collect(),
    }
}

fn parse_oid(id: &CommitId) -> Result<Oid, MinerError> {
    Oid::from_str(id.as_str()).map_err(|e| MinerError::CorruptHistory {
        commit: id.to_string(),
        reason: format!("invalid object id: {e}"),
    })
}

fn find_commit<'r>(repo: &'r Repository, id: &CommitId) -> Result<Commit<'r>, MinerError> {
    repo.find_commit(parse_oid(id)?)
        .map_err(|e| MinerError::CorruptHistory {
            commit: id.to_string(),
            reason: format!("failed to find commit: {e}"),
        })
}

fn tree_diff<'r>(
    repo: &'r Repository,
    old: Option<&CommitId>,
    new: &CommitId,
    detect_renames: bool,
) -> Result<Diff<'r>, MinerError> {
    let new_tree = find_commit(repo, new)?
        .tree()
        .map_err(|e| MinerError::Transient(format!("failed to get commit tree: {e}")))?;
    let old_tree = match old {
        Some(id) => Some(
            find_commit(repo, id)?
                .tree()
                .map_err(|e| MinerError::Transient(format!("failed to get parent tree: {e}")))?,
        ),
        None => None,
    };

    // Zero context so that every hunk is exactly one edit
    let mut diff_opts = DiffOptions::new();
    diff_opts.context_lines(0);
    diff_opts.interhunk_lines(0);
    let mut diff = repo
        .diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), Some(&mut diff_opts))
        .map_err(|e| MinerError::Transient(format!("failed to compute diff: {e}")))?;

    if detect_renames {
        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        diff.find_similar(Some(&mut find_opts))
            .map_err(|e| MinerError::Transient(format!("failed to find renames: {e}")))?;
    }
    Ok(diff)
}

fn read_blob(repo: &Repository, commit: &CommitId, path: &str) -> Result<Option<Vec<u8>>, MinerError> {
    let tree = find_commit(repo, commit)?
        .tree()
        .map_err(|e| MinerError::Transient(format!("failed to get commit tree: {e}")))?;
    let entry = match tree.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(MinerError::Transient(format!("failed to look up {path}: {e}"))),
    };
    if entry.kind() != Some(ObjectType::Blob) {
        return Ok(None);
    }
    let blob = repo
        .find_blob(entry.id())
        .map_err(|e| MinerError::Transient(format!("failed to read blob for {path}: {e}")))?;
    Ok(Some(blob.content().to_vec()))
}

fn delta_path(path: Option<&Path>) -> String {
    path.map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default()
}
