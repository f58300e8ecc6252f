//! Capability interface over the version-control backend.
//!
//! The pipeline never touches git directly; everything it needs from a
//! repository goes through [`Gateway`]. [`crate::git::GitGateway`] is the
//! git2-backed implementation.

use histmine_core::{BlamedLine, CommitDescriptor, CommitId, FileDiff, MinerError, TreeEntry};

/// Read-only access to commit history, trees, diffs and blame.
///
/// Implementations must be usable from many worker threads at once.
pub trait Gateway: Send + Sync {
    /// Resolve a reference (`HEAD`, a branch, a tag or a hex id) to a commit.
    fn resolve(&self, reference: &str) -> Result<CommitId, MinerError>;

    /// Every commit reachable from `reference`, in backend order.
    fn history(&self, reference: &str) -> Result<Vec<CommitDescriptor>, MinerError>;

    /// Paths changed between two commits, without computing line-level
    /// edits. `old = None` compares against the empty tree.
    fn changed_paths(&self, old: Option<&CommitId>, new: &CommitId) -> Result<Vec<String>, MinerError>;

    /// Per-path changes and line edits between two commits.
    /// `old = None` compares against the empty tree.
    fn diff(&self, old: Option<&CommitId>, new: &CommitId) -> Result<Vec<FileDiff>, MinerError>;

    /// Every blob in a commit's full tree.
    fn tree_entries(&self, commit: &CommitId) -> Result<Vec<TreeEntry>, MinerError>;

    /// Per-line attribution of `path` as of `start`.
    ///
    /// Returns `Ok(None)` when no blame result exists, e.g. for binary,
    /// deleted or empty files.
    fn blame(&self, path: &str, start: &CommitId) -> Result<Option<Vec<BlamedLine>>, MinerError>;

    /// Raw content of `path` in `commit`, or `None` if the path is absent.
    fn file_content(&self, commit: &CommitId, path: &str) -> Result<Option<Vec<u8>>, MinerError>;
}

/// Split blob content into lines without their terminators.
///
/// A trailing newline does not produce an empty final line.
///
/// # Examples
///
/// ```
/// use histmine_pulse::gateway::split_lines;
///
/// let lines = split_lines(b"one\r\ntwo\nthree\n");
/// assert_eq!(lines, vec![&b"one"[..], &b"two"[..], &b"three"[..]]);
/// assert!(split_lines(b"").is_empty());
/// ```
pub fn split_lines(content: &[u8]) -> Vec<&[u8]> {
    if content.is_empty() {
        return Vec::new();
    }
    let body = content.strip_suffix(b"\n").unwrap_or(content);
    body.split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect()
}

/// Heuristic binary detection: a NUL byte within the first 8000 bytes.
pub fn is_binary(content: &[u8]) -> bool {
    content.iter().take(8000).any(|b| *b == 0)
}
