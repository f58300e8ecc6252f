use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Full hex object id of a commit.
///
/// Ordered lexicographically so it can serve as a deterministic tiebreak.
///
/// # Examples
///
/// ```
/// use histmine_core::CommitId;
///
/// let id = CommitId::new("3f2a9c0d5e");
/// assert_eq!(id.short(), "3f2a9c0d");
/// assert_eq!(id.to_string(), "3f2a9c0d5e");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    /// Wrap a hex object id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The full id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first eight characters, for log output.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Commit author. The email is the identity used as an ownership key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

impl Author {
    /// Build an author from name and email.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Key used to group ownership by author.
    pub fn identity(&self) -> &str {
        &self.email
    }
}

/// Immutable identity of one historical revision.
///
/// Ordered by `(timestamp, id)`, so the maximum of a set is its most recent
/// commit with a deterministic tiebreak.
///
/// # Examples
///
/// ```
/// use histmine_core::{ChangeSet, CommitId};
///
/// let a = ChangeSet::new(CommitId::new("b"), 100);
/// let b = ChangeSet::new(CommitId::new("a"), 200);
/// let c = ChangeSet::new(CommitId::new("c"), 200);
/// assert!(a < b && b < c);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    /// Commit id.
    pub id: CommitId,
    /// Committer time, unix seconds.
    pub timestamp: i64,
}

impl ChangeSet {
    pub fn new(id: CommitId, timestamp: i64) -> Self {
        Self { id, timestamp }
    }
}

impl Ord for ChangeSet {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ChangeSet {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Keep the later of `slot` and `candidate`.
fn keep_latest(slot: &mut Option<ChangeSet>, candidate: Option<&ChangeSet>) {
    if let Some(candidate) = candidate {
        if slot.as_ref().map_or(true, |current| candidate > current) {
            *slot = Some(candidate.clone());
        }
    }
}

/// A commit as yielded by history traversal.
///
/// # Examples
///
/// ```
/// use histmine_core::{Author, CommitDescriptor, CommitId};
///
/// let commit = CommitDescriptor {
///     id: CommitId::new("b1"),
///     timestamp: 1_700_000_000,
///     author: Author::new("alice", "alice@example.com"),
///     parents: vec![CommitId::new("a0")],
/// };
/// assert_eq!(commit.first_parent(), Some(&CommitId::new("a0")));
/// assert_eq!(commit.change_set().timestamp, 1_700_000_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitDescriptor {
    /// Commit id.
    pub id: CommitId,
    /// Committer time, unix seconds.
    pub timestamp: i64,
    /// Commit author.
    pub author: Author,
    /// Parent ids, first parent first.
    pub parents: Vec<CommitId>,
}

impl CommitDescriptor {
    /// The first parent, or `None` for a root commit.
    pub fn first_parent(&self) -> Option<&CommitId> {
        self.parents.first()
    }

    /// Identity of this revision.
    pub fn change_set(&self) -> ChangeSet {
        ChangeSet {
            id: self.id.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// How a path changed between two trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    /// New file.
    Added,
    /// File removed.
    Deleted,
    /// Existing file modified.
    Modified,
    /// File renamed from another path.
    Renamed {
        /// Original path before rename.
        from: String,
    },
    /// Copies, type changes and anything else the backend reports.
    Other,
}

/// Shape of a single edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditKind {
    /// Lines only added.
    Insert,
    /// Lines only removed.
    Delete,
    /// Lines removed and replaced.
    Replace,
}

/// One contiguous edit between two versions of a file.
///
/// Offsets are zero-based, half-open line indexes: `begin_old..end_old` in
/// the old content and `begin_new..end_new` in the new content.
///
/// # Examples
///
/// ```
/// use histmine_core::{Edit, EditKind};
///
/// // `@@ -3,2 +3,4 @@` with zero context lines
/// let edit = Edit::from_hunk(3, 2, 3, 4);
/// assert_eq!(edit.kind(), EditKind::Replace);
/// assert_eq!((edit.begin_new, edit.end_new), (2, 6));
///
/// // `@@ -5,0 +6,2 @@` is a pure insertion after old line 5
/// let insert = Edit::from_hunk(5, 0, 6, 2);
/// assert_eq!(insert.kind(), EditKind::Insert);
/// assert_eq!((insert.begin_old, insert.end_old), (5, 5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edit {
    pub begin_old: u32,
    pub end_old: u32,
    pub begin_new: u32,
    pub end_new: u32,
}

impl Edit {
    /// Convert a zero-context unified diff hunk header into an edit.
    ///
    /// Hunk starts are one-based, except that a side with zero lines names
    /// the line *before* the edit point.
    pub fn from_hunk(old_start: u32, old_lines: u32, new_start: u32, new_lines: u32) -> Self {
        let begin_old = if old_lines == 0 {
            old_start
        } else {
            old_start.saturating_sub(1)
        };
        let begin_new = if new_lines == 0 {
            new_start
        } else {
            new_start.saturating_sub(1)
        };
        Self {
            begin_old,
            end_old: begin_old + old_lines,
            begin_new,
            end_new: begin_new + new_lines,
        }
    }

    /// Lines removed from the old side.
    pub fn old_len(&self) -> u32 {
        self.end_old - self.begin_old
    }

    /// Lines present on the new side.
    pub fn new_len(&self) -> u32 {
        self.end_new - self.begin_new
    }

    /// Insert, delete or replace.
    pub fn kind(&self) -> EditKind {
        match (self.old_len(), self.new_len()) {
            (0, _) => EditKind::Insert,
            (_, 0) => EditKind::Delete,
            _ => EditKind::Replace,
        }
    }

    /// Range on the old side.
    pub fn old_range(&self) -> EditRange {
        EditRange::new(self.begin_old, self.end_old)
    }

    /// Range on the new side.
    pub fn new_range(&self) -> EditRange {
        EditRange::new(self.begin_new, self.end_new)
    }
}

/// Half-open span of line offsets.
///
/// # Examples
///
/// ```
/// use histmine_core::EditRange;
///
/// let merged = EditRange::merge(vec![
///     EditRange::new(10, 12),
///     EditRange::new(0, 3),
///     EditRange::new(3, 5),
///     EditRange::new(11, 15),
/// ]);
/// assert_eq!(merged, vec![EditRange::new(0, 5), EditRange::new(10, 15)]);
/// assert_eq!(EditRange::new(2, 8).intersection_len(&EditRange::new(6, 20)), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EditRange {
    pub start: u32,
    pub end: u32,
}

impl EditRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of lines shared with `other`.
    pub fn intersection_len(&self, other: &EditRange) -> u32 {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        end.saturating_sub(start)
    }

    /// Sort by start and coalesce overlapping or adjacent ranges.
    pub fn merge(mut ranges: Vec<EditRange>) -> Vec<EditRange> {
        ranges.sort();
        let mut merged: Vec<EditRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(current) if range.start <= current.end => {
                    current.end = current.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }
        merged
    }
}

/// Changes to one path between two trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDiff {
    /// Path on the new side (old path for deletions).
    pub path: String,
    /// Path on the old side; differs from `path` for renames.
    pub old_path: String,
    /// Type of change.
    pub kind: ChangeKind,
    /// Line-level edits, in file order.
    pub edits: Vec<Edit>,
}

/// A blob in a commit's tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEntry {
    /// File path relative to repo root.
    pub path: String,
    /// Blob object id; used as the file content hash.
    pub blob_id: String,
    /// Blob length in bytes.
    pub byte_size: u64,
}

/// One line of a blame result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlamedLine {
    /// Zero-based line index in the blamed content.
    pub line_index: u32,
    /// Commit that last changed this line.
    pub origin_commit: CommitId,
    /// Author of that commit.
    pub origin_author: Author,
    /// Committer time of the origin commit, unix seconds.
    pub origin_timestamp: i64,
    /// Line length in bytes, without the terminator.
    pub byte_length: u64,
}

impl BlamedLine {
    /// The origin commit with its timestamp.
    pub fn origin(&self) -> ChangeSet {
        ChangeSet::new(self.origin_commit.clone(), self.origin_timestamp)
    }
}

/// Change metrics for a single commit.
///
/// # Examples
///
/// ```
/// use histmine_core::{Author, CommitId, CommitMetrics};
///
/// let m = CommitMetrics::empty(
///     CommitId::new("c3"),
///     1_700_000_000,
///     Author::new("alice", "alice@example.com"),
/// );
/// assert_eq!(m.changes, 0);
/// assert!(m.stability.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitMetrics {
    pub commit_id: CommitId,
    /// Committer time, unix seconds.
    pub timestamp: i64,
    pub author: Author,
    pub files_added: u32,
    pub files_deleted: u32,
    pub files_modified: u32,
    pub lines_added: u64,
    pub lines_deleted: u64,
    /// Removed plus added length of replace edits.
    pub lines_modified: u64,
    /// `lines_added + lines_deleted + lines_modified`.
    pub changes: u64,
    /// Sum of blob sizes in the commit's full tree.
    pub project_size: u64,
    /// Fraction of changed lines surviving the following window; `None`
    /// when undefined.
    pub stability: Option<f64>,
    /// Detailed diffing was skipped because the commit was too large.
    pub oversized: bool,
}

impl CommitMetrics {
    /// Metrics with every counter at zero.
    pub fn empty(commit_id: CommitId, timestamp: i64, author: Author) -> Self {
        Self {
            commit_id,
            timestamp,
            author,
            files_added: 0,
            files_deleted: 0,
            files_modified: 0,
            lines_added: 0,
            lines_deleted: 0,
            lines_modified: 0,
            changes: 0,
            project_size: 0,
            stability: None,
            oversized: false,
        }
    }
}

/// Lines and bytes attributed to one author within a scope.
///
/// # Examples
///
/// ```
/// use histmine_core::{AuthorLineOwnership, CommitId};
///
/// let mut a = AuthorLineOwnership::new("alice@example.com");
/// a.add_line(&CommitId::new("c1"), 12);
/// let mut b = AuthorLineOwnership::new("alice@example.com");
/// b.add_line(&CommitId::new("c2"), 30);
/// a.merge(&b);
/// assert_eq!(a.line_count, 2);
/// assert_eq!(a.byte_size, 42);
/// assert_eq!(a.commit_ids.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorLineOwnership {
    /// Author identity (email).
    pub author: String,
    /// Commits that contributed the attributed lines.
    pub commit_ids: BTreeSet<CommitId>,
    pub line_count: u64,
    pub byte_size: u64,
}

impl AuthorLineOwnership {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            commit_ids: BTreeSet::new(),
            line_count: 0,
            byte_size: 0,
        }
    }

    /// Attribute one line.
    pub fn add_line(&mut self, commit: &CommitId, byte_length: u64) {
        self.commit_ids.insert(commit.clone());
        self.line_count += 1;
        self.byte_size += byte_length;
    }

    /// Additive, commutative merge.
    pub fn merge(&mut self, other: &AuthorLineOwnership) {
        self.commit_ids.extend(other.commit_ids.iter().cloned());
        self.line_count += other.line_count;
        self.byte_size += other.byte_size;
    }
}

/// Merge `other` into `into`, author by author.
pub fn merge_author_maps(
    into: &mut BTreeMap<String, AuthorLineOwnership>,
    other: &BTreeMap<String, AuthorLineOwnership>,
) {
    for (author, ownership) in other {
        into.entry(author.clone())
            .or_insert_with(|| AuthorLineOwnership::new(author.clone()))
            .merge(ownership);
    }
}

/// Author with the most lines. Ties go to the lexicographically smallest
/// identity.
pub fn dominant_author(
    per_author: &BTreeMap<String, AuthorLineOwnership>,
) -> Option<&AuthorLineOwnership> {
    // BTreeMap iterates identities ascending; only a strictly larger count
    // replaces the current best.
    per_author.values().fold(None, |best, candidate| match best {
        Some(b) if b.line_count >= candidate.line_count => Some(b),
        _ => Some(candidate),
    })
}

/// Line ownership of one file, built from a single blame pass.
///
/// The sum of `per_author` line counts always equals `line_count`.
///
/// # Examples
///
/// ```
/// use histmine_core::{Author, CommitId, FileOwnership};
///
/// let mut file = FileOwnership::new("src/lib.rs");
/// let alice = Author::new("alice", "alice@example.com");
/// for _ in 0..5 {
///     file.add_line(&alice, &CommitId::new("c1"), 10);
/// }
/// assert_eq!(file.line_count, 5);
/// assert_eq!(file.owner().unwrap().author, "alice@example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOwnership {
    pub path: String,
    pub line_count: u64,
    pub byte_size: u64,
    pub commit_ids: BTreeSet<CommitId>,
    pub per_author: BTreeMap<String, AuthorLineOwnership>,
    /// Most recent commit that still owns a line of this file.
    #[serde(default)]
    pub latest_commit: Option<ChangeSet>,
}

impl FileOwnership {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            line_count: 0,
            byte_size: 0,
            commit_ids: BTreeSet::new(),
            per_author: BTreeMap::new(),
            latest_commit: None,
        }
    }

    /// Attribute one blamed line, tracking its origin as a candidate for
    /// [`FileOwnership::latest_commit`].
    pub fn add_blamed_line(&mut self, line: &BlamedLine) {
        self.add_line(&line.origin_author, &line.origin_commit, line.byte_length);
        keep_latest(&mut self.latest_commit, Some(&line.origin()));
    }

    /// Attribute one blamed line to `author`.
    pub fn add_line(&mut self, author: &Author, commit: &CommitId, byte_length: u64) {
        self.per_author
            .entry(author.identity().to_string())
            .or_insert_with(|| AuthorLineOwnership::new(author.identity()))
            .add_line(commit, byte_length);
        self.commit_ids.insert(commit.clone());
        self.line_count += 1;
        self.byte_size += byte_length;
    }

    /// Author with the most lines in this file.
    pub fn owner(&self) -> Option<&AuthorLineOwnership> {
        dominant_author(&self.per_author)
    }
}

/// Line ownership of a directory, folded from every file beneath it.
///
/// # Examples
///
/// ```
/// use histmine_core::{Author, CommitId, FileOwnership, PackageOwnership};
///
/// let mut file = FileOwnership::new("src/a.rs");
/// file.add_line(&Author::new("bob", "bob@example.com"), &CommitId::new("c1"), 4);
///
/// let mut pkg = PackageOwnership::new("src", "src");
/// pkg.add_file(&file);
/// assert_eq!(pkg.line_count, 1);
/// assert!(pkg.files.contains("src/a.rs"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageOwnership {
    /// Directory path relative to repo root; `""` for the project root.
    pub path: String,
    /// Last path segment, or the project name for the root.
    pub name: String,
    pub line_count: u64,
    pub byte_size: u64,
    pub commit_ids: BTreeSet<CommitId>,
    pub per_author: BTreeMap<String, AuthorLineOwnership>,
    /// Every file beneath this directory.
    pub files: BTreeSet<String>,
    /// Most recent commit among the files' latest commits.
    #[serde(default)]
    pub latest_commit: Option<ChangeSet>,
}

impl PackageOwnership {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            line_count: 0,
            byte_size: 0,
            commit_ids: BTreeSet::new(),
            per_author: BTreeMap::new(),
            files: BTreeSet::new(),
            latest_commit: None,
        }
    }

    /// Fold one file into this package.
    pub fn add_file(&mut self, file: &FileOwnership) {
        if !self.files.insert(file.path.clone()) {
            return;
        }
        self.line_count += file.line_count;
        self.byte_size += file.byte_size;
        self.commit_ids.extend(file.commit_ids.iter().cloned());
        merge_author_maps(&mut self.per_author, &file.per_author);
        keep_latest(&mut self.latest_commit, file.latest_commit.as_ref());
    }

    /// Merge a fragment built from a disjoint set of files.
    pub fn merge(&mut self, other: &PackageOwnership) {
        self.line_count += other.line_count;
        self.byte_size += other.byte_size;
        self.commit_ids.extend(other.commit_ids.iter().cloned());
        self.files.extend(other.files.iter().cloned());
        merge_author_maps(&mut self.per_author, &other.per_author);
        keep_latest(&mut self.latest_commit, other.latest_commit.as_ref());
    }

    /// Author with the most lines in this package.
    pub fn owner(&self) -> Option<&AuthorLineOwnership> {
        dominant_author(&self.per_author)
    }
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use histmine_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("unknown output format: {s}")),
        }
    }
}
