//! Per-commit change metrics.
//!
//! A commit is diffed against its first parent (or the empty tree for a root
//! commit). Every path is classified, every edit is bucketed by shape, and
//! the absolute size of the commit's full tree is recorded so a
//! size-over-time series can be drawn from the results.

use histmine_core::{
    ChangeKind, CommitDescriptor, CommitId, CommitMetrics, EditKind, MinerError, PathMatcher,
};
use tracing::debug;

use crate::gateway::Gateway;

/// Knobs for [`compute_commit_metrics`].
#[derive(Debug, Clone)]
pub struct MetricsOptions {
    /// Commits touching more non-excluded paths than this are not diffed
    /// line by line.
    pub max_files_per_commit: usize,
    /// Paths ignored by the ceiling, classification and edit bucketing.
    pub exclude: PathMatcher,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            max_files_per_commit: 5000,
            exclude: PathMatcher::default(),
        }
    }
}

/// Compute change metrics for one commit.
///
/// `stability` is left as `None`; it is filled in by a
/// [`crate::stability::StabilityEstimator`].
///
/// # Errors
///
/// - [`MinerError::OversizedCommit`] when the commit touches more than
///   `max_files_per_commit` paths outside the exclusion globs. Use [`oversized_record`] to keep a bare
///   record of it.
/// - [`MinerError::CorruptHistory`] when the commit or its parent cannot be
///   resolved.
/// - [`MinerError::Transient`] for other gateway read failures.
pub fn compute_commit_metrics(
    gateway: &dyn Gateway,
    commit: &CommitDescriptor,
    options: &MetricsOptions,
) -> Result<CommitMetrics, MinerError> {
    let parent = commit.first_parent();

    let touched = gateway
        .changed_paths(parent, &commit.id)?
        .iter()
        .filter(|path| !options.exclude.is_excluded(path))
        .count();
    if touched > options.max_files_per_commit {
        return Err(MinerError::OversizedCommit {
            commit: commit.id.to_string(),
            paths: touched,
            ceiling: options.max_files_per_commit,
        });
    }

    let mut metrics = CommitMetrics::empty(commit.id.clone(), commit.timestamp, commit.author.clone());

    for file in gateway.diff(parent, &commit.id)? {
        if options.exclude.is_excluded(&file.path) {
            continue;
        }
        match file.kind {
            ChangeKind::Added => metrics.files_added += 1,
            ChangeKind::Deleted => metrics.files_deleted += 1,
            ChangeKind::Modified | ChangeKind::Renamed { .. } | ChangeKind::Other => {
                metrics.files_modified += 1
            }
        }
        for edit in &file.edits {
            let old_len = u64::from(edit.old_len());
            let new_len = u64::from(edit.new_len());
            match edit.kind() {
                EditKind::Insert => metrics.lines_added += new_len,
                EditKind::Delete => metrics.lines_deleted += old_len,
                EditKind::Replace => metrics.lines_modified += old_len + new_len,
            }
        }
    }
    metrics.changes = metrics.lines_added + metrics.lines_deleted + metrics.lines_modified;
    metrics.project_size = project_size(gateway, &commit.id)?;

    debug!(
        target: "histmine::metrics",
        commit = commit.id.short(),
        files = touched,
        changes = metrics.changes,
        project_size = metrics.project_size,
        "computed commit metrics"
    );
    Ok(metrics)
}

/// Sum of blob sizes in the commit's full tree.
///
/// An empty tree is `Ok(0)`; a failed listing is an error, never zero.
pub fn project_size(gateway: &dyn Gateway, commit: &CommitId) -> Result<u64, MinerError> {
    Ok(gateway
        .tree_entries(commit)?
        .iter()
        .map(|entry| entry.byte_size)
        .sum())
}

/// Bare record for a commit that was too large to diff.
///
/// Every change counter is zero and `oversized` is set; project size is
/// still computed.
pub fn oversized_record(
    gateway: &dyn Gateway,
    commit: &CommitDescriptor,
) -> Result<CommitMetrics, MinerError> {
    let mut metrics = CommitMetrics::empty(commit.id.clone(), commit.timestamp, commit.author.clone());
    metrics.oversized = true;
    metrics.project_size = project_size(gateway, &commit.id)?;
    Ok(metrics)
}

/// Project size over time, ordered by `(timestamp, commit id)`.
///
/// # Examples
///
/// ```
/// use histmine_core::{Author, CommitId, CommitMetrics};
/// use histmine_pulse::metrics::size_timeline;
///
/// let author = Author::new("alice", "alice@example.com");
/// let mut later = CommitMetrics::empty(CommitId::new("b"), 200, author.clone());
/// later.project_size = 120;
/// let mut earlier = CommitMetrics::empty(CommitId::new("a"), 100, author);
/// earlier.project_size = 80;
///
/// assert_eq!(size_timeline(&[later, earlier]), vec![(100, 80), (200, 120)]);
/// ```
pub fn size_timeline(metrics: &[CommitMetrics]) -> Vec<(i64, u64)> {
    let mut points: Vec<&CommitMetrics> = metrics.iter().collect();
    points.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.commit_id.cmp(&b.commit_id))
    });
    points
        .into_iter()
        .map(|m| (m.timestamp, m.project_size))
        .collect()
}
