//! Incremental cache contract and its in-memory implementation.
//!
//! The orchestrator consults the cache before scheduling work and writes
//! every result through it. Records are upserts keyed by
//! `(project, commit)` or `(project, path, content hash)`, so a rerun over
//! unchanged history performs existence checks only.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use histmine_core::{CommitId, CommitMetrics, FileOwnership, MinerError};

/// Persistence consumed by the orchestrator.
///
/// Implementations must tolerate concurrent callers and provide
/// read-your-writes consistency within a run.
pub trait AnalysisCache: Send + Sync {
    /// Project this cache is scoped to.
    fn project(&self) -> &str;

    fn is_commit_processed(&self, id: &CommitId) -> Result<bool, MinerError>;

    /// Upsert the metrics of one commit.
    fn record_commit(&self, metrics: &CommitMetrics) -> Result<(), MinerError>;

    /// Content hash recorded most recently for `path`.
    fn last_known_file_hash(&self, path: &str) -> Result<Option<String>, MinerError>;

    /// Upsert the ownership of `path` at content `hash`.
    fn record_file_blame(
        &self,
        path: &str,
        hash: &str,
        ownership: &FileOwnership,
    ) -> Result<(), MinerError>;

    /// Ownership recorded for the last known hash of `path`.
    fn file_blame(&self, path: &str) -> Result<Option<FileOwnership>, MinerError>;

    /// Every recorded commit, ordered by `(timestamp, commit id)`.
    fn commit_metrics(&self) -> Result<Vec<CommitMetrics>, MinerError>;

    /// Replace the set of files present at HEAD in the last run.
    ///
    /// Blame rows of paths outside this set belong to deleted or renamed
    /// files and are left out of cached ownership views.
    fn record_head_paths(&self, paths: &[String]) -> Result<(), MinerError>;

    /// Paths recorded by the last [`AnalysisCache::record_head_paths`],
    /// sorted.
    fn head_paths(&self) -> Result<Vec<String>, MinerError>;
}

/// Cache held in process memory for the lifetime of the value.
///
/// # Examples
///
/// ```
/// use histmine_core::{Author, CommitId, CommitMetrics};
/// use histmine_pulse::cache::{AnalysisCache, MemoryCache};
///
/// let cache = MemoryCache::new("demo");
/// let id = CommitId::new("c1");
/// assert!(!cache.is_commit_processed(&id).unwrap());
///
/// let metrics = CommitMetrics::empty(id.clone(), 10, Author::new("a", "a@example.com"));
/// cache.record_commit(&metrics).unwrap();
/// assert!(cache.is_commit_processed(&id).unwrap());
/// ```
#[derive(Debug, Default)]
pub struct MemoryCache {
    project: String,
    commits: RwLock<HashMap<CommitId, CommitMetrics>>,
    blames: RwLock<BlameRows>,
    head: RwLock<BTreeSet<String>>,
}

#[derive(Debug, Default)]
struct BlameRows {
    by_key: BTreeMap<(String, String), FileOwnership>,
    latest: HashMap<String, String>,
}

impl MemoryCache {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Self::default()
        }
    }
}

fn poisoned<T>(_: T) -> MinerError {
    MinerError::Cache("cache lock poisoned".into())
}

impl AnalysisCache for MemoryCache {
    fn project(&self) -> &str {
        &self.project
    }

    fn is_commit_processed(&self, id: &CommitId) -> Result<bool, MinerError> {
        Ok(self.commits.read().map_err(poisoned)?.contains_key(id))
    }

    fn record_commit(&self, metrics: &CommitMetrics) -> Result<(), MinerError> {
        self.commits
            .write()
            .map_err(poisoned)?
            .insert(metrics.commit_id.clone(), metrics.clone());
        Ok(())
    }

    fn last_known_file_hash(&self, path: &str) -> Result<Option<String>, MinerError> {
        Ok(self.blames.read().map_err(poisoned)?.latest.get(path).cloned())
    }

    fn record_file_blame(
        &self,
        path: &str,
        hash: &str,
        ownership: &FileOwnership,
    ) -> Result<(), MinerError> {
        let mut rows = self.blames.write().map_err(poisoned)?;
        rows.by_key
            .insert((path.to_string(), hash.to_string()), ownership.clone());
        rows.latest.insert(path.to_string(), hash.to_string());
        Ok(())
    }

    fn file_blame(&self, path: &str) -> Result<Option<FileOwnership>, MinerError> {
        let rows = self.blames.read().map_err(poisoned)?;
        Ok(rows
            .latest
            .get(path)
            .and_then(|hash| rows.by_key.get(&(path.to_string(), hash.clone())))
            .cloned())
    }

    fn commit_metrics(&self) -> Result<Vec<CommitMetrics>, MinerError> {
        let mut all: Vec<CommitMetrics> = self
            .commits
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.commit_id.cmp(&b.commit_id))
        });
        Ok(all)
    }

    fn record_head_paths(&self, paths: &[String]) -> Result<(), MinerError> {
        *self.head.write().map_err(poisoned)? = paths.iter().cloned().collect();
        Ok(())
    }

    fn head_paths(&self) -> Result<Vec<String>, MinerError> {
        Ok(self.head.read().map_err(poisoned)?.iter().cloned().collect())
    }
}
