//! Concurrent mining pipeline.
//!
//! A run resolves the reference, asks the cache which commits and files are
//! new, and then drives two independent queues on one worker pool:
//!
//! - commit jobs: metrics, then stability, then `record_commit`
//! - file jobs: blame of the HEAD version, then `record_file_blame`
//!
//! Each task is isolated: an error or a panic becomes a [`TaskFailure`] in
//! the [`RunSummary`] and never cancels its siblings. Package rollup starts
//! only after both queues have drained, and the run ends by recording the
//! HEAD path set so cached ownership views can drop deleted files.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use histmine_core::{
    CommitDescriptor, CommitId, CommitMetrics, ErrorKind, FileOwnership, MinerConfig, MinerError,
    PathMatcher, TreeEntry,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::blame::blame_file;
use crate::cache::AnalysisCache;
use crate::gateway::Gateway;
use crate::metrics::{compute_commit_metrics, oversized_record, MetricsOptions};
use crate::rollup::{fold_fragments, OwnershipTree};
use crate::stability::{estimator_for, CommitTimeline, StabilityEstimator};

/// Unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskId {
    Commit(CommitId),
    File(String),
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Commit(id) => write!(f, "commit {}", id.short()),
            TaskId::File(path) => write!(f, "file {path}"),
        }
    }
}

/// A task that ended in an error or a panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailure {
    pub task: TaskId,
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(task: TaskId, error: &MinerError) -> Self {
        Self {
            task,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Commits reachable from the reference.
    pub commits_total: usize,
    /// Commits analyzed in this run, oversized ones included.
    pub commits_processed: usize,
    /// Commits skipped because the cache already had them.
    pub commits_cached: usize,
    /// Commits recorded without line-level detail.
    pub commits_oversized: usize,
    /// HEAD files considered for blame after exclusion.
    pub files_total: usize,
    /// Files blamed in this run.
    pub files_blamed: usize,
    /// Files whose cached ownership was still current.
    pub files_reused: usize,
    /// Files without a blame result (binary or empty).
    pub skipped: Vec<String>,
    pub failures: Vec<TaskFailure>,
}

impl RunSummary {
    /// Failure count per error kind.
    pub fn failure_counts(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for failure in &self.failures {
            *counts.entry(failure.kind).or_insert(0) += 1;
        }
        counts
    }

    /// True when no task failed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningReport {
    /// Metrics of the commits analyzed in this run, by `(timestamp, id)`.
    pub metrics: Vec<CommitMetrics>,
    /// Ownership of the HEAD tree, cached files included.
    pub ownership: OwnershipTree,
    pub summary: RunSummary,
}

#[derive(Default)]
struct CommitBatch {
    metrics: Vec<CommitMetrics>,
    failures: Vec<TaskFailure>,
}

impl CommitBatch {
    fn merge(mut self, other: CommitBatch) -> CommitBatch {
        self.metrics.extend(other.metrics);
        self.failures.extend(other.failures);
        self
    }
}

#[derive(Default)]
struct FileBatch {
    owned: Vec<FileOwnership>,
    skipped: Vec<String>,
    failures: Vec<TaskFailure>,
}

impl FileBatch {
    fn merge(mut self, other: FileBatch) -> FileBatch {
        self.owned.extend(other.owned);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
        self
    }
}

/// Drives one mining run over a gateway and a cache.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use histmine_core::MinerConfig;
/// use histmine_pulse::cache::MemoryCache;
/// use histmine_pulse::git::GitGateway;
/// use histmine_pulse::orchestrator::Miner;
///
/// let config = MinerConfig::default();
/// let gateway = Arc::new(GitGateway::open(config.repository.clone()).unwrap());
/// let cache = Arc::new(MemoryCache::new(config.repository.project_name()));
///
/// let report = Miner::new(config, gateway, cache).unwrap().run().unwrap();
/// println!("{} commits mined", report.summary.commits_processed);
/// ```
pub struct Miner {
    config: MinerConfig,
    gateway: Arc<dyn Gateway>,
    cache: Arc<dyn AnalysisCache>,
    estimator: Box<dyn StabilityEstimator>,
    metrics_options: MetricsOptions,
    exclude: PathMatcher,
}

impl Miner {
    /// # Errors
    ///
    /// Returns [`MinerError::Config`] if the mining configuration is invalid.
    pub fn new(
        config: MinerConfig,
        gateway: Arc<dyn Gateway>,
        cache: Arc<dyn AnalysisCache>,
    ) -> Result<Self, MinerError> {
        config.mining.validate()?;
        let exclude = config.mining.exclude_matcher()?;
        let estimator = estimator_for(&config.mining)?;
        let metrics_options = MetricsOptions {
            max_files_per_commit: config.mining.max_files_per_commit,
            exclude: exclude.clone(),
        };
        Ok(Self {
            config,
            gateway,
            cache,
            estimator,
            metrics_options,
            exclude,
        })
    }

    /// Run the pipeline to completion.
    ///
    /// # Errors
    ///
    /// Returns [`MinerError::RepositoryUnavailable`] when the reference, its
    /// history or its tree cannot be read, [`MinerError::Config`] when the
    /// worker pool cannot be built, and [`MinerError::Cache`] when the HEAD
    /// path set cannot be recorded. Task-level errors never surface here;
    /// they are collected in [`RunSummary::failures`].
    pub fn run(&self) -> Result<MiningReport, MinerError> {
        self.run_with_progress(&|_: &TaskId| {})
    }

    /// [`Miner::run`], calling `on_task` as each task finishes.
    pub fn run_with_progress(
        &self,
        on_task: &(dyn Fn(&TaskId) + Sync),
    ) -> Result<MiningReport, MinerError> {
        let reference = &self.config.repository.reference;
        let head = self.gateway.resolve(reference).map_err(unavailable)?;
        let history = self.gateway.history(reference).map_err(unavailable)?;
        let tree = self.gateway.tree_entries(&head).map_err(unavailable)?;
        let timeline = CommitTimeline::new(&history);

        let mut summary = RunSummary {
            commits_total: history.len(),
            ..RunSummary::default()
        };

        let mut commit_queue = Vec::new();
        for commit in &history {
            match self.cache.is_commit_processed(&commit.id) {
                Ok(true) => summary.commits_cached += 1,
                Ok(false) => commit_queue.push(commit),
                Err(e) => summary
                    .failures
                    .push(TaskFailure::new(TaskId::Commit(commit.id.clone()), &e)),
            }
        }

        let mut file_queue = Vec::new();
        let mut reused = Vec::new();
        let mut head_paths = Vec::new();
        for entry in tree.iter().filter(|e| !self.exclude.is_excluded(&e.path)) {
            summary.files_total += 1;
            head_paths.push(entry.path.clone());
            match self.plan_file(entry) {
                Ok(Some(ownership)) => reused.push(ownership),
                Ok(None) => file_queue.push(entry),
                Err(e) => summary
                    .failures
                    .push(TaskFailure::new(TaskId::File(entry.path.clone()), &e)),
            }
        }
        summary.files_reused = reused.len();

        info!(
            target: "histmine::orchestrator",
            head = head.short(),
            commits = commit_queue.len(),
            cached = summary.commits_cached,
            files = file_queue.len(),
            reused = summary.files_reused,
            "scheduling run"
        );

        let workers = self.config.mining.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("histmine-{i}"))
            .build()
            .map_err(|e| MinerError::Config(format!("failed to build worker pool: {e}")))?;

        let (commits, files) = pool.install(|| {
            rayon::join(
                || self.run_commits(&commit_queue, &timeline, on_task),
                || self.run_files(&file_queue, &head, on_task),
            )
        });

        // Both queues have drained; rollup may start.
        summary.files_blamed = files.owned.len();
        let mut owned = files.owned;
        owned.extend(reused);
        let ownership = pool.install(|| fold_fragments(self.cache.project(), owned));
        self.cache.record_head_paths(&head_paths)?;

        let mut metrics = commits.metrics;
        metrics.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.commit_id.cmp(&b.commit_id))
        });

        summary.commits_processed = metrics.len();
        summary.commits_oversized = metrics.iter().filter(|m| m.oversized).count();
        summary.skipped = files.skipped;
        summary.skipped.sort();
        summary.failures.extend(commits.failures);
        summary.failures.extend(files.failures);
        summary.failures.sort_by(|a, b| a.task.cmp(&b.task));

        info!(
            target: "histmine::orchestrator",
            processed = summary.commits_processed,
            oversized = summary.commits_oversized,
            blamed = summary.files_blamed,
            skipped = summary.skipped.len(),
            failed = summary.failures.len(),
            "run finished"
        );

        Ok(MiningReport {
            metrics,
            ownership,
            summary,
        })
    }

    /// Cached ownership when the file's content hash is unchanged.
    fn plan_file(&self, entry: &TreeEntry) -> Result<Option<FileOwnership>, MinerError> {
        match self.cache.last_known_file_hash(&entry.path)? {
            Some(hash) if hash == entry.blob_id => self.cache.file_blame(&entry.path),
            _ => Ok(None),
        }
    }

    fn run_commits(
        &self,
        queue: &[&CommitDescriptor],
        timeline: &CommitTimeline,
        on_task: &(dyn Fn(&TaskId) + Sync),
    ) -> CommitBatch {
        queue
            .par_iter()
            .fold(CommitBatch::default, |mut batch, commit| {
                let task = TaskId::Commit(commit.id.clone());
                match isolate(|| self.commit_job(commit, timeline)) {
                    Ok(metrics) => batch.metrics.push(metrics),
                    Err(e) => batch.failures.push(failed(task.clone(), &e)),
                }
                on_task(&task);
                batch
            })
            .reduce(CommitBatch::default, CommitBatch::merge)
    }

    fn run_files(
        &self,
        queue: &[&TreeEntry],
        head: &CommitId,
        on_task: &(dyn Fn(&TaskId) + Sync),
    ) -> FileBatch {
        queue
            .par_iter()
            .fold(FileBatch::default, |mut batch, entry| {
                let task = TaskId::File(entry.path.clone());
                match isolate(|| self.file_job(entry, head)) {
                    Ok(Some(ownership)) => batch.owned.push(ownership),
                    Ok(None) => batch.skipped.push(entry.path.clone()),
                    Err(e) => batch.failures.push(failed(task.clone(), &e)),
                }
                on_task(&task);
                batch
            })
            .reduce(FileBatch::default, FileBatch::merge)
    }

    fn commit_job(
        &self,
        commit: &CommitDescriptor,
        timeline: &CommitTimeline,
    ) -> Result<CommitMetrics, MinerError> {
        let gateway = self.gateway.as_ref();
        let metrics = match compute_commit_metrics(gateway, commit, &self.metrics_options) {
            Ok(mut metrics) => {
                metrics.stability = self.estimator.estimate(gateway, commit, timeline)?;
                metrics
            }
            Err(e @ MinerError::OversizedCommit { .. }) => {
                warn!(target: "histmine::orchestrator", kind = %e.kind(), "{e}");
                oversized_record(gateway, commit)?
            }
            Err(e) => return Err(e),
        };
        self.cache.record_commit(&metrics)?;
        Ok(metrics)
    }

    /// `Ok(None)` when the file has no blame result. An empty ownership is
    /// still recorded so the same content is not retried.
    fn file_job(
        &self,
        entry: &TreeEntry,
        head: &CommitId,
    ) -> Result<Option<FileOwnership>, MinerError> {
        match blame_file(self.gateway.as_ref(), &entry.path, head) {
            Ok(ownership) => {
                self.cache
                    .record_file_blame(&entry.path, &entry.blob_id, &ownership)?;
                Ok(Some(ownership))
            }
            Err(e @ MinerError::BlameUnavailable { .. }) => {
                debug!(target: "histmine::blame", kind = %e.kind(), "{e}");
                self.cache.record_file_blame(
                    &entry.path,
                    &entry.blob_id,
                    &FileOwnership::new(entry.path.as_str()),
                )?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn failed(task: TaskId, error: &MinerError) -> TaskFailure {
    warn!(target: "histmine::orchestrator", task = %task, kind = %error.kind(), "task failed: {error}");
    TaskFailure::new(task, error)
}

fn unavailable(error: MinerError) -> MinerError {
    match error {
        MinerError::RepositoryUnavailable(_) => error,
        other => MinerError::RepositoryUnavailable(other.to_string()),
    }
}

/// Run a task body, turning a panic into [`MinerError::TaskPanicked`].
fn isolate<T>(job: impl FnOnce() -> Result<T, MinerError>) -> Result<T, MinerError> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(result) => result,
        Err(payload) => Err(MinerError::TaskPanicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
