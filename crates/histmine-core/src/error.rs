use std::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur while mining a repository.
///
/// Library crates use this type directly; the binary crate converts to
/// `miette` diagnostics at the boundary. Task-level variants
/// ([`CorruptHistory`](MinerError::CorruptHistory),
/// [`OversizedCommit`](MinerError::OversizedCommit),
/// [`BlameUnavailable`](MinerError::BlameUnavailable)) are caught by the
/// orchestrator and collected into the run summary instead of aborting the run.
///
/// # Examples
///
/// ```
/// use histmine_core::{ErrorKind, MinerError};
///
/// let err = MinerError::BlameUnavailable {
///     path: "assets/logo.png".into(),
///     reason: "binary file".into(),
/// };
/// assert_eq!(err.kind(), ErrorKind::BlameUnavailable);
/// assert!(err.to_string().contains("assets/logo.png"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum MinerError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A read from the version-control backend failed. Not retried.
    #[error("transient I/O error: {0}")]
    Transient(String),

    /// A commit or one of its parents could not be resolved.
    #[error("corrupt history at {commit}: {reason}")]
    CorruptHistory {
        /// Offending commit id.
        commit: String,
        /// Backend-provided detail.
        reason: String,
    },

    /// A commit touches more paths than the configured ceiling.
    #[error("commit {commit} touches {paths} paths (ceiling {ceiling})")]
    OversizedCommit {
        /// Offending commit id.
        commit: String,
        /// Number of changed paths.
        paths: usize,
        /// Configured `max_files_per_commit`.
        ceiling: usize,
    },

    /// No blame result exists for a file (binary, deleted or empty).
    #[error("blame unavailable for {path}: {reason}")]
    BlameUnavailable {
        /// File path relative to repo root.
        path: String,
        /// Why blame could not be produced.
        reason: String,
    },

    /// The persistence layer rejected a read or write.
    #[error("cache error: {0}")]
    Cache(String),

    /// The repository could not be opened or its reference resolved.
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// A task panicked and was caught at the task boundary.
    #[error("task panicked: {0}")]
    TaskPanicked(String),
}

impl MinerError {
    /// Classify this error for run summaries and log fields.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MinerError::Io(_) | MinerError::Transient(_) => ErrorKind::Transient,
            MinerError::Config(_) | MinerError::Toml(_) => ErrorKind::Config,
            MinerError::Serialization(_) => ErrorKind::Serialization,
            MinerError::CorruptHistory { .. } => ErrorKind::CorruptHistory,
            MinerError::OversizedCommit { .. } => ErrorKind::OversizedCommit,
            MinerError::BlameUnavailable { .. } => ErrorKind::BlameUnavailable,
            MinerError::Cache(_) => ErrorKind::Cache,
            MinerError::RepositoryUnavailable(_) => ErrorKind::RepositoryUnavailable,
            MinerError::TaskPanicked(_) => ErrorKind::Panicked,
        }
    }
}

/// Coarse error classification used to count failures.
///
/// # Examples
///
/// ```
/// use histmine_core::ErrorKind;
///
/// assert_eq!(ErrorKind::CorruptHistory.to_string(), "corrupt-history");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Transient,
    Config,
    Serialization,
    CorruptHistory,
    OversizedCommit,
    BlameUnavailable,
    Cache,
    RepositoryUnavailable,
    Panicked,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Config => "config",
            ErrorKind::Serialization => "serialization",
            ErrorKind::CorruptHistory => "corrupt-history",
            ErrorKind::OversizedCommit => "oversized-commit",
            ErrorKind::BlameUnavailable => "blame-unavailable",
            ErrorKind::Cache => "cache",
            ErrorKind::RepositoryUnavailable => "repository-unavailable",
            ErrorKind::Panicked => "panicked",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts_to_transient() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: MinerError = io_err.into();
        assert!(err.to_string().contains("gone"));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn config_error_displays_message() {
        let err = MinerError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn oversized_commit_reports_counts() {
        let err = MinerError::OversizedCommit {
            commit: "abc123".into(),
            paths: 9000,
            ceiling: 5000,
        };
        assert_eq!(
            err.to_string(),
            "commit abc123 touches 9000 paths (ceiling 5000)"
        );
        assert_eq!(err.kind(), ErrorKind::OversizedCommit);
    }

    #[test]
    fn kinds_serialize_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::BlameUnavailable).unwrap();
        assert_eq!(json, "\"blame-unavailable\"");
    }
}
