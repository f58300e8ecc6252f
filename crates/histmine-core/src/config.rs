use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MinerError;

/// Top-level configuration loaded from `.histmine.toml`.
///
/// Precedence is CLI flags, then `.histmine.toml`, then built-in defaults.
/// `RUST_LOG` overrides `[logging] level` when set.
///
/// # Examples
///
/// ```
/// use histmine_core::MinerConfig;
///
/// let config = MinerConfig::default();
/// assert_eq!(config.mining.max_files_per_commit, 5000);
/// assert_eq!(config.repository.reference, "HEAD");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Which repository to mine.
    #[serde(default)]
    pub repository: RepositoryConfig,
    /// Pipeline tuning.
    #[serde(default)]
    pub mining: MiningConfig,
    /// Where processed records are persisted.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Log level and format for the CLI subscriber.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MinerConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MinerError::Io`] if the file cannot be read, or
    /// [`MinerError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use histmine_core::MinerConfig;
    /// use std::path::Path;
    ///
    /// let config = MinerConfig::from_file(Path::new(".histmine.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, MinerError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`MinerError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use histmine_core::MinerConfig;
    ///
    /// let toml = r#"
    /// [mining]
    /// stability_window_months = 3
    /// "#;
    /// let config = MinerConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.mining.stability_window_months, 3);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, MinerError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }
}

/// Repository location, passed by value to the gateway.
///
/// # Examples
///
/// ```
/// use histmine_core::RepositoryConfig;
///
/// let repo = RepositoryConfig::default();
/// assert_eq!(repo.project_name(), "project");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Path to the working tree or bare repository (default: `.`).
    #[serde(default = "default_repo_path")]
    pub path: PathBuf,
    /// Reference to mine from (default: `HEAD`).
    #[serde(default = "default_reference")]
    pub reference: String,
    /// Project name used as the cache key and root package name.
    /// Defaults to the directory name of `path`.
    pub project: Option<String>,
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_reference() -> String {
    "HEAD".into()
}

impl RepositoryConfig {
    /// The configured project name, or the last component of the
    /// canonicalized repository path.
    pub fn project_name(&self) -> String {
        if let Some(name) = &self.project {
            return name.clone();
        }
        std::fs::canonicalize(&self.path)
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_else(|| "project".into())
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: default_repo_path(),
            reference: default_reference(),
            project: None,
        }
    }
}

/// How commit stability is computed.
///
/// # Examples
///
/// ```
/// use histmine_core::StabilityMode;
///
/// assert_eq!(StabilityMode::default(), StabilityMode::Exact);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StabilityMode {
    /// Literal interval intersection of edit ranges.
    #[default]
    Exact,
    /// Theta-sketch estimate over changed-line fingerprints.
    Sketch,
}

/// Pipeline tuning.
///
/// # Examples
///
/// ```
/// use histmine_core::MiningConfig;
///
/// let config = MiningConfig::default();
/// assert_eq!(config.stability_window_months, 1);
/// assert_eq!(config.sketch_size, 4096);
/// assert!(config.workers.is_none());
/// assert_eq!(config.exclude, vec!["**/.DS_Store".to_string()]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Skip detailed diffing for commits touching more paths (default: 5000).
    #[serde(default = "default_max_files_per_commit")]
    pub max_files_per_commit: usize,
    /// Length of the stability window in calendar months (default: 1).
    #[serde(default = "default_window_months")]
    pub stability_window_months: u32,
    /// Stability algorithm (default: exact).
    #[serde(default)]
    pub stability_mode: StabilityMode,
    /// Retained hashes per theta sketch (default: 4096).
    #[serde(default = "default_sketch_size")]
    pub sketch_size: usize,
    /// Worker threads; defaults to available parallelism.
    pub workers: Option<usize>,
    /// Glob patterns for paths excluded from metrics and blame.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

fn default_max_files_per_commit() -> usize {
    5000
}

fn default_window_months() -> u32 {
    1
}

fn default_sketch_size() -> usize {
    4096
}

fn default_exclude() -> Vec<String> {
    vec!["**/.DS_Store".into()]
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            max_files_per_commit: default_max_files_per_commit(),
            stability_window_months: default_window_months(),
            stability_mode: StabilityMode::default(),
            sketch_size: default_sketch_size(),
            workers: None,
            exclude: default_exclude(),
        }
    }
}

impl MiningConfig {
    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`MinerError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.max_files_per_commit == 0 {
            return Err(MinerError::Config(
                "mining.max_files_per_commit must be at least 1".into(),
            ));
        }
        if self.stability_window_months == 0 {
            return Err(MinerError::Config(
                "mining.stability_window_months must be at least 1".into(),
            ));
        }
        if self.sketch_size < 16 {
            return Err(MinerError::Config(format!(
                "mining.sketch_size must be at least 16, got {}",
                self.sketch_size
            )));
        }
        if self.workers == Some(0) {
            return Err(MinerError::Config("mining.workers must be at least 1".into()));
        }
        self.exclude_matcher()?;
        Ok(())
    }

    /// Compile the `exclude` globs.
    ///
    /// # Errors
    ///
    /// Returns [`MinerError::Config`] if a pattern is not a valid glob.
    ///
    /// # Examples
    ///
    /// ```
    /// use histmine_core::MiningConfig;
    ///
    /// let matcher = MiningConfig::default().exclude_matcher().unwrap();
    /// assert!(matcher.is_excluded("docs/.DS_Store"));
    /// assert!(!matcher.is_excluded("src/lib.rs"));
    /// ```
    pub fn exclude_matcher(&self) -> Result<PathMatcher, MinerError> {
        let patterns = self
            .exclude
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| MinerError::Config(format!("invalid exclude glob '{p}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PathMatcher { patterns })
    }

    /// Worker count, falling back to available parallelism.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Compiled exclude globs.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    patterns: Vec<glob::Pattern>,
}

impl PathMatcher {
    /// Whether `path` (repo-relative, `/`-separated) matches any exclude glob.
    ///
    /// A bare file name such as `.DS_Store` at the repository root is also
    /// matched by `**/`-prefixed patterns.
    pub fn is_excluded(&self, path: &str) -> bool {
        let rooted = format!("/{path}");
        self.patterns
            .iter()
            .any(|p| p.matches(path) || p.matches(&rooted))
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite database path; in-memory cache when absent.
    pub path: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line events.
    #[default]
    Compact,
    /// Multi-line, human-oriented events.
    Pretty,
}

/// Logging configuration consumed by the CLI subscriber.
///
/// # Examples
///
/// ```
/// use histmine_core::{LogFormat, LoggingConfig};
///
/// let config = LoggingConfig::default();
/// assert_eq!(config.level, "info");
/// assert_eq!(config.format, LogFormat::Compact);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (default: `info`).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (default: compact).
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = MinerConfig::default();
        assert_eq!(config.repository.path, PathBuf::from("."));
        assert_eq!(config.repository.reference, "HEAD");
        assert!(config.repository.project.is_none());
        assert_eq!(config.mining.max_files_per_commit, 5000);
        assert_eq!(config.mining.stability_window_months, 1);
        assert_eq!(config.mining.stability_mode, StabilityMode::Exact);
        assert!(config.cache.path.is_none());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[repository]
path = "/srv/repos/kernel"
reference = "main"
project = "kernel"

[mining]
max_files_per_commit = 200
stability_window_months = 2
stability_mode = "sketch"
sketch_size = 1024
workers = 4
exclude = ["vendor/**", "**/*.min.js"]

[cache]
path = ".histmine/cache.db"

[logging]
level = "debug"
format = "pretty"
"#;
        let config = MinerConfig::from_toml(toml).unwrap();
        assert_eq!(config.repository.reference, "main");
        assert_eq!(config.repository.project_name(), "kernel");
        assert_eq!(config.mining.max_files_per_commit, 200);
        assert_eq!(config.mining.stability_mode, StabilityMode::Sketch);
        assert_eq!(config.mining.worker_count(), 4);
        assert_eq!(
            config.cache.path.as_deref(),
            Some(Path::new(".histmine/cache.db"))
        );
        assert_eq!(config.logging.format, LogFormat::Pretty);
        config.mining.validate().unwrap();
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = MinerConfig::from_toml("").unwrap();
        assert_eq!(config.mining.sketch_size, 4096);
        assert_eq!(config.mining.exclude, vec!["**/.DS_Store"]);
    }

    #[test]
    fn file_keys_override_only_what_they_name() {
        let config = MinerConfig::from_toml(
            r#"
            [mining]
            workers = 2

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();
        assert_eq!(config.mining.workers, Some(2));
        assert_eq!(config.mining.stability_window_months, 1);
        assert_eq!(config.mining.stability_mode, StabilityMode::Exact);
        assert_eq!(config.repository.reference, "HEAD");
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.cache.path.is_none());
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = MinerConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }

    #[test]
    fn zero_window_is_rejected() {
        let config = MiningConfig {
            stability_window_months: 0,
            ..MiningConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stability_window_months"));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = MiningConfig {
            workers: Some(0),
            ..MiningConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let config = MiningConfig {
            exclude: vec!["[unclosed".into()],
            ..MiningConfig::default()
        };
        assert!(matches!(config.validate(), Err(MinerError::Config(_))));
    }

    #[test]
    fn exclude_matches_nested_and_root_paths() {
        let config = MiningConfig {
            exclude: vec!["**/.DS_Store".into(), "vendor/**".into()],
            ..MiningConfig::default()
        };
        let matcher = config.exclude_matcher().unwrap();
        assert!(matcher.is_excluded(".DS_Store"));
        assert!(matcher.is_excluded("a/b/.DS_Store"));
        assert!(matcher.is_excluded("vendor/lib/x.c"));
        assert!(!matcher.is_excluded("src/vendor.rs"));
    }
}
