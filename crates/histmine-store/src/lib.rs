//! SQLite persistence for mining results.
//!
//! [`SqliteCache`] implements [`AnalysisCache`] on a single SQLite file so
//! that reruns over the same repository only analyze new commits and files
//! whose content changed. Every write is an upsert keyed by
//! `(project, hash)` for commits and `(project, path, hash)` for blame.
//! The `head_files` table holds the path set of the last run's HEAD tree.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use histmine_core::{Author, CommitId, CommitMetrics, FileOwnership, MinerError};
use histmine_pulse::cache::AnalysisCache;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Row counts for one project.
///
/// # Examples
///
/// ```
/// use histmine_store::CacheStats;
///
/// let stats = CacheStats { commits: 12, files: 4 };
/// assert_eq!(stats.commits, 12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Recorded commits.
    pub commits: usize,
    /// Distinct file paths with recorded blame.
    pub files: usize,
}

/// SQLite-backed [`AnalysisCache`] scoped to one project.
///
/// # Examples
///
/// ```
/// use histmine_core::CommitId;
/// use histmine_pulse::cache::AnalysisCache;
/// use histmine_store::SqliteCache;
///
/// let cache = SqliteCache::in_memory("demo").unwrap();
/// assert!(!cache.is_commit_processed(&CommitId::new("c1")).unwrap());
/// assert_eq!(cache.stats().unwrap().commits, 0);
/// ```
pub struct SqliteCache {
    project: String,
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open or create a cache database at `path`.
    ///
    /// Creates parent directories and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns [`MinerError::Cache`] if the database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use histmine_store::SqliteCache;
    ///
    /// let cache = SqliteCache::open(Path::new(".histmine/cache.db"), "demo").unwrap();
    /// ```
    pub fn open(path: &Path, project: impl Into<String>) -> Result<Self, MinerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MinerError::Cache(format!("failed to create cache directory: {e}"))
                })?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| MinerError::Cache(format!("failed to open database: {e}")))?;
        let project = project.into();
        tracing::debug!(target: "histmine::cache", path = %path.display(), %project, "opened cache database");
        Self::with_connection(conn, project)
    }

    /// Create an in-memory cache (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`MinerError::Cache`] if schema creation fails.
    pub fn in_memory(project: impl Into<String>) -> Result<Self, MinerError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            MinerError::Cache(format!("failed to create in-memory database: {e}"))
        })?;
        Self::with_connection(conn, project.into())
    }

    fn with_connection(conn: Connection, project: String) -> Result<Self, MinerError> {
        let cache = Self {
            project,
            conn: Mutex::new(conn),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<(), MinerError> {
        self.conn()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS commits (
                    project TEXT NOT NULL,
                    hash TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    author_name TEXT NOT NULL,
                    author_email TEXT NOT NULL,
                    files_added INTEGER NOT NULL,
                    files_deleted INTEGER NOT NULL,
                    files_modified INTEGER NOT NULL,
                    lines_added INTEGER NOT NULL,
                    lines_deleted INTEGER NOT NULL,
                    lines_modified INTEGER NOT NULL,
                    changes INTEGER NOT NULL,
                    project_size INTEGER NOT NULL,
                    stability REAL,
                    oversized INTEGER NOT NULL,
                    PRIMARY KEY (project, hash)
                );

                -- recorded_at is a per-project logical clock
                CREATE TABLE IF NOT EXISTS blame_files (
                    project TEXT NOT NULL,
                    path TEXT NOT NULL,
                    hash TEXT NOT NULL,
                    recorded_at INTEGER NOT NULL,
                    ownership_json TEXT NOT NULL,
                    PRIMARY KEY (project, path, hash)
                );

                CREATE INDEX IF NOT EXISTS blame_files_latest
                    ON blame_files (project, path, recorded_at);

                CREATE TABLE IF NOT EXISTS head_files (
                    project TEXT NOT NULL,
                    path TEXT NOT NULL,
                    PRIMARY KEY (project, path)
                );
                ",
            )
            .map_err(|e| MinerError::Cache(format!("failed to create schema: {e}")))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, MinerError> {
        self.conn
            .lock()
            .map_err(|_| MinerError::Cache("connection lock poisoned".into()))
    }

    /// Row counts for this project.
    ///
    /// # Errors
    ///
    /// Returns [`MinerError::Cache`] on query failure.
    pub fn stats(&self) -> Result<CacheStats, MinerError> {
        let conn = self.conn()?;
        let commits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM commits WHERE project = ?1",
                params![self.project],
                |row| row.get(0),
            )
            .map_err(|e| MinerError::Cache(format!("failed to count commits: {e}")))?;
        let files: i64 = conn
            .query_row(
                "SELECT COUNT(DISTINCT path) FROM blame_files WHERE project = ?1",
                params![self.project],
                |row| row.get(0),
            )
            .map_err(|e| MinerError::Cache(format!("failed to count files: {e}")))?;
        Ok(CacheStats {
            commits: commits as usize,
            files: files as usize,
        })
    }

    /// Latest recorded ownership of every file present at HEAD in the last
    /// run, ordered by path.
    ///
    /// Files deleted or renamed since are left out. A database that has
    /// never recorded a HEAD path set lists every file.
    ///
    /// # Errors
    ///
    /// Returns [`MinerError::Cache`] on query failure and
    /// [`MinerError::Serialization`] if a stored row cannot be decoded.
    pub fn latest_blames(&self) -> Result<Vec<FileOwnership>, MinerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT b.ownership_json FROM blame_files b
                 WHERE b.project = ?1
                   AND b.recorded_at = (
                       SELECT MAX(recorded_at) FROM blame_files
                       WHERE project = b.project AND path = b.path
                   )
                   AND (
                       NOT EXISTS (SELECT 1 FROM head_files WHERE project = ?1)
                       OR EXISTS (
                           SELECT 1 FROM head_files h
                           WHERE h.project = ?1 AND h.path = b.path
                       )
                   )
                 ORDER BY b.path",
            )
            .map_err(|e| MinerError::Cache(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![self.project], |row| row.get::<_, String>(0))
            .map_err(|e| MinerError::Cache(format!("failed to list blame rows: {e}")))?;

        let mut files = Vec::new();
        for json in rows {
            let json = json.map_err(|e| MinerError::Cache(format!("failed to read row: {e}")))?;
            files.push(serde_json::from_str(&json)?);
        }
        Ok(files)
    }
}

fn metrics_from_row(row: &Row<'_>) -> rusqlite::Result<CommitMetrics> {
    let count = |idx: usize| -> rusqlite::Result<u64> { Ok(row.get::<_, i64>(idx)? as u64) };
    Ok(CommitMetrics {
        commit_id: CommitId::new(row.get::<_, String>(0)?),
        timestamp: row.get(1)?,
        author: Author::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
        files_added: count(4)? as u32,
        files_deleted: count(5)? as u32,
        files_modified: count(6)? as u32,
        lines_added: count(7)?,
        lines_deleted: count(8)?,
        lines_modified: count(9)?,
        changes: count(10)?,
        project_size: count(11)?,
        stability: row.get(12)?,
        oversized: row.get(13)?,
    })
}

impl AnalysisCache for SqliteCache {
    fn project(&self) -> &str {
        &self.project
    }

    fn is_commit_processed(&self, id: &CommitId) -> Result<bool, MinerError> {
        let found = self
            .conn()?
            .query_row(
                "SELECT 1 FROM commits WHERE project = ?1 AND hash = ?2",
                params![self.project, id.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| MinerError::Cache(format!("failed to look up commit {id}: {e}")))?;
        Ok(found.is_some())
    }

    fn record_commit(&self, m: &CommitMetrics) -> Result<(), MinerError> {
        self.conn()?
            .execute(
                "INSERT INTO commits
                 (project, hash, timestamp, author_name, author_email,
                  files_added, files_deleted, files_modified,
                  lines_added, lines_deleted, lines_modified,
                  changes, project_size, stability, oversized)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT (project, hash) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    author_name = excluded.author_name,
                    author_email = excluded.author_email,
                    files_added = excluded.files_added,
                    files_deleted = excluded.files_deleted,
                    files_modified = excluded.files_modified,
                    lines_added = excluded.lines_added,
                    lines_deleted = excluded.lines_deleted,
                    lines_modified = excluded.lines_modified,
                    changes = excluded.changes,
                    project_size = excluded.project_size,
                    stability = excluded.stability,
                    oversized = excluded.oversized",
                params![
                    self.project,
                    m.commit_id.as_str(),
                    m.timestamp,
                    m.author.name,
                    m.author.email,
                    i64::from(m.files_added),
                    i64::from(m.files_deleted),
                    i64::from(m.files_modified),
                    m.lines_added as i64,
                    m.lines_deleted as i64,
                    m.lines_modified as i64,
                    m.changes as i64,
                    m.project_size as i64,
                    m.stability,
                    m.oversized,
                ],
            )
            .map_err(|e| {
                MinerError::Cache(format!("failed to record commit {}: {e}", m.commit_id))
            })?;
        Ok(())
    }

    fn last_known_file_hash(&self, path: &str) -> Result<Option<String>, MinerError> {
        self.conn()?
            .query_row(
                "SELECT hash FROM blame_files
                 WHERE project = ?1 AND path = ?2
                 ORDER BY recorded_at DESC LIMIT 1",
                params![self.project, path],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MinerError::Cache(format!("failed to look up hash of {path}: {e}")))
    }

    fn record_file_blame(
        &self,
        path: &str,
        hash: &str,
        ownership: &FileOwnership,
    ) -> Result<(), MinerError> {
        let json = serde_json::to_string(ownership)?;
        self.conn()?
            .execute(
                "INSERT INTO blame_files (project, path, hash, recorded_at, ownership_json)
                 VALUES (?1, ?2, ?3,
                         (SELECT COALESCE(MAX(recorded_at), 0) + 1
                          FROM blame_files WHERE project = ?1),
                         ?4)
                 ON CONFLICT (project, path, hash) DO UPDATE SET
                    recorded_at = excluded.recorded_at,
                    ownership_json = excluded.ownership_json",
                params![self.project, path, hash, json],
            )
            .map_err(|e| MinerError::Cache(format!("failed to record blame of {path}: {e}")))?;
        Ok(())
    }

    fn file_blame(&self, path: &str) -> Result<Option<FileOwnership>, MinerError> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT ownership_json FROM blame_files
                 WHERE project = ?1 AND path = ?2
                 ORDER BY recorded_at DESC LIMIT 1",
                params![self.project, path],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MinerError::Cache(format!("failed to read blame of {path}: {e}")))?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn commit_metrics(&self) -> Result<Vec<CommitMetrics>, MinerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT hash, timestamp, author_name, author_email,
                        files_added, files_deleted, files_modified,
                        lines_added, lines_deleted, lines_modified,
                        changes, project_size, stability, oversized
                 FROM commits WHERE project = ?1
                 ORDER BY timestamp, hash",
            )
            .map_err(|e| MinerError::Cache(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![self.project], metrics_from_row)
            .map_err(|e| MinerError::Cache(format!("failed to list commits: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| MinerError::Cache(format!("failed to read commit row: {e}")))
    }

    fn record_head_paths(&self, paths: &[String]) -> Result<(), MinerError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| MinerError::Cache(format!("failed to begin transaction: {e}")))?;
        tx.execute("DELETE FROM head_files WHERE project = ?1", params![self.project])
            .map_err(|e| MinerError::Cache(format!("failed to clear head files: {e}")))?;
        {
            let mut insert = tx
                .prepare("INSERT OR IGNORE INTO head_files (project, path) VALUES (?1, ?2)")
                .map_err(|e| MinerError::Cache(format!("failed to prepare insert: {e}")))?;
            for path in paths {
                insert
                    .execute(params![self.project, path])
                    .map_err(|e| MinerError::Cache(format!("failed to record head file {path}: {e}")))?;
            }
        }
        tx.commit()
            .map_err(|e| MinerError::Cache(format!("failed to commit head files: {e}")))?;
        tracing::debug!(target: "histmine::cache", files = paths.len(), "recorded head files");
        Ok(())
    }

    fn head_paths(&self) -> Result<Vec<String>, MinerError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT path FROM head_files WHERE project = ?1 ORDER BY path")
            .map_err(|e| MinerError::Cache(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![self.project], |row| row.get::<_, String>(0))
            .map_err(|e| MinerError::Cache(format!("failed to list head files: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| MinerError::Cache(format!("failed to read head file row: {e}")))
    }
}
