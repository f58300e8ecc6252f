//! Per-file line ownership from blame.

use histmine_core::{BlamedLine, CommitId, FileOwnership, MinerError};
use tracing::debug;

use crate::gateway::Gateway;

/// Blame `path` as of `start` and attribute every line to its author.
///
/// # Errors
///
/// Returns [`MinerError::BlameUnavailable`] when the gateway has no blame
/// result for the file (binary, deleted or empty content), and propagates
/// gateway read failures.
pub fn blame_file(
    gateway: &dyn Gateway,
    path: &str,
    start: &CommitId,
) -> Result<FileOwnership, MinerError> {
    let lines = match gateway.blame(path, start)? {
        Some(lines) if !lines.is_empty() => lines,
        Some(_) => {
            return Err(MinerError::BlameUnavailable {
                path: path.to_string(),
                reason: "file is empty".into(),
            })
        }
        None => {
            return Err(MinerError::BlameUnavailable {
                path: path.to_string(),
                reason: format!("no blame result at {}", start.short()),
            })
        }
    };

    let ownership = ownership_from_lines(path, &lines);
    debug!(
        target: "histmine::blame",
        path,
        lines = ownership.line_count,
        authors = ownership.per_author.len(),
        "blamed file"
    );
    Ok(ownership)
}

/// Fold blamed lines into a [`FileOwnership`].
///
/// # Examples
///
/// ```
/// use histmine_core::{Author, BlamedLine, CommitId};
/// use histmine_pulse::blame::ownership_from_lines;
///
/// let line = |i: u32, email: &str| BlamedLine {
///     line_index: i,
///     origin_commit: CommitId::new("c1"),
///     origin_author: Author::new("dev", email),
///     origin_timestamp: 1_700_000_000 + i64::from(i),
///     byte_length: 8,
/// };
/// let file = ownership_from_lines("src/lib.rs", &[
///     line(0, "alice@example.com"),
///     line(1, "bob@example.com"),
///     line(2, "alice@example.com"),
/// ]);
/// assert_eq!(file.line_count, 3);
/// assert_eq!(file.byte_size, 24);
/// assert_eq!(file.owner().unwrap().author, "alice@example.com");
/// assert_eq!(file.latest_commit.unwrap().timestamp, 1_700_000_002);
/// ```
pub fn ownership_from_lines(path: &str, lines: &[BlamedLine]) -> FileOwnership {
    lines.iter().fold(FileOwnership::new(path), |mut file, line| {
        file.add_blamed_line(line);
        file
    })
}
