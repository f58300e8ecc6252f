//! Core types, configuration, and error handling for histmine.
//!
//! This crate provides the shared foundation used by the other histmine crates:
//! - [`MinerError`]: unified error type using `thiserror`, classified by [`ErrorKind`]
//! - [`MinerConfig`]: configuration loaded from `.histmine.toml`
//! - Shared types: [`CommitDescriptor`], [`FileDiff`], [`Edit`], [`EditRange`],
//!   [`CommitMetrics`], [`FileOwnership`], [`PackageOwnership`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{
    CacheConfig, LogFormat, LoggingConfig, MinerConfig, MiningConfig, PathMatcher,
    RepositoryConfig, StabilityMode,
};
pub use error::{ErrorKind, MinerError};
pub use types::{
    dominant_author, merge_author_maps, Author, AuthorLineOwnership, BlamedLine, ChangeKind,
    ChangeSet, CommitDescriptor, CommitId, CommitMetrics, Edit, EditKind, EditRange, FileDiff,
    FileOwnership, OutputFormat, PackageOwnership, TreeEntry,
};

/// A convenience `Result` type for histmine operations.
pub type Result<T> = std::result::Result<T, MinerError>;
