//! Package ownership rollup.
//!
//! Every file is folded into each of its ancestor directories, up to the
//! project root (path `""`). Folding is additive, so trees built from any
//! partition of the files merge into the same result.

use std::collections::BTreeMap;

use histmine_core::{FileOwnership, PackageOwnership};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Ownership of every blamed file and every directory above it.
///
/// # Examples
///
/// ```
/// use histmine_core::{Author, CommitId, FileOwnership};
/// use histmine_pulse::rollup::OwnershipTree;
///
/// let mut file = FileOwnership::new("src/net/tcp.rs");
/// file.add_line(&Author::new("ana", "ana@example.com"), &CommitId::new("c1"), 20);
///
/// let mut tree = OwnershipTree::new("demo");
/// tree.add_file(file);
///
/// assert_eq!(tree.root().unwrap().name, "demo");
/// assert_eq!(tree.package("src/net").unwrap().line_count, 1);
/// assert_eq!(tree.package("src").unwrap().line_count, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipTree {
    pub project: String,
    pub packages: BTreeMap<String, PackageOwnership>,
    pub files: BTreeMap<String, FileOwnership>,
}

impl OwnershipTree {
    /// Empty tree holding only the root package, named after `project`.
    pub fn new(project: impl Into<String>) -> Self {
        let project = project.into();
        let mut packages = BTreeMap::new();
        packages.insert(String::new(), PackageOwnership::new("", project.clone()));
        Self {
            project,
            packages,
            files: BTreeMap::new(),
        }
    }

    /// Fold a file into every ancestor package.
    ///
    /// Files with no lines and paths already in the tree are ignored.
    pub fn add_file(&mut self, file: FileOwnership) {
        if file.line_count == 0 || self.files.contains_key(&file.path) {
            return;
        }
        for dir in ancestors(&file.path) {
            let project = &self.project;
            self.packages
                .entry(dir.to_string())
                .or_insert_with(|| PackageOwnership::new(dir, package_name(dir, project)))
                .add_file(&file);
        }
        self.files.insert(file.path.clone(), file);
    }

    /// Combine with a tree built from a disjoint set of files.
    pub fn merge(mut self, other: OwnershipTree) -> OwnershipTree {
        for (path, package) in other.packages {
            match self.packages.get_mut(&path) {
                Some(existing) => existing.merge(&package),
                None => {
                    self.packages.insert(path, package);
                }
            }
        }
        self.files.extend(other.files);
        self
    }

    /// The project-level package.
    pub fn root(&self) -> Option<&PackageOwnership> {
        self.packages.get("")
    }

    pub fn package(&self, path: &str) -> Option<&PackageOwnership> {
        self.packages.get(path)
    }

    /// Direct sub-packages and files of the package at `path`.
    pub fn children(&self, path: &str) -> (Vec<&PackageOwnership>, Vec<&FileOwnership>) {
        let packages = self
            .packages
            .values()
            .filter(|p| !p.path.is_empty() && parent_dir(&p.path) == path)
            .collect();
        let files = self
            .files
            .values()
            .filter(|f| parent_dir(&f.path) == path)
            .collect();
        (packages, files)
    }
}

/// Build a tree sequentially.
pub fn build_tree(project: &str, files: impl IntoIterator<Item = FileOwnership>) -> OwnershipTree {
    files
        .into_iter()
        .fold(OwnershipTree::new(project), |mut tree, file| {
            tree.add_file(file);
            tree
        })
}

/// Build a tree in parallel: each worker folds a private fragment, and the
/// fragments are combined by a single reduce.
///
/// Duplicate paths keep their first occurrence. Runs on the current rayon
/// pool.
pub fn fold_fragments(project: &str, files: Vec<FileOwnership>) -> OwnershipTree {
    let mut unique: BTreeMap<String, FileOwnership> = BTreeMap::new();
    for file in files {
        unique.entry(file.path.clone()).or_insert(file);
    }

    unique
        .into_par_iter()
        .fold(
            || OwnershipTree::new(project),
            |mut tree, (_, file)| {
                tree.add_file(file);
                tree
            },
        )
        .reduce(|| OwnershipTree::new(project), OwnershipTree::merge)
}

/// Directories containing `path`, innermost first, ending with the root.
fn ancestors(path: &str) -> Vec<&str> {
    let mut dirs = Vec::new();
    let mut current = path;
    while let Some((dir, _)) = current.rsplit_once('/') {
        dirs.push(dir);
        current = dir;
    }
    dirs.push("");
    dirs
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn package_name(dir: &str, project: &str) -> String {
    if dir.is_empty() {
        return project.to_string();
    }
    dir.rsplit('/').next().unwrap_or(dir).to_string()
}
