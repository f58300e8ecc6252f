//! Per-developer statistics: change counters summed over commits, plus
//! current line ownership from the rollup.

use std::collections::BTreeMap;

use histmine_core::CommitMetrics;
use serde::{Deserialize, Serialize};

use crate::rollup::OwnershipTree;

/// What one author changed and what they still own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeveloperSummary {
    pub email: String,
    pub name: String,
    pub commits: usize,
    pub files_added: u64,
    pub files_deleted: u64,
    pub files_modified: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub lines_modified: u64,
    pub changes: u64,
    /// Lines attributed to this author at the project root.
    pub lines_owned: u64,
    pub bytes_owned: u64,
    /// Files where this author holds the most lines.
    pub owned_files: Vec<String>,
}

/// Summarize every author seen in `metrics` or in `tree`.
///
/// Sorted by lines owned, descending, then by email.
pub fn summarize(metrics: &[CommitMetrics], tree: &OwnershipTree) -> Vec<DeveloperSummary> {
    let mut developers: BTreeMap<String, DeveloperSummary> = BTreeMap::new();

    for m in metrics {
        let dev = developers
            .entry(m.author.email.clone())
            .or_insert_with(|| DeveloperSummary {
                email: m.author.email.clone(),
                ..DeveloperSummary::default()
            });
        if dev.name.is_empty() {
            dev.name = m.author.name.clone();
        }
        dev.commits += 1;
        dev.files_added += u64::from(m.files_added);
        dev.files_deleted += u64::from(m.files_deleted);
        dev.files_modified += u64::from(m.files_modified);
        dev.lines_added += m.lines_added;
        dev.lines_deleted += m.lines_deleted;
        dev.lines_modified += m.lines_modified;
        dev.changes += m.changes;
    }

    if let Some(root) = tree.root() {
        for (email, owned) in &root.per_author {
            let dev = developers
                .entry(email.clone())
                .or_insert_with(|| DeveloperSummary {
                    email: email.clone(),
                    ..DeveloperSummary::default()
                });
            dev.lines_owned = owned.line_count;
            dev.bytes_owned = owned.byte_size;
        }
    }

    for file in tree.files.values() {
        if let Some(owner) = file.owner() {
            if let Some(dev) = developers.get_mut(&owner.author) {
                dev.owned_files.push(file.path.clone());
            }
        }
    }

    let mut all: Vec<DeveloperSummary> = developers.into_values().collect();
    all.sort_by(|a, b| {
        b.lines_owned
            .cmp(&a.lines_owned)
            .then_with(|| a.email.cmp(&b.email))
    });
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::build_tree;
    use crate::testing::{alice, bob};
    use histmine_core::{Author, CommitId, FileOwnership};

    fn commit(id: &str, author: Author, added: u64, modified: u64) -> CommitMetrics {
        let mut m = CommitMetrics::empty(CommitId::new(id), 0, author);
        m.files_modified = 1;
        m.lines_added = added;
        m.lines_modified = modified;
        m.changes = added + modified;
        m
    }

    fn owned(path: &str, author: &Author, lines: u64) -> FileOwnership {
        let mut file = FileOwnership::new(path);
        for _ in 0..lines {
            file.add_line(author, &CommitId::new("c1"), 3);
        }
        file
    }

    #[test]
    fn counters_are_summed_per_author() {
        let metrics = vec![
            commit("c1", alice(), 10, 0),
            commit("c2", alice(), 2, 4),
            commit("c3", bob(), 1, 1),
        ];
        let tree = build_tree("demo", Vec::new());
        let devs = summarize(&metrics, &tree);

        let a = devs.iter().find(|d| d.email == "alice@example.com").unwrap();
        assert_eq!(a.commits, 2);
        assert_eq!(a.lines_added, 12);
        assert_eq!(a.changes, 16);
        assert_eq!(a.files_modified, 2);
        assert_eq!(a.name, "alice");
    }

    #[test]
    fn ownership_orders_the_result() {
        let tree = build_tree(
            "demo",
            vec![
                owned("a.rs", &alice(), 2),
                owned("b.rs", &bob(), 5),
                owned("c.rs", &bob(), 1),
            ],
        );
        let devs = summarize(&[commit("c1", alice(), 1, 0)], &tree);

        assert_eq!(devs[0].email, "bob@example.com");
        assert_eq!(devs[0].lines_owned, 6);
        assert_eq!(devs[0].bytes_owned, 18);
        assert_eq!(devs[0].owned_files, vec!["b.rs", "c.rs"]);
        assert_eq!(devs[0].commits, 0);
        assert_eq!(devs[1].owned_files, vec!["a.rs"]);
    }
}
