//! Commit stability: how much of a commit's changed content survives the
//! following time window.
//!
//! For a target commit T with first parent P, the window is every commit
//! sorting after T by `(timestamp, id)` and committed before T plus N
//! calendar months. L is the last commit in the window. The lines T changed
//! (new-side ranges of P→T) are compared with the lines L no longer has
//! (old-side ranges of T→L):
//!
//! ```text
//! stability = 1 - |changed(P→T) ∩ rewritten(T→L)| / |changed(P→T)|
//! ```
//!
//! The score is undefined (`None`) when T changed no lines or the window is
//! empty.

use std::collections::BTreeMap;

use chrono::{DateTime, Months};
use histmine_core::{
    ChangeSet, CommitDescriptor, EditRange, MinerError, MiningConfig, PathMatcher, StabilityMode,
};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::gateway::{split_lines, Gateway};
use crate::sketch::ThetaSketch;

/// Full history ordered by `(timestamp, commit id)`.
#[derive(Debug, Clone, Default)]
pub struct CommitTimeline {
    entries: Vec<ChangeSet>,
}

impl CommitTimeline {
    pub fn new(history: &[CommitDescriptor]) -> Self {
        let mut entries: Vec<ChangeSet> = history.iter().map(|c| c.change_set()).collect();
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last commit strictly after `target` and strictly before
    /// `target + months`.
    ///
    /// # Examples
    ///
    /// ```
    /// use histmine_core::{Author, CommitDescriptor, CommitId};
    /// use histmine_pulse::stability::CommitTimeline;
    ///
    /// let at = |id: &str, ts: i64| CommitDescriptor {
    ///     id: CommitId::new(id),
    ///     timestamp: ts,
    ///     author: Author::new("a", "a@example.com"),
    ///     parents: vec![],
    /// };
    /// let day = 86_400;
    /// let history = vec![at("t", 0), at("x", 3 * day), at("y", 20 * day), at("z", 40 * day)];
    /// let timeline = CommitTimeline::new(&history);
    ///
    /// let latest = timeline.latest_in_window(&history[0].change_set(), 1).unwrap();
    /// assert_eq!(latest.id.as_str(), "y");
    /// ```
    pub fn latest_in_window(&self, target: &ChangeSet, months: u32) -> Option<&ChangeSet> {
        let end = DateTime::from_timestamp(target.timestamp, 0)?
            .checked_add_months(Months::new(months))?
            .timestamp();
        let upper = self.entries.partition_point(|c| c.timestamp < end);
        self.entries[..upper]
            .last()
            .filter(|c| (c.timestamp, &c.id) > (target.timestamp, &target.id))
    }
}

/// Scores one commit against its following window.
pub trait StabilityEstimator: Send + Sync {
    /// `Ok(None)` when the score is undefined for `target`.
    fn estimate(
        &self,
        gateway: &dyn Gateway,
        target: &CommitDescriptor,
        timeline: &CommitTimeline,
    ) -> Result<Option<f64>, MinerError>;
}

/// Build the estimator selected by `mining.stability_mode`.
pub fn estimator_for(config: &MiningConfig) -> Result<Box<dyn StabilityEstimator>, MinerError> {
    let exclude = config.exclude_matcher()?;
    Ok(match config.stability_mode {
        StabilityMode::Exact => Box::new(ExactStability {
            window_months: config.stability_window_months,
            exclude,
        }),
        StabilityMode::Sketch => Box::new(SketchStability {
            window_months: config.stability_window_months,
            sketch_size: config.sketch_size,
            exclude,
        }),
    })
}

/// `1 - intersection / total`, clamped to `[0, 1]`; `None` for an empty total.
///
/// # Examples
///
/// ```
/// use histmine_pulse::stability::stability_ratio;
///
/// assert_eq!(stability_ratio(1.0, 4.0), Some(0.75));
/// assert_eq!(stability_ratio(0.0, 0.0), None);
/// ```
pub fn stability_ratio(intersection: f64, total: f64) -> Option<f64> {
    if total <= 0.0 {
        return None;
    }
    Some((1.0 - intersection / total).clamp(0.0, 1.0))
}

/// Literal interval intersection of edit ranges, per file.
#[derive(Debug, Clone)]
pub struct ExactStability {
    pub window_months: u32,
    pub exclude: PathMatcher,
}

impl StabilityEstimator for ExactStability {
    fn estimate(
        &self,
        gateway: &dyn Gateway,
        target: &CommitDescriptor,
        timeline: &CommitTimeline,
    ) -> Result<Option<f64>, MinerError> {
        let Some(latest) = timeline.latest_in_window(&target.change_set(), self.window_months)
        else {
            return Ok(None);
        };

        let changed = changed_ranges(gateway, target, &self.exclude)?;
        let total: u64 = changed
            .values()
            .flatten()
            .map(|r| u64::from(r.len()))
            .sum();
        if total == 0 {
            return Ok(None);
        }

        let rewritten = rewritten_ranges(gateway, target, latest, &changed)?;
        let mut intersection = 0u64;
        for (path, ranges) in &changed {
            let Some(later) = rewritten.get(path) else {
                continue;
            };
            for range in ranges {
                intersection += later
                    .iter()
                    .map(|r| u64::from(range.intersection_len(r)))
                    .sum::<u64>();
            }
        }

        let score = stability_ratio(intersection as f64, total as f64);
        debug!(
            target: "histmine::stability",
            commit = target.id.short(),
            latest = latest.id.short(),
            changed = total,
            rewritten = intersection,
            "scored commit"
        );
        Ok(score)
    }
}

/// Theta-sketch estimate over fingerprints of changed lines.
///
/// Exact while both line sets are smaller than `sketch_size`.
#[derive(Debug, Clone)]
pub struct SketchStability {
    pub window_months: u32,
    pub sketch_size: usize,
    pub exclude: PathMatcher,
}

impl StabilityEstimator for SketchStability {
    fn estimate(
        &self,
        gateway: &dyn Gateway,
        target: &CommitDescriptor,
        timeline: &CommitTimeline,
    ) -> Result<Option<f64>, MinerError> {
        let Some(latest) = timeline.latest_in_window(&target.change_set(), self.window_months)
        else {
            return Ok(None);
        };

        let changed = changed_ranges(gateway, target, &self.exclude)?;
        if changed.is_empty() {
            return Ok(None);
        }
        let rewritten = rewritten_ranges(gateway, target, latest, &changed)?;

        let mut before = ThetaSketch::new(self.sketch_size);
        let mut after = ThetaSketch::new(self.sketch_size);
        for (path, ranges) in &changed {
            let content = gateway.file_content(&target.id, path)?.unwrap_or_default();
            let lines = split_lines(&content);
            let line = |idx: u32| lines.get(idx as usize).copied().unwrap_or_default();

            for idx in ranges.iter().flat_map(|r| r.start..r.end) {
                before.update(fingerprint(path, idx, line(idx)));
            }
            for idx in rewritten.get(path).into_iter().flatten().flat_map(|r| r.start..r.end) {
                after.update(fingerprint(path, idx, line(idx)));
            }
        }

        let score = stability_ratio(before.intersection_estimate(&after), before.estimate());
        debug!(
            target: "histmine::stability",
            commit = target.id.short(),
            latest = latest.id.short(),
            retained = before.retained(),
            "estimated commit stability"
        );
        Ok(score)
    }
}

/// New-side ranges of the target's own edits, keyed by path in the target.
fn changed_ranges(
    gateway: &dyn Gateway,
    target: &CommitDescriptor,
    exclude: &PathMatcher,
) -> Result<BTreeMap<String, Vec<EditRange>>, MinerError> {
    let mut changed: BTreeMap<String, Vec<EditRange>> = BTreeMap::new();
    for file in gateway.diff(target.first_parent(), &target.id)? {
        if exclude.is_excluded(&file.path) {
            continue;
        }
        let ranges: Vec<EditRange> = file
            .edits
            .iter()
            .map(|e| e.new_range())
            .filter(|r| !r.is_empty())
            .collect();
        if !ranges.is_empty() {
            changed.entry(file.path).or_default().extend(ranges);
        }
    }
    Ok(changed)
}

/// Merged old-side ranges of target→latest, keyed by path in the target.
/// Only paths the target itself changed are kept.
fn rewritten_ranges(
    gateway: &dyn Gateway,
    target: &CommitDescriptor,
    latest: &ChangeSet,
    changed: &BTreeMap<String, Vec<EditRange>>,
) -> Result<BTreeMap<String, Vec<EditRange>>, MinerError> {
    let mut grouped: BTreeMap<String, Vec<EditRange>> = BTreeMap::new();
    for file in gateway.diff(Some(&target.id), &latest.id)? {
        if !changed.contains_key(&file.old_path) {
            continue;
        }
        grouped
            .entry(file.old_path)
            .or_default()
            .extend(file.edits.iter().map(|e| e.old_range()));
    }
    Ok(grouped
        .into_iter()
        .map(|(path, ranges)| (path, EditRange::merge(ranges)))
        .collect())
}

fn fingerprint(path: &str, line_index: u32, text: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0u8]);
    hasher.update(line_index.to_le_bytes());
    hasher.update(text);
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{added, alice, bob, deleted, modified, renamed, MockGateway};
    use histmine_core::Edit;

    const BASE: i64 = 1_700_000_000;
    const DAY: i64 = 86_400;

    fn exact() -> ExactStability {
        ExactStability {
            window_months: 1,
            exclude: PathMatcher::default(),
        }
    }

    fn sketch() -> SketchStability {
        SketchStability {
            window_months: 1,
            sketch_size: 4096,
            exclude: PathMatcher::default(),
        }
    }

    fn ten_lines() -> String {
        (1..=10).map(|i| format!("line {i}\n")).collect()
    }

    /// Root adds ten lines, c2 rewrites lines 4-6, c3 rewrites line 5.
    fn scenario_a() -> MockGateway {
        let mut gw = MockGateway::new();
        gw.add_commit("c1", BASE, alice(), &[]);
        gw.add_commit("c2", BASE + DAY, alice(), &["c1"]);
        gw.add_commit("c3", BASE + 5 * DAY, bob(), &["c2"]);
        gw.set_diff(None, "c1", vec![added("a.txt", vec![Edit::from_hunk(0, 0, 1, 10)])]);
        gw.set_diff(Some("c1"), "c2", vec![modified("a.txt", vec![Edit::from_hunk(4, 3, 4, 3)])]);
        gw.set_diff(Some("c2"), "c3", vec![modified("a.txt", vec![Edit::from_hunk(5, 1, 5, 1)])]);
        gw.set_diff(Some("c1"), "c3", vec![modified("a.txt", vec![Edit::from_hunk(4, 3, 4, 3)])]);
        gw.set_content("c1", "a.txt", &ten_lines());
        gw.set_content("c2", "a.txt", &ten_lines().replace("line 4\nline 5\nline 6", "four\nfive\nsix"));
        gw
    }

    #[test]
    fn one_of_three_lines_reverted() {
        let gw = scenario_a();
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());
        let score = exact()
            .estimate(&gw, &gw.descriptor("c2"), &timeline)
            .unwrap()
            .unwrap();
        assert!((score - 2.0 / 3.0).abs() < 1e-9, "score {score}");
    }

    #[test]
    fn sketch_matches_exact_below_capacity() {
        let gw = scenario_a();
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());
        let score = sketch()
            .estimate(&gw, &gw.descriptor("c2"), &timeline)
            .unwrap()
            .unwrap();
        assert!((score - 2.0 / 3.0).abs() < 1e-9, "score {score}");
    }

    #[test]
    fn root_commit_uses_latest_in_window() {
        let gw = scenario_a();
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());
        // c3 is latest; c1→c3 rewrites 3 of the 10 root lines
        let score = exact()
            .estimate(&gw, &gw.descriptor("c1"), &timeline)
            .unwrap()
            .unwrap();
        assert!((score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn empty_window_is_undefined() {
        let gw = scenario_a();
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());
        assert_eq!(exact().estimate(&gw, &gw.descriptor("c3"), &timeline).unwrap(), None);
        assert_eq!(sketch().estimate(&gw, &gw.descriptor("c3"), &timeline).unwrap(), None);
    }

    #[test]
    fn deletion_only_commit_is_undefined() {
        let mut gw = scenario_a();
        gw.add_commit("c4", BASE + 6 * DAY, alice(), &["c3"]);
        gw.add_commit("c5", BASE + 7 * DAY, alice(), &["c4"]);
        gw.set_diff(Some("c3"), "c4", vec![deleted("a.txt", vec![Edit::from_hunk(1, 10, 0, 0)])]);
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());
        assert_eq!(exact().estimate(&gw, &gw.descriptor("c4"), &timeline).unwrap(), None);
    }

    #[test]
    fn window_end_is_exclusive() {
        let end = DateTime::from_timestamp(BASE, 0)
            .unwrap()
            .checked_add_months(Months::new(1))
            .unwrap()
            .timestamp();
        let mut gw = MockGateway::new();
        gw.add_commit("t", BASE, alice(), &[]);
        gw.add_commit("inside", end - 1, alice(), &["t"]);
        gw.add_commit("edge", end, alice(), &["inside"]);
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());

        let latest = timeline
            .latest_in_window(&gw.descriptor("t").change_set(), 1)
            .unwrap();
        assert_eq!(latest.id.as_str(), "inside");
    }

    #[test]
    fn equal_timestamps_order_by_id() {
        let mut gw = MockGateway::new();
        gw.add_commit("b", BASE, alice(), &[]);
        gw.add_commit("a", BASE, alice(), &[]);
        gw.add_commit("c", BASE, alice(), &[]);
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());

        let after_a = timeline.latest_in_window(&gw.descriptor("a").change_set(), 1);
        assert_eq!(after_a.map(|c| c.id.as_str()), Some("c"));
        assert!(timeline
            .latest_in_window(&gw.descriptor("c").change_set(), 1)
            .is_none());
    }

    #[test]
    fn edits_in_other_files_never_intersect() {
        let mut gw = MockGateway::new();
        gw.add_commit("p", BASE, alice(), &[]);
        gw.add_commit("t", BASE + DAY, alice(), &["p"]);
        gw.add_commit("l", BASE + 2 * DAY, bob(), &["t"]);
        gw.set_diff(Some("p"), "t", vec![modified("a.txt", vec![Edit::from_hunk(1, 2, 1, 2)])]);
        gw.set_diff(Some("t"), "l", vec![modified("b.txt", vec![Edit::from_hunk(1, 2, 1, 2)])]);
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());

        let score = exact().estimate(&gw, &gw.descriptor("t"), &timeline).unwrap();
        assert_eq!(score, Some(1.0));
    }

    #[test]
    fn deleting_the_file_later_rewrites_everything() {
        let mut gw = MockGateway::new();
        gw.add_commit("p", BASE, alice(), &[]);
        gw.add_commit("t", BASE + DAY, alice(), &["p"]);
        gw.add_commit("l", BASE + 2 * DAY, bob(), &["t"]);
        gw.set_diff(Some("p"), "t", vec![modified("a.txt", vec![Edit::from_hunk(2, 0, 3, 4)])]);
        gw.set_diff(Some("t"), "l", vec![deleted("a.txt", vec![Edit::from_hunk(1, 12, 0, 0)])]);
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());

        let score = exact().estimate(&gw, &gw.descriptor("t"), &timeline).unwrap();
        assert_eq!(score, Some(0.0));
    }

    #[test]
    fn later_rename_is_matched_by_old_path() {
        let mut gw = MockGateway::new();
        gw.add_commit("p", BASE, alice(), &[]);
        gw.add_commit("t", BASE + DAY, alice(), &["p"]);
        gw.add_commit("l", BASE + 2 * DAY, bob(), &["t"]);
        gw.set_diff(Some("p"), "t", vec![modified("a.txt", vec![Edit::from_hunk(4, 3, 4, 3)])]);
        // l moves a.txt to b.txt and rewrites line 5 on the way
        gw.set_diff(
            Some("t"),
            "l",
            vec![renamed("a.txt", "b.txt", vec![Edit::from_hunk(5, 1, 5, 1)])],
        );
        gw.set_content("t", "a.txt", &ten_lines().replace("line 4\nline 5\nline 6", "four\nfive\nsix"));
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());

        for score in [
            exact().estimate(&gw, &gw.descriptor("t"), &timeline).unwrap(),
            sketch().estimate(&gw, &gw.descriptor("t"), &timeline).unwrap(),
        ] {
            let score = score.unwrap();
            assert!((score - 2.0 / 3.0).abs() < 1e-9, "score {score}");
        }
    }

    #[test]
    fn adjacent_later_edits_are_merged() {
        let mut gw = MockGateway::new();
        gw.add_commit("p", BASE, alice(), &[]);
        gw.add_commit("t", BASE + DAY, alice(), &["p"]);
        gw.add_commit("l", BASE + 2 * DAY, bob(), &["t"]);
        // t rewrites lines 1-4
        gw.set_diff(Some("p"), "t", vec![modified("a.txt", vec![Edit::from_hunk(1, 4, 1, 4)])]);
        // l deletes line 2 and replaces lines 3-4 as adjacent edits
        gw.set_diff(
            Some("t"),
            "l",
            vec![modified(
                "a.txt",
                vec![Edit::from_hunk(2, 1, 1, 0), Edit::from_hunk(3, 2, 2, 1)],
            )],
        );
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());

        let score = exact()
            .estimate(&gw, &gw.descriptor("t"), &timeline)
            .unwrap()
            .unwrap();
        assert!((score - 0.25).abs() < 1e-9);
    }

    #[test]
    fn excluded_paths_do_not_count() {
        let gw = scenario_a();
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());
        let estimator = ExactStability {
            window_months: 1,
            exclude: MiningConfig {
                exclude: vec!["*.txt".into()],
                ..MiningConfig::default()
            }
            .exclude_matcher()
            .unwrap(),
        };
        assert_eq!(estimator.estimate(&gw, &gw.descriptor("c2"), &timeline).unwrap(), None);
    }

    #[test]
    fn ratio_is_clamped() {
        assert_eq!(stability_ratio(5.0, 4.0), Some(0.0));
        assert_eq!(stability_ratio(0.0, 4.0), Some(1.0));
    }

    #[test]
    fn estimator_follows_mode() {
        let config = MiningConfig {
            stability_mode: StabilityMode::Sketch,
            ..MiningConfig::default()
        };
        let gw = scenario_a();
        let timeline = CommitTimeline::new(&gw.history("HEAD").unwrap());
        let score = estimator_for(&config)
            .unwrap()
            .estimate(&gw, &gw.descriptor("c2"), &timeline)
            .unwrap();
        assert!(score.is_some());
    }
}
