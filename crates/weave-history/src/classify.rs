//! Hot / stable / unknown classification.
//!
//! [`classify`] is a pure per-file decision. [`explain`] returns the same
//! decision together with the rules that fired, so every flag can be traced
//! back to the thresholds of its run.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;
use weave_core::WeaveError;

use crate::materialize::{FileMetrics, MetricsTable};
use crate::thresholds::RepoThresholds;

/// Minimum lifetime commits for a file to be considered stable.
pub const STABLE_MIN_COMMITS: u32 = 3;

/// Outcome of classifying one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileClass {
    Hot,
    Stable,
    /// Neither hot nor stable, with known history.
    Ordinary,
    Unknown,
}

impl fmt::Display for FileClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileClass::Hot => write!(f, "hot"),
            FileClass::Stable => write!(f, "stable"),
            FileClass::Ordinary => write!(f, "ordinary"),
            FileClass::Unknown => write!(f, "unknown"),
        }
    }
}

/// A classification rule that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// No commits or no last-change timestamp.
    MissingHistory,
    /// `commits_30d >= T_hot30`.
    Recent30d,
    /// `commits_90d >= T_hot90` and changed within 90 days.
    Window90d,
    /// `lifetime rate >= T_hotRate` and changed within 30 days.
    LifetimeRate,
    /// Old, quiet and slow enough to be stable.
    Dormant,
}

/// A classification together with the rules behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub class: FileClass,
    pub rules: Vec<Rule>,
}

/// Classify one file against the thresholds of its run.
///
/// # Examples
///
/// ```
/// use weave_core::FileId;
/// use weave_history::classify::{classify, FileClass};
/// use weave_history::materialize::FileMetrics;
/// # use weave_history::materialize::MetricsTable;
/// # use weave_history::thresholds::compute_thresholds;
/// # let table = MetricsTable { run_id: 1, reference_ts: 0, files: Default::default() };
/// # let thresholds = compute_thresholds(&table, &Default::default(), chrono::Utc::now());
///
/// assert_eq!(classify(&FileMetrics::unknown(FileId(1)), &thresholds), FileClass::Unknown);
/// ```
pub fn classify(metrics: &FileMetrics, thresholds: &RepoThresholds) -> FileClass {
    explain(metrics, thresholds).class
}

/// Classify one file and report every rule that fired.
///
/// Hot rules are evaluated exhaustively so a hot verdict lists all of its
/// reasons. The stable rule is only evaluated for files that are not hot.
pub fn explain(metrics: &FileMetrics, thresholds: &RepoThresholds) -> Verdict {
    let (Some(_), Some(days)) = (
        metrics.last_commit_ts.filter(|_| metrics.total_commits > 0),
        metrics.days_since_last_change,
    ) else {
        return Verdict {
            class: FileClass::Unknown,
            rules: vec![Rule::MissingHistory],
        };
    };

    let days = days as f64;
    let commits_30d = f64::from(metrics.commits_30d);
    let commits_90d = f64::from(metrics.commits_90d);
    let rate = metrics.lifetime_commits_per_month;

    let mut rules = Vec::new();
    if commits_30d >= thresholds.hot30 {
        rules.push(Rule::Recent30d);
    }
    if commits_90d >= thresholds.hot90 && days <= 90.0 {
        rules.push(Rule::Window90d);
    }
    if rate >= thresholds.hot_rate && days <= 30.0 {
        rules.push(Rule::LifetimeRate);
    }
    if !rules.is_empty() {
        return Verdict {
            class: FileClass::Hot,
            rules,
        };
    }

    let dormant = metrics.total_commits >= STABLE_MIN_COMMITS
        && days >= thresholds.stable_days
        && commits_90d <= thresholds.stable90
        && rate <= thresholds.stable_rate;
    if dormant {
        Verdict {
            class: FileClass::Stable,
            rules: vec![Rule::Dormant],
        }
    } else {
        Verdict {
            class: FileClass::Ordinary,
            rules,
        }
    }
}

/// Per-class file counts of a classified table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub hot: usize,
    pub stable: usize,
    pub ordinary: usize,
    pub unknown: usize,
}

impl ClassCounts {
    pub fn total(&self) -> usize {
        self.hot + self.stable + self.ordinary + self.unknown
    }
}

/// Set the hot/stable/unknown flags of every file in `table`.
///
/// # Errors
///
/// Returns [`WeaveError::InconsistentVersion`] when the thresholds were not
/// computed from this table's run. The table is left untouched in that case.
pub fn classify_all(
    table: &mut MetricsTable,
    thresholds: &RepoThresholds,
) -> Result<ClassCounts, WeaveError> {
    if table.run_id != thresholds.run_id {
        return Err(WeaveError::InconsistentVersion {
            metrics_run: table.run_id,
            thresholds_run: thresholds.run_id,
        });
    }

    let mut counts = ClassCounts::default();
    for metrics in table.files.values_mut() {
        let class = classify(metrics, thresholds);
        metrics.is_hot = class == FileClass::Hot;
        metrics.is_stable = class == FileClass::Stable;
        metrics.is_unknown = class == FileClass::Unknown;
        match class {
            FileClass::Hot => counts.hot += 1,
            FileClass::Stable => counts.stable += 1,
            FileClass::Ordinary => counts.ordinary += 1,
            FileClass::Unknown => counts.unknown += 1,
        }
    }
    debug!(run_id = table.run_id, ?counts, "classified files");
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::compute_thresholds;
    use chrono::Utc;
    use proptest::prelude::*;
    use std::collections::BTreeMap;
    use weave_core::{FileId, ThresholdConfig};

    fn floors(run_id: u64) -> RepoThresholds {
        let table = MetricsTable {
            run_id,
            reference_ts: 0,
            files: BTreeMap::new(),
        };
        compute_thresholds(&table, &ThresholdConfig::default(), Utc::now())
    }

    fn metrics(total: u32, c30: u32, c90: u32, rate: f64, days: Option<i64>) -> FileMetrics {
        FileMetrics {
            file_id: FileId(1),
            total_commits: total,
            first_commit_ts: days.map(|_| 0),
            last_commit_ts: days.map(|_| 0),
            commits_30d: c30,
            commits_90d: c90,
            lifetime_commits_per_month: rate,
            days_since_last_change: days,
            lines_added: 0,
            lines_deleted: 0,
            reconciled: false,
            is_hot: false,
            is_stable: false,
            is_unknown: false,
        }
    }

    #[test]
    fn missing_history_is_unknown() {
        let t = floors(1);
        assert_eq!(classify(&metrics(0, 0, 0, 0.0, Some(3)), &t), FileClass::Unknown);
        assert_eq!(classify(&metrics(5, 0, 0, 0.0, None), &t), FileClass::Unknown);
        assert_eq!(
            explain(&metrics(0, 0, 0, 0.0, None), &t).rules,
            vec![Rule::MissingHistory]
        );
    }

    #[test]
    fn thirty_day_burst_is_hot() {
        let verdict = explain(&metrics(3, 3, 3, 3.0, Some(0)), &floors(1));
        assert_eq!(verdict.class, FileClass::Hot);
        assert_eq!(
            verdict.rules,
            vec![Rule::Recent30d, Rule::LifetimeRate]
        );
    }

    #[test]
    fn ninety_day_rule_needs_recent_change() {
        let t = floors(1);
        assert_eq!(classify(&metrics(6, 0, 6, 1.0, Some(60)), &t), FileClass::Hot);
        assert_eq!(classify(&metrics(6, 0, 6, 1.0, Some(91)), &t), FileClass::Ordinary);
    }

    #[test]
    fn lifetime_rate_rule_needs_change_within_30_days() {
        let t = floors(1);
        assert_eq!(classify(&metrics(40, 1, 2, 4.0, Some(30)), &t), FileClass::Hot);
        assert_eq!(classify(&metrics(40, 0, 2, 4.0, Some(31)), &t), FileClass::Ordinary);
    }

    #[test]
    fn old_quiet_file_is_stable() {
        let verdict = explain(&metrics(3, 0, 0, 0.1, Some(400)), &floors(1));
        assert_eq!(verdict.class, FileClass::Stable);
        assert_eq!(verdict.rules, vec![Rule::Dormant]);
    }

    #[test]
    fn stable_requires_three_commits() {
        assert_eq!(
            classify(&metrics(2, 0, 0, 0.1, Some(400)), &floors(1)),
            FileClass::Ordinary
        );
    }

    #[test]
    fn classify_all_sets_flags() {
        let mut table = MetricsTable {
            run_id: 4,
            reference_ts: 0,
            files: BTreeMap::new(),
        };
        let mut hot = metrics(3, 3, 3, 3.0, Some(0));
        hot.file_id = FileId(1);
        let mut stable = metrics(3, 0, 0, 0.1, Some(400));
        stable.file_id = FileId(2);
        let unknown = FileMetrics::unknown(FileId(3));
        for m in [hot, stable, unknown] {
            table.files.insert(m.file_id, m);
        }

        let counts = classify_all(&mut table, &floors(4)).unwrap();
        assert_eq!(counts.hot, 1);
        assert_eq!(counts.stable, 1);
        assert_eq!(counts.unknown, 1);
        assert_eq!(counts.total(), 3);
        assert!(table.files[&FileId(1)].is_hot);
        assert!(table.files[&FileId(2)].is_stable);
        assert!(table.files[&FileId(3)].is_unknown);
    }

    #[test]
    fn mismatched_run_is_rejected() {
        let mut table = MetricsTable {
            run_id: 5,
            reference_ts: 0,
            files: BTreeMap::from([(FileId(1), metrics(3, 3, 3, 3.0, Some(0)))]),
        };
        let err = classify_all(&mut table, &floors(4)).unwrap_err();
        assert!(matches!(
            err,
            WeaveError::InconsistentVersion {
                metrics_run: 5,
                thresholds_run: 4
            }
        ));
        assert!(!table.files[&FileId(1)].is_hot);
    }

    proptest! {
        #[test]
        fn hot_and_stable_are_exclusive(
            total in 0u32..50,
            c30 in 0u32..20,
            c90 in 0u32..40,
            rate in 0.0f64..10.0,
            days in proptest::option::of(0i64..1000),
            hot30 in 0.0f64..10.0,
            stable90 in 0.0f64..10.0,
        ) {
            let mut t = floors(1);
            t.hot30 = hot30;
            t.stable90 = stable90;
            let mut table = MetricsTable {
                run_id: 1,
                reference_ts: 0,
                files: BTreeMap::from([(FileId(1), metrics(total, c30, c90, rate, days))]),
            };
            classify_all(&mut table, &t).unwrap();
            let m = &table.files[&FileId(1)];
            prop_assert!(!(m.is_hot && m.is_stable));
            prop_assert_eq!(m.is_unknown, total == 0 || days.is_none());
            if m.is_unknown {
                prop_assert!(!m.is_hot && !m.is_stable);
            }
        }
    }
}
