//! Repository-relative hot/stable thresholds.
//!
//! Six thresholds are derived from percentiles of the materialized per-file
//! metrics, each guarded by a floor (hot thresholds, stable age) or a ceiling
//! (stable activity) so tiny repositories do not collapse into degenerate
//! values. Percentiles use linear interpolation between closest ranks over an
//! exact sort: for sorted values `x` and rank `p`, `h = (n - 1) * p` and the
//! result is `x[⌊h⌋] + (h - ⌊h⌋) * (x[⌊h⌋ + 1] - x[⌊h⌋])`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use weave_core::ThresholdConfig;

use crate::materialize::{FileMetrics, MetricsTable};

/// Percentile interpolation method recorded with every threshold record.
pub const INTERPOLATION: &str = "linear";

/// Whether a guard value is a lower or an upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Guard {
    Floor,
    Ceiling,
}

/// How one threshold was derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileInput {
    /// Percentile rank in `[0, 1]`.
    pub rank: f64,
    /// Raw percentile of the population, `None` for an empty population.
    pub percentile: Option<f64>,
    pub guard: Guard,
    pub guard_value: f64,
    /// Final threshold value.
    pub value: f64,
}

impl PercentileInput {
    fn derive(values: &[f64], rank: f64, guard: Guard, guard_value: f64) -> Self {
        let percentile = percentile(values, rank);
        let value = match (percentile, guard) {
            (None, _) => guard_value,
            (Some(p), Guard::Floor) => p.max(guard_value),
            (Some(p), Guard::Ceiling) => p.min(guard_value),
        };
        Self {
            rank,
            percentile,
            guard,
            guard_value,
            value,
        }
    }
}

/// The percentile inputs behind each threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdInputs {
    pub hot30: PercentileInput,
    pub hot90: PercentileInput,
    pub hot_rate: PercentileInput,
    pub stable_days: PercentileInput,
    pub stable90: PercentileInput,
    pub stable_rate: PercentileInput,
}

/// Thresholds of one analysis run, kept verbatim for traceability.
///
/// Any classification is reproducible from this record and the run's
/// [`MetricsTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoThresholds {
    /// Run whose metrics produced these thresholds.
    pub run_id: u64,
    pub computed_at: DateTime<Utc>,
    pub hot30: f64,
    pub hot90: f64,
    pub hot_rate: f64,
    pub stable_days: f64,
    pub stable90: f64,
    pub stable_rate: f64,
    /// Files in the percentile population (known history only).
    pub population: usize,
    /// No eligible file: every threshold fell back to its guard value.
    pub empty_population: bool,
    pub interpolation: String,
    pub inputs: ThresholdInputs,
}

/// Percentile `rank` of `values` with linear interpolation.
///
/// Returns `None` for an empty slice. `values` need not be sorted.
///
/// # Examples
///
/// ```
/// use weave_history::thresholds::percentile;
///
/// assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 0.5), Some(2.5));
/// assert_eq!(percentile(&[5.0], 0.95), Some(5.0));
/// assert_eq!(percentile(&[], 0.5), None);
/// ```
pub fn percentile(values: &[f64], rank: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let rank = rank.clamp(0.0, 1.0);
    let h = (sorted.len() - 1) as f64 * rank;
    let lower = h.floor() as usize;
    let upper = (lower + 1).min(sorted.len() - 1);
    let fraction = h - lower as f64;
    Some(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
}

/// Compute the repository thresholds from a metrics table.
///
/// Files with unknown history are excluded from the population. An empty
/// population yields the guard values exactly.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use chrono::Utc;
/// use weave_core::ThresholdConfig;
/// use weave_history::materialize::MetricsTable;
/// use weave_history::thresholds::compute_thresholds;
///
/// let table = MetricsTable { run_id: 1, reference_ts: 0, files: BTreeMap::new() };
/// let t = compute_thresholds(&table, &ThresholdConfig::default(), Utc::now());
/// assert!(t.empty_population);
/// assert_eq!(t.hot30, 3.0);
/// assert_eq!(t.stable_days, 180.0);
/// ```
pub fn compute_thresholds(
    metrics: &MetricsTable,
    policy: &ThresholdConfig,
    computed_at: DateTime<Utc>,
) -> RepoThresholds {
    let population: Vec<&FileMetrics> = metrics.files.values().filter(|m| !m.is_unknown).collect();

    let column = |f: fn(&FileMetrics) -> f64| -> Vec<f64> { population.iter().map(|m| f(m)).collect() };
    let commits_30d = column(|m| f64::from(m.commits_30d));
    let commits_90d = column(|m| f64::from(m.commits_90d));
    let rates = column(|m| m.lifetime_commits_per_month);
    let ages: Vec<f64> = population
        .iter()
        .filter_map(|m| m.days_since_last_change)
        .map(|d| d as f64)
        .collect();

    let inputs = ThresholdInputs {
        hot30: PercentileInput::derive(&commits_30d, policy.hot30_percentile, Guard::Floor, policy.hot30_floor),
        hot90: PercentileInput::derive(&commits_90d, policy.hot90_percentile, Guard::Floor, policy.hot90_floor),
        hot_rate: PercentileInput::derive(&rates, policy.hot_rate_percentile, Guard::Floor, policy.hot_rate_floor),
        stable_days: PercentileInput::derive(&ages, policy.stable_days_percentile, Guard::Floor, policy.stable_days_floor),
        stable90: PercentileInput::derive(&commits_90d, policy.stable90_percentile, Guard::Ceiling, policy.stable90_ceiling),
        stable_rate: PercentileInput::derive(&rates, policy.stable_rate_percentile, Guard::Ceiling, policy.stable_rate_ceiling),
    };

    let empty_population = population.is_empty();
    if empty_population {
        warn!(run_id = metrics.run_id, "no files with known history, thresholds fall back to guard values");
    }

    RepoThresholds {
        run_id: metrics.run_id,
        computed_at,
        hot30: inputs.hot30.value,
        hot90: inputs.hot90.value,
        hot_rate: inputs.hot_rate.value,
        stable_days: inputs.stable_days.value,
        stable90: inputs.stable90.value,
        stable_rate: inputs.stable_rate.value,
        population: population.len(),
        empty_population,
        interpolation: INTERPOLATION.to_string(),
        inputs,
    }
}
