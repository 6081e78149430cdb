//! Cluster matching between two snapshots.
//!
//! Every base cluster is paired with the head cluster of highest overlap
//! ratio `|base ∩ head| / |base ∪ head|` and labelled stable, drifted or
//! dissolved. Head clusters no base cluster kept are new. Flows record how
//! many files moved from each base cluster into each head cluster.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;
use weave_core::{ComparisonConfig, FileId, WeaveError};

use crate::engine::Cluster;
use crate::snapshot::ClusteringSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Stable,
    Drifted,
    Dissolved,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStatus::Stable => write!(f, "stable"),
            MatchStatus::Drifted => write!(f, "drifted"),
            MatchStatus::Dissolved => write!(f, "dissolved"),
        }
    }
}

/// Fate of one base cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMatch {
    pub base_cluster: u32,
    pub base_size: usize,
    pub status: MatchStatus,
    /// Head cluster with the highest overlap ratio, if any file is shared.
    pub best_match: Option<u32>,
    pub overlap_count: usize,
    pub overlap_ratio: f64,
    /// Head size minus base size; zero without a best match.
    pub size_diff: i64,
    /// Members that are in no head cluster at all.
    pub departed: Vec<FileId>,
}

/// Files moving from a base cluster into a head cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub source: u32,
    pub target: u32,
    pub value: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonCounts {
    pub stable: usize,
    pub drifted: usize,
    pub dissolved: usize,
    pub new: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub base_id: i64,
    pub head_id: i64,
    /// One entry per base cluster, in base id order.
    pub matches: Vec<ClusterMatch>,
    /// Head clusters that are no stable or drifted best match.
    pub new_clusters: Vec<u32>,
    /// Every base/head pair sharing at least one file, by source then target.
    pub flows: Vec<Flow>,
    pub counts: ComparisonCounts,
}

impl ComparisonResult {
    pub fn matched(&self, base_cluster: u32) -> Option<&ClusterMatch> {
        self.matches.iter().find(|m| m.base_cluster == base_cluster)
    }
}

/// Overlap of one base/head pair.
#[derive(Debug, Clone, Copy)]
struct Overlap {
    head: u32,
    shared: usize,
    union: usize,
}

impl Overlap {
    fn ratio(&self) -> f64 {
        if self.union == 0 {
            0.0
        } else {
            self.shared as f64 / self.union as f64
        }
    }

    /// Higher ratio first, then larger overlap, then lower head id. Ratios are
    /// compared by cross-multiplication so equal fractions tie exactly.
    fn ranks_above(&self, other: &Overlap) -> bool {
        let lhs = self.shared as u128 * other.union as u128;
        let rhs = other.shared as u128 * self.union as u128;
        match lhs.cmp(&rhs) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match self.shared.cmp(&other.shared) {
                Ordering::Greater => true,
                Ordering::Less => false,
                Ordering::Equal => self.head < other.head,
            },
        }
    }
}

fn overlap(base: &Cluster, head: &Cluster) -> Overlap {
    let shared = base.files.iter().filter(|f| head.contains(**f)).count();
    Overlap {
        head: head.id,
        shared,
        union: base.files.len() + head.files.len() - shared,
    }
}

fn validate(config: &ComparisonConfig) -> Result<(), WeaveError> {
    let in_unit = |v: f64| (0.0..=1.0).contains(&v);
    if !in_unit(config.stable_threshold) || !in_unit(config.drift_threshold) {
        return Err(WeaveError::InvalidParameter(
            "comparison thresholds must lie in [0, 1]".into(),
        ));
    }
    if config.drift_threshold > config.stable_threshold {
        return Err(WeaveError::InvalidParameter(format!(
            "drift_threshold {} exceeds stable_threshold {}",
            config.drift_threshold, config.stable_threshold
        )));
    }
    Ok(())
}

/// Snapshots are comparable when they were clustered with the same algorithm
/// over the same weight column.
///
/// # Errors
///
/// Returns [`WeaveError::IncompatibleSnapshot`] naming the mismatch.
pub fn check_compatible(
    base: &ClusteringSnapshot,
    head: &ClusteringSnapshot,
) -> Result<(), WeaveError> {
    if base.result.algorithm != head.result.algorithm {
        return Err(WeaveError::IncompatibleSnapshot(format!(
            "snapshot {} used {} but snapshot {} used {}",
            base.id, base.result.algorithm, head.id, head.result.algorithm
        )));
    }
    let (bw, hw) = (
        base.result.parameters.weight_column,
        head.result.parameters.weight_column,
    );
    if bw != hw {
        return Err(WeaveError::IncompatibleSnapshot(format!(
            "snapshot {} is weighted by {bw} but snapshot {} by {hw}",
            base.id, head.id
        )));
    }
    Ok(())
}

/// Match the clusters of `base` against those of `head`.
///
/// # Errors
///
/// Returns [`WeaveError::IncompatibleSnapshot`] for snapshots built with a
/// different algorithm or weight column, and
/// [`WeaveError::InvalidParameter`] for thresholds outside `[0, 1]` or a
/// drift threshold above the stable one.
pub fn compare_snapshots(
    base: &ClusteringSnapshot,
    head: &ClusteringSnapshot,
    config: &ComparisonConfig,
) -> Result<ComparisonResult, WeaveError> {
    validate(config)?;
    check_compatible(base, head)?;

    let head_files: BTreeSet<FileId> = head.result.clustered_files();
    let mut matches = Vec::with_capacity(base.result.clusters.len());
    let mut flows = Vec::new();
    let mut kept: BTreeSet<u32> = BTreeSet::new();
    let mut counts = ComparisonCounts::default();

    for base_cluster in &base.result.clusters {
        let mut best: Option<Overlap> = None;
        for head_cluster in &head.result.clusters {
            let candidate = overlap(base_cluster, head_cluster);
            if candidate.shared == 0 {
                continue;
            }
            flows.push(Flow {
                source: base_cluster.id,
                target: head_cluster.id,
                value: candidate.shared,
            });
            if best.map_or(true, |b| candidate.ranks_above(&b)) {
                best = Some(candidate);
            }
        }

        let ratio = best.map_or(0.0, |b| b.ratio());
        let status = match best {
            Some(_) if ratio >= config.stable_threshold => MatchStatus::Stable,
            Some(_) if ratio >= config.drift_threshold => MatchStatus::Drifted,
            _ => MatchStatus::Dissolved,
        };
        match status {
            MatchStatus::Stable => counts.stable += 1,
            MatchStatus::Drifted => counts.drifted += 1,
            MatchStatus::Dissolved => counts.dissolved += 1,
        }
        if status != MatchStatus::Dissolved {
            if let Some(b) = best {
                kept.insert(b.head);
            }
        }

        let size_diff = best
            .and_then(|b| head.result.cluster(b.head))
            .map_or(0, |h| h.size as i64 - base_cluster.size as i64);
        matches.push(ClusterMatch {
            base_cluster: base_cluster.id,
            base_size: base_cluster.size,
            status,
            best_match: best.map(|b| b.head),
            overlap_count: best.map_or(0, |b| b.shared),
            overlap_ratio: ratio,
            size_diff,
            departed: base_cluster
                .files
                .iter()
                .copied()
                .filter(|f| !head_files.contains(f))
                .collect(),
        });
    }

    let new_clusters: Vec<u32> = head
        .result
        .clusters
        .iter()
        .map(|c| c.id)
        .filter(|id| !kept.contains(id))
        .collect();
    counts.new = new_clusters.len();

    info!(
        base = base.id,
        head = head.id,
        stable = counts.stable,
        drifted = counts.drifted,
        dissolved = counts.dissolved,
        new = counts.new,
        "snapshots compared"
    );

    Ok(ComparisonResult {
        base_id: base.id,
        head_id: head.id,
        matches,
        new_clusters,
        flows,
        counts,
    })
}
