use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weave_core::{AlgorithmKind, WeightColumn};

use crate::engine::ClusteringResult;

/// A stored clustering result. Only `name` and `tags` change after saving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringSnapshot {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub result: ClusteringResult,
}

impl ClusteringSnapshot {
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at,
            tags: self.tags.clone(),
            algorithm: self.result.algorithm,
            weight_column: self.result.parameters.weight_column,
            cluster_count: self.result.cluster_count,
            clustered_files: self.result.metrics.clustered_files,
            modularity: self.result.metrics.modularity,
        }
    }
}

/// Listing row for a snapshot, without its clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub algorithm: AlgorithmKind,
    pub weight_column: WeightColumn,
    pub cluster_count: usize,
    pub clustered_files: usize,
    pub modularity: Option<f64>,
}

/// Trim, drop empty and deduplicate tags, keeping first-seen order.
///
/// # Examples
///
/// ```
/// use weave_cluster::snapshot::normalize_tags;
///
/// let tags = normalize_tags(vec![" release ".into(), "".into(), "release".into(), "q3".into()]);
/// assert_eq!(tags, vec!["release", "q3"]);
/// ```
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}
