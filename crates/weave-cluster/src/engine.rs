//! Clustering runs over a coupling result.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use weave_core::{AlgorithmKind, ClusteringConfig, FileId, WeaveError, WeightColumn};
use weave_coupling::activity::{AuthorShare, CommitTouch};
use weave_coupling::coupling::CouplingResult;

use crate::algorithm::algorithm_for;
use crate::graph::{CouplingGraph, FolderFilter};

/// Tunable inputs of a clustering run, stored with every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringParameters {
    pub weight_column: WeightColumn,
    /// Edges below this value on `weight_column` are dropped.
    pub min_weight: f64,
    /// Folder prefixes both endpoints must be under; empty keeps all files.
    #[serde(default)]
    pub folders: Vec<String>,
    /// Louvain resolution.
    pub resolution: f64,
    /// Entries per summary list.
    pub top_n: usize,
}

/// A clustering invocation.
///
/// # Examples
///
/// ```
/// use weave_core::{AlgorithmKind, ClusteringConfig};
/// use weave_cluster::engine::ClusteringRequest;
///
/// let request = ClusteringRequest::from(&ClusteringConfig::default());
/// assert_eq!(request.algorithm, AlgorithmKind::Louvain);
/// assert_eq!(request.parameters.min_weight, 0.3);
/// assert!(request.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringRequest {
    pub algorithm: AlgorithmKind,
    pub parameters: ClusteringParameters,
}

impl From<&ClusteringConfig> for ClusteringRequest {
    fn from(config: &ClusteringConfig) -> Self {
        Self {
            algorithm: config.algorithm,
            parameters: ClusteringParameters {
                weight_column: config.weight_column,
                min_weight: config.min_weight,
                folders: Vec::new(),
                resolution: config.resolution,
                top_n: config.top_n,
            },
        }
    }
}

impl ClusteringRequest {
    /// # Errors
    ///
    /// Returns [`WeaveError::InvalidParameter`] for a negative or non-finite
    /// weight floor or a non-positive resolution.
    pub fn validate(&self) -> Result<(), WeaveError> {
        let p = &self.parameters;
        if !(p.min_weight.is_finite() && p.min_weight >= 0.0) {
            return Err(WeaveError::InvalidParameter(format!(
                "min_weight must be a non-negative number, got {}",
                p.min_weight
            )));
        }
        if !(p.resolution.is_finite() && p.resolution > 0.0) {
            return Err(WeaveError::InvalidParameter(format!(
                "resolution must be positive, got {}",
                p.resolution
            )));
        }
        Ok(())
    }
}

/// Churn of one file in a cluster summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChurn {
    pub file: FileId,
    pub path: String,
    pub churn: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub total_churn: u64,
    /// Mean Dice coupling over the cluster's internal edges.
    pub avg_internal_coupling: f64,
    pub internal_edges: usize,
    pub top_files: Vec<FileChurn>,
    pub top_commits: Vec<CommitTouch>,
    pub common_authors: Vec<AuthorShare>,
}

/// One cluster of a partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Position in size order, from 0.
    pub id: u32,
    /// Members, sorted.
    pub files: Vec<FileId>,
    pub size: usize,
    pub summary: ClusterSummary,
}

impl Cluster {
    pub fn contains(&self, file: FileId) -> bool {
        self.files.binary_search(&file).is_ok()
    }
}

/// Aggregated coupling between two clusters (`source < target`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterClusterEdge {
    pub source: u32,
    pub target: u32,
    pub edge_count: usize,
    pub total_weight: f64,
    pub max_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringMetrics {
    /// Newman modularity, for strategies that optimize it.
    pub modularity: Option<f64>,
    pub cluster_count: usize,
    pub clustered_files: usize,
    pub isolated_files: usize,
    /// Edges that survived the weight and folder filters.
    pub edge_count: usize,
}

/// Outcome of a clustering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringResult {
    pub algorithm: AlgorithmKind,
    pub parameters: ClusteringParameters,
    pub cluster_count: usize,
    pub clusters: Vec<Cluster>,
    pub metrics: ClusteringMetrics,
    /// Files without any surviving edge; never part of a cluster.
    pub isolated_files: Vec<FileId>,
    pub inter_cluster_edges: Vec<InterClusterEdge>,
    pub paths: BTreeMap<FileId, String>,
}

impl ClusteringResult {
    pub fn cluster(&self, id: u32) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.id == id)
    }

    pub fn cluster_of(&self, file: FileId) -> Option<u32> {
        self.clusters.iter().find(|c| c.contains(file)).map(|c| c.id)
    }

    /// Display path of `file`, `#<id>` when unknown.
    pub fn path(&self, file: FileId) -> String {
        self.paths
            .get(&file)
            .cloned()
            .unwrap_or_else(|| format!("#{file}"))
    }

    /// Every clustered file.
    pub fn clustered_files(&self) -> BTreeSet<FileId> {
        self.clusters
            .iter()
            .flat_map(|c| c.files.iter().copied())
            .collect()
    }
}

/// Partition the coupling graph of `coupling` into clusters.
///
/// Cluster ids follow descending size, ties broken by the lowest member id.
/// Identical input and parameters always give identical ids and membership.
///
/// # Errors
///
/// Returns [`WeaveError::InvalidParameter`] when the request is invalid.
pub fn cluster(
    coupling: &CouplingResult,
    request: &ClusteringRequest,
) -> Result<ClusteringResult, WeaveError> {
    request.validate()?;
    let params = &request.parameters;
    let catalog = &coupling.catalog;
    let filter = FolderFilter::new(params.folders.clone());
    let in_scope = |id: FileId| filter.matches(catalog.get(id).and_then(|e| e.path.as_deref()));

    let graph = CouplingGraph::build(
        &coupling.edges,
        params.weight_column,
        params.min_weight,
        &in_scope,
    );
    let algorithm = algorithm_for(request.algorithm, params.resolution);
    let partition = algorithm.run(&graph)?;
    debug!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "partitioned coupling graph"
    );

    let mut groups: BTreeMap<usize, Vec<FileId>> = BTreeMap::new();
    for (node, &community) in partition.iter().enumerate() {
        groups.entry(community).or_default().push(graph.file(node));
    }
    let mut ordered: Vec<(usize, Vec<FileId>)> = groups.into_iter().collect();
    for (_, files) in &mut ordered {
        files.sort();
    }
    ordered.sort_by(|(_, x), (_, y)| y.len().cmp(&x.len()).then_with(|| x[0].cmp(&y[0])));

    let mut cluster_of_community: BTreeMap<usize, u32> = BTreeMap::new();
    for (id, (community, _)) in ordered.iter().enumerate() {
        cluster_of_community.insert(*community, id as u32);
    }
    let node_cluster: Vec<usize> = partition
        .iter()
        .map(|c| cluster_of_community[c] as usize)
        .collect();

    let mut internal: Vec<(usize, f64)> = vec![(0, 0.0); ordered.len()];
    let mut between: BTreeMap<(u32, u32), InterClusterEdge> = BTreeMap::new();
    for (a, b, weight) in graph.edges() {
        let (ca, cb) = (node_cluster[a], node_cluster[b]);
        if ca == cb {
            let dice = graph.coupling(graph.file(a), graph.file(b)).unwrap_or(0.0);
            internal[ca].0 += 1;
            internal[ca].1 += dice;
            continue;
        }
        let (source, target) = (ca.min(cb) as u32, ca.max(cb) as u32);
        let edge = between
            .entry((source, target))
            .or_insert_with(|| InterClusterEdge {
                source,
                target,
                edge_count: 0,
                total_weight: 0.0,
                max_weight: 0.0,
            });
        edge.edge_count += 1;
        edge.total_weight += weight;
        edge.max_weight = edge.max_weight.max(weight);
    }

    let mut paths = BTreeMap::new();
    let clusters: Vec<Cluster> = ordered
        .into_iter()
        .enumerate()
        .map(|(id, (_, files))| {
            let members: BTreeSet<FileId> = files.iter().copied().collect();
            let (internal_edges, coupling_sum) = internal[id];
            let activity = &coupling.activity;
            let summary = ClusterSummary {
                total_churn: activity.total_churn(&members),
                avg_internal_coupling: if internal_edges == 0 {
                    0.0
                } else {
                    coupling_sum / internal_edges as f64
                },
                internal_edges,
                top_files: activity
                    .top_churn(&members, params.top_n)
                    .into_iter()
                    .map(|(file, churn)| FileChurn {
                        file,
                        path: catalog.display_path(file),
                        churn,
                    })
                    .collect(),
                top_commits: activity.top_commits(&members, params.top_n),
                common_authors: activity.common_authors(&members, params.top_n),
            };
            for &file in &files {
                paths.insert(file, catalog.display_path(file));
            }
            Cluster {
                id: id as u32,
                size: files.len(),
                files,
                summary,
            }
        })
        .collect();

    let isolated_files: Vec<FileId> = catalog
        .iter()
        .map(|e| e.id)
        .filter(|&id| in_scope(id) && !graph.contains(id))
        .collect();
    for &file in &isolated_files {
        paths.insert(file, catalog.display_path(file));
    }

    let modularity = algorithm
        .reports_modularity()
        .then(|| graph.modularity(&node_cluster, params.resolution));

    let metrics = ClusteringMetrics {
        modularity,
        cluster_count: clusters.len(),
        clustered_files: graph.node_count(),
        isolated_files: isolated_files.len(),
        edge_count: graph.edge_count(),
    };
    info!(
        algorithm = %request.algorithm,
        clusters = metrics.cluster_count,
        clustered = metrics.clustered_files,
        isolated = metrics.isolated_files,
        "clustering complete"
    );

    Ok(ClusteringResult {
        algorithm: request.algorithm,
        parameters: params.clone(),
        cluster_count: clusters.len(),
        clusters,
        metrics,
        isolated_files,
        inter_cluster_edges: between.into_values().collect(),
        paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::{CancelToken, CommitRecord, FileChange};
    use weave_coupling::coupling::{compute_coupling, CouplingParams};
    use weave_history::stream::ReplayStream;

    fn commit(id: usize, author: &str, paths: &[&str]) -> CommitRecord {
        CommitRecord {
            id: format!("c{id}"),
            author: author.into(),
            timestamp: id as i64,
            changes: paths
                .iter()
                .map(|p| FileChange::for_path(p).with_lines(3, 1))
                .collect(),
        }
    }

    /// Two tightly coupled groups, one weak link between them, and a loner.
    fn coupling() -> CouplingResult {
        let mut commits = Vec::new();
        let mut n = 0;
        for _ in 0..4 {
            commits.push(commit(n, "alice", &["api/a.rs", "api/b.rs", "api/c.rs"]));
            n += 1;
            commits.push(commit(n, "bob", &["db/x.rs", "db/y.rs"]));
            n += 1;
        }
        for _ in 0..3 {
            commits.push(commit(n, "carol", &["api/c.rs", "db/x.rs"]));
            n += 1;
        }
        commits.push(commit(n, "dave", &["README.md"]));
        let params = CouplingParams {
            min_support: 3,
            min_coupling: 0.0,
            ..CouplingParams::default()
        };
        compute_coupling(&mut ReplayStream::new(commits), params, &CancelToken::new()).unwrap()
    }

    fn request(algorithm: AlgorithmKind, min_weight: f64) -> ClusteringRequest {
        let mut request = ClusteringRequest::from(&ClusteringConfig::default());
        request.algorithm = algorithm;
        request.parameters.min_weight = min_weight;
        request
    }

    fn paths_of(result: &ClusteringResult, cluster: &Cluster) -> Vec<String> {
        let mut paths: Vec<String> = cluster.files.iter().map(|&f| result.path(f)).collect();
        paths.sort();
        paths
    }

    #[test]
    fn louvain_separates_groups_and_reports_modularity() {
        let coupling = coupling();
        let result = cluster(&coupling, &request(AlgorithmKind::Louvain, 0.3)).unwrap();

        assert_eq!(result.cluster_count, 2);
        assert_eq!(
            paths_of(&result, &result.clusters[0]),
            vec!["api/a.rs", "api/b.rs", "api/c.rs"]
        );
        assert_eq!(paths_of(&result, &result.clusters[1]), vec!["db/x.rs", "db/y.rs"]);
        assert!(result.metrics.modularity.unwrap() > 0.0);
        assert_eq!(result.inter_cluster_edges.len(), 1);
        assert_eq!(result.inter_cluster_edges[0].source, 0);
        assert_eq!(result.inter_cluster_edges[0].target, 1);
        assert_eq!(result.isolated_files, vec![FileId::from_path("README.md")]);
    }

    #[test]
    fn components_merge_linked_groups() {
        let coupling = coupling();
        let result = cluster(&coupling, &request(AlgorithmKind::ConnectedComponents, 0.3)).unwrap();
        assert_eq!(result.cluster_count, 1);
        assert_eq!(result.clusters[0].size, 5);
        assert!(result.metrics.modularity.is_none());
        assert!(result.inter_cluster_edges.is_empty());
    }

    #[test]
    fn weight_floor_isolates_weak_links() {
        let coupling = coupling();
        // api/c.rs and db/x.rs share 3 of 7 commits each: dice 6/14.
        let result = cluster(&coupling, &request(AlgorithmKind::ConnectedComponents, 0.5)).unwrap();
        assert_eq!(result.cluster_count, 2);
        assert_eq!(result.clusters[0].size, 3);
        assert_eq!(result.clusters[1].size, 2);
    }

    #[test]
    fn folder_filter_restricts_scope() {
        let coupling = coupling();
        let mut req = request(AlgorithmKind::Louvain, 0.0);
        req.parameters.folders = vec!["db".into()];
        let result = cluster(&coupling, &req).unwrap();
        assert_eq!(result.cluster_count, 1);
        assert_eq!(paths_of(&result, &result.clusters[0]), vec!["db/x.rs", "db/y.rs"]);
        assert!(result.isolated_files.is_empty());
    }

    #[test]
    fn result_is_a_strict_partition() {
        let coupling = coupling();
        let result = cluster(&coupling, &request(AlgorithmKind::Louvain, 0.0)).unwrap();
        let mut seen = BTreeSet::new();
        for c in &result.clusters {
            assert_eq!(c.size, c.files.len());
            for f in &c.files {
                assert!(seen.insert(*f), "file in two clusters");
                assert!(!result.isolated_files.contains(f));
            }
        }
        assert_eq!(seen.len(), result.metrics.clustered_files);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let coupling = coupling();
        let req = request(AlgorithmKind::Louvain, 0.2);
        let first = cluster(&coupling, &req).unwrap();
        let second = cluster(&coupling, &req).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn summaries_use_activity() {
        let coupling = coupling();
        let result = cluster(&coupling, &request(AlgorithmKind::Louvain, 0.3)).unwrap();
        let api = &result.clusters[0].summary;
        assert_eq!(api.internal_edges, 3);
        assert!((api.avg_internal_coupling - (1.0 + 8.0 / 11.0 + 8.0 / 11.0) / 3.0).abs() < 1e-9);
        assert_eq!(api.common_authors[0].author, "alice");
        assert_eq!(api.common_authors[0].commits, 4);
        assert_eq!(api.top_files[0].path, "api/c.rs");
        // api/c.rs: 7 commits of 4 lines each.
        assert_eq!(api.top_files[0].churn, 28);
        assert_eq!(api.total_churn, 4 * 4 + 4 * 4 + 28);
    }

    #[test]
    fn invalid_request_is_rejected() {
        let coupling = coupling();
        let mut req = request(AlgorithmKind::Louvain, 0.3);
        req.parameters.resolution = -1.0;
        assert!(matches!(
            cluster(&coupling, &req),
            Err(WeaveError::InvalidParameter(_))
        ));
        let mut req = request(AlgorithmKind::Louvain, f64::NAN);
        req.parameters.resolution = 1.0;
        assert!(cluster(&coupling, &req).is_err());
    }
}
