use std::collections::BTreeSet;

use chrono::Utc;
use proptest::prelude::*;
use weave_cluster::compare::{compare_snapshots, MatchStatus};
use weave_cluster::engine::{cluster, ClusteringRequest, ClusteringResult};
use weave_cluster::snapshot::ClusteringSnapshot;
use weave_core::{AlgorithmKind, CancelToken, ClusteringConfig, CommitRecord, ComparisonConfig, FileChange};
use weave_coupling::coupling::{compute_coupling, CouplingParams, CouplingResult};
use weave_history::stream::ReplayStream;

fn commits(groups: &[(&[&str], usize)]) -> Vec<CommitRecord> {
    let mut out = Vec::new();
    for (files, times) in groups {
        for _ in 0..*times {
            let n = out.len();
            out.push(CommitRecord {
                id: format!("{n:04}"),
                author: format!("dev{}", n % 3),
                timestamp: 1_700_000_000 + n as i64 * 3600,
                changes: files.iter().map(|p| FileChange::for_path(p)).collect(),
            });
        }
    }
    out
}

fn couple(commits: Vec<CommitRecord>) -> CouplingResult {
    let params = CouplingParams {
        min_support: 2,
        min_coupling: 0.0,
        ..CouplingParams::default()
    };
    compute_coupling(&mut ReplayStream::new(commits), params, &CancelToken::new()).unwrap()
}

fn components() -> ClusteringRequest {
    let mut request = ClusteringRequest::from(&ClusteringConfig::default());
    request.algorithm = AlgorithmKind::ConnectedComponents;
    request
}

fn snapshot(id: i64, result: ClusteringResult) -> ClusteringSnapshot {
    ClusteringSnapshot {
        id,
        name: format!("s{id}"),
        created_at: Utc::now(),
        tags: Vec::new(),
        result,
    }
}

#[test]
fn module_drift_between_two_histories() {
    // Before: f1, f2, f3 always change together.
    let before = couple(commits(&[(&["f1", "f2", "f3"], 4), (&["solo"], 1)]));
    // After: f3 leaves the module and f4 joins it.
    let after = couple(commits(&[(&["f1", "f2", "f4"], 4), (&["f3"], 1)]));

    let base = snapshot(1, cluster(&before, &components()).unwrap());
    let head = snapshot(2, cluster(&after, &components()).unwrap());
    assert_eq!(base.result.cluster_count, 1);
    assert_eq!(head.result.cluster_count, 1);

    let diff = compare_snapshots(&base, &head, &ComparisonConfig::default()).unwrap();
    let m = &diff.matches[0];
    assert_eq!(m.overlap_count, 2);
    assert_eq!(m.overlap_ratio, 0.5);
    assert_eq!(m.status, MatchStatus::Drifted);
    assert_eq!(diff.flows.len(), 1);
    assert_eq!(diff.flows[0].value, 2);
    assert_eq!(m.departed.len(), 1);
    assert_eq!(base.result.path(m.departed[0]), "f3");
    assert!(diff.new_clusters.is_empty());
}

#[test]
fn isolated_files_stay_out_of_clusters() {
    let coupling = couple(commits(&[(&["a", "b"], 3), (&["lonely"], 5)]));
    let result = cluster(&coupling, &components()).unwrap();
    assert_eq!(result.cluster_count, 1);
    assert_eq!(result.isolated_files.len(), 1);
    assert_eq!(result.path(result.isolated_files[0]), "lonely");
    assert!(result.cluster_of(result.isolated_files[0]).is_none());
}

#[test]
fn snapshot_round_trips_through_json() {
    let coupling = couple(commits(&[(&["a", "b", "c"], 3), (&["c", "d"], 2)]));
    let snap = snapshot(7, cluster(&coupling, &components()).unwrap());
    let json = serde_json::to_string(&snap).unwrap();
    let back: ClusteringSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(back.id, snap.id);
    assert_eq!(back.created_at, snap.created_at);
    assert_eq!(back.result.clustered_files(), snap.result.clustered_files());
    assert_eq!(back.result.paths, snap.result.paths);
    assert_eq!(back.summary().cluster_count, snap.result.cluster_count);
}

fn arb_commits() -> impl Strategy<Value = Vec<CommitRecord>> {
    prop::collection::vec(prop::collection::btree_set(0u8..12, 1..5), 1..40).prop_map(|sets| {
        sets.into_iter()
            .enumerate()
            .map(|(n, files)| CommitRecord {
                id: format!("{n}"),
                author: "dev".into(),
                timestamp: n as i64,
                changes: files
                    .into_iter()
                    .map(|f| FileChange::for_path(&format!("src/f{f}.rs")))
                    .collect(),
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn clustering_is_a_deterministic_partition(commits in arb_commits(), louvain in any::<bool>()) {
        let coupling = couple(commits);
        let mut request = components();
        request.parameters.min_weight = 0.0;
        if louvain {
            request.algorithm = AlgorithmKind::Louvain;
        }
        let result = cluster(&coupling, &request).unwrap();

        let mut seen = BTreeSet::new();
        for (i, c) in result.clusters.iter().enumerate() {
            prop_assert_eq!(c.id as usize, i);
            prop_assert!(!c.files.is_empty());
            if i > 0 {
                prop_assert!(result.clusters[i - 1].size >= c.size);
            }
            for f in &c.files {
                prop_assert!(seen.insert(*f));
            }
        }
        for f in &result.isolated_files {
            prop_assert!(!seen.contains(f));
        }
        prop_assert_eq!(seen.len() + result.isolated_files.len(), coupling.catalog.len());

        let again = cluster(&coupling, &request).unwrap();
        prop_assert_eq!(again, result);
    }

    #[test]
    fn self_comparison_is_fully_stable(commits in arb_commits()) {
        let coupling = couple(commits);
        let result = cluster(&coupling, &components()).unwrap();
        let count = result.cluster_count;
        let snap = snapshot(1, result);
        let diff = compare_snapshots(&snap, &snap, &ComparisonConfig::default()).unwrap();
        prop_assert_eq!(diff.counts.stable, count);
        prop_assert!(diff.new_clusters.is_empty());
    }
}
