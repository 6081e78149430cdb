//! The snapshot contract and its in-memory implementation.

use std::collections::BTreeMap;

use chrono::Utc;
use weave_cluster::compare::{compare_snapshots, ComparisonResult};
use weave_cluster::engine::{ClusteringResult, InterClusterEdge};
use weave_cluster::snapshot::{normalize_tags, ClusteringSnapshot, SnapshotSummary};
use weave_core::{ComparisonConfig, WeaveError};

/// Storage of immutable clustering results.
///
/// Only a snapshot's name and tags change after it is saved.
pub trait SnapshotStore {
    /// Persist `result` and return its new id.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::InvalidParameter`] for a blank name, or a
    /// backend error.
    fn save(
        &mut self,
        name: &str,
        result: &ClusteringResult,
        tags: &[String],
    ) -> Result<i64, WeaveError>;

    /// Every snapshot, newest first.
    fn list(&self) -> Result<Vec<SnapshotSummary>, WeaveError>;

    /// # Errors
    ///
    /// Returns [`WeaveError::SnapshotNotFound`] for an unknown id.
    fn load(&self, id: i64) -> Result<ClusteringSnapshot, WeaveError>;

    /// Inter-cluster edges of a snapshot, by source then target.
    fn edges(&self, id: i64) -> Result<Vec<InterClusterEdge>, WeaveError> {
        Ok(self.load(id)?.result.inter_cluster_edges)
    }

    fn rename(&mut self, id: i64, name: &str) -> Result<(), WeaveError>;

    fn set_tags(&mut self, id: i64, tags: &[String]) -> Result<(), WeaveError>;

    fn delete(&mut self, id: i64) -> Result<(), WeaveError>;
}

/// Compare two stored snapshots.
///
/// # Errors
///
/// Returns [`WeaveError::SnapshotNotFound`] when either id is unknown and
/// [`WeaveError::IncompatibleSnapshot`] when they cannot be compared.
///
/// # Examples
///
/// ```
/// use weave_core::{ComparisonConfig, WeaveError};
/// use weave_store::snapshots::{compare, MemorySnapshotStore};
///
/// let store = MemorySnapshotStore::default();
/// let err = compare(&store, 1, 2, &ComparisonConfig::default()).unwrap_err();
/// assert!(matches!(err, WeaveError::SnapshotNotFound(1)));
/// ```
pub fn compare<S: SnapshotStore + ?Sized>(
    store: &S,
    base_id: i64,
    head_id: i64,
    config: &ComparisonConfig,
) -> Result<ComparisonResult, WeaveError> {
    let base = store.load(base_id)?;
    let head = store.load(head_id)?;
    compare_snapshots(&base, &head, config)
}

pub(crate) fn check_name(name: &str) -> Result<&str, WeaveError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(WeaveError::InvalidParameter(
            "snapshot name must not be empty".into(),
        ));
    }
    Ok(name)
}

/// Snapshots kept in a map, ids counting up from 1.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: BTreeMap<i64, ClusteringSnapshot>,
    last_id: i64,
}

impl MemorySnapshotStore {
    fn get_mut(&mut self, id: i64) -> Result<&mut ClusteringSnapshot, WeaveError> {
        self.snapshots
            .get_mut(&id)
            .ok_or(WeaveError::SnapshotNotFound(id))
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(
        &mut self,
        name: &str,
        result: &ClusteringResult,
        tags: &[String],
    ) -> Result<i64, WeaveError> {
        let name = check_name(name)?.to_string();
        self.last_id += 1;
        let id = self.last_id;
        self.snapshots.insert(
            id,
            ClusteringSnapshot {
                id,
                name,
                created_at: Utc::now(),
                tags: normalize_tags(tags.to_vec()),
                result: result.clone(),
            },
        );
        Ok(id)
    }

    fn list(&self) -> Result<Vec<SnapshotSummary>, WeaveError> {
        Ok(self.snapshots.values().rev().map(|s| s.summary()).collect())
    }

    fn load(&self, id: i64) -> Result<ClusteringSnapshot, WeaveError> {
        self.snapshots
            .get(&id)
            .cloned()
            .ok_or(WeaveError::SnapshotNotFound(id))
    }

    fn rename(&mut self, id: i64, name: &str) -> Result<(), WeaveError> {
        let name = check_name(name)?.to_string();
        self.get_mut(id)?.name = name;
        Ok(())
    }

    fn set_tags(&mut self, id: i64, tags: &[String]) -> Result<(), WeaveError> {
        self.get_mut(id)?.tags = normalize_tags(tags.to_vec());
        Ok(())
    }

    fn delete(&mut self, id: i64) -> Result<(), WeaveError> {
        self.snapshots
            .remove(&id)
            .map(|_| ())
            .ok_or(WeaveError::SnapshotNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_cluster::engine::{cluster, ClusteringRequest};
    use weave_core::{CancelToken, ClusteringConfig, CommitRecord, FileChange};
    use weave_coupling::coupling::{compute_coupling, CouplingParams};

    fn result() -> ClusteringResult {
        let commits: Vec<CommitRecord> = (0..3)
            .map(|n| CommitRecord {
                id: format!("c{n}"),
                author: "alice".into(),
                timestamp: n,
                changes: vec![FileChange::for_path("a.rs"), FileChange::for_path("b.rs")],
            })
            .collect();
        let mut stream = weave_history::stream::ReplayStream::new(commits);
        let coupling =
            compute_coupling(&mut stream, CouplingParams::default(), &CancelToken::new()).unwrap();
        cluster(&coupling, &ClusteringRequest::from(&ClusteringConfig::default())).unwrap()
    }

    #[test]
    fn save_list_load() {
        let mut store = MemorySnapshotStore::default();
        let first = store.save("before", &result(), &[]).unwrap();
        let second = store
            .save("after", &result(), &["release".into(), "release".into()])
            .unwrap();
        assert_eq!((first, second), (1, 2));

        let listed = store.list().unwrap();
        assert_eq!(listed[0].id, 2);
        assert_eq!(listed[0].tags, vec!["release"]);
        assert_eq!(store.load(first).unwrap().name, "before");
    }

    #[test]
    fn blank_name_is_rejected() {
        let mut store = MemorySnapshotStore::default();
        assert!(matches!(
            store.save("  ", &result(), &[]),
            Err(WeaveError::InvalidParameter(_))
        ));
    }

    #[test]
    fn rename_tag_and_delete() {
        let mut store = MemorySnapshotStore::default();
        let id = store.save("draft", &result(), &[]).unwrap();
        store.rename(id, "final").unwrap();
        store.set_tags(id, &["q3".into()]).unwrap();
        let snap = store.load(id).unwrap();
        assert_eq!(snap.name, "final");
        assert_eq!(snap.tags, vec!["q3"]);

        store.delete(id).unwrap();
        assert!(matches!(store.load(id), Err(WeaveError::SnapshotNotFound(_))));
        assert!(matches!(store.delete(id), Err(WeaveError::SnapshotNotFound(_))));
        assert!(store.rename(id, "x").is_err());
    }

    #[test]
    fn compare_loads_both_snapshots() {
        let mut store = MemorySnapshotStore::default();
        let a = store.save("a", &result(), &[]).unwrap();
        let b = store.save("b", &result(), &[]).unwrap();
        let diff = compare(&store, a, b, &ComparisonConfig::default()).unwrap();
        assert_eq!(diff.counts.stable, 1);
        assert!(matches!(
            compare(&store, a, 99, &ComparisonConfig::default()),
            Err(WeaveError::SnapshotNotFound(99))
        ));
    }
}
