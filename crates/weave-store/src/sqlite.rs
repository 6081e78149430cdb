//! SQLite storage for snapshots, analysis runs and coupling results.
//!
//! Results are stored as JSON documents next to the columns needed for
//! listing and ordering. Saving a run writes the run and its thresholds in
//! one transaction, so readers never see one without the other.

use std::path::Path;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, warn};
use weave_cluster::engine::{ClusteringResult, InterClusterEdge};
use weave_cluster::snapshot::{normalize_tags, ClusteringSnapshot, SnapshotSummary};
use weave_core::{AlgorithmKind, WeaveError, WeightColumn};
use weave_coupling::coupling::CouplingResult;
use weave_history::run::AnalysisRun;
use weave_history::thresholds::RepoThresholds;

use crate::snapshots::{check_name, SnapshotStore};

/// Full analysis runs kept per repository; threshold history is kept for all.
const RETAINED_RUNS: i64 = 3;

/// Coupling results kept per repository.
const RETAINED_COUPLING: i64 = 3;

/// Age after which a lease left behind by a dead process can be taken over.
const LEASE_EXPIRY_HOURS: i64 = 12;

/// Cross-process claim on analysing one repository, held as a row in the
/// store. Release it with [`SqliteStore::release_lease`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLease {
    pub repository_id: String,
    owner: String,
}

/// SQLite-backed store.
///
/// # Examples
///
/// ```
/// use weave_store::snapshots::SnapshotStore;
/// use weave_store::sqlite::SqliteStore;
///
/// let store = SqliteStore::in_memory().unwrap();
/// assert!(store.list().unwrap().is_empty());
/// assert!(store.latest_run("repo").unwrap().is_none());
/// ```
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create a store at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Database`] if the database cannot be opened.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use weave_store::sqlite::SqliteStore;
    ///
    /// let store = SqliteStore::open(Path::new(".weave/weave.db")).unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self, WeaveError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WeaveError::Database(format!("failed to create store directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| WeaveError::Database(format!("failed to open database: {e}")))?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self, WeaveError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            WeaveError::Database(format!("failed to create in-memory database: {e}"))
        })?;

        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), WeaveError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS snapshots (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    tags TEXT NOT NULL,
                    algorithm TEXT NOT NULL,
                    weight_column TEXT NOT NULL,
                    cluster_count INTEGER NOT NULL,
                    clustered_files INTEGER NOT NULL,
                    modularity REAL,
                    result TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS snapshot_edges (
                    snapshot_id INTEGER NOT NULL,
                    source INTEGER NOT NULL,
                    target INTEGER NOT NULL,
                    edge_count INTEGER NOT NULL,
                    total_weight REAL NOT NULL,
                    max_weight REAL NOT NULL,
                    PRIMARY KEY (snapshot_id, source, target),
                    FOREIGN KEY (snapshot_id) REFERENCES snapshots(id)
                );

                CREATE TABLE IF NOT EXISTS analysis_runs (
                    repository_id TEXT NOT NULL,
                    run_id INTEGER NOT NULL,
                    computed_at TEXT NOT NULL,
                    watermark TEXT,
                    run TEXT NOT NULL,
                    PRIMARY KEY (repository_id, run_id)
                );

                CREATE TABLE IF NOT EXISTS threshold_history (
                    repository_id TEXT NOT NULL,
                    run_id INTEGER NOT NULL,
                    computed_at TEXT NOT NULL,
                    thresholds TEXT NOT NULL,
                    PRIMARY KEY (repository_id, run_id)
                );

                CREATE TABLE IF NOT EXISTS coupling_results (
                    cache_key TEXT PRIMARY KEY,
                    repository_id TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    result TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS run_leases (
                    repository_id TEXT PRIMARY KEY,
                    owner TEXT NOT NULL,
                    acquired_at TEXT NOT NULL
                );
                ",
            )
            .map_err(|e| WeaveError::Database(format!("failed to create schema: {e}")))?;

        Ok(())
    }

    /// Persist `run` together with its thresholds.
    ///
    /// Older full runs beyond the retention limit are dropped in the same
    /// transaction; their thresholds stay in the history.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::InvalidParameter`] when a run with the same or a
    /// later id is already stored for the repository.
    pub fn save_run(&mut self, run: &AnalysisRun) -> Result<(), WeaveError> {
        let run_json = serde_json::to_string(run)?;
        let thresholds_json = serde_json::to_string(&run.thresholds)?;
        let computed_at = timestamp(run.computed_at);

        let tx = self
            .conn
            .transaction()
            .map_err(|e| WeaveError::Database(format!("failed to begin transaction: {e}")))?;

        let latest: Option<i64> = tx
            .query_row(
                "SELECT MAX(run_id) FROM analysis_runs WHERE repository_id = ?1",
                params![run.repository_id],
                |row| row.get(0),
            )
            .map_err(|e| WeaveError::Database(format!("failed to read latest run: {e}")))?;
        if let Some(latest) = latest {
            if latest >= run.run_id as i64 {
                return Err(WeaveError::InvalidParameter(format!(
                    "run {} is not newer than stored run {latest}",
                    run.run_id
                )));
            }
        }

        tx.execute(
            "INSERT INTO analysis_runs (repository_id, run_id, computed_at, watermark, run)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.repository_id,
                run.run_id as i64,
                computed_at,
                run.watermark,
                run_json
            ],
        )
        .map_err(|e| WeaveError::Database(format!("failed to insert run: {e}")))?;

        tx.execute(
            "INSERT OR REPLACE INTO threshold_history (repository_id, run_id, computed_at, thresholds)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                run.repository_id,
                run.run_id as i64,
                timestamp(run.thresholds.computed_at),
                thresholds_json
            ],
        )
        .map_err(|e| WeaveError::Database(format!("failed to insert thresholds: {e}")))?;

        let pruned = tx
            .execute(
                "DELETE FROM analysis_runs WHERE repository_id = ?1 AND run_id <= ?2",
                params![run.repository_id, run.run_id as i64 - RETAINED_RUNS],
            )
            .map_err(|e| WeaveError::Database(format!("failed to prune runs: {e}")))?;

        tx.commit()
            .map_err(|e| WeaveError::Database(format!("failed to commit run: {e}")))?;
        debug!(
            repository = %run.repository_id,
            run = run.run_id,
            pruned,
            "analysis run saved"
        );
        Ok(())
    }

    /// Id of the most recent stored run, whether or not it was pruned since.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Database`] on query failure.
    pub fn latest_run_id(&self, repository_id: &str) -> Result<Option<u64>, WeaveError> {
        let latest: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(run_id) FROM (
                    SELECT run_id FROM analysis_runs WHERE repository_id = ?1
                    UNION ALL
                    SELECT run_id FROM threshold_history WHERE repository_id = ?1
                 )",
                params![repository_id],
                |row| row.get(0),
            )
            .map_err(|e| WeaveError::Database(format!("failed to read latest run id: {e}")))?;
        Ok(latest.map(|id| id as u64))
    }

    /// Claim `repository_id` for one analysis across processes sharing
    /// this store.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::RunInProgress`] while another live lease is
    /// held. Leases older than the expiry are taken over.
    pub fn acquire_lease(&mut self, repository_id: &str) -> Result<StoreLease, WeaveError> {
        let now = Utc::now();
        let owner = format!("{}@{}", std::process::id(), timestamp(now));
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| WeaveError::Database(format!("failed to begin transaction: {e}")))?;

        let held: Option<(String, String)> = tx
            .query_row(
                "SELECT owner, acquired_at FROM run_leases WHERE repository_id = ?1",
                params![repository_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| WeaveError::Database(format!("failed to read lease: {e}")))?;
        if let Some((holder, acquired_at)) = held {
            let expires = parse_timestamp(&acquired_at)? + Duration::hours(LEASE_EXPIRY_HOURS);
            if expires > now {
                return Err(WeaveError::RunInProgress(repository_id.to_string()));
            }
            warn!(repository = repository_id, %holder, "taking over expired lease");
        }

        tx.execute(
            "INSERT OR REPLACE INTO run_leases (repository_id, owner, acquired_at)
             VALUES (?1, ?2, ?3)",
            params![repository_id, owner, timestamp(now)],
        )
        .map_err(|e| WeaveError::Database(format!("failed to write lease: {e}")))?;
        tx.commit()
            .map_err(|e| WeaveError::Database(format!("failed to commit lease: {e}")))?;

        Ok(StoreLease {
            repository_id: repository_id.to_string(),
            owner,
        })
    }

    /// Give up `lease`. A lease already taken over by another owner is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Database`] on delete failure.
    pub fn release_lease(&self, lease: &StoreLease) -> Result<(), WeaveError> {
        self.conn
            .execute(
                "DELETE FROM run_leases WHERE repository_id = ?1 AND owner = ?2",
                params![lease.repository_id, lease.owner],
            )
            .map_err(|e| WeaveError::Database(format!("failed to release lease: {e}")))?;
        Ok(())
    }

    /// Most recent run of a repository.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Database`] on query failure.
    pub fn latest_run(&self, repository_id: &str) -> Result<Option<AnalysisRun>, WeaveError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT run FROM analysis_runs WHERE repository_id = ?1
                 ORDER BY run_id DESC LIMIT 1",
                params![repository_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| WeaveError::Database(format!("failed to load latest run: {e}")))?;
        json.map(|j| serde_json::from_str(&j).map_err(WeaveError::from))
            .transpose()
    }

    /// Every threshold set computed for a repository, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Database`] on query failure.
    pub fn threshold_history(&self, repository_id: &str) -> Result<Vec<RepoThresholds>, WeaveError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT thresholds FROM threshold_history WHERE repository_id = ?1
                 ORDER BY computed_at, run_id",
            )
            .map_err(|e| WeaveError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![repository_id], |row| row.get::<_, String>(0))
            .map_err(|e| WeaveError::Database(format!("failed to query thresholds: {e}")))?;

        let mut history = Vec::new();
        for row in rows {
            let json =
                row.map_err(|e| WeaveError::Database(format!("failed to read row: {e}")))?;
            history.push(serde_json::from_str(&json)?);
        }
        Ok(history)
    }

    /// Cached coupling result stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Database`] on query failure.
    pub fn cached_coupling(&self, key: &str) -> Result<Option<CouplingResult>, WeaveError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT result FROM coupling_results WHERE cache_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| WeaveError::Database(format!("failed to read coupling cache: {e}")))?;
        json.map(|j| serde_json::from_str(&j).map_err(WeaveError::from))
            .transpose()
    }

    /// Store `result` under `key`, replacing any previous entry. Only the
    /// newest results of `repository_id` are kept.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Database`] on insert failure.
    pub fn cache_coupling(
        &mut self,
        repository_id: &str,
        key: &str,
        result: &CouplingResult,
    ) -> Result<(), WeaveError> {
        let json = serde_json::to_string(result)?;
        let tx = self
            .conn
            .transaction()
            .map_err(|e| WeaveError::Database(format!("failed to begin transaction: {e}")))?;
        tx.execute(
            "INSERT OR REPLACE INTO coupling_results (cache_key, repository_id, created_at, result)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, repository_id, timestamp(Utc::now()), json],
        )
        .map_err(|e| WeaveError::Database(format!("failed to write coupling cache: {e}")))?;
        let pruned = tx
            .execute(
                "DELETE FROM coupling_results WHERE repository_id = ?1 AND cache_key NOT IN (
                    SELECT cache_key FROM coupling_results WHERE repository_id = ?1
                    ORDER BY created_at DESC, rowid DESC LIMIT ?2
                 )",
                params![repository_id, RETAINED_COUPLING],
            )
            .map_err(|e| WeaveError::Database(format!("failed to prune coupling cache: {e}")))?;
        tx.commit()
            .map_err(|e| WeaveError::Database(format!("failed to commit coupling cache: {e}")))?;
        debug!(repository = repository_id, pruned, "coupling result cached");
        Ok(())
    }

    fn exists(&self, id: i64) -> Result<bool, WeaveError> {
        self.conn
            .query_row("SELECT 1 FROM snapshots WHERE id = ?1", params![id], |_| Ok(()))
            .optional()
            .map(|row| row.is_some())
            .map_err(|e| WeaveError::Database(format!("failed to look up snapshot: {e}")))
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, WeaveError> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| WeaveError::Database(format!("invalid timestamp '{text}': {e}")))
}

fn parse_tags(text: &str) -> Result<Vec<String>, WeaveError> {
    Ok(serde_json::from_str(text)?)
}

struct SummaryRow {
    id: i64,
    name: String,
    created_at: String,
    tags: String,
    algorithm: String,
    weight_column: String,
    cluster_count: i64,
    clustered_files: i64,
    modularity: Option<f64>,
}

impl SummaryRow {
    fn into_summary(self) -> Result<SnapshotSummary, WeaveError> {
        let algorithm: AlgorithmKind = self
            .algorithm
            .parse()
            .map_err(WeaveError::Database)?;
        let weight_column: WeightColumn = self
            .weight_column
            .parse()
            .map_err(WeaveError::Database)?;
        Ok(SnapshotSummary {
            id: self.id,
            name: self.name,
            created_at: parse_timestamp(&self.created_at)?,
            tags: parse_tags(&self.tags)?,
            algorithm,
            weight_column,
            cluster_count: self.cluster_count as usize,
            clustered_files: self.clustered_files as usize,
            modularity: self.modularity,
        })
    }
}

impl SnapshotStore for SqliteStore {
    fn save(
        &mut self,
        name: &str,
        result: &ClusteringResult,
        tags: &[String],
    ) -> Result<i64, WeaveError> {
        let name = check_name(name)?;
        let tags_json = serde_json::to_string(&normalize_tags(tags.to_vec()))?;
        let result_json = serde_json::to_string(result)?;

        let tx = self
            .conn
            .transaction()
            .map_err(|e| WeaveError::Database(format!("failed to begin transaction: {e}")))?;
        tx.execute(
            "INSERT INTO snapshots
             (name, created_at, tags, algorithm, weight_column, cluster_count,
              clustered_files, modularity, result)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                name,
                timestamp(Utc::now()),
                tags_json,
                result.algorithm.to_string(),
                result.parameters.weight_column.to_string(),
                result.cluster_count as i64,
                result.metrics.clustered_files as i64,
                result.metrics.modularity,
                result_json,
            ],
        )
        .map_err(|e| WeaveError::Database(format!("failed to insert snapshot: {e}")))?;
        let id = tx.last_insert_rowid();

        for edge in &result.inter_cluster_edges {
            tx.execute(
                "INSERT INTO snapshot_edges
                 (snapshot_id, source, target, edge_count, total_weight, max_weight)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    edge.source,
                    edge.target,
                    edge.edge_count as i64,
                    edge.total_weight,
                    edge.max_weight
                ],
            )
            .map_err(|e| WeaveError::Database(format!("failed to insert snapshot edge: {e}")))?;
        }
        tx.commit()
            .map_err(|e| WeaveError::Database(format!("failed to commit snapshot: {e}")))?;
        debug!(id, name, clusters = result.cluster_count, "snapshot saved");
        Ok(id)
    }

    fn list(&self) -> Result<Vec<SnapshotSummary>, WeaveError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, created_at, tags, algorithm, weight_column,
                        cluster_count, clustered_files, modularity
                 FROM snapshots ORDER BY id DESC",
            )
            .map_err(|e| WeaveError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SummaryRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                    tags: row.get(3)?,
                    algorithm: row.get(4)?,
                    weight_column: row.get(5)?,
                    cluster_count: row.get(6)?,
                    clustered_files: row.get(7)?,
                    modularity: row.get(8)?,
                })
            })
            .map_err(|e| WeaveError::Database(format!("failed to query snapshots: {e}")))?;

        let mut summaries = Vec::new();
        for row in rows {
            let row = row.map_err(|e| WeaveError::Database(format!("failed to read row: {e}")))?;
            summaries.push(row.into_summary()?);
        }
        Ok(summaries)
    }

    fn load(&self, id: i64) -> Result<ClusteringSnapshot, WeaveError> {
        let row: Option<(String, String, String, String)> = self
            .conn
            .query_row(
                "SELECT name, created_at, tags, result FROM snapshots WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(|e| WeaveError::Database(format!("failed to load snapshot: {e}")))?;
        let (name, created_at, tags, result) = row.ok_or(WeaveError::SnapshotNotFound(id))?;

        Ok(ClusteringSnapshot {
            id,
            name,
            created_at: parse_timestamp(&created_at)?,
            tags: parse_tags(&tags)?,
            result: serde_json::from_str(&result)?,
        })
    }

    fn edges(&self, id: i64) -> Result<Vec<InterClusterEdge>, WeaveError> {
        if !self.exists(id)? {
            return Err(WeaveError::SnapshotNotFound(id));
        }
        let mut stmt = self
            .conn
            .prepare(
                "SELECT source, target, edge_count, total_weight, max_weight
                 FROM snapshot_edges WHERE snapshot_id = ?1 ORDER BY source, target",
            )
            .map_err(|e| WeaveError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok(InterClusterEdge {
                    source: row.get(0)?,
                    target: row.get(1)?,
                    edge_count: row.get::<_, i64>(2)? as usize,
                    total_weight: row.get(3)?,
                    max_weight: row.get(4)?,
                })
            })
            .map_err(|e| WeaveError::Database(format!("failed to query edges: {e}")))?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(row.map_err(|e| WeaveError::Database(format!("failed to read row: {e}")))?);
        }
        Ok(edges)
    }

    fn rename(&mut self, id: i64, name: &str) -> Result<(), WeaveError> {
        let name = check_name(name)?;
        let changed = self
            .conn
            .execute(
                "UPDATE snapshots SET name = ?1 WHERE id = ?2",
                params![name, id],
            )
            .map_err(|e| WeaveError::Database(format!("failed to rename snapshot: {e}")))?;
        if changed == 0 {
            return Err(WeaveError::SnapshotNotFound(id));
        }
        Ok(())
    }

    fn set_tags(&mut self, id: i64, tags: &[String]) -> Result<(), WeaveError> {
        let tags_json = serde_json::to_string(&normalize_tags(tags.to_vec()))?;
        let changed = self
            .conn
            .execute(
                "UPDATE snapshots SET tags = ?1 WHERE id = ?2",
                params![tags_json, id],
            )
            .map_err(|e| WeaveError::Database(format!("failed to tag snapshot: {e}")))?;
        if changed == 0 {
            return Err(WeaveError::SnapshotNotFound(id));
        }
        Ok(())
    }

    fn delete(&mut self, id: i64) -> Result<(), WeaveError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| WeaveError::Database(format!("failed to begin transaction: {e}")))?;
        tx.execute(
            "DELETE FROM snapshot_edges WHERE snapshot_id = ?1",
            params![id],
        )
        .map_err(|e| WeaveError::Database(format!("failed to delete snapshot edges: {e}")))?;
        let removed = tx
            .execute("DELETE FROM snapshots WHERE id = ?1", params![id])
            .map_err(|e| WeaveError::Database(format!("failed to delete snapshot: {e}")))?;
        if removed == 0 {
            return Err(WeaveError::SnapshotNotFound(id));
        }
        tx.commit()
            .map_err(|e| WeaveError::Database(format!("failed to commit delete: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_cluster::engine::{cluster, ClusteringRequest};
    use weave_core::{AlgorithmKind, CancelToken, ClusteringConfig, CommitRecord, FileChange};
    use weave_coupling::coupling::{compute_coupling, CouplingParams};
    use weave_history::stream::ReplayStream;

    fn coupling() -> CouplingResult {
        let mut commits = Vec::new();
        for n in 0..4 {
            commits.push(CommitRecord {
                id: format!("a{n}"),
                author: "alice".into(),
                timestamp: n,
                changes: vec![FileChange::for_path("a.rs"), FileChange::for_path("b.rs")],
            });
            commits.push(CommitRecord {
                id: format!("x{n}"),
                author: "bob".into(),
                timestamp: n,
                changes: vec![FileChange::for_path("x.rs"), FileChange::for_path("y.rs")],
            });
        }
        commits.push(CommitRecord {
            id: "bridge".into(),
            author: "carol".into(),
            timestamp: 10,
            changes: vec![
                FileChange::for_path("b.rs"),
                FileChange::for_path("x.rs"),
                FileChange::for_path("b.rs"),
            ],
        });
        let params = CouplingParams {
            min_support: 1,
            min_coupling: 0.0,
            ..CouplingParams::default()
        };
        compute_coupling(&mut ReplayStream::new(commits), params, &CancelToken::new()).unwrap()
    }

    fn louvain() -> ClusteringResult {
        let mut request = ClusteringRequest::from(&ClusteringConfig::default());
        request.parameters.min_weight = 0.0;
        cluster(&coupling(), &request).unwrap()
    }

    #[test]
    fn snapshot_crud() {
        let mut store = SqliteStore::in_memory().unwrap();
        let result = louvain();
        let id = store.save("base", &result, &["v1".into()]).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "base");
        assert_eq!(listed[0].algorithm, AlgorithmKind::Louvain);
        assert_eq!(listed[0].tags, vec!["v1"]);

        let loaded = store.load(id).unwrap();
        assert_eq!(loaded.result.clustered_files(), result.clustered_files());
        assert_eq!(loaded.result.cluster_count, result.cluster_count);

        store.rename(id, "renamed").unwrap();
        store.set_tags(id, &["a".into(), "b".into()]).unwrap();
        let loaded = store.load(id).unwrap();
        assert_eq!(loaded.name, "renamed");
        assert_eq!(loaded.tags, vec!["a", "b"]);

        store.delete(id).unwrap();
        assert!(matches!(store.load(id), Err(WeaveError::SnapshotNotFound(_))));
        assert!(matches!(store.edges(id), Err(WeaveError::SnapshotNotFound(_))));
        assert!(matches!(store.delete(id), Err(WeaveError::SnapshotNotFound(_))));
    }

    #[test]
    fn edges_match_result() {
        let mut store = SqliteStore::in_memory().unwrap();
        let result = louvain();
        assert_eq!(result.cluster_count, 2);
        let id = store.save("two modules", &result, &[]).unwrap();
        let edges = store.edges(id).unwrap();
        assert_eq!(edges.len(), result.inter_cluster_edges.len());
        assert_eq!(edges[0].source, 0);
        assert_eq!(edges[0].target, 1);
        assert_eq!(edges[0].edge_count, 1);
    }

    #[test]
    fn ids_are_not_reused() {
        let mut store = SqliteStore::in_memory().unwrap();
        let result = louvain();
        let first = store.save("one", &result, &[]).unwrap();
        store.delete(first).unwrap();
        let second = store.save("two", &result, &[]).unwrap();
        assert!(second > first);
    }

    #[test]
    fn coupling_cache_round_trip() {
        let mut store = SqliteStore::in_memory().unwrap();
        assert!(store.cached_coupling("k").unwrap().is_none());
        let result = coupling();
        store.cache_coupling("repo", "k", &result).unwrap();
        let cached = store.cached_coupling("k").unwrap().unwrap();
        assert_eq!(cached.edges.len(), result.edges.len());
        assert_eq!(cached.range, result.range);
        assert_eq!(cached.catalog.len(), result.catalog.len());
    }

    #[test]
    fn coupling_cache_keeps_newest_results_per_repository() {
        let mut store = SqliteStore::in_memory().unwrap();
        let result = coupling();
        for n in 0..5 {
            store.cache_coupling("repo", &format!("k{n}"), &result).unwrap();
        }
        store.cache_coupling("other", "o0", &result).unwrap();

        assert!(store.cached_coupling("k0").unwrap().is_none());
        assert!(store.cached_coupling("k1").unwrap().is_none());
        for key in ["k2", "k3", "k4", "o0"] {
            assert!(store.cached_coupling(key).unwrap().is_some(), "{key} evicted");
        }

        // Rewriting a kept key refreshes it.
        store.cache_coupling("repo", "k2", &result).unwrap();
        store.cache_coupling("repo", "k5", &result).unwrap();
        assert!(store.cached_coupling("k3").unwrap().is_none());
        assert!(store.cached_coupling("k2").unwrap().is_some());
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("weave.db");
        {
            let mut store = SqliteStore::open(&path).unwrap();
            store.save("persisted", &louvain(), &[]).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list().unwrap()[0].name, "persisted");
    }
}
