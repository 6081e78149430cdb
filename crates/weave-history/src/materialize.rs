//! Per-file temporal metrics folded from a commit stream.
//!
//! The [`MetricsMaterializer`] keeps an accumulator per file (commit count,
//! first/last timestamps, churn, and the timestamps still inside the 90-day
//! horizon of the newest commit). The accumulator is serializable so a later
//! run can fold only the commits after its watermark and end up in exactly
//! the state a full rescan would produce.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use weave_core::{
    CancelToken, ChangesetDecision, CommitRecord, ExcludedCommit, FileCatalog, FileId, HeadFile,
    HistoryConfig, WeaveError, SECONDS_PER_DAY,
};

use crate::stream::CommitStream;

/// Short activity window, in days.
pub const WINDOW_30D: i64 = 30;
/// Long activity window, in days. Also the accumulator's retention horizon.
pub const WINDOW_90D: i64 = 90;

/// Options for a materialization run.
///
/// # Examples
///
/// ```
/// use weave_history::materialize::MaterializeOptions;
///
/// let opts = MaterializeOptions::default();
/// assert_eq!(opts.max_changeset_size, 50);
/// assert!(opts.as_of.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeOptions {
    /// Changesets with more files are excluded from coupling.
    pub max_changeset_size: usize,
    /// Commits folded between cancellation checks.
    pub batch_size: usize,
    /// Reference time for windows and ages; defaults to the newest commit.
    pub as_of: Option<i64>,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        MaterializeOptions::from(&HistoryConfig::default())
    }
}

impl From<&HistoryConfig> for MaterializeOptions {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            max_changeset_size: config.max_changeset_size,
            batch_size: config.batch_size.max(1),
            as_of: config.as_of,
        }
    }
}

/// Running totals for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAccumulator {
    pub total_commits: u32,
    pub first_commit_ts: Option<i64>,
    pub last_commit_ts: Option<i64>,
    pub lines_added: u64,
    pub lines_deleted: u64,
    /// Commit timestamps newer than the retention horizon.
    pub recent: Vec<i64>,
}

impl FileAccumulator {
    fn record(&mut self, timestamp: i64, added: u64, deleted: u64) {
        self.total_commits += 1;
        self.first_commit_ts = Some(self.first_commit_ts.map_or(timestamp, |t| t.min(timestamp)));
        self.last_commit_ts = Some(self.last_commit_ts.map_or(timestamp, |t| t.max(timestamp)));
        self.lines_added += added;
        self.lines_deleted += deleted;
        self.recent.push(timestamp);
    }

    fn prune(&mut self, horizon: i64) {
        self.recent.retain(|&ts| ts > horizon);
        self.recent.sort_unstable();
    }
}

/// Persistable fold state of a materialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsAccumulator {
    pub files: BTreeMap<FileId, FileAccumulator>,
    /// Newest commit timestamp folded so far.
    pub newest_ts: Option<i64>,
    /// Id of the last commit folded.
    pub watermark: Option<String>,
    pub commits_folded: u64,
}

impl MetricsAccumulator {
    fn prune(&mut self) {
        let Some(newest) = self.newest_ts else {
            return;
        };
        let horizon = newest - WINDOW_90D * SECONDS_PER_DAY;
        for file in self.files.values_mut() {
            file.prune(horizon);
        }
    }
}

/// Counted, non-fatal decisions taken during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDiagnostics {
    pub commits_folded: u64,
    /// Changesets kept out of coupling; their files were still counted.
    pub excluded_commits: Vec<ExcludedCommit>,
    /// Ids referenced by the stream that were unknown to the catalog.
    pub data_gaps: Vec<FileId>,
    /// HEAD files that received a synthesized record.
    pub reconciled_files: usize,
}

impl RunDiagnostics {
    pub fn oversized_count(&self) -> usize {
        self.excluded_commits.len()
    }
}

/// Materialized metrics for one file.
///
/// # Examples
///
/// ```
/// use weave_core::FileId;
/// use weave_history::materialize::FileMetrics;
///
/// let m = FileMetrics::unknown(FileId(1));
/// assert!(m.is_unknown);
/// assert_eq!(m.total_commits, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetrics {
    pub file_id: FileId,
    pub total_commits: u32,
    pub first_commit_ts: Option<i64>,
    pub last_commit_ts: Option<i64>,
    pub commits_30d: u32,
    pub commits_90d: u32,
    /// `total_commits / max(1, active months)`.
    pub lifetime_commits_per_month: f64,
    pub days_since_last_change: Option<i64>,
    pub lines_added: u64,
    pub lines_deleted: u64,
    /// Record synthesized by the HEAD reconciliation pass.
    pub reconciled: bool,
    pub is_hot: bool,
    pub is_stable: bool,
    pub is_unknown: bool,
}

impl FileMetrics {
    /// A file with no usable history.
    pub fn unknown(file_id: FileId) -> Self {
        Self {
            file_id,
            total_commits: 0,
            first_commit_ts: None,
            last_commit_ts: None,
            commits_30d: 0,
            commits_90d: 0,
            lifetime_commits_per_month: 0.0,
            days_since_last_change: None,
            lines_added: 0,
            lines_deleted: 0,
            reconciled: false,
            is_hot: false,
            is_stable: false,
            is_unknown: true,
        }
    }

    fn from_accumulator(file_id: FileId, acc: &FileAccumulator, reference: i64) -> Self {
        let in_window = |days: i64| {
            let start = reference - days * SECONDS_PER_DAY;
            acc.recent
                .iter()
                .filter(|&&ts| ts > start && ts <= reference)
                .count() as u32
        };
        let mut metrics = Self {
            file_id,
            total_commits: acc.total_commits,
            first_commit_ts: acc.first_commit_ts,
            last_commit_ts: acc.last_commit_ts,
            commits_30d: in_window(WINDOW_30D),
            commits_90d: in_window(WINDOW_90D),
            lifetime_commits_per_month: 0.0,
            days_since_last_change: None,
            lines_added: acc.lines_added,
            lines_deleted: acc.lines_deleted,
            reconciled: false,
            is_hot: false,
            is_stable: false,
            is_unknown: false,
        };
        metrics.derive(reference);
        metrics
    }

    /// Recompute the derived rate, age and unknown flag.
    fn derive(&mut self, reference: i64) {
        self.lifetime_commits_per_month = lifetime_rate(
            self.total_commits,
            self.first_commit_ts,
            self.last_commit_ts,
        );
        self.days_since_last_change = self
            .last_commit_ts
            .map(|last| ((reference - last) / SECONDS_PER_DAY).max(0));
        self.is_unknown = self.total_commits == 0 || self.last_commit_ts.is_none();
        if self.is_unknown {
            self.is_hot = false;
            self.is_stable = false;
        }
    }

    /// Per-file view handed to the tree/API layer.
    pub fn report(&self, path: &str) -> FileReport {
        FileReport {
            path: path.to_string(),
            total_commits: self.total_commits,
            last_modified: self
                .last_commit_ts
                .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
                .map(|dt| dt.to_rfc3339()),
            commits_30d: self.commits_30d,
            commits_90d: self.commits_90d,
            lifetime_commits_per_month: self.lifetime_commits_per_month,
            days_since_last_change: self.days_since_last_change,
            is_hot: self.is_hot,
            is_stable: self.is_stable,
            is_unknown: self.is_unknown,
        }
    }
}

/// `total / max(1, (last - first) / 86400 / 30)`.
pub fn lifetime_rate(total: u32, first: Option<i64>, last: Option<i64>) -> f64 {
    let months = match (first, last) {
        (Some(first), Some(last)) => (last - first) as f64 / SECONDS_PER_DAY as f64 / 30.0,
        _ => 0.0,
    };
    f64::from(total) / months.max(1.0)
}

/// Per-file fields exposed to the tree/API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub path: String,
    pub total_commits: u32,
    /// ISO-8601 timestamp of the last change.
    pub last_modified: Option<String>,
    pub commits_30d: u32,
    pub commits_90d: u32,
    pub lifetime_commits_per_month: f64,
    pub days_since_last_change: Option<i64>,
    pub is_hot: bool,
    pub is_stable: bool,
    pub is_unknown: bool,
}

/// Metrics of every file produced by one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsTable {
    pub run_id: u64,
    /// Reference time windows and ages were computed against.
    pub reference_ts: i64,
    pub files: BTreeMap<FileId, FileMetrics>,
}

impl MetricsTable {
    pub fn get(&self, id: FileId) -> Option<&FileMetrics> {
        self.files.get(&id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Folds commits into per-file accumulators.
///
/// A materializer whose fold failed (including cancellation) holds partial
/// state and must be dropped.
///
/// # Examples
///
/// ```
/// use weave_core::{CancelToken, CommitRecord, FileCatalog, FileChange};
/// use weave_history::materialize::{MaterializeOptions, MetricsMaterializer};
/// use weave_history::stream::ReplayStream;
///
/// let commits = vec![CommitRecord {
///     id: "c1".into(),
///     author: "alice".into(),
///     timestamp: 1_700_000_000,
///     changes: vec![FileChange::for_path("a.rs")],
/// }];
/// let mut catalog = FileCatalog::default();
/// let mut materializer = MetricsMaterializer::new(MaterializeOptions::default());
/// materializer
///     .fold_stream(&mut ReplayStream::new(commits), &mut catalog, &CancelToken::new())
///     .unwrap();
/// let table = materializer.finalize(None, 1).unwrap();
/// assert_eq!(table.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MetricsMaterializer {
    options: MaterializeOptions,
    accumulator: MetricsAccumulator,
    diagnostics: RunDiagnostics,
}

impl MetricsMaterializer {
    pub fn new(options: MaterializeOptions) -> Self {
        Self::resume(options, MetricsAccumulator::default())
    }

    /// Continue from the accumulator of an earlier run.
    pub fn resume(options: MaterializeOptions, accumulator: MetricsAccumulator) -> Self {
        Self {
            options,
            accumulator,
            diagnostics: RunDiagnostics::default(),
        }
    }

    /// Fold one commit. Every touched file is counted, whatever the decision.
    pub fn fold_commit(
        &mut self,
        commit: &CommitRecord,
        catalog: &mut FileCatalog,
    ) -> ChangesetDecision {
        let decision = ChangesetDecision::for_commit(commit, self.options.max_changeset_size);
        if let ChangesetDecision::ExcludedFromCoupling { ref reason } = decision {
            warn!(commit = %commit.id, ?reason, "changeset excluded from coupling, file metrics still updated");
            self.diagnostics.excluded_commits.push(ExcludedCommit {
                commit_id: commit.id.clone(),
                reason: reason.clone(),
            });
        }

        let mut lines: BTreeMap<FileId, (u64, u64, Option<&str>)> = BTreeMap::new();
        for change in &commit.changes {
            let entry = lines.entry(change.file_id).or_insert((0, 0, None));
            entry.0 += change.lines_added;
            entry.1 += change.lines_deleted;
            if entry.2.is_none() {
                entry.2 = change.path.as_deref();
            }
        }

        for (file_id, (added, deleted, path)) in lines {
            if catalog.register(file_id, path) && path.is_none() {
                debug!(%file_id, commit = %commit.id, "registered file id missing from catalog");
                self.diagnostics.data_gaps.push(file_id);
            }
            self.accumulator
                .files
                .entry(file_id)
                .or_default()
                .record(commit.timestamp, added, deleted);
        }

        let acc = &mut self.accumulator;
        acc.newest_ts = Some(acc.newest_ts.map_or(commit.timestamp, |t| t.max(commit.timestamp)));
        acc.watermark = Some(commit.id.clone());
        acc.commits_folded += 1;
        self.diagnostics.commits_folded += 1;

        decision
    }

    /// Fold the rest of `stream`, checking `cancel` between batches.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Cancelled`] when cancellation is requested, or
    /// any error raised by the stream.
    pub fn fold_stream<S: CommitStream + ?Sized>(
        &mut self,
        stream: &mut S,
        catalog: &mut FileCatalog,
        cancel: &CancelToken,
    ) -> Result<u64, WeaveError> {
        let mut folded = 0u64;
        let batch_size = self.options.batch_size.max(1) as u64;
        cancel.check()?;
        while let Some(commit) = stream.next_commit()? {
            self.fold_commit(&commit, catalog);
            folded += 1;
            if folded % batch_size == 0 {
                self.accumulator.prune();
                debug!(folded, "folded commit batch");
                cancel.check()?;
            }
        }
        self.accumulator.prune();
        Ok(folded)
    }

    /// Resolve the reference time for windows and ages.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::InvalidParameter`] when an explicit as-of time
    /// precedes the newest folded commit: windows before the retention
    /// horizon can no longer be reconstructed.
    pub fn reference_ts(&self, head: Option<&[HeadFile]>) -> Result<i64, WeaveError> {
        let newest = self.accumulator.newest_ts;
        match (self.options.as_of, newest) {
            (Some(as_of), Some(newest)) if as_of < newest => Err(WeaveError::InvalidParameter(
                format!("as-of time {as_of} precedes the newest folded commit ({newest})"),
            )),
            (Some(as_of), _) => Ok(as_of),
            (None, Some(newest)) => Ok(newest),
            (None, None) => Ok(head
                .into_iter()
                .flatten()
                .filter_map(|f| f.last_modified)
                .max()
                .unwrap_or(0)),
        }
    }

    /// Produce the metrics table for `run_id`.
    ///
    /// With a HEAD listing, the table covers exactly the HEAD files and every
    /// HEAD file without observed history gets a reconciled record with
    /// `total_commits = 1`. Without one, every observed file is reported.
    ///
    /// # Errors
    ///
    /// See [`MetricsMaterializer::reference_ts`].
    pub fn finalize(
        &mut self,
        head: Option<&[HeadFile]>,
        run_id: u64,
    ) -> Result<MetricsTable, WeaveError> {
        let reference = self.reference_ts(head)?;
        let mut files = BTreeMap::new();

        match head {
            Some(head) => {
                for file in head {
                    let metrics = match self.accumulator.files.get(&file.id) {
                        Some(acc) => FileMetrics::from_accumulator(file.id, acc, reference),
                        None => {
                            self.diagnostics.reconciled_files += 1;
                            reconciled_metrics(file, reference)
                        }
                    };
                    files.insert(file.id, metrics);
                }
            }
            None => {
                for (&id, acc) in &self.accumulator.files {
                    files.insert(id, FileMetrics::from_accumulator(id, acc, reference));
                }
            }
        }

        Ok(MetricsTable {
            run_id,
            reference_ts: reference,
            files,
        })
    }

    pub fn accumulator(&self) -> &MetricsAccumulator {
        &self.accumulator
    }

    pub fn diagnostics(&self) -> &RunDiagnostics {
        &self.diagnostics
    }

    pub fn into_parts(self) -> (MetricsAccumulator, RunDiagnostics) {
        (self.accumulator, self.diagnostics)
    }
}

/// Record for a HEAD file that no folded commit touched: it was added by at
/// least one commit, dated by the listing when known.
fn reconciled_metrics(file: &HeadFile, reference: i64) -> FileMetrics {
    let acc = FileAccumulator {
        total_commits: 1,
        first_commit_ts: file.last_modified,
        last_commit_ts: file.last_modified,
        lines_added: 0,
        lines_deleted: 0,
        recent: file.last_modified.into_iter().collect(),
    };
    let mut metrics = FileMetrics::from_accumulator(file.id, &acc, reference);
    metrics.reconciled = true;
    metrics
}
