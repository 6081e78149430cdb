//! Versioned analysis runs.
//!
//! An [`AnalysisRun`] bundles the metrics table, the thresholds derived from
//! it and the fold state needed to extend it later. Runs against one
//! repository are serialized through a [`RunCoordinator`] lease.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};
use weave_core::{CancelToken, FileCatalog, ThresholdConfig, WeaveError, WeaveConfig};

use crate::classify::{classify_all, ClassCounts};
use crate::materialize::{
    FileReport, MaterializeOptions, MetricsAccumulator, MetricsMaterializer, MetricsTable,
    RunDiagnostics,
};
use crate::stream::{CommitStream, HeadListing};
use crate::thresholds::{compute_thresholds, RepoThresholds};

/// Everything one materialization run produced.
///
/// Metrics and thresholds always carry the same `run_id`; they are stored and
/// loaded together.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRun {
    pub repository_id: String,
    pub run_id: u64,
    pub computed_at: DateTime<Utc>,
    /// Last commit folded into this run.
    pub watermark: Option<String>,
    pub metrics: MetricsTable,
    pub thresholds: RepoThresholds,
    pub counts: ClassCounts,
    pub diagnostics: RunDiagnostics,
    pub accumulator: MetricsAccumulator,
    pub catalog: FileCatalog,
}

impl AnalysisRun {
    /// Per-file reports sorted by path.
    pub fn file_reports(&self) -> Vec<FileReport> {
        let mut reports: Vec<FileReport> = self
            .metrics
            .files
            .values()
            .map(|m| m.report(&self.catalog.display_path(m.file_id)))
            .collect();
        reports.sort_by(|a, b| a.path.cmp(&b.path));
        reports
    }
}

/// Options shared by every run of a repository.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    pub materialize: MaterializeOptions,
    pub thresholds: ThresholdConfig,
    /// Highest run id already stored for the repository. New runs are
    /// numbered above it, so a full rescan still supersedes stored runs.
    pub base_run_id: u64,
}

impl From<&WeaveConfig> for AnalysisOptions {
    fn from(config: &WeaveConfig) -> Self {
        Self {
            materialize: MaterializeOptions::from(&config.history),
            thresholds: config.thresholds.clone(),
            base_run_id: 0,
        }
    }
}

/// Serializes analysis runs per repository.
///
/// # Examples
///
/// ```
/// use weave_history::run::RunCoordinator;
///
/// let coordinator = RunCoordinator::new();
/// let lease = coordinator.try_begin("repo").unwrap();
/// assert!(coordinator.try_begin("repo").is_err());
/// assert!(coordinator.try_begin("other").is_ok());
/// drop(lease);
/// assert!(coordinator.try_begin("repo").is_ok());
/// ```
#[derive(Debug, Default)]
pub struct RunCoordinator {
    active: Mutex<HashSet<String>>,
    released: Condvar,
}

impl RunCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the lease for `repository_id`, waiting for a running analysis to
    /// finish first.
    pub fn begin(self: &Arc<Self>, repository_id: &str) -> RunLease {
        let mut active = self.active.lock();
        while active.contains(repository_id) {
            debug!(repository_id, "waiting for running analysis");
            self.released.wait(&mut active);
        }
        active.insert(repository_id.to_string());
        RunLease {
            coordinator: Arc::clone(self),
            repository_id: repository_id.to_string(),
        }
    }

    /// Take the lease for `repository_id` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::RunInProgress`] when another run holds it.
    pub fn try_begin(self: &Arc<Self>, repository_id: &str) -> Result<RunLease, WeaveError> {
        let mut active = self.active.lock();
        if !active.insert(repository_id.to_string()) {
            return Err(WeaveError::RunInProgress(repository_id.to_string()));
        }
        Ok(RunLease {
            coordinator: Arc::clone(self),
            repository_id: repository_id.to_string(),
        })
    }

    pub fn is_running(&self, repository_id: &str) -> bool {
        self.active.lock().contains(repository_id)
    }

    fn release(&self, repository_id: &str) {
        self.active.lock().remove(repository_id);
        self.released.notify_all();
    }
}

/// Exclusive right to run an analysis on one repository. Released on drop.
#[derive(Debug)]
pub struct RunLease {
    coordinator: Arc<RunCoordinator>,
    repository_id: String,
}

impl RunLease {
    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        self.coordinator.release(&self.repository_id);
    }
}

/// Run materialization, thresholds and classification as one unit.
///
/// Without `previous`, `stream` must yield the full history. With
/// `previous`, it must yield only the commits after `previous.watermark`;
/// they are folded into the restored accumulator. The new run id is one
/// above both `previous.run_id` and `options.base_run_id`.
///
/// Extending `previous` yields the same metrics as a full rescan of the same
/// commits. A stream cut off by age (`since_days`) is not such a rescan:
/// commits that aged out of the window since `previous` stay in the
/// restored accumulator. Use a full run to re-apply the window.
///
/// # Errors
///
/// Returns [`WeaveError::Cancelled`] when `cancel` fires (nothing is
/// returned for a cancelled run), [`WeaveError::InvalidParameter`] when
/// `previous` belongs to another repository or the as-of time precedes the
/// newest commit, and any stream or listing error.
pub fn run_analysis<S, H>(
    lease: &RunLease,
    stream: &mut S,
    head: Option<&H>,
    previous: Option<AnalysisRun>,
    options: &AnalysisOptions,
    cancel: &CancelToken,
) -> Result<AnalysisRun, WeaveError>
where
    S: CommitStream + ?Sized,
    H: HeadListing + ?Sized,
{
    let repository_id = lease.repository_id().to_string();
    let (run_id, mut materializer, mut catalog) = match previous {
        Some(prev) => {
            if prev.repository_id != repository_id {
                return Err(WeaveError::InvalidParameter(format!(
                    "previous run belongs to {}, not {repository_id}",
                    prev.repository_id
                )));
            }
            (
                prev.run_id.max(options.base_run_id) + 1,
                MetricsMaterializer::resume(options.materialize.clone(), prev.accumulator),
                prev.catalog,
            )
        }
        None => (
            options.base_run_id + 1,
            MetricsMaterializer::new(options.materialize.clone()),
            FileCatalog::default(),
        ),
    };

    let span = info_span!("analysis", repository = %repository_id, run_id);
    let _enter = span.enter();

    let folded = materializer.fold_stream(stream, &mut catalog, cancel)?;
    debug!(folded, "commit stream exhausted");

    let head_files = head.map(|h| h.list_head_files()).transpose()?;
    if let Some(files) = &head_files {
        catalog.mark_head(files);
    }
    cancel.check()?;

    let mut metrics = materializer.finalize(head_files.as_deref(), run_id)?;
    let computed_at = Utc::now();
    let thresholds = compute_thresholds(&metrics, &options.thresholds, computed_at);
    let counts = classify_all(&mut metrics, &thresholds)?;

    let (accumulator, diagnostics) = materializer.into_parts();
    info!(
        files = metrics.len(),
        hot = counts.hot,
        stable = counts.stable,
        unknown = counts.unknown,
        oversized = diagnostics.oversized_count(),
        reconciled = diagnostics.reconciled_files,
        "analysis complete"
    );

    Ok(AnalysisRun {
        repository_id,
        run_id,
        computed_at,
        watermark: accumulator.watermark.clone(),
        metrics,
        thresholds,
        counts,
        diagnostics,
        accumulator,
        catalog,
    })
}
