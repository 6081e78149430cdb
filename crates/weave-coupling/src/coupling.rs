//! Co-change counting and Dice coupling scores.
//!
//! Every included commit adds one to the count of each distinct file it
//! touches and one to the support of each file pair. Pairs that reach
//! `min_support` are scored as `2 * support / (count_a + count_b)` with both
//! directed confidences. Oversized changesets are recorded and skipped.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use weave_core::{
    CancelToken, ChangesetDecision, CommitRecord, ExcludedCommit, FileCatalog, FileId,
    WeaveConfig, WeaveError, WeightColumn,
};
use weave_history::stream::CommitStream;

use crate::activity::ActivityIndex;

/// A pair of files that change together.
///
/// The pair is canonical: `file_a < file_b`.
///
/// # Examples
///
/// ```
/// use weave_core::FileId;
/// use weave_coupling::coupling::CouplingEdge;
///
/// let edge = CouplingEdge::new(FileId(7), FileId(3), 4, 8, 10);
/// assert_eq!(edge.file_a, FileId(3));
/// assert_eq!(edge.count_a, 8);
/// assert!((edge.coupling - 8.0 / 18.0).abs() < 1e-12);
/// assert_eq!(edge.confidence_a_to_b, 0.5);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouplingEdge {
    pub file_a: FileId,
    pub file_b: FileId,
    /// Commits touching both files.
    pub support: u32,
    /// Commits touching `file_a`.
    pub count_a: u32,
    /// Commits touching `file_b`.
    pub count_b: u32,
    /// Dice coefficient `2 * support / (count_a + count_b)`.
    pub coupling: f64,
    /// `support / count_a`.
    pub confidence_a_to_b: f64,
    /// `support / count_b`.
    pub confidence_b_to_a: f64,
}

impl CouplingEdge {
    /// Build the canonical edge for a pair given in any order.
    pub fn new(x: FileId, y: FileId, support: u32, count_x: u32, count_y: u32) -> Self {
        let ((file_a, count_a), (file_b, count_b)) = if x <= y {
            ((x, count_x), (y, count_y))
        } else {
            ((y, count_y), (x, count_x))
        };
        let ratio = |num: f64, den: u32| if den == 0 { 0.0 } else { num / f64::from(den) };
        Self {
            file_a,
            file_b,
            support,
            count_a,
            count_b,
            coupling: ratio(2.0 * f64::from(support), count_a + count_b),
            confidence_a_to_b: ratio(f64::from(support), count_a),
            confidence_b_to_a: ratio(f64::from(support), count_b),
        }
    }

    /// Edge value on the selected column.
    pub fn weight(&self, column: WeightColumn) -> f64 {
        match column {
            WeightColumn::Coupling => self.coupling,
            WeightColumn::Support => f64::from(self.support),
            WeightColumn::Confidence => self.confidence_a_to_b.max(self.confidence_b_to_a),
        }
    }

    /// The other endpoint, if `id` is one of them.
    pub fn other(&self, id: FileId) -> Option<FileId> {
        if id == self.file_a {
            Some(self.file_b)
        } else if id == self.file_b {
            Some(self.file_a)
        } else {
            None
        }
    }
}

/// Parameters of a coupling run.
///
/// # Examples
///
/// ```
/// use weave_coupling::coupling::CouplingParams;
///
/// let params = CouplingParams::default();
/// assert_eq!(params.min_support, 3);
/// assert_eq!(params.max_changeset_size, 50);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouplingParams {
    pub min_support: u32,
    pub min_coupling: f64,
    pub max_changeset_size: usize,
    #[serde(skip, default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    500
}

impl Default for CouplingParams {
    fn default() -> Self {
        CouplingParams::from(&WeaveConfig::default())
    }
}

impl From<&WeaveConfig> for CouplingParams {
    fn from(config: &WeaveConfig) -> Self {
        Self {
            min_support: config.coupling.min_support,
            min_coupling: config.coupling.min_coupling,
            max_changeset_size: config.history.max_changeset_size,
            batch_size: config.history.batch_size.max(1),
        }
    }
}

/// First, last and number of commits a coupling run consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRange {
    pub first: Option<String>,
    pub last: Option<String>,
    pub count: u64,
}

/// Everything one coupling run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouplingResult {
    pub params: CouplingParams,
    pub range: CommitRange,
    /// Sorted by coupling, then support (both descending), then ids.
    pub edges: Vec<CouplingEdge>,
    pub activity: ActivityIndex,
    pub excluded_commits: Vec<ExcludedCommit>,
    pub catalog: FileCatalog,
}

impl CouplingResult {
    /// Edges touching `id`, strongest first.
    pub fn edges_of(&self, id: FileId) -> impl Iterator<Item = &CouplingEdge> {
        self.edges.iter().filter(move |e| e.other(id).is_some())
    }
}

/// Incremental co-occurrence counter.
///
/// Feed commits with [`CouplingComputer::fold_commit`] or
/// [`CouplingComputer::fold_stream`], then call [`CouplingComputer::finish`].
///
/// # Examples
///
/// ```
/// use weave_core::{CommitRecord, FileChange};
/// use weave_coupling::coupling::{CouplingComputer, CouplingParams};
///
/// let params = CouplingParams { min_support: 1, min_coupling: 0.0, ..CouplingParams::default() };
/// let mut computer = CouplingComputer::new(params);
/// computer.fold_commit(&CommitRecord {
///     id: "c1".into(),
///     author: "alice".into(),
///     timestamp: 1000,
///     changes: vec![FileChange::for_path("a.rs"), FileChange::for_path("b.rs")],
/// });
/// let result = computer.finish();
/// assert_eq!(result.edges.len(), 1);
/// assert_eq!(result.edges[0].coupling, 1.0);
/// ```
#[derive(Debug, Clone)]
pub struct CouplingComputer {
    params: CouplingParams,
    file_commits: HashMap<FileId, u32>,
    pair_support: HashMap<(FileId, FileId), u32>,
    activity: ActivityIndex,
    excluded: Vec<ExcludedCommit>,
    range: CommitRange,
    catalog: FileCatalog,
}

impl CouplingComputer {
    pub fn new(params: CouplingParams) -> Self {
        Self {
            params,
            file_commits: HashMap::new(),
            pair_support: HashMap::new(),
            activity: ActivityIndex::default(),
            excluded: Vec::new(),
            range: CommitRange::default(),
            catalog: FileCatalog::default(),
        }
    }

    /// Count one commit. Oversized changesets only feed the activity index.
    pub fn fold_commit(&mut self, commit: &CommitRecord) -> ChangesetDecision {
        if self.range.first.is_none() {
            self.range.first = Some(commit.id.clone());
        }
        self.range.last = Some(commit.id.clone());
        self.range.count += 1;

        for change in &commit.changes {
            self.catalog.register(change.file_id, change.path.as_deref());
        }
        self.activity.record(commit);

        let decision = ChangesetDecision::for_commit(commit, self.params.max_changeset_size);
        if let ChangesetDecision::ExcludedFromCoupling { ref reason } = decision {
            warn!(commit = %commit.id, ?reason, "changeset excluded from coupling");
            self.excluded.push(ExcludedCommit {
                commit_id: commit.id.clone(),
                reason: reason.clone(),
            });
            return decision;
        }

        // Sorted and deduplicated, so (files[i], files[j]) with i < j is canonical.
        let files = commit.distinct_files();
        for (i, &a) in files.iter().enumerate() {
            *self.file_commits.entry(a).or_default() += 1;
            for &b in &files[i + 1..] {
                *self.pair_support.entry((a, b)).or_default() += 1;
            }
        }
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
        cancel: &CancelToken,
    ) -> Result<u64, WeaveError> {
        let batch_size = self.params.batch_size.max(1) as u64;
        let mut folded = 0u64;
        cancel.check()?;
        while let Some(commit) = stream.next_commit()? {
            self.fold_commit(&commit);
            folded += 1;
            if folded % batch_size == 0 {
                debug!(folded, pairs = self.pair_support.len(), "folded commit batch");
                cancel.check()?;
            }
        }
        Ok(folded)
    }

    /// Score every candidate pair and return the retained edges.
    pub fn finish(self) -> CouplingResult {
        let candidates = self.pair_support.len();
        let mut edges: Vec<CouplingEdge> = self
            .pair_support
            .iter()
            .filter(|&(_, &support)| support >= self.params.min_support)
            .map(|(&(a, b), &support)| {
                let count_a = self.file_commits.get(&a).copied().unwrap_or(0);
                let count_b = self.file_commits.get(&b).copied().unwrap_or(0);
                CouplingEdge::new(a, b, support, count_a, count_b)
            })
            .filter(|edge| edge.coupling >= self.params.min_coupling)
            .collect();

        edges.sort_by(|x, y| {
            y.coupling
                .total_cmp(&x.coupling)
                .then_with(|| y.support.cmp(&x.support))
                .then_with(|| x.file_a.cmp(&y.file_a))
                .then_with(|| x.file_b.cmp(&y.file_b))
        });

        info!(
            commits = self.range.count,
            candidates,
            edges = edges.len(),
            excluded = self.excluded.len(),
            "coupling computed"
        );

        CouplingResult {
            params: self.params,
            range: self.range,
            edges,
            activity: self.activity,
            excluded_commits: self.excluded,
            catalog: self.catalog,
        }
    }
}

/// Compute coupling over a whole commit stream.
///
/// # Errors
///
/// Returns [`WeaveError::Cancelled`] when `cancel` fires before the stream
/// is exhausted; no partial result is returned.
pub fn compute_coupling<S: CommitStream + ?Sized>(
    stream: &mut S,
    params: CouplingParams,
    cancel: &CancelToken,
) -> Result<CouplingResult, WeaveError> {
    let mut computer = CouplingComputer::new(params);
    computer.fold_stream(stream, cancel)?;
    Ok(computer.finish())
}
