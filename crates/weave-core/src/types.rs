use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::WeaveError;

/// Seconds in one day.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Stable identity of a file across runs.
///
/// Ids produced by [`FileId::from_path`] are the first eight bytes of the
/// SHA-256 of the repository-relative path, so the same path maps to the same
/// id on every machine without a persisted id table.
///
/// # Examples
///
/// ```
/// use weave_core::FileId;
///
/// let a = FileId::from_path("src/main.rs");
/// assert_eq!(a, FileId::from_path("src/main.rs"));
/// assert_ne!(a, FileId::from_path("src/lib.rs"));
/// assert_eq!(FileId(7).to_string(), "7");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl FileId {
    /// Derive the id of a repository-relative path.
    pub fn from_path(path: &str) -> Self {
        let digest = Sha256::digest(path.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        FileId(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One file touched by a commit.
///
/// # Examples
///
/// ```
/// use weave_core::{FileChange, FileId};
///
/// let change = FileChange::new(FileId(1)).with_lines(10, 3);
/// assert_eq!(change.churn(), 13);
/// assert!(change.path.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// Identity of the touched file.
    pub file_id: FileId,
    /// Repository-relative path, when the reader knows it.
    #[serde(default)]
    pub path: Option<String>,
    /// Lines added in this commit.
    #[serde(default)]
    pub lines_added: u64,
    /// Lines deleted in this commit.
    #[serde(default)]
    pub lines_deleted: u64,
}

impl FileChange {
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            path: None,
            lines_added: 0,
            lines_deleted: 0,
        }
    }

    /// Build a change for a path, deriving its id from the path.
    pub fn for_path(path: &str) -> Self {
        Self {
            file_id: FileId::from_path(path),
            path: Some(path.to_string()),
            lines_added: 0,
            lines_deleted: 0,
        }
    }

    pub fn with_lines(mut self, added: u64, deleted: u64) -> Self {
        self.lines_added = added;
        self.lines_deleted = deleted;
        self
    }

    pub fn churn(&self) -> u64 {
        self.lines_added + self.lines_deleted
    }
}

/// One commit as handed to the engine by a commit stream.
///
/// # Examples
///
/// ```
/// use weave_core::{CommitRecord, FileChange, FileId};
///
/// let commit = CommitRecord {
///     id: "abc123".into(),
///     author: "alice".into(),
///     timestamp: 1_700_000_000,
///     changes: vec![
///         FileChange::new(FileId(2)),
///         FileChange::new(FileId(1)),
///         FileChange::new(FileId(2)),
///     ],
/// };
/// assert_eq!(commit.distinct_files(), vec![FileId(1), FileId(2)]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    /// Commit sha.
    pub id: String,
    /// Author name.
    pub author: String,
    /// Unix timestamp of the commit.
    pub timestamp: i64,
    /// Files touched by the commit.
    pub changes: Vec<FileChange>,
}

impl CommitRecord {
    /// Distinct file ids touched by this commit, sorted ascending.
    pub fn distinct_files(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self.changes.iter().map(|c| c.file_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Lines added plus deleted, summed per distinct file.
    pub fn churn_by_file(&self) -> BTreeMap<FileId, u64> {
        let mut churn = BTreeMap::new();
        for change in &self.changes {
            *churn.entry(change.file_id).or_insert(0) += change.churn();
        }
        churn
    }
}

/// A file present in the HEAD tree.
///
/// `last_modified` is the timestamp of the last commit that touched the path,
/// when the listing knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadFile {
    pub id: FileId,
    pub path: String,
    #[serde(default)]
    pub last_modified: Option<i64>,
}

impl HeadFile {
    pub fn new(path: &str) -> Self {
        Self {
            id: FileId::from_path(path),
            path: path.to_string(),
            last_modified: None,
        }
    }
}

/// A file known to the repository catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntity {
    pub id: FileId,
    /// Current path, or `None` when the entity was registered from a bare id.
    pub path: Option<String>,
    pub exists_at_head: bool,
}

/// Repository-level registry of every file ever referenced.
///
/// Entities are created the first time a commit or the HEAD listing mentions
/// them and are never removed; files missing from HEAD are only flagged.
///
/// # Examples
///
/// ```
/// use weave_core::{FileCatalog, FileId, HeadFile};
///
/// let mut catalog = FileCatalog::default();
/// assert!(catalog.register(FileId(1), Some("a.rs")));
/// assert!(!catalog.register(FileId(1), None));
/// catalog.mark_head(&[HeadFile { id: FileId(2), path: "b.rs".into(), last_modified: None }]);
/// assert!(!catalog.get(FileId(1)).unwrap().exists_at_head);
/// assert!(catalog.get(FileId(2)).unwrap().exists_at_head);
/// assert_eq!(catalog.display_path(FileId(2)), "b.rs");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileCatalog {
    entities: BTreeMap<FileId, FileEntity>,
}

impl FileCatalog {
    /// Register `id`, updating its path when one is given.
    ///
    /// Returns `true` when the entity did not exist before.
    pub fn register(&mut self, id: FileId, path: Option<&str>) -> bool {
        match self.entities.get_mut(&id) {
            Some(entity) => {
                if let Some(path) = path {
                    entity.path = Some(path.to_string());
                }
                false
            }
            None => {
                self.entities.insert(
                    id,
                    FileEntity {
                        id,
                        path: path.map(str::to_string),
                        exists_at_head: false,
                    },
                );
                true
            }
        }
    }

    /// Flag exactly the given files as present at HEAD, registering new ones.
    pub fn mark_head(&mut self, head: &[HeadFile]) {
        for entity in self.entities.values_mut() {
            entity.exists_at_head = false;
        }
        for file in head {
            self.register(file.id, Some(&file.path));
            if let Some(entity) = self.entities.get_mut(&file.id) {
                entity.exists_at_head = true;
            }
        }
    }

    pub fn get(&self, id: FileId) -> Option<&FileEntity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Path for display, falling back to `#<id>` for path-less entities.
    pub fn display_path(&self, id: FileId) -> String {
        self.entities
            .get(&id)
            .and_then(|e| e.path.clone())
            .unwrap_or_else(|| format!("#{id}"))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileEntity> {
        self.entities.values()
    }
}

/// Why a commit was kept out of co-occurrence accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ExclusionReason {
    /// The changeset touched more files than `max_changeset_size`.
    Oversized { files: usize, limit: usize },
}

/// Per-commit decision on how a changeset participates in a run.
///
/// Oversized changesets always update per-file metrics; they are only kept
/// out of the pairwise coupling model.
///
/// # Examples
///
/// ```
/// use weave_core::{ChangesetDecision, CommitRecord, FileChange, FileId};
///
/// let commit = CommitRecord {
///     id: "big".into(),
///     author: "bot".into(),
///     timestamp: 0,
///     changes: (0..5).map(|i| FileChange::new(FileId(i))).collect(),
/// };
/// assert!(ChangesetDecision::for_commit(&commit, 10).is_included());
/// assert!(!ChangesetDecision::for_commit(&commit, 4).is_included());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "decision")]
pub enum ChangesetDecision {
    Included,
    ExcludedFromCoupling { reason: ExclusionReason },
}

impl ChangesetDecision {
    /// Decide for `commit` given the configured changeset size limit.
    pub fn for_commit(commit: &CommitRecord, max_changeset_size: usize) -> Self {
        let files = commit.distinct_files().len();
        if files > max_changeset_size {
            ChangesetDecision::ExcludedFromCoupling {
                reason: ExclusionReason::Oversized {
                    files,
                    limit: max_changeset_size,
                },
            }
        } else {
            ChangesetDecision::Included
        }
    }

    pub fn is_included(&self) -> bool {
        matches!(self, ChangesetDecision::Included)
    }
}

/// A commit kept out of coupling, as reported in run diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludedCommit {
    pub commit_id: String,
    pub reason: ExclusionReason,
}

/// Community detection strategy.
///
/// # Examples
///
/// ```
/// use weave_core::AlgorithmKind;
///
/// let kind: AlgorithmKind = "louvain".parse().unwrap();
/// assert_eq!(kind, AlgorithmKind::Louvain);
/// assert_eq!(AlgorithmKind::ConnectedComponents.to_string(), "components");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmKind {
    /// Connected components of the filtered coupling graph.
    #[serde(rename = "components")]
    ConnectedComponents,
    /// Modularity-optimizing Louvain communities.
    #[default]
    Louvain,
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmKind::ConnectedComponents => write!(f, "components"),
            AlgorithmKind::Louvain => write!(f, "louvain"),
        }
    }
}

impl FromStr for AlgorithmKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "components" | "connected-components" | "cc" => Ok(AlgorithmKind::ConnectedComponents),
            "louvain" => Ok(AlgorithmKind::Louvain),
            other => Err(format!("unknown clustering algorithm: {other}")),
        }
    }
}

/// Which coupling edge value is used as graph weight.
///
/// # Examples
///
/// ```
/// use weave_core::WeightColumn;
///
/// let col: WeightColumn = "support".parse().unwrap();
/// assert_eq!(col, WeightColumn::Support);
/// assert_eq!(WeightColumn::default(), WeightColumn::Coupling);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightColumn {
    /// Dice coefficient.
    #[default]
    Coupling,
    /// Raw co-change count.
    Support,
    /// The larger of the two directed confidences.
    Confidence,
}

impl fmt::Display for WeightColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightColumn::Coupling => write!(f, "coupling"),
            WeightColumn::Support => write!(f, "support"),
            WeightColumn::Confidence => write!(f, "confidence"),
        }
    }
}

impl FromStr for WeightColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "coupling" | "dice" => Ok(WeightColumn::Coupling),
            "support" => Ok(WeightColumn::Support),
            "confidence" => Ok(WeightColumn::Confidence),
            other => Err(format!("unknown weight column: {other}")),
        }
    }
}

/// Output format for CLI results.
///
/// # Examples
///
/// ```
/// use weave_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable tables and summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Cooperative cancellation flag shared between a caller and a long run.
///
/// Long computations call [`CancelToken::check`] between commit batches and
/// abandon their partial state when it fails.
///
/// # Examples
///
/// ```
/// use weave_core::CancelToken;
///
/// let token = CancelToken::new();
/// let handle = token.clone();
/// assert!(token.check().is_ok());
/// handle.cancel();
/// assert!(token.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`WeaveError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<(), WeaveError> {
        if self.is_cancelled() {
            Err(WeaveError::Cancelled)
        } else {
            Ok(())
        }
    }
}
