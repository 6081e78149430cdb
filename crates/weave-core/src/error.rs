use std::path::PathBuf;

/// Errors that can occur across the gitweave engine.
///
/// Library crates return this type directly; the binary renders it through
/// `miette` at the boundary. Per-entity gaps (unknown file ids, oversized
/// changesets, empty threshold populations) are not errors: they are recovered
/// locally and recorded in run diagnostics.
///
/// # Examples
///
/// ```
/// use weave_core::WeaveError;
///
/// let err = WeaveError::Config("missing store path".into());
/// assert!(err.to_string().contains("missing store path"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum WeaveError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    #[diagnostic(code(weave::io))]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(weave::config))]
    Config(String),

    /// Git operation failure.
    #[error("git error: {0}")]
    #[diagnostic(code(weave::git))]
    Git(String),

    /// Snapshot or run store failure.
    #[error("database error: {0}")]
    #[diagnostic(code(weave::database))]
    Database(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(weave::serialization))]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(weave::toml))]
    Toml(#[from] toml::de::Error),

    /// A parameter is outside its valid range.
    #[error("invalid parameter: {0}")]
    #[diagnostic(code(weave::invalid_parameter))]
    InvalidParameter(String),

    /// Metrics and thresholds come from different analysis runs.
    #[error(
        "metrics from run {metrics_run} cannot be classified with thresholds from run {thresholds_run}"
    )]
    #[diagnostic(
        code(weave::inconsistent_version),
        help("re-run `gitweave analyze` so metrics and thresholds are produced together")
    )]
    InconsistentVersion {
        /// Run that produced the metrics.
        metrics_run: u64,
        /// Run that produced the thresholds.
        thresholds_run: u64,
    },

    /// No snapshot with the given id exists.
    #[error("snapshot not found: {0}")]
    #[diagnostic(
        code(weave::snapshot_not_found),
        help("list saved snapshots with `gitweave snapshot list`")
    )]
    SnapshotNotFound(i64),

    /// Two snapshots cannot be compared.
    #[error("incompatible snapshots: {0}")]
    #[diagnostic(code(weave::incompatible_snapshot))]
    IncompatibleSnapshot(String),

    /// Another analysis run holds the lease for this repository.
    #[error("an analysis run is already in progress for {0}")]
    #[diagnostic(code(weave::run_in_progress))]
    RunInProgress(String),

    /// The computation was cancelled; partial results were discarded.
    #[error("operation cancelled")]
    #[diagnostic(code(weave::cancelled))]
    Cancelled,

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    #[diagnostic(code(weave::file_not_found))]
    FileNotFound(PathBuf),
}
