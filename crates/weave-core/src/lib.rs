//! Core types, configuration, and error handling for gitweave.
//!
//! This crate provides the shared foundation used by all other gitweave crates:
//! - [`WeaveError`]: unified error type using `thiserror` and `miette`
//! - [`WeaveConfig`]: configuration loaded from `.weave.toml`
//! - Shared types: [`FileId`], [`CommitRecord`], [`FileCatalog`],
//!   [`ChangesetDecision`], [`CancelToken`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{
    ClusteringConfig, ComparisonConfig, CouplingConfig, HistoryConfig, StoreConfig,
    ThresholdConfig, WeaveConfig,
};
pub use error::WeaveError;
pub use types::{
    AlgorithmKind, CancelToken, ChangesetDecision, CommitRecord, ExcludedCommit, ExclusionReason,
    FileCatalog, FileChange, FileEntity, FileId, HeadFile, OutputFormat, WeightColumn,
    SECONDS_PER_DAY,
};

/// A convenience `Result` type for gitweave operations.
pub type Result<T> = std::result::Result<T, WeaveError>;
