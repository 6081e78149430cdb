//! Persistence for clustering snapshots, analysis runs and cached coupling
//! results.
//!
//! [`snapshots::SnapshotStore`] is the snapshot contract with an in-memory
//! implementation for tests and [`sqlite::SqliteStore`] for the CLI, which
//! additionally keeps versioned analysis runs and a coupling cache.

pub mod snapshots;
pub mod sqlite;
