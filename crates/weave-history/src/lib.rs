//! Per-file history metrics: hot, stable and unknown files.
//!
//! Folds a commit stream into per-file temporal metrics, derives
//! repository-relative percentile thresholds from them and classifies every
//! file against those thresholds. Runs are versioned so metrics and
//! thresholds are always read as one unit, and can be extended incrementally
//! from a stored watermark.

pub mod classify;
pub mod materialize;
pub mod mining;
pub mod run;
pub mod stream;
pub mod thresholds;
