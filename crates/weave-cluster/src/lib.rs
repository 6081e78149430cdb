//! Community detection over the coupling graph, clustering snapshots and
//! snapshot comparison.
//!
//! [`engine::cluster`] turns a [`weave_coupling::coupling::CouplingResult`]
//! into ordered clusters with summaries. Saved results become
//! [`snapshot::ClusteringSnapshot`]s, and [`compare::compare_snapshots`]
//! reports how clusters moved between two of them.

pub mod algorithm;
pub mod compare;
pub mod engine;
pub mod graph;
pub mod snapshot;
