//! Temporal coupling from commit co-occurrence.
//!
//! Counts how often pairs of files change in the same commit and scores each
//! pair with the Dice coefficient and the two directed confidences. The same
//! pass builds an activity index (churn, authors, commits) used to summarize
//! clusters of coupled files.

pub mod activity;
pub mod cache;
pub mod coupling;
