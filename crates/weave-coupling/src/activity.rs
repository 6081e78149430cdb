//! Per-file and per-commit activity used for cluster summaries.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use weave_core::{CommitRecord, FileId};

/// Commit count and churn of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileActivity {
    pub commits: u32,
    /// Lines added plus lines deleted.
    pub churn: u64,
}

/// The parts of a commit that summaries need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitDigest {
    pub id: String,
    pub author: String,
    pub timestamp: i64,
    /// Distinct files, sorted.
    pub files: Vec<FileId>,
    pub churn: u64,
}

/// A commit ranked by how much of a file set it touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitTouch {
    pub commit_id: String,
    pub author: String,
    pub files_touched: usize,
    /// Total churn of the commit.
    pub churn: u64,
}

/// Number of commits an author made to a file set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorShare {
    pub author: String,
    pub commits: u32,
}

/// Activity of every file and commit seen by a coupling run.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use weave_core::{CommitRecord, FileChange, FileId};
/// use weave_coupling::activity::ActivityIndex;
///
/// let mut index = ActivityIndex::default();
/// index.record(&CommitRecord {
///     id: "c1".into(),
///     author: "alice".into(),
///     timestamp: 0,
///     changes: vec![FileChange::new(FileId(1)).with_lines(10, 2)],
/// });
/// assert_eq!(index.file(FileId(1)).unwrap().churn, 12);
/// assert_eq!(index.total_churn(&BTreeSet::from([FileId(1), FileId(2)])), 12);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityIndex {
    files: BTreeMap<FileId, FileActivity>,
    commits: Vec<CommitDigest>,
}

impl ActivityIndex {
    pub fn record(&mut self, commit: &CommitRecord) {
        let churn = commit.churn_by_file();
        for (&id, &lines) in &churn {
            let activity = self.files.entry(id).or_default();
            activity.commits += 1;
            activity.churn += lines;
        }
        self.commits.push(CommitDigest {
            id: commit.id.clone(),
            author: commit.author.clone(),
            timestamp: commit.timestamp,
            files: churn.keys().copied().collect(),
            churn: churn.values().sum(),
        });
    }

    pub fn file(&self, id: FileId) -> Option<&FileActivity> {
        self.files.get(&id)
    }

    pub fn commits(&self) -> &[CommitDigest] {
        &self.commits
    }

    pub fn total_churn(&self, files: &BTreeSet<FileId>) -> u64 {
        files
            .iter()
            .filter_map(|id| self.files.get(id))
            .map(|a| a.churn)
            .sum()
    }

    /// The `n` files with the most churn, ties broken by id.
    pub fn top_churn(&self, files: &BTreeSet<FileId>, n: usize) -> Vec<(FileId, u64)> {
        let mut ranked: Vec<(FileId, u64)> = files
            .iter()
            .map(|&id| (id, self.files.get(&id).map_or(0, |a| a.churn)))
            .collect();
        ranked.sort_by(|x, y| y.1.cmp(&x.1).then(x.0.cmp(&y.0)));
        ranked.truncate(n);
        ranked
    }

    /// The `n` commits touching the most of `files`, then the most churn.
    pub fn top_commits(&self, files: &BTreeSet<FileId>, n: usize) -> Vec<CommitTouch> {
        let mut ranked: Vec<(usize, CommitTouch)> = Vec::new();
        for (order, digest) in self.commits.iter().enumerate() {
            let touched: Vec<FileId> = digest
                .files
                .iter()
                .copied()
                .filter(|id| files.contains(id))
                .collect();
            if touched.is_empty() {
                continue;
            }
            ranked.push((
                order,
                CommitTouch {
                    commit_id: digest.id.clone(),
                    author: digest.author.clone(),
                    files_touched: touched.len(),
                    churn: digest.churn,
                },
            ));
        }
        ranked.sort_by(|(ox, x), (oy, y)| {
            y.files_touched
                .cmp(&x.files_touched)
                .then(y.churn.cmp(&x.churn))
                .then(ox.cmp(oy))
        });
        ranked.into_iter().take(n).map(|(_, touch)| touch).collect()
    }

    /// The `n` authors with the most commits touching `files`.
    pub fn common_authors(&self, files: &BTreeSet<FileId>, n: usize) -> Vec<AuthorShare> {
        let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
        for digest in &self.commits {
            if digest.files.iter().any(|id| files.contains(id)) {
                *counts.entry(digest.author.as_str()).or_default() += 1;
            }
        }
        let mut ranked: Vec<AuthorShare> = counts
            .into_iter()
            .map(|(author, commits)| AuthorShare {
                author: author.to_string(),
                commits,
            })
            .collect();
        ranked.sort_by(|x, y| y.commits.cmp(&x.commits).then_with(|| x.author.cmp(&y.author)));
        ranked.truncate(n);
        ranked
    }
}
