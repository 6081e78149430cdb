//! Commit stream and HEAD listing contracts.
//!
//! The engine never walks git itself: it pulls [`CommitRecord`]s from a
//! [`CommitStream`] and asks a [`HeadListing`] which files exist at HEAD.
//! [`ReplayStream`] is the in-memory implementation used by tests and by
//! callers that already hold a commit range.

use weave_core::{CommitRecord, HeadFile, WeaveError};

/// An ordered, replayable source of commit records.
pub trait CommitStream {
    /// Return the next commit, or `None` once the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError`] when the underlying reader fails.
    fn next_commit(&mut self) -> Result<Option<CommitRecord>, WeaveError>;
}

impl<S: CommitStream + ?Sized> CommitStream for &mut S {
    fn next_commit(&mut self) -> Result<Option<CommitRecord>, WeaveError> {
        (**self).next_commit()
    }
}

/// Source of the files present at HEAD.
pub trait HeadListing {
    /// # Errors
    ///
    /// Returns [`WeaveError`] when the listing cannot be produced.
    fn list_head_files(&self) -> Result<Vec<HeadFile>, WeaveError>;
}

impl HeadListing for Vec<HeadFile> {
    fn list_head_files(&self) -> Result<Vec<HeadFile>, WeaveError> {
        Ok(self.clone())
    }
}

/// Replayable in-memory commit stream.
///
/// # Examples
///
/// ```
/// use weave_core::{CommitRecord, FileChange};
/// use weave_history::stream::{CommitStream, ReplayStream};
///
/// let commits = vec![CommitRecord {
///     id: "c1".into(),
///     author: "alice".into(),
///     timestamp: 100,
///     changes: vec![FileChange::for_path("a.rs")],
/// }];
/// let mut stream = ReplayStream::new(commits);
/// assert!(stream.next_commit().unwrap().is_some());
/// assert!(stream.next_commit().unwrap().is_none());
/// stream.rewind();
/// assert_eq!(stream.next_commit().unwrap().unwrap().id, "c1");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReplayStream {
    commits: Vec<CommitRecord>,
    position: usize,
}

impl ReplayStream {
    pub fn new(commits: Vec<CommitRecord>) -> Self {
        Self {
            commits,
            position: 0,
        }
    }

    /// Restart from the first commit.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Commits after the one with id `watermark`, or all commits when the
    /// watermark is not part of this stream.
    pub fn suffix_after(&self, watermark: &str) -> ReplayStream {
        let start = self
            .commits
            .iter()
            .position(|c| c.id == watermark)
            .map_or(0, |idx| idx + 1);
        ReplayStream::new(self.commits[start..].to_vec())
    }

    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

impl CommitStream for ReplayStream {
    fn next_commit(&mut self) -> Result<Option<CommitRecord>, WeaveError> {
        let commit = self.commits.get(self.position).cloned();
        if commit.is_some() {
            self.position += 1;
        }
        Ok(commit)
    }
}

impl From<Vec<CommitRecord>> for ReplayStream {
    fn from(commits: Vec<CommitRecord>) -> Self {
        Self::new(commits)
    }
}
