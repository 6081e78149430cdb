//! Git history extraction via git2.
//!
//! Reads commit history oldest-first and hands each commit to the engine as
//! a [`CommitRecord`] with per-file line counts. Every non-merge commit is
//! yielded regardless of size; deciding what an oversized changeset means is
//! left to the consumers.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use git2::{
    Delta, Diff, DiffFindOptions, DiffOptions, ObjectType, Oid, Patch, Repository, Sort,
    TreeWalkMode, TreeWalkResult,
};
use tracing::debug;
use weave_core::{CommitRecord, FileChange, HeadFile, HistoryConfig, WeaveError, SECONDS_PER_DAY};

use crate::stream::{CommitStream, HeadListing};

/// Options for history mining.
///
/// # Examples
///
/// ```
/// use weave_history::mining::MiningOptions;
///
/// let opts = MiningOptions::default();
/// assert!(opts.since_days.is_none());
/// assert!(!opts.include_merges);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MiningOptions {
    /// Only include commits from the last N days (default: full history).
    /// Measured from the current time, so the window slides between runs.
    pub since_days: Option<u64>,
    /// Branch to walk (default: HEAD).
    pub branch: Option<String>,
    /// Only yield commits that are not reachable from this commit.
    pub since_commit: Option<String>,
    /// Yield merge commits too (default: false; their changes are already
    /// attributed to the merged commits).
    pub include_merges: bool,
}

impl From<&HistoryConfig> for MiningOptions {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            since_days: config.since_days,
            branch: config.branch.clone(),
            since_commit: None,
            include_merges: false,
        }
    }
}

/// Lazily-diffed commit stream over a git repository.
///
/// Commit ids are resolved up front; diffs are computed one commit at a time
/// as the engine pulls them.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use weave_history::mining::{GitCommitStream, MiningOptions};
/// use weave_history::stream::CommitStream;
///
/// let mut stream = GitCommitStream::open(Path::new("."), &MiningOptions::default()).unwrap();
/// while let Some(commit) = stream.next_commit().unwrap() {
///     println!("{}: {} files", &commit.id[..7], commit.changes.len());
/// }
/// ```
pub struct GitCommitStream {
    repo: Repository,
    oids: Vec<Oid>,
    position: usize,
    skipped_merges: usize,
}

impl GitCommitStream {
    /// Open the repository at `repo_path` and resolve the commit range.
    ///
    /// # Errors
    ///
    /// Returns [`WeaveError::Git`] if the repository cannot be opened or
    /// walked, or if `since_commit` does not name a commit.
    pub fn open(repo_path: &Path, options: &MiningOptions) -> Result<Self, WeaveError> {
        let repo = Repository::open(repo_path)
            .map_err(|e| WeaveError::Git(format!("failed to open repository: {e}")))?;

        let (oids, skipped_merges) = {
            let mut revwalk = repo
                .revwalk()
                .map_err(|e| WeaveError::Git(format!("failed to create revwalk: {e}")))?;
            revwalk
                .set_sorting(Sort::TIME | Sort::REVERSE)
                .map_err(|e| WeaveError::Git(format!("failed to sort revwalk: {e}")))?;

            let tip = resolve_tip(&repo, options.branch.as_deref())?;
            revwalk
                .push(tip)
                .map_err(|e| WeaveError::Git(format!("failed to push oid: {e}")))?;

            if let Some(ref sha) = options.since_commit {
                let oid = Oid::from_str(sha)
                    .map_err(|e| WeaveError::Git(format!("invalid watermark '{sha}': {e}")))?;
                repo.find_commit(oid).map_err(|e| {
                    WeaveError::Git(format!("watermark commit {sha} not found: {e}"))
                })?;
                revwalk
                    .hide(oid)
                    .map_err(|e| WeaveError::Git(format!("failed to hide watermark: {e}")))?;
            }

            let cutoff = options.since_days.map(compute_cutoff);
            let mut oids = Vec::new();
            let mut skipped_merges = 0;

            for oid_result in revwalk {
                let oid = oid_result.map_err(|e| WeaveError::Git(format!("revwalk error: {e}")))?;
                let commit = repo
                    .find_commit(oid)
                    .map_err(|e| WeaveError::Git(format!("failed to find commit: {e}")))?;

                if cutoff.is_some_and(|cutoff| commit.time().seconds() < cutoff) {
                    continue;
                }
                if !options.include_merges && commit.parent_count() > 1 {
                    skipped_merges += 1;
                    continue;
                }
                oids.push(oid);
            }
            (oids, skipped_merges)
        };

        debug!(commits = oids.len(), skipped_merges, "resolved commit range");

        Ok(Self {
            repo,
            oids,
            position: 0,
            skipped_merges,
        })
    }

    /// Number of commits in the resolved range.
    pub fn len(&self) -> usize {
        self.oids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oids.is_empty()
    }

    /// Merge commits left out of the range.
    pub fn skipped_merges(&self) -> usize {
        self.skipped_merges
    }

    /// Id of the newest commit in the range, if any.
    pub fn last_commit_id(&self) -> Option<String> {
        self.oids.last().map(Oid::to_string)
    }

    /// Id of the oldest commit in the range, if any.
    pub fn first_commit_id(&self) -> Option<String> {
        self.oids.first().map(Oid::to_string)
    }
}

impl CommitStream for GitCommitStream {
    fn next_commit(&mut self) -> Result<Option<CommitRecord>, WeaveError> {
        let Some(&oid) = self.oids.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;

        let commit = self
            .repo
            .find_commit(oid)
            .map_err(|e| WeaveError::Git(format!("failed to find commit: {e}")))?;
        let changes = extract_file_changes(&self.repo, &commit)?;
        let author = commit.author();

        Ok(Some(CommitRecord {
            id: oid.to_string(),
            author: author.name().unwrap_or("unknown").to_string(),
            timestamp: commit.time().seconds(),
            changes,
        }))
    }
}

/// Files in the HEAD tree of a git repository.
///
/// When `resolve_times` is set, each file's `last_modified` is the time of
/// the newest non-merge commit that touched it.
pub struct GitHeadListing {
    repo: Repository,
    branch: Option<String>,
    resolve_times: bool,
}

impl GitHeadListing {
    /// # Errors
    ///
    /// Returns [`WeaveError::Git`] if the repository cannot be opened.
    pub fn open(repo_path: &Path, branch: Option<String>) -> Result<Self, WeaveError> {
        let repo = Repository::open(repo_path)
            .map_err(|e| WeaveError::Git(format!("failed to open repository: {e}")))?;
        Ok(Self {
            repo,
            branch,
            resolve_times: true,
        })
    }

    /// Skip the history walk that resolves `last_modified`.
    pub fn without_times(mut self) -> Self {
        self.resolve_times = false;
        self
    }

    fn last_touch_times(
        &self,
        tip: Oid,
        paths: &[String],
    ) -> Result<HashMap<String, i64>, WeaveError> {
        let mut unresolved: HashSet<&str> = paths.iter().map(String::as_str).collect();
        let mut times = HashMap::new();

        let mut revwalk = self
            .repo
            .revwalk()
            .map_err(|e| WeaveError::Git(format!("failed to create revwalk: {e}")))?;
        revwalk
            .set_sorting(Sort::TIME)
            .map_err(|e| WeaveError::Git(format!("failed to sort revwalk: {e}")))?;
        revwalk
            .push(tip)
            .map_err(|e| WeaveError::Git(format!("failed to push oid: {e}")))?;

        for oid_result in revwalk {
            if unresolved.is_empty() {
                break;
            }
            let oid = oid_result.map_err(|e| WeaveError::Git(format!("revwalk error: {e}")))?;
            let commit = self
                .repo
                .find_commit(oid)
                .map_err(|e| WeaveError::Git(format!("failed to find commit: {e}")))?;
            if commit.parent_count() > 1 {
                continue;
            }
            let diff = diff_to_parent(&self.repo, &commit, false)?;
            for delta in diff.deltas() {
                let Some(path) = delta.new_file().path() else {
                    continue;
                };
                let path = path.to_string_lossy();
                if unresolved.remove(&*path) {
                    times.insert(path.into_owned(), commit.time().seconds());
                }
            }
        }

        Ok(times)
    }
}

impl HeadListing for GitHeadListing {
    fn list_head_files(&self) -> Result<Vec<HeadFile>, WeaveError> {
        let tip = resolve_tip(&self.repo, self.branch.as_deref())?;
        let tree = self
            .repo
            .find_commit(tip)
            .and_then(|c| c.tree())
            .map_err(|e| WeaveError::Git(format!("failed to read HEAD tree: {e}")))?;

        let mut paths = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    paths.push(format!("{root}{name}"));
                }
            }
            TreeWalkResult::Ok
        })
        .map_err(|e| WeaveError::Git(format!("failed to walk HEAD tree: {e}")))?;

        let times = if self.resolve_times {
            self.last_touch_times(tip, &paths)?
        } else {
            HashMap::new()
        };

        Ok(paths
            .into_iter()
            .map(|path| {
                let mut file = HeadFile::new(&path);
                file.last_modified = times.get(&path).copied();
                file
            })
            .collect())
    }
}

/// Stable identifier for the repository containing `path`.
///
/// # Errors
///
/// Returns [`WeaveError::Git`] if `path` is not inside a git repository.
pub fn repository_id(path: &Path) -> Result<String, WeaveError> {
    let repo = Repository::discover(path)
        .map_err(|e| WeaveError::Git(format!("not a git repository: {e}")))?;
    let root = repo.workdir().unwrap_or_else(|| repo.path());
    let canonical = std::fs::canonicalize(root)?;
    Ok(canonical.to_string_lossy().into_owned())
}

fn resolve_tip(repo: &Repository, branch: Option<&str>) -> Result<Oid, WeaveError> {
    match branch {
        Some(branch) => {
            let reference = repo
                .resolve_reference_from_short_name(branch)
                .map_err(|e| WeaveError::Git(format!("failed to resolve branch '{branch}': {e}")))?;
            reference
                .target()
                .ok_or_else(|| WeaveError::Git("branch has no target".into()))
        }
        None => {
            let head = repo
                .head()
                .map_err(|e| WeaveError::Git(format!("failed to resolve HEAD: {e}")))?;
            head.target()
                .ok_or_else(|| WeaveError::Git("HEAD has no target".into()))
        }
    }
}

fn compute_cutoff(since_days: u64) -> i64 {
    chrono::Utc::now().timestamp() - since_days as i64 * SECONDS_PER_DAY
}

fn diff_to_parent<'r>(
    repo: &'r Repository,
    commit: &git2::Commit<'_>,
    find_renames: bool,
) -> Result<Diff<'r>, WeaveError> {
    let commit_tree = commit
        .tree()
        .map_err(|e| WeaveError::Git(format!("failed to get commit tree: {e}")))?;

    let parent_tree = if commit.parent_count() > 0 {
        let parent = commit
            .parent(0)
            .map_err(|e| WeaveError::Git(format!("failed to get parent: {e}")))?;
        Some(
            parent
                .tree()
                .map_err(|e| WeaveError::Git(format!("failed to get parent tree: {e}")))?,
        )
    } else {
        None
    };

    let mut diff_opts = DiffOptions::new();
    let mut diff = repo
        .diff_tree_to_tree(
            parent_tree.as_ref(),
            Some(&commit_tree),
            Some(&mut diff_opts),
        )
        .map_err(|e| WeaveError::Git(format!("failed to compute diff: {e}")))?;

    if find_renames {
        let mut find_opts = DiffFindOptions::new();
        find_opts.renames(true);
        diff.find_similar(Some(&mut find_opts))
            .map_err(|e| WeaveError::Git(format!("failed to find renames: {e}")))?;
    }

    Ok(diff)
}

fn extract_file_changes(
    repo: &Repository,
    commit: &git2::Commit<'_>,
) -> Result<Vec<FileChange>, WeaveError> {
    let diff = diff_to_parent(repo, commit, true)?;
    let mut changes = Vec::new();

    for idx in 0..diff.deltas().len() {
        let Some(delta) = diff.get_delta(idx) else {
            continue;
        };

        // Deleted files only carry the old path.
        let file = match delta.status() {
            Delta::Deleted => delta.old_file(),
            _ => delta.new_file(),
        };
        let Some(path) = file.path() else {
            continue;
        };
        let path = path.to_string_lossy();
        if path.is_empty() {
            continue;
        }

        let (added, deleted) = match Patch::from_diff(&diff, idx) {
            Ok(Some(patch)) => patch
                .line_stats()
                .map(|(_, added, deleted)| (added as u64, deleted as u64))
                .unwrap_or((0, 0)),
            _ => (0, 0),
        };

        changes.push(FileChange::for_path(&path).with_lines(added, deleted));
    }

    Ok(changes)
}
