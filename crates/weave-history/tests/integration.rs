use std::fs;
use std::path::Path;

use git2::{Commit, Oid, Repository, Signature, Time};
use weave_core::{CancelToken, CommitRecord, FileChange, FileId, HeadFile, SECONDS_PER_DAY};
use weave_history::classify::FileClass;
use weave_history::mining::{GitCommitStream, GitHeadListing, MiningOptions};
use weave_history::run::{run_analysis, AnalysisOptions, RunCoordinator};
use weave_history::stream::{CommitStream, ReplayStream};

const T0: i64 = 1_700_000_000;

fn days_ago(days: i64) -> i64 {
    T0 - days * SECONDS_PER_DAY
}

fn commit_files(
    repo: &Repository,
    writes: &[(&str, &str)],
    deletes: &[&str],
    time: i64,
    message: &str,
) -> Oid {
    let workdir = repo.workdir().unwrap().to_path_buf();
    let mut index = repo.index().unwrap();
    for (path, content) in writes {
        let full = workdir.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, content).unwrap();
        index.add_path(Path::new(path)).unwrap();
    }
    for path in deletes {
        fs::remove_file(workdir.join(path)).unwrap();
        index.remove_path(Path::new(path)).unwrap();
    }
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::new("alice", "alice@example.com", &Time::new(time, 0)).unwrap();
    let parents: Vec<Commit<'_>> = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
}

fn seed_repo(repo: &Repository) {
    commit_files(
        repo,
        &[("src/lib.rs", "a\nb\n"), ("README.md", "hi\n")],
        &[],
        days_ago(200),
        "initial",
    );
    commit_files(
        repo,
        &[("src/lib.rs", "a\nb\nc\n"), ("src/old.rs", "x\n")],
        &[],
        days_ago(20),
        "add old",
    );
}

fn drain(stream: &mut impl CommitStream) -> Vec<CommitRecord> {
    let mut commits = Vec::new();
    while let Some(commit) = stream.next_commit().unwrap() {
        commits.push(commit);
    }
    commits
}

#[test]
fn git_stream_yields_oldest_first_with_line_stats() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    seed_repo(&repo);
    commit_files(&repo, &[("src/lib.rs", "a\nc\n")], &["src/old.rs"], T0, "drop old");

    let mut stream = GitCommitStream::open(dir.path(), &MiningOptions::default()).unwrap();
    assert_eq!(stream.len(), 3);
    let commits = drain(&mut stream);

    assert_eq!(commits[0].timestamp, days_ago(200));
    assert_eq!(commits[2].timestamp, T0);
    assert_eq!(commits[0].author, "alice");
    assert_eq!(commits[0].distinct_files().len(), 2);

    let lib = FileId::from_path("src/lib.rs");
    let (added, deleted) = commits
        .iter()
        .flat_map(|c| c.changes.iter())
        .filter(|ch| ch.file_id == lib)
        .fold((0, 0), |(a, d), ch| (a + ch.lines_added, d + ch.lines_deleted));
    assert_eq!((added, deleted), (3, 1));

    let removed = commits[2]
        .changes
        .iter()
        .find(|ch| ch.path.as_deref() == Some("src/old.rs"))
        .expect("deleted file is reported under its old path");
    assert_eq!(removed.lines_deleted, 1);
}

#[test]
fn since_days_cuts_off_old_history() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    seed_repo(&repo);

    let options = MiningOptions {
        since_days: Some(1),
        ..MiningOptions::default()
    };
    let stream = GitCommitStream::open(dir.path(), &options).unwrap();
    assert!(stream.is_empty());
}

#[test]
fn head_listing_reports_last_touch_times() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    seed_repo(&repo);

    let listing = GitHeadListing::open(dir.path(), None).unwrap();
    let mut files = weave_history::stream::HeadListing::list_head_files(&listing).unwrap();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["README.md", "src/lib.rs", "src/old.rs"]);
    assert_eq!(files[0].last_modified, Some(days_ago(200)));
    assert_eq!(files[1].last_modified, Some(days_ago(20)));
    assert_eq!(files[0].id, FileId::from_path("README.md"));

    let untimed = GitHeadListing::open(dir.path(), None).unwrap().without_times();
    let files = weave_history::stream::HeadListing::list_head_files(&untimed).unwrap();
    assert!(files.iter().all(|f| f.last_modified.is_none()));
}

#[test]
fn analysis_over_git_repository() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    seed_repo(&repo);
    commit_files(&repo, &[("src/lib.rs", "a\nc\n")], &["src/old.rs"], T0, "drop old");

    let coordinator = RunCoordinator::new();
    let lease = coordinator.try_begin("repo").unwrap();
    let mut stream = GitCommitStream::open(dir.path(), &MiningOptions::default()).unwrap();
    let head = GitHeadListing::open(dir.path(), None).unwrap();
    let run = run_analysis(
        &lease,
        &mut stream,
        Some(&head),
        None,
        &AnalysisOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(run.metrics.len(), 2);
    assert!(run.metrics.get(FileId::from_path("src/old.rs")).is_none());
    let lib = run.metrics.get(FileId::from_path("src/lib.rs")).unwrap();
    assert_eq!(lib.total_commits, 3);
    assert_eq!(lib.commits_30d, 2);
    assert_eq!(lib.days_since_last_change, Some(0));
    let readme = run.metrics.get(FileId::from_path("README.md")).unwrap();
    assert_eq!(readme.total_commits, 1);
    assert_eq!(readme.days_since_last_change, Some(200));
    assert!(!run.catalog.get(FileId::from_path("src/old.rs")).unwrap().exists_at_head);
}

#[test]
fn incremental_git_run_matches_full_rescan() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    seed_repo(&repo);

    let coordinator = RunCoordinator::new();
    let lease = coordinator.begin("repo");
    let options = AnalysisOptions::default();

    let head = GitHeadListing::open(dir.path(), None).unwrap();
    let first = run_analysis(
        &lease,
        &mut GitCommitStream::open(dir.path(), &MiningOptions::default()).unwrap(),
        Some(&head),
        None,
        &options,
        &CancelToken::new(),
    )
    .unwrap();

    commit_files(&repo, &[("src/lib.rs", "a\nc\n")], &["src/old.rs"], T0, "drop old");
    let head = GitHeadListing::open(dir.path(), None).unwrap();

    let suffix_options = MiningOptions {
        since_commit: first.watermark.clone(),
        ..MiningOptions::default()
    };
    let mut suffix = GitCommitStream::open(dir.path(), &suffix_options).unwrap();
    assert_eq!(suffix.len(), 1);
    let incremental = run_analysis(
        &lease,
        &mut suffix,
        Some(&head),
        Some(first),
        &options,
        &CancelToken::new(),
    )
    .unwrap();

    let full = run_analysis(
        &lease,
        &mut GitCommitStream::open(dir.path(), &MiningOptions::default()).unwrap(),
        Some(&head),
        None,
        &options,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(incremental.run_id, 2);
    assert_eq!(incremental.accumulator, full.accumulator);
    assert_eq!(incremental.metrics.files, full.metrics.files);
}

#[test]
fn scenario_recent_burst_is_hot() {
    // 20 files touched twice in the last 30 days and one touched three times:
    // P95(commits_30d) = 2, so the hot threshold stays at its floor of 3.
    let others: Vec<String> = (0..20).map(|i| format!("src/m{i}.rs")).collect();
    let touch_others = |id: &str, days: i64| CommitRecord {
        id: id.into(),
        author: "bob".into(),
        timestamp: days_ago(days),
        changes: others.iter().map(|p| FileChange::for_path(p)).collect(),
    };
    let touch_hot = |id: &str, days: i64| CommitRecord {
        id: id.into(),
        author: "alice".into(),
        timestamp: days_ago(days),
        changes: vec![FileChange::for_path("src/hot.rs")],
    };
    let commits = vec![
        touch_hot("c1", 25),
        touch_others("o1", 20),
        touch_hot("c2", 15),
        touch_others("o2", 10),
        touch_hot("c3", 0),
    ];

    let coordinator = RunCoordinator::new();
    let lease = coordinator.begin("repo");
    let run = run_analysis(
        &lease,
        &mut ReplayStream::new(commits),
        None::<&Vec<HeadFile>>,
        None,
        &AnalysisOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(run.thresholds.inputs.hot30.percentile, Some(2.0));
    assert_eq!(run.thresholds.hot30, 3.0);
    let hot = run.metrics.get(FileId::from_path("src/hot.rs")).unwrap();
    assert_eq!(hot.commits_30d, 3);
    assert!(hot.is_hot);
    assert!(!hot.is_stable);
}

#[test]
fn scenario_head_sync_artifact_is_reconciled() {
    let commits = vec![CommitRecord {
        id: "c1".into(),
        author: "alice".into(),
        timestamp: T0,
        changes: vec![FileChange::for_path("src/main.rs")],
    }];
    let mut artifact = HeadFile::new("assets/logo.svg");
    artifact.last_modified = Some(days_ago(900));
    let head = vec![HeadFile::new("src/main.rs"), artifact];

    let coordinator = RunCoordinator::new();
    let lease = coordinator.begin("repo");
    let run = run_analysis(
        &lease,
        &mut ReplayStream::new(commits),
        Some(&head),
        None,
        &AnalysisOptions::default(),
        &CancelToken::new(),
    )
    .unwrap();

    let logo = run.metrics.get(FileId::from_path("assets/logo.svg")).unwrap();
    assert_eq!(logo.total_commits, 1);
    assert!(logo.reconciled);
    assert!(!logo.is_unknown);
    assert_eq!(logo.days_since_last_change, Some(900));
    assert_eq!(logo.commits_90d, 0);
    // Old and quiet, but a single commit is not enough history to be stable.
    assert!(!logo.is_hot && !logo.is_stable);
    assert_eq!(
        weave_history::classify::classify(logo, &run.thresholds),
        FileClass::Ordinary
    );

    for file in &head {
        assert!(run.metrics.get(file.id).unwrap().total_commits >= 1);
    }
}
