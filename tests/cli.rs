use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use git2::{Commit, Repository, Signature, Time};
use serde_json::Value;

const T0: i64 = 1_700_000_000;

fn commit_files(repo: &Repository, writes: &[(&str, &str)], time: i64) {
    let workdir = repo.workdir().unwrap().to_path_buf();
    let mut index = repo.index().unwrap();
    for (path, content) in writes {
        let full = workdir.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, content).unwrap();
        index.add_path(Path::new(path)).unwrap();
    }
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::new("alice", "alice@example.com", &Time::new(time, 0)).unwrap();
    let parents: Vec<Commit<'_>> = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, "change", &tree, &parent_refs)
        .unwrap();
}

/// api/a.rs and api/b.rs always change together; README.md changes once.
fn seeded_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    commit_files(&repo, &[("README.md", "hello\n")], T0 - 10 * 86_400);
    for n in 0..4 {
        let body = format!("v{n}\n");
        commit_files(
            &repo,
            &[("api/a.rs", body.as_str()), ("api/b.rs", body.as_str())],
            T0 - (5 - n) * 86_400,
        );
    }
    dir
}

fn gitweave(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gitweave"))
        .args(args)
        .current_dir(dir)
        .env("NO_COLOR", "1")
        .output()
        .unwrap()
}

fn json(dir: &Path, args: &[&str]) -> Value {
    let mut full = vec!["--format", "json"];
    full.extend_from_slice(args);
    let output = gitweave(dir, &full);
    assert!(
        output.status.success(),
        "gitweave {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn analyze_then_list_files() {
    let dir = seeded_repo();

    let run = json(dir.path(), &["analyze"]);
    assert_eq!(run["runId"], 1);
    assert_eq!(run["commitsFolded"], 5);
    assert_eq!(run["thresholds"]["population"], 3);

    let files = json(dir.path(), &["files"]);
    let paths: Vec<&str> = files
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths.len(), 3);
    assert!(paths.contains(&"api/a.rs"));
    assert!(paths.contains(&"README.md"));

    let a = files
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["path"] == "api/a.rs")
        .unwrap();
    assert_eq!(a["totalCommits"], 4);

    // Nothing new since the watermark: the run id still advances.
    let again = json(dir.path(), &["analyze"]);
    assert_eq!(again["runId"], 2);
    assert_eq!(again["commitsFolded"], 0);

    let history = json(dir.path(), &["thresholds", "--history"]);
    assert_eq!(history.as_array().unwrap().len(), 2);
}

#[test]
fn full_rescan_supersedes_stored_runs() {
    let dir = seeded_repo();
    assert_eq!(json(dir.path(), &["analyze"])["runId"], 1);

    let full = json(dir.path(), &["analyze", "--full"]);
    assert_eq!(full["runId"], 2);
    assert_eq!(full["commitsFolded"], 5);

    let next = json(dir.path(), &["analyze"]);
    assert_eq!(next["runId"], 3);
    assert_eq!(next["commitsFolded"], 0);
}

#[test]
fn config_is_read_from_the_repository_root() {
    let dir = seeded_repo();
    fs::write(
        dir.path().join(".weave.toml"),
        "[store]\npath = \"data/gw.db\"\n",
    )
    .unwrap();
    let elsewhere = tempfile::tempdir().unwrap();
    let repo = dir.path().to_str().unwrap();

    let run = json(elsewhere.path(), &["--path", repo, "analyze"]);
    assert_eq!(run["runId"], 1);
    assert!(dir.path().join("data/gw.db").exists());
    assert!(!dir.path().join(".weave").exists());
    assert!(!elsewhere.path().join(".weave").exists());
}

#[test]
fn files_without_a_run_fails() {
    let dir = seeded_repo();
    let output = gitweave(dir.path(), &["files"]);
    assert!(!output.status.success());
}

#[test]
fn coupling_reports_the_co_changing_pair() {
    let dir = seeded_repo();
    let edges = json(dir.path(), &["coupling"]);
    let edges = edges.as_array().unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0]["support"], 4);
    assert_eq!(edges[0]["coupling"], 1.0);

    // Second call is served from the cache with the same answer.
    let cached = json(dir.path(), &["coupling"]);
    assert_eq!(cached.as_array().unwrap().len(), 1);
}

#[test]
fn saved_snapshots_can_be_listed_and_compared() {
    let dir = seeded_repo();

    let saved = json(
        dir.path(),
        &["cluster", "--algorithm", "components", "--save", "baseline", "--tag", "v1"],
    );
    assert_eq!(saved["snapshotId"], 1);
    assert_eq!(saved["result"]["clusterCount"], 1);
    assert_eq!(saved["result"]["isolatedFiles"].as_array().unwrap().len(), 1);

    let list = json(dir.path(), &["snapshot", "list"]);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "baseline");
    assert_eq!(list[0]["tags"][0], "v1");

    let diff = json(dir.path(), &["snapshot", "compare", "1", "1"]);
    assert_eq!(diff["counts"]["stable"], 1);
    assert_eq!(diff["matches"][0]["status"], "stable");

    let rename = gitweave(dir.path(), &["snapshot", "rename", "1", "final"]);
    assert!(rename.status.success());
    let shown = json(dir.path(), &["snapshot", "show", "1"]);
    assert_eq!(shown["name"], "final");

    assert!(gitweave(dir.path(), &["snapshot", "delete", "1"]).status.success());
    assert!(!gitweave(dir.path(), &["snapshot", "show", "1"]).status.success());
}

#[test]
fn unknown_snapshot_is_an_error() {
    let dir = seeded_repo();
    let output = gitweave(dir.path(), &["snapshot", "show", "99"]);
    assert!(!output.status.success());
}

#[test]
fn non_repository_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let output = gitweave(dir.path(), &["analyze"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Not a git repository"));
}
