use std::process::Command;

#[test]
fn init_creates_valid_toml() {
    let dir = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_gitweave"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "gitweave init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let config_path = dir.path().join(".weave.toml");
    assert!(config_path.exists(), ".weave.toml should exist");

    let content = std::fs::read_to_string(&config_path).unwrap();
    for section in ["[history]", "[thresholds]", "[coupling]", "[clustering]", "[comparison]", "[store]"] {
        assert!(content.contains(section), "missing {section}");
    }

    let config: weave_core::WeaveConfig = toml::from_str(&content).unwrap();
    config.validate().unwrap();
}

#[test]
fn init_refuses_if_exists() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".weave.toml"), "# existing").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_gitweave"))
        .arg("init")
        .current_dir(dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
    let content = std::fs::read_to_string(dir.path().join(".weave.toml")).unwrap();
    assert_eq!(content, "# existing");
}

#[test]
fn init_writes_into_the_given_path() {
    let target = tempfile::tempdir().unwrap();
    let cwd = tempfile::tempdir().unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_gitweave"))
        .arg("--path")
        .arg(target.path())
        .arg("init")
        .current_dir(cwd.path())
        .output()
        .unwrap();

    assert!(output.status.success());
    assert!(target.path().join(".weave.toml").exists());
    assert!(!cwd.path().join(".weave.toml").exists());
}
