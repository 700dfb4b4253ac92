//! End-to-end CLI tests for the ripper binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Binary isolated from the user's config and data directories.
fn ripper(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ripper").unwrap();
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    ripper(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Resolve, download and organize"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    ripper(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ripper"));
}

#[test]
fn test_binary_requires_subcommand() {
    let home = TempDir::new().unwrap();
    ripper(&home).assert().failure().code(2);
}

#[test]
fn test_binary_rejects_unknown_provider() {
    let home = TempDir::new().unwrap();
    ripper(&home)
        .args(["id", "napster", "track", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown provider"));
}

#[test]
fn test_failed_lists_nothing_on_fresh_ledger() {
    let home = TempDir::new().unwrap();
    ripper(&home)
        .args(["-q", "failed"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    assert!(home.path().join("data").join("ripper").exists());
}

#[test]
fn test_no_db_leaves_data_dir_untouched() {
    let home = TempDir::new().unwrap();
    ripper(&home).args(["--no-db", "failed"]).assert().success();
    assert!(!home.path().join("data").join("ripper").exists());
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let home = TempDir::new().unwrap();
    ripper(&home)
        .args(["--config", "/nonexistent/ripper.toml", "failed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not load configuration"));
}

#[test]
fn test_invalid_config_value_is_an_error() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("bad.toml");
    std::fs::write(&config, "[downloads]\nmax_retries = 50\n").unwrap();
    ripper(&home)
        .arg("--config")
        .arg(&config)
        .arg("failed")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_retries"));
}

#[test]
fn test_unsupported_url_is_skipped() {
    let home = TempDir::new().unwrap();
    ripper(&home)
        .args(["--no-db", "url", "https://music.example.com/album/1"])
        .assert()
        .success();
}

#[test]
fn test_missing_credentials_fail_the_run() {
    let home = TempDir::new().unwrap();
    ripper(&home)
        .args(["--no-db", "id", "qobuz", "track", "19512574"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("qobuz:track:19512574"))
        .stderr(predicate::str::contains("missing credentials"));
}

#[test]
fn test_url_from_stdin() {
    let home = TempDir::new().unwrap();
    ripper(&home)
        .args(["--no-db", "url"])
        .write_stdin("see https://www.deezer.com/track/3135556 for details\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("deezer:track:3135556"));
}
