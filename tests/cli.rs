// ABOUTME: Integration tests for the lookout CLI commands.
// ABOUTME: Validates --help output, init behavior and configuration errors.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn lookout_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("lookout"));
    cmd.env_remove("LOOKOUT_CONFIG")
        .env_remove("LOOKOUT_POLL_INTERVAL")
        .env_remove("DOCKER_HOST");
    cmd
}

#[test]
fn help_shows_commands() {
    lookout_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("once"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn run_help_shows_overrides() {
    lookout_cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--interval"))
        .stdout(predicate::str::contains("--monitor-only"))
        .stdout(predicate::str::contains("--api-listen"));
}

#[test]
fn init_creates_config_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("lookout.yml");

    lookout_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("lookout.yml"));

    assert!(config_path.exists(), "lookout.yml should be created");
    let content = fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("providers:"));
    assert!(content.contains("poll_interval:"));
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("lookout.yml");
    fs::write(&config_path, "existing: config").unwrap();

    lookout_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    assert_eq!(fs::read_to_string(&config_path).unwrap(), "existing: config");
}

#[test]
fn init_force_overwrites() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(temp_dir.path().join("lookout.yml"), "existing: config").unwrap();

    lookout_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--force"])
        .assert()
        .success();
}

#[test]
fn invalid_interval_is_rejected_by_the_parser() {
    lookout_cmd()
        .args(["once", "--interval", "whenever"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--interval"));
}

#[test]
fn invalid_config_fails_before_connecting() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(
        temp_dir.path().join("lookout.yml"),
        "update:\n  worker_limit: 0\n",
    )
    .unwrap();

    lookout_cmd()
        .current_dir(temp_dir.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("worker_limit"));
}

#[test]
fn explicit_config_path_is_used() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("custom.yml");
    fs::write(&path, "update:\n  poll_interval: 10ms\n").unwrap();

    lookout_cmd()
        .current_dir(temp_dir.path())
        .args(["--config", path.to_str().unwrap(), "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll_interval"));
}
