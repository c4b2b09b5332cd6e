use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_cli_binary_shows_help() {
    let mut cmd = Command::cargo_bin("gateway").unwrap();
    cmd.arg("--help");
    cmd.assert().success().stdout(predicate::str::contains("Config-driven HTTP gateway"));
}

#[test]
fn test_version_flag() {
    let mut cmd = Command::cargo_bin("gateway").unwrap();
    cmd.arg("--version");
    cmd.assert().success();
}

#[test]
fn test_validate_rejects_missing_config_file() {
    let mut cmd = Command::cargo_bin("gateway").unwrap();
    cmd.args(["validate", "--config", "/nonexistent/gateway.yaml"]);
    cmd.assert().failure().stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn test_validate_accepts_empty_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("gateway.yaml");
    std::fs::write(&config_path, "routes: {}\n").unwrap();

    let mut cmd = Command::cargo_bin("gateway").unwrap();
    cmd.args(["validate", "--config", config_path.to_str().unwrap()]);
    cmd.assert().success();
}
