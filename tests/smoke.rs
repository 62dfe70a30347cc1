//! Smoke tests -- verify the binary runs and its subcommands behave.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn probebench(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("probebench").unwrap();
    cmd.current_dir(dir).env_remove("PROBEBENCH_CONFIG");
    cmd
}

/// Config with history and reports kept inside `dir`.
fn write_config(dir: &Path, suites: &str) -> std::path::PathBuf {
    let path = dir.join("probebench.toml");
    let content = format!(
        r#"
[reporting]
history_dir = '{history}'
report_dir = '{reports}'

[notify]
enabled = false

{suites}
"#,
        history = dir.join("history").display(),
        reports = dir.join("reports").display(),
        suites = suites,
    );
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("probebench")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Test orchestration"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("probebench")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("probebench"));
}

#[test]
fn test_run_subcommand_exists() {
    Command::cargo_bin("probebench")
        .unwrap()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--suite"));
}

#[test]
fn test_history_subcommand_exists() {
    Command::cargo_bin("probebench")
        .unwrap()
        .args(["history", "--help"])
        .assert()
        .success();
}

#[test]
fn test_list_without_config() {
    let dir = tempfile::tempdir().unwrap();
    probebench(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicates::str::contains("No suites configured."));
}

#[test]
fn test_list_shows_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[suites]]
name = "security"
parallel = true

[[suites.units]]
name = "scan"
kind = "vulnerability_scan"
root = "."
"#,
    );
    probebench(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("list")
        .assert()
        .success()
        .stdout(predicates::str::contains("security (1 units, parallel)"))
        .stdout(predicates::str::contains("scan [vulnerability_scan, security]"));
}

#[test]
fn test_unknown_suite_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "");
    probebench(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "--suite", "nope"])
        .assert()
        .code(2)
        .stderr(predicates::str::contains("unknown suite: nope"));
}

#[cfg(unix)]
#[test]
fn test_run_passing_suite_then_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[suites]]
name = "smoke"

[[suites.units]]
name = "always-true"
kind = "command"
program = "true"
"#,
    );

    probebench(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "--suite", "smoke"])
        .assert()
        .success()
        .stdout(predicates::str::contains("smoke: 1/1 passed (100.0%)"))
        .stdout(predicates::str::contains("establishes baseline data"));

    assert!(dir.path().join("history").join("smoke").is_dir());
    assert_eq!(std::fs::read_dir(dir.path().join("reports")).unwrap().count(), 1);

    probebench(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["history", "--suite", "smoke", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"schema_version\": 1"))
        .stdout(predicates::str::contains("\"status\": \"passed\""));
}

#[cfg(unix)]
#[test]
fn test_run_failing_suite_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[suites]]
name = "broken"

[[suites.units]]
name = "always-false"
kind = "command"
program = "false"
"#,
    );

    probebench(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "--suite", "broken", "--sequential", "--json"])
        .assert()
        .code(1)
        .stdout(predicates::str::contains("\"failed\": 1"))
        .stdout(predicates::str::contains("\"severity\": \"warning\""));
}

#[test]
fn test_parallel_and_sequential_conflict() {
    Command::cargo_bin("probebench")
        .unwrap()
        .args(["run", "--suite", "x", "--parallel", "--sequential"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}
