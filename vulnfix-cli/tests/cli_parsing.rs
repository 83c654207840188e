//! CLI argument parsing and early-failure tests. None of these reach the network.

#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn vulnfix() -> Command {
    let mut cmd = Command::cargo_bin("vulnfix").expect("vulnfix binary");
    for var in ["CI", "GITHUB_TOKEN", "GITHUB_REPOSITORY", "RUST_LOG", "VULNFIX_API_TOKEN"] {
        cmd.env_remove(var);
    }
    cmd
}

fn create_temp_project() -> TempDir {
    let td = tempfile::tempdir().expect("tempdir");
    fs::write(
        td.path().join("package.json"),
        r#"{ "name": "app", "version": "1.0.0", "dependencies": { "lodash": "^4.17.20" } }"#,
    )
    .unwrap();
    td
}

#[test]
fn help_lists_subcommands() {
    vulnfix()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fix"))
        .stdout(predicate::str::contains("scan"))
        .stdout(predicate::str::contains("explain-range"));
}

#[test]
fn explain_range_single_style() {
    vulnfix()
        .args(["explain-range", "^1.2.3", "2.0.0", "--style", "caret"])
        .assert()
        .success()
        .stdout(predicate::str::contains("^2.0.0"))
        .stdout(predicate::str::contains("tilde").not());
}

#[test]
fn explain_range_all_styles() {
    vulnfix()
        .args(["explain-range", ">=1.0.0 <2.0.0", "2.5.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("~2.5.0"))
        .stdout(predicate::str::contains("<=2.5.0"))
        .stdout(predicate::str::contains("preserve"));
}

#[test]
fn explain_range_rejects_non_semver_target() {
    vulnfix()
        .args(["explain-range", "^1.2.3", "latest"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not a semver version"));
}

#[test]
fn unknown_range_style_is_a_usage_error() {
    vulnfix()
        .args(["explain-range", "^1.2.3", "2.0.0", "--style", "sideways"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown range style"));
}

#[test]
fn scan_without_lockfile_fails() {
    let temp = create_temp_project();

    vulnfix()
        .current_dir(temp.path())
        .arg("scan")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("load lockfile"));
}

#[test]
fn fix_without_lockfile_fails_before_network() {
    let temp = create_temp_project();

    vulnfix()
        .current_dir(temp.path())
        .arg("fix")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("detect package manager"));
    assert!(!temp.path().join("artifacts").exists());
}

#[test]
fn fix_rejects_zero_limit() {
    let temp = create_temp_project();

    vulnfix()
        .current_dir(temp.path())
        .args(["fix", "--limit", "0"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("limit must be at least 1"));
}

#[test]
fn invalid_config_file_is_reported() {
    let temp = create_temp_project();
    fs::write(temp.path().join("vulnfix.toml"), "[fix\nlimit = ").unwrap();

    vulnfix()
        .current_dir(temp.path())
        .arg("scan")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("vulnfix.toml"));
}

#[test]
fn config_limit_is_validated() {
    let temp = create_temp_project();
    fs::write(temp.path().join("vulnfix.toml"), "[fix]\nlimit = 0\n").unwrap();

    vulnfix()
        .current_dir(temp.path())
        .arg("fix")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("limit must be at least 1"));
}

#[test]
fn repo_root_flag_is_honored() {
    let temp = create_temp_project();
    let missing = temp.path().join("does-not-exist");

    vulnfix()
        .args(["scan", "--repo-root"])
        .arg(&missing)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("load lockfile"));
}
