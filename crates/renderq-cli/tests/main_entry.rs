//! Integration tests for the `renderq` binary entry point.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn help_lists_submission_options() {
    let mut command = cargo_bin_cmd!("renderq");
    command.arg("--help");
    command
        .assert()
        .success()
        .stdout(contains("--animation"))
        .stdout(contains("--no-fetch"));
}

#[test]
fn missing_blend_file_exits_with_failure() {
    let temp = tempfile::tempdir().expect("temp dir");
    let mut command = cargo_bin_cmd!("renderq");
    command.arg(temp.path().join("absent.blend"));
    command
        .assert()
        .failure()
        .stderr(contains("does not exist"));
}

#[test]
fn missing_file_argument_is_a_usage_error() {
    let mut command = cargo_bin_cmd!("renderq");
    command
        .assert()
        .failure()
        .stderr(contains("Usage"));
}
