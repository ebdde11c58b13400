//! Integration tests for `keepctl` (spec §4.5, §6 "Manager CLI surface"),
//! mirroring `boxlite-cli/tests/{create,list,start,stop,rm,restart}.rs`.
//!
//! These exercise error paths that don't require namespaces, privileged
//! mounts, or a running `keep-shim`/`slirp4netns` — the full happy path
//! needs a real Linux host and is covered by the unit tests colocated with
//! each module instead.

use assert_cmd::Command;
use predicates::prelude::*;

fn keepctl(root: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("keepctl").unwrap();
    cmd.arg("--root").arg(root);
    cmd
}

#[test]
fn list_on_an_empty_root_prints_just_the_header() {
    let root = tempfile::tempdir().unwrap();

    keepctl(root.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("ID"))
        .stdout(predicate::str::contains("STATUS"));
}

#[test]
fn create_with_a_missing_image_dir_fails() {
    let root = tempfile::tempdir().unwrap();

    keepctl(root.path())
        .args(["create", "--image", "missing/image:latest", "--image-dir"])
        .arg(root.path().join("no-such-image"))
        .arg("c1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn start_an_unknown_container_fails() {
    let root = tempfile::tempdir().unwrap();

    keepctl(root.path())
        .args(["start", "nonexistent"])
        .assert()
        .failure();
}

#[test]
fn state_on_an_unknown_container_fails() {
    let root = tempfile::tempdir().unwrap();

    keepctl(root.path())
        .args(["state", "nonexistent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn stop_reports_all_targets_that_failed() {
    let root = tempfile::tempdir().unwrap();

    keepctl(root.path())
        .args(["stop", "a", "b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("a:"))
        .stderr(predicate::str::contains("b:"));
}
