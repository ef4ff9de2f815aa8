//! CLI surface tests against a stub engine: argument handling, exit
//! codes and the engine invocations the commands produce.

mod common;

use common::TestContext;
use predicates::prelude::*;

#[test]
fn test_help_lists_subcommands() {
    let ctx = TestContext::new();
    ctx.ybox()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("logs"))
        .stdout(predicate::str::contains("control"))
        .stdout(predicate::str::contains("pkg"));
}

#[test]
fn test_version_flag() {
    let ctx = TestContext::new();
    ctx.ybox()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_ls_queries_engine_with_primary_label() {
    let ctx = TestContext::new();
    ctx.ybox().arg("ls").assert().success();
    let log = ctx.engine_log();
    assert!(log.contains("container ls"));
    assert!(log.contains("--filter=label=io.ybox.container.type=primary"));
    assert!(log.contains("--format="));
}

#[test]
fn test_ls_all_flag() {
    let ctx = TestContext::new();
    ctx.ybox().args(["ls", "-a"]).assert().success();
    assert!(ctx.engine_log().contains("--all"));
}

#[test]
fn test_destroy_missing_container_is_user_error() {
    let ctx = TestContext::new();
    ctx.ybox()
        .args(["destroy", "no-such-box"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no-such-box"));
}

#[test]
fn test_logs_missing_container_is_user_error() {
    let ctx = TestContext::new();
    ctx.ybox()
        .args(["logs", "no-such-box"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_cmd_missing_container_reports_not_ready() {
    let ctx = TestContext::new();
    // the stub engine knows no containers, so exec is gated off
    ctx.ybox()
        .args(["cmd", "no-such-box"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_pkg_without_containers_is_user_error() {
    let ctx = TestContext::new();
    ctx.ybox()
        .args(["pkg", "list"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("no ybox containers"));
}

#[test]
fn test_create_unknown_distribution_is_user_error() {
    let ctx = TestContext::new();
    ctx.ybox()
        .args(["create", "voidlinux", "basic"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not in supported list"));
}

#[test]
fn test_invalid_container_name_rejected() {
    let ctx = TestContext::new();
    ctx.ybox()
        .args(["create", "-n", "bad name!", "arch", "basic"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid container name"));
}

#[test]
fn test_control_status_missing_container() {
    let ctx = TestContext::new();
    ctx.ybox()
        .args(["control", "status", "no-such-box"])
        .assert()
        .failure()
        .code(1);
}
