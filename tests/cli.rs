//! End-to-end CLI checks driven through the compiled binary.

use assert_cmd::Command;
use predicates::prelude::*;

const VALID_FLOW: &str = r#"
name: smoke
description: Minimal validation smoke flow
url_prefix: https://example.com
steps:
  - step_no: 1
    action: navigate
    target: https://example.com
    description: open the homepage
  - step_no: 2
    action: wait
    target: "1000"
    description: settle for a second
    timeout_ms: 1000
"#;

fn write_flow(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn validate_accepts_a_minimal_flow() {
    let dir = tempfile::tempdir().unwrap();
    let flow = write_flow(&dir, "flow.yaml", VALID_FLOW);

    Command::cargo_bin("flowpilot")
        .unwrap()
        .args(["validate", flow.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));
}

#[test]
fn validate_rejects_missing_url_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let flow = write_flow(
        &dir,
        "flow.yaml",
        "name: broken\ndescription: no prefix\nsteps:\n  - step_no: 1\n    action: navigate\n    target: /x\n    description: go\n",
    );

    Command::cargo_bin("flowpilot")
        .unwrap()
        .args(["validate", flow.to_str().unwrap()])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("validation errors"))
        .stderr(predicate::str::contains("url_prefix"));
}

#[test]
fn validate_rejects_unparsable_documents() {
    let dir = tempfile::tempdir().unwrap();
    let flow = write_flow(&dir, "flow.yaml", "name: [unclosed\n");

    Command::cargo_bin("flowpilot")
        .unwrap()
        .args(["validate", flow.to_str().unwrap()])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("validation errors"));
}

#[test]
fn run_rejects_invalid_modes() {
    let dir = tempfile::tempdir().unwrap();
    let flow = write_flow(&dir, "flow.yaml", VALID_FLOW);

    Command::cargo_bin("flowpilot")
        .unwrap()
        .args(["run", flow.to_str().unwrap(), "--mode", "invalid"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid mode"))
        .stderr(predicate::str::contains("manual, cli, scheduler"));
}

#[test]
fn run_reports_validation_failures_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    let flow = write_flow(
        &dir,
        "flow.yaml",
        "name: broken\ndescription: no steps\nurl_prefix: https://example.com\nsteps: []\n",
    );

    Command::cargo_bin("flowpilot")
        .unwrap()
        .args(["run", flow.to_str().unwrap()])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("validation errors"));
}

#[test]
fn scheduler_start_rejects_colliding_run_ids() {
    let dir = tempfile::tempdir().unwrap();
    let flow = write_flow(&dir, "flow.yaml", VALID_FLOW);
    // Simulate a live instance by pre-seeding its lock file.
    std::fs::write(
        dir.path().join("flowpilot_locked.lock"),
        r#"{"run_id":"locked","user_id":"other","pid":1,"startTime":"2026-01-01T00:00:00Z","flowFile":"flow.yaml","cronExpression":"*/5 * * * *"}"#,
    )
    .unwrap();

    Command::cargo_bin("flowpilot")
        .unwrap()
        .env("FLOWPILOT_LOGS_DIR", dir.path())
        .args([
            "scheduler",
            "start",
            flow.to_str().unwrap(),
            "*/5 * * * *",
            "--run-id",
            "locked",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already running"));
}

#[test]
fn scheduler_stop_without_instance_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("flowpilot")
        .unwrap()
        .env("FLOWPILOT_LOGS_DIR", dir.path())
        .args(["scheduler", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}
