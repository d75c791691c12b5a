#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn misting(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("misting").unwrap();
    cmd.current_dir(dir.path())
        .env("MISTING_CONFIG", dir.path().join("misting.yaml"))
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &TempDir, yaml: &str) {
    std::fs::write(dir.path().join("misting.yaml"), yaml).unwrap();
}

// ---------------------------------------------------------------------------
// misting config check
// ---------------------------------------------------------------------------

#[test]
fn config_check_prints_defaults_without_a_file() {
    let dir = TempDir::new().unwrap();
    misting(&dir)
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("System A"))
        .stdout(predicate::str::contains("run_window_secs: 180"))
        .stderr(predicate::str::contains("auth.password is empty"));
}

#[test]
fn config_check_hides_the_password() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "auth:\n  password: hunter2\n");
    misting(&dir)
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn config_check_rejects_duplicate_pins() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        "relays:\n  - { id: 1, description: A, pin: 6 }\n  - { id: 2, description: B, pin: 6 }\n",
    );
    misting(&dir)
        .args(["config", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("pin 6"));
}

// ---------------------------------------------------------------------------
// misting provision / status
// ---------------------------------------------------------------------------

#[test]
fn provision_is_idempotent() {
    let dir = TempDir::new().unwrap();
    misting(&dir)
        .arg("provision")
        .assert()
        .success()
        .stdout(predicate::str::contains("created 3 of 3"));
    misting(&dir)
        .arg("provision")
        .assert()
        .success()
        .stdout(predicate::str::contains("created 0 of 3"));
    assert!(dir.path().join("data/relays.redb").exists());
}

#[test]
fn status_lists_provisioned_relays() {
    let dir = TempDir::new().unwrap();
    misting(&dir).arg("provision").assert().success();
    misting(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("SYSTEM"))
        .stdout(predicate::str::contains("System C"))
        .stdout(predicate::str::contains("Off"));
}

#[test]
fn status_json_is_machine_readable() {
    let dir = TempDir::new().unwrap();
    misting(&dir).arg("provision").assert().success();
    let output = misting(&dir).args(["status", "--json"]).output().unwrap();
    assert!(output.status.success());
    let relays: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let relays = relays.as_array().unwrap();
    assert_eq!(relays.len(), 3);
    assert_eq!(relays[0]["pin"], 6);
    assert_eq!(relays[0]["state"], "off");
}

#[test]
fn status_before_provision_says_so() {
    let dir = TempDir::new().unwrap();
    misting(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("misting provision"));
}

// ---------------------------------------------------------------------------
// misting audit
// ---------------------------------------------------------------------------

#[test]
fn audit_on_empty_log() {
    let dir = TempDir::new().unwrap();
    misting(&dir)
        .args(["audit", "--limit", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No audit entries."));
}

#[test]
fn unknown_command_fails() {
    let dir = TempDir::new().unwrap();
    misting(&dir).arg("explode").assert().failure();
}
