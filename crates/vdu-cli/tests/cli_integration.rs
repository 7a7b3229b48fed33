#![allow(deprecated)] // cargo_bin! macro doesn't exist yet in assert_cmd 2.1

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A `vdu` command isolated in its own config directory.
fn vdu(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("vdu").unwrap();
    cmd.env("VDU_CONFIG_DIR", config_dir.path());
    cmd.env_remove("RUST_LOG");
    cmd
}

/// A loopback URL nothing listens on.
fn closed_server() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

#[test]
fn test_help_lists_commands() {
    let config = TempDir::new().unwrap();
    vdu(&config)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("harness"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn test_status_defaults() {
    let config = TempDir::new().unwrap();
    vdu(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Server:        (not set)"))
        .stdout(predicate::str::contains("V:"));
}

#[test]
fn test_status_reads_config_file() {
    let config = TempDir::new().unwrap();
    let cache = config.path().join("cache");
    fs::write(
        config.path().join("config.toml"),
        format!(
            "[server]\nurl = \"https://vdu.example\"\n\n[drive]\nletter = \"X:\"\ncache_dir = {:?}\n\n[refresh]\nthreshold = \"1m\"\n",
            cache.display().to_string()
        ),
    )
    .unwrap();

    let output = vdu(&config).args(["status", "--json"]).output().unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["server"], "https://vdu.example");
    assert_eq!(report["mount_point"], "X:");
    assert_eq!(report["cache"]["state"], "missing");
    assert_eq!(report["refresh"]["threshold"], "1m");
}

#[test]
fn test_invalid_config_is_usage_error() {
    let config = TempDir::new().unwrap();
    fs::write(config.path().join("config.toml"), "[drive]\nletterr = 1\n").unwrap();
    vdu(&config)
        .arg("status")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid configuration file"));
}

#[test]
fn test_harness_without_actions() {
    let config = TempDir::new().unwrap();
    vdu(&config)
        .arg("harness")
        .assert()
        .success()
        .stderr(predicate::str::contains("No actions given"));
}

#[test]
fn test_harness_malformed_action() {
    let config = TempDir::new().unwrap();
    vdu(&config)
        .args(["harness", "--rename", "f1"])
        .assert()
        .code(2);
}

#[test]
fn test_harness_login_needs_server() {
    let config = TempDir::new().unwrap();
    vdu(&config)
        .args(["harness", "--login", "alice:pw"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No server URL configured"));
}

#[test]
fn test_harness_unreachable_server() {
    let config = TempDir::new().unwrap();
    vdu(&config)
        .args(["harness", "--server", &closed_server(), "--login", "alice:pw"])
        .assert()
        .code(4);
}

#[test]
fn test_harness_file_action_needs_login() {
    let config = TempDir::new().unwrap();
    vdu(&config)
        .args(["harness", "--server", &closed_server(), "--delete", "f1"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn test_harness_stops_at_first_failure() {
    let config = TempDir::new().unwrap();
    // The logout fails first; the login after it never runs.
    vdu(&config)
        .args([
            "harness",
            "--server",
            &closed_server(),
            "--logout",
            "--login",
            "alice:pw",
        ])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("Login").not());
}
