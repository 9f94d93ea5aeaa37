#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const ENV_VARS: &[&str] = &[
    "TICKETD_CONFIG",
    "DATABASE_URL",
    "TICKET_SERVICE_IMPL",
    "TICKET_COST_THRESHOLD",
    "TICKET_LIMIT",
    "ALLOW_NULL_COST",
    "EXCLUDE_SUB_TYPES",
    "RECONCILE_CONCURRENCY",
    "RECONCILE_ROW_TIMEOUT_SECS",
    "PORT",
    "SLACK_API_TOKEN",
    "SLACK_SIGNING_SECRET",
    "SLACK_CHANNEL_AS_TICKET",
    "SLACK_API_URL",
];

/// `ticketd` with every configuration variable cleared.
fn ticketd() -> Command {
    let mut cmd = Command::cargo_bin("ticketd").unwrap();
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn write_config(dir: &TempDir, yaml: &str) -> std::path::PathBuf {
    let path = dir.path().join("ticketd.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

// ---------------------------------------------------------------------------
// help
// ---------------------------------------------------------------------------

#[test]
fn help_lists_subcommands() {
    ticketd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("reconcile"))
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("config"));
}

// ---------------------------------------------------------------------------
// config check / show
// ---------------------------------------------------------------------------

#[test]
fn config_check_defaults_warns_about_memory_store() {
    ticketd()
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[warning]"))
        .stdout(predicate::str::contains("DATABASE_URL"));
}

#[test]
fn config_check_fails_for_slack_without_token() {
    ticketd()
        .args(["config", "check"])
        .env("TICKET_SERVICE_IMPL", "slack")
        .assert()
        .failure()
        .stdout(predicate::str::contains("SLACK_API_TOKEN"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn config_check_json_lists_warnings() {
    let output = ticketd()
        .args(["config", "check", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(json["warnings"].as_array().unwrap().len() >= 1);
}

#[test]
fn environment_overrides_config_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "reconcile:\n  cost_threshold: 50\n  limit: 9\nslack:\n  api_token: xoxb-secret\n",
    );

    let output = ticketd()
        .args(["config", "show", "--json", "--config"])
        .arg(&path)
        .env("TICKET_LIMIT", "12")
        .env("EXCLUDE_SUB_TYPES", "STOP_VM,DELETE_DISK")
        .env("ALLOW_NULL_COST", "yes")
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["reconcile"]["cost_threshold"], 50);
    assert_eq!(json["reconcile"]["limit"], 12);
    assert_eq!(json["reconcile"]["allow_null_cost"], true);
    assert_eq!(
        json["reconcile"]["exclude_subtypes"],
        serde_json::json!(["STOP_VM", "DELETE_DISK"])
    );
    assert_eq!(json["slack"]["api_token"], "********");
}

#[test]
fn missing_config_file_fails() {
    ticketd()
        .args(["config", "show", "--config", "/nonexistent/ticketd.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config file not found"));
}

// ---------------------------------------------------------------------------
// reconcile / migrate
// ---------------------------------------------------------------------------

#[test]
fn reconcile_without_database_runs_empty_pass() {
    let output = ticketd().args(["reconcile", "--json"]).output().unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["considered"], 0);
    assert_eq!(json["committed"], 0);
}

#[test]
fn reconcile_plain_output_prints_counts() {
    ticketd()
        .arg("reconcile")
        .assert()
        .success()
        .stdout(predicate::str::contains("considered"))
        .stdout(predicate::str::contains("committed"));
}

#[test]
fn unknown_backend_fails_reconcile() {
    ticketd()
        .arg("reconcile")
        .env("TICKET_SERVICE_IMPL", "jira")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown ticket backend 'jira'"));
}

#[test]
fn migrate_requires_database_url() {
    ticketd()
        .arg("migrate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("DATABASE_URL"));
}
