//! Integration tests for the ipcrace CLI.
//!
//! These run whole races: the binary provisions real SysV objects and
//! re-executes itself for the supervisor and every worker.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

/// Get a command for the ipcrace binary.
fn ipcrace() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("ipcrace").unwrap();
    cmd.env_remove("IPCRACE_LOG")
        .env_remove("RUST_LOG")
        .env_remove("IPCRACE_LOG_FILE")
        .env_remove("IPCRACE_LOG_FORMAT");
    cmd
}

/// Run a race with JSON output and return the parsed report.
fn run_json(args: &[&str]) -> Value {
    let output = ipcrace()
        .args(["-q", "run", "--format", "json", "--max-delay-us", "50"])
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    serde_json::from_slice(&output).expect("report is valid JSON")
}

// ============================================================================
// Help Tests
// ============================================================================

#[test]
fn test_help_hides_participant_modes() {
    ipcrace()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("supervisor").not())
        .stdout(predicate::str::contains("worker ").not());
}

#[test]
fn test_version_displays() {
    ipcrace()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ipcrace"));
}

// ============================================================================
// Race Tests
// ============================================================================

#[test]
fn test_single_worker_wins() {
    let report = run_json(&["--workers", "1", "--target", "3"]);

    assert_eq!(report["outcome"], "winner");
    assert_eq!(report["winner"], 0);
    assert_eq!(report["leader"], 0);
    assert_eq!(report["reports_processed"], 3);
    assert_eq!(report["participants"].as_array().unwrap().len(), 2);
    assert_eq!(report["participants"][0]["exit"], "exited with code 0");
}

#[test]
fn test_multi_worker_race_is_decided() {
    let report = run_json(&["--workers", "4", "--target", "20", "--milestone", "5"]);

    let outcome = report["outcome"].as_str().unwrap();
    assert!(outcome == "winner" || outcome == "exhausted", "{}", outcome);
    let processed = report["reports_processed"].as_u64().unwrap();
    assert!(processed >= 20);
    assert!(processed <= 80);
    assert_eq!(report["exhaustion_bound"], 80);

    if outcome == "winner" {
        assert_eq!(report["winner"], report["leader"]);
        assert!(report["winner"].as_u64().unwrap() < 4);
    }

    let participants = report["participants"].as_array().unwrap();
    assert_eq!(participants.len(), 5);
    assert_eq!(participants[0]["role"], "supervisor");
    for p in participants {
        assert_eq!(p["exit"], "exited with code 0", "{}", p);
    }
}

#[test]
fn test_repeated_runs_are_independent() {
    for _ in 0..3 {
        let report = run_json(&["--workers", "3", "--target", "5"]);
        assert_eq!(report["outcome"], "winner");
        assert!(report["reports_processed"].as_u64().unwrap() <= 15);
    }
}

#[test]
fn test_workers_from_environment() {
    let output = ipcrace()
        .env("IPCRACE_WORKERS", "2")
        .env("IPCRACE_TARGET", "4")
        .args(["-q", "run", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["workers"], 2);
    assert_eq!(report["target"], 4);
}

#[test]
fn test_plain_output() {
    ipcrace()
        .args(["-q", "run", "--workers", "2", "--target", "5"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Winner: worker "))
        .stdout(predicate::str::contains("Reports processed: "));
}

// ============================================================================
// Logging Tests
// ============================================================================

#[test]
fn test_log_file_collects_all_participants() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("race.log");

    ipcrace()
        .args([
            "--log-file",
            log_path.to_str().unwrap(),
            "--no-color",
            "run",
            "--workers",
            "2",
            "--target",
            "5",
        ])
        .assert()
        .success();

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("Supervisor starting"));
    assert!(log.contains("Worker starting"));
    assert!(log.contains("Race finished"));
    assert!(log.contains("Progress channel deleted"));
}

#[test]
fn test_json_log_format() {
    ipcrace()
        .args([
            "--log-format",
            "json",
            "run",
            "--workers",
            "1",
            "--target",
            "2",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("\"message\":\"Race complete\""));
}

#[test]
fn test_quiet_suppresses_info_logs() {
    ipcrace()
        .args(["-q", "run", "--workers", "2", "--target", "3"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Race complete").not());
}

#[test]
fn test_verbose_conflicts_with_quiet() {
    ipcrace()
        .args(["-v", "-q", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

// ============================================================================
// Error Handling Tests
// ============================================================================

#[test]
fn test_zero_workers_rejected() {
    ipcrace()
        .args(["--no-color", "run", "--workers", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("at least one worker"));
}

#[test]
fn test_zero_milestone_rejected() {
    ipcrace()
        .args(["--no-color", "run", "--milestone", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("milestone must be positive"));
}

#[test]
fn test_worker_with_bogus_handles_fails() {
    ipcrace()
        .args([
            "-q",
            "worker",
            "--queue-id",
            "2147483646",
            "--sem-id",
            "2147483646",
            "--shm-id",
            "2147483646",
            "--worker-id",
            "0",
            "--workers",
            "1",
            "--target",
            "1",
        ])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_supervisor_with_zero_milestone_fails() {
    ipcrace()
        .args([
            "--no-color",
            "supervisor",
            "--queue-id",
            "2147483646",
            "--sem-id",
            "2147483646",
            "--shm-id",
            "2147483646",
            "--workers",
            "2",
            "--target",
            "5",
            "--milestone",
            "0",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("milestone must be positive"));
}

#[test]
fn test_invalid_subcommand() {
    ipcrace()
        .arg("invalid_command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}
