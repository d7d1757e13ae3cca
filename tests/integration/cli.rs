#[path = "common/mod.rs"]
mod common;

use std::{fs, process::Stdio, time::Duration};

use assert_cmd::Command;
use common::{fake_proc_entry, wait_until};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use predicates::prelude::*;
use procward::{ManagedProcess, ProcessKey, RestartPolicy, snapshot};
use tempfile::tempdir;

fn procward() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("procward"))
}

#[test]
fn failing_script_exits_with_error() {
    procward()
        .args(["scan", "script", "echo nope >&2; exit 4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Discovery script failed"));
}

#[test]
fn script_scan_with_dead_pids_prints_nothing() {
    procward()
        .args(["scan", "script", "echo 999999997"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn pattern_scan_prints_json_lines() {
    let root = tempdir().unwrap();
    fake_proc_entry(root.path(), 5151, "queue", &["queue-runner", "--jobs", "4"]);
    fake_proc_entry(root.path(), 5252, "other", &["other"]);

    let output = procward()
        .args(["scan", "--proc-root"])
        .arg(root.path())
        .args(["pattern", "queue-runner"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let records: Vec<ManagedProcess> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata, ProcessKey::new("discovered", "queue-5151"));
    assert_eq!(records[0].spec.args, vec!["--jobs".to_string(), "4".to_string()]);
}

#[test]
fn snapshot_command_prints_stored_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    let record = ManagedProcess::new(
        ProcessKey::new("default", "api"),
        common::shell_spec("sleep 30", RestartPolicy::Always),
    );
    snapshot::write_snapshot(&path, &[record]).unwrap();

    procward()
        .args(["snapshot", "--path"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\":\"api\""))
        .stdout(predicate::str::contains("\"restart\":\"always\""));
}

#[test]
fn invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("procward.yaml");
    fs::write(
        &config,
        r#"processes:
  - name: twice
    command: "sleep 1"
  - name: twice
    command: "sleep 2"
"#,
    )
    .unwrap();

    procward()
        .args(["run", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("twice"));
}

#[test]
fn run_snapshots_and_exits_on_interrupt() {
    let dir = tempdir().unwrap();
    let snapshot_path = dir.path().join("state").join("snapshot.yaml");
    let config = dir.path().join("procward.yaml");
    fs::write(
        &config,
        format!(
            r#"version: "1"
snapshot_path: "{}"
snapshot_interval: "200ms"
monitor_interval: "200ms"
termination_grace: "1s"
processes:
  - name: napper
    command: "sleep 30"
    restart: always
"#,
            snapshot_path.display()
        ),
    )
    .unwrap();

    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin!("procward"))
        .args(["--log-level", "debug", "run", "--config"])
        .arg(&config)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    let written = wait_until(Duration::from_secs(10), || {
        snapshot::read_snapshot(&snapshot_path)
            .ok()
            .flatten()
            .is_some_and(|records| records.len() == 1)
    });
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();
    let status = child.wait().unwrap();

    assert!(written, "snapshot was never written");
    assert!(status.success());
    let records = snapshot::read_snapshot(&snapshot_path).unwrap().unwrap();
    assert_eq!(records[0].metadata, ProcessKey::new("default", "napper"));
    assert_eq!(records[0].spec.restart, RestartPolicy::Always);
}
