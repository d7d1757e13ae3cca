#[path = "common/mod.rs"]
mod common;

use std::{fs, time::Duration};

use chrono::Utc;
use common::{fast_registry, shell_spec, wait_until};
use procward::{
    ManagedProcess, Phase, ProcessKey, ProcessStatus, RegistryError, RestartPolicy,
    TerminationInfo, snapshot,
};
use tempfile::tempdir;

fn stored(name: &str, restart: RestartPolicy, last_exit: Option<i32>) -> ManagedProcess {
    let mut record = ManagedProcess::new(
        ProcessKey::new("restored", name),
        shell_spec("sleep 30", restart),
    );
    record.status = ProcessStatus {
        phase: Phase::Failed,
        last_termination_info: last_exit.map(|exit_code| TerminationInfo {
            exit_code,
            signal: None,
            finished_at: Utc::now(),
        }),
        ..ProcessStatus::default()
    };
    record
}

#[test]
fn saved_snapshot_drops_live_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    let registry = fast_registry();
    registry
        .register(ProcessKey::new("default", "web"), shell_spec("sleep 30", RestartPolicy::Never))
        .unwrap();
    registry.start_process("default", "web").unwrap();

    registry.save_snapshot(&path).unwrap();
    registry.shutdown().unwrap();

    let records = snapshot::read_snapshot(&path).unwrap().unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.metadata, ProcessKey::new("default", "web"));
    assert_eq!(record.spec.command, "sleep 30");
    assert_eq!(record.status.phase, Phase::Failed);
    assert_eq!(record.status.pid, 0);
    assert!(record.status.start_time.is_none());
    assert!(record.status.resource_stats.is_none());
}

#[test]
fn load_starts_only_restart_candidates() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    snapshot::write_snapshot(
        &path,
        &[
            stored("always", RestartPolicy::Always, None),
            stored("crashed", RestartPolicy::OnFailure, Some(1)),
            stored("clean", RestartPolicy::OnFailure, Some(0)),
            stored("never", RestartPolicy::Never, Some(1)),
        ],
    )
    .unwrap();

    let registry = fast_registry();
    assert_eq!(registry.load_snapshot(&path).unwrap(), 4);

    assert!(wait_until(Duration::from_secs(5), || {
        ["always", "crashed"]
            .iter()
            .all(|name| registry.get("restored", name).unwrap().status.phase == Phase::Running)
    }));
    for name in ["clean", "never"] {
        let process = registry.get("restored", name).unwrap();
        assert_ne!(process.status.phase, Phase::Running, "{name} should not start");
        assert_eq!(process.status.pid, 0);
    }
    registry.shutdown().unwrap();
}

#[test]
fn missing_snapshot_restores_nothing() {
    let dir = tempdir().unwrap();
    let registry = fast_registry();
    assert_eq!(registry.load_snapshot(&dir.path().join("absent.yaml")).unwrap(), 0);
    assert!(registry.list().unwrap().is_empty());
}

#[test]
fn empty_registry_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    fast_registry().save_snapshot(&path).unwrap();

    assert!(path.exists());
    let registry = fast_registry();
    assert_eq!(registry.load_snapshot(&path).unwrap(), 0);
    assert!(registry.list().unwrap().is_empty());
}

#[test]
fn corrupt_snapshot_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    fs::write(&path, "- metadata: [not, a, key\n").unwrap();

    let registry = fast_registry();
    let err = registry.load_snapshot(&path).unwrap_err();
    assert!(matches!(err, RegistryError::PersistenceFailure(_)));
}

#[test]
fn loading_replaces_an_existing_entry() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    let mut record = stored("same", RestartPolicy::Never, Some(0));
    record.spec.command = "sleep 99".into();
    snapshot::write_snapshot(&path, &[record]).unwrap();

    let registry = fast_registry();
    registry
        .register(ProcessKey::new("restored", "same"), shell_spec("sleep 1", RestartPolicy::Never))
        .unwrap();
    registry.load_snapshot(&path).unwrap();

    let process = registry.get("restored", "same").unwrap();
    assert_eq!(process.spec.command, "sleep 99");
    assert_eq!(registry.list().unwrap().len(), 1);
}

#[test]
fn invalid_entries_are_skipped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    let mut bad = stored("bad", RestartPolicy::Never, None);
    bad.spec.command = String::new();
    snapshot::write_snapshot(&path, &[bad, stored("good", RestartPolicy::Never, None)]).unwrap();

    let registry = fast_registry();
    assert_eq!(registry.load_snapshot(&path).unwrap(), 1);
    assert!(registry.get("restored", "good").is_ok());
    assert!(matches!(
        registry.get("restored", "bad"),
        Err(RegistryError::NotFound(_))
    ));
}

#[test]
fn configured_restart_candidate_returns_after_boot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    let key = ProcessKey::new("default", "keeper");
    let first = fast_registry();
    first.register(key.clone(), shell_spec("sleep 30", RestartPolicy::Always)).unwrap();
    first.save_snapshot(&path).unwrap();

    // Daemon boot: restore first, then re-register what the config declares.
    let booted = fast_registry();
    booted.load_snapshot(&path).unwrap();
    booted.register(key, shell_spec("sleep 30", RestartPolicy::Always)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        booted.get("default", "keeper").unwrap().status.phase == Phase::Running
    }));
    booted.shutdown().unwrap();
}

#[test]
fn re_registration_keeps_last_termination() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.yaml");
    snapshot::write_snapshot(&path, &[stored("quiet", RestartPolicy::Never, Some(3))]).unwrap();

    let registry = fast_registry();
    registry.load_snapshot(&path).unwrap();
    registry
        .register(ProcessKey::new("restored", "quiet"), shell_spec("sleep 30", RestartPolicy::Never))
        .unwrap();

    let process = registry.get("restored", "quiet").unwrap();
    assert_eq!(process.status.phase, Phase::Pending);
    assert_eq!(process.status.last_termination_info.unwrap().exit_code, 3);
}
