#[path = "common/mod.rs"]
mod common;

use std::{
    io::{BufRead, BufReader},
    os::unix::process::CommandExt,
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use common::{
    fake_proc_entry, fast_registry, fast_settings, is_process_alive, spawn_foreign_sleep,
    wait_until,
};
use procward::{
    DiscoveryQuery, ManagedProcess, Phase, ProcessKey, Registry, RegistryError, RegistrySettings,
    RestartPolicy, signal::Signal,
};
use tempfile::tempdir;

fn ignore_match(_: &ManagedProcess) {}

#[test]
fn script_scan_skips_pids_that_do_not_exist() {
    let registry = fast_registry();
    let mut lines = Vec::new();
    let script = "echo 999999998; echo not-a-pid; echo 999999999";
    let found = registry
        .scan_by_script(script, &mut |line: &str, pid: Option<u32>| {
            lines.push((line.to_string(), pid));
        })
        .unwrap();

    assert!(found.is_empty());
    assert!(registry.list().unwrap().is_empty());
    assert_eq!(
        lines,
        vec![
            ("999999998".to_string(), Some(999_999_998)),
            ("not-a-pid".to_string(), None),
            ("999999999".to_string(), Some(999_999_999)),
        ]
    );
}

#[test]
fn failing_script_aborts_the_scan() {
    let registry = fast_registry();
    let err = registry
        .scan_by_script("echo 1; echo boom >&2; exit 3", &mut |_: &str, _: Option<u32>| {})
        .unwrap_err();
    match err {
        RegistryError::ScriptExecutionFailed { output, .. } => assert!(output.contains("boom")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn pattern_scan_adopts_and_stops_a_foreign_process() {
    let pid = spawn_foreign_sleep("31.337");
    let registry = fast_registry();

    let mut matched = Vec::new();
    let found = registry
        .scan_by_pattern(r"sleep 31\.337", &mut |process: &ManagedProcess| {
            matched.push(process.status.pid)
        })
        .unwrap();
    assert_eq!(matched, vec![pid]);
    assert_eq!(found.len(), 1);

    let record = &found[0];
    assert_eq!(record.metadata.namespace, "discovered");
    assert_eq!(record.status.phase, Phase::Running);
    assert_eq!(record.status.pid, pid);
    assert_eq!(record.spec.command, "sleep");
    assert_eq!(record.spec.args, vec!["31.337".to_string()]);
    assert_eq!(record.spec.restart, RestartPolicy::Never);
    assert_eq!(
        record.spec.discovery,
        Some(DiscoveryQuery::Pattern(r"sleep 31\.337".to_string()))
    );

    let key = record.metadata.clone();
    registry.stop_process(&key.namespace, &key.name).unwrap();
    let stopped = registry.get(&key.namespace, &key.name).unwrap();
    assert_eq!(stopped.status.phase, Phase::Stopped);
    assert_eq!(stopped.status.pid, 0);
    assert_eq!(stopped.status.last_termination_info.unwrap().exit_code, 143);
}

#[test]
fn rescanning_keeps_one_entry_per_process() {
    let pid = spawn_foreign_sleep("32.337");
    let registry = fast_registry();

    registry.scan_by_pattern(r"sleep 32\.337", &mut ignore_match).unwrap();
    registry.scan_by_pattern(r"sleep 32\.337", &mut ignore_match).unwrap();

    let entries = registry.list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status.pid, pid);
    registry.shutdown().unwrap();
}

#[test]
fn vanished_adoptee_becomes_unknown() {
    let pid = spawn_foreign_sleep("0.8");
    let registry = fast_registry();
    let found = registry.scan_by_pattern(r"^sleep 0\.8$", &mut ignore_match).unwrap();
    assert_eq!(found.len(), 1);
    let key = found[0].metadata.clone();

    assert!(wait_until(Duration::from_secs(5), || {
        registry.reconcile_liveness().unwrap() == vec![key.clone()]
    }));
    let process = registry.get(&key.namespace, &key.name).unwrap();
    assert_eq!(process.status.phase, Phase::Unknown);
    assert_eq!(process.status.pid, 0);
    assert!(process.status.message.unwrap().contains(&pid.to_string()));
}

#[test]
fn invalid_regex_is_matched_literally() {
    let root = tempdir().unwrap();
    fake_proc_entry(root.path(), 4242, "worker", &["worker[", "--queue", "mail"]);
    fake_proc_entry(root.path(), 4343, "worker", &["worker", "--queue", "mail"]);

    let registry = Registry::new(RegistrySettings {
        proc_root: root.path().to_path_buf(),
        ..fast_settings()
    });
    let found = registry.scan_by_pattern("worker[", &mut ignore_match).unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].status.pid, 4242);
    assert_eq!(found[0].metadata, ProcessKey::new("discovered", "worker-4242"));
    assert_eq!(found[0].spec.env.get("MODE").map(String::as_str), Some("fake"));
}

#[test]
fn scan_never_adopts_the_supervisor() {
    let root = tempdir().unwrap();
    let own = std::process::id();
    fake_proc_entry(root.path(), own, "procward", &["procward", "run"]);
    fake_proc_entry(root.path(), own + 1, "procward", &["procward", "run", "--child"]);

    let registry = Registry::new(RegistrySettings {
        proc_root: root.path().to_path_buf(),
        ..fast_settings()
    });
    let found = registry.scan_by_pattern("procward run", &mut ignore_match).unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].status.pid, own + 1);
}

#[test]
fn missing_proc_root_is_an_error() {
    let root = tempdir().unwrap();
    let registry = Registry::new(RegistrySettings {
        proc_root: root.path().join("nope"),
        ..fast_settings()
    });
    let err = registry.scan_by_pattern("anything", &mut ignore_match).unwrap_err();
    assert!(matches!(err, RegistryError::DiscoveryRootUnavailable { .. }));
}

#[test]
fn stopping_an_adoptee_spares_the_rest_of_its_group() {
    let mut leader = Command::new("sh")
        .args(["-c", "sleep 60 & echo $!; sleep 61"])
        .process_group(0)
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    let mut line = String::new();
    BufReader::new(leader.stdout.take().unwrap())
        .read_line(&mut line)
        .unwrap();
    let member: u32 = line.trim().parse().unwrap();

    let registry = fast_registry();
    let found = registry
        .scan_by_script(&format!("echo {member}"), &mut |_: &str, _: Option<u32>| {})
        .unwrap();
    assert_eq!(found.len(), 1);
    let key = found[0].metadata.clone();

    registry.stop_process(&key.namespace, &key.name).unwrap();
    assert_eq!(registry.get(&key.namespace, &key.name).unwrap().status.phase, Phase::Stopped);
    thread::sleep(Duration::from_millis(200));
    assert!(leader.try_wait().unwrap().is_none(), "group leader was signalled");

    procward::signal::kill_group(leader.id(), Signal::SIGKILL).unwrap();
    leader.wait().unwrap();
}

#[test]
fn stopping_an_adoptee_that_already_exited_records_termination() {
    let pid = spawn_foreign_sleep("0.5");
    let registry = fast_registry();
    let found = registry.scan_by_pattern(r"^sleep 0\.5$", &mut ignore_match).unwrap();
    assert_eq!(found.len(), 1);
    let key = found[0].metadata.clone();

    assert!(wait_until(Duration::from_secs(5), || !is_process_alive(pid)));
    registry.stop_process(&key.namespace, &key.name).unwrap();

    let process = registry.get(&key.namespace, &key.name).unwrap();
    assert_eq!(process.status.phase, Phase::Stopped);
    let termination = process.status.last_termination_info.unwrap();
    assert_eq!(termination.exit_code, -1);
    assert_eq!(termination.signal, None);
}
