#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    process::{Child, Command},
    thread,
    time::{Duration, Instant},
};

use procward::{ProcessSpec, Registry, RegistrySettings, RestartPolicy};

/// Settings with short delays so policy-driven restarts happen quickly.
pub fn fast_settings() -> RegistrySettings {
    RegistrySettings {
        restart_backoff: Duration::from_millis(100),
        restore_delay: Duration::from_millis(100),
        termination_grace: Duration::from_secs(2),
        script_timeout: Duration::from_secs(10),
        ..RegistrySettings::default()
    }
}

pub fn fast_registry() -> Registry {
    Registry::new(fast_settings())
}

pub fn shell_spec(command: &str, restart: RestartPolicy) -> ProcessSpec {
    ProcessSpec {
        command: command.to_string(),
        args: Vec::new(),
        env: BTreeMap::new(),
        working_dir: None,
        restart,
        user: None,
        discovery: None,
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    condition()
}

pub fn line_count(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|content| content.lines().count())
        .unwrap_or(0)
}

pub fn is_process_alive(pid: u32) -> bool {
    procward::signal::is_alive(pid)
}

/// Spawns `sleep <seconds>` outside the registry and reaps it in the
/// background, like an unrelated host process would be.
pub fn spawn_foreign_sleep(seconds: &str) -> u32 {
    let mut child: Child = Command::new("sleep")
        .arg(seconds)
        .spawn()
        .expect("failed to spawn sleep");
    let pid = child.id();
    thread::spawn(move || {
        let _ = child.wait();
    });
    pid
}

/// Writes a minimal `/proc/<pid>` entry under `root`.
pub fn fake_proc_entry(root: &Path, pid: u32, comm: &str, argv: &[&str]) {
    let dir = root.join(pid.to_string());
    fs::create_dir_all(&dir).expect("failed to create fake proc dir");
    fs::write(
        dir.join("stat"),
        format!("{pid} ({comm}) S 1 {pid} {pid} 0 -1 0 0 0 0 0 3 1 0 0 20 0 1 0 200 0 0 0"),
    )
    .expect("failed to write stat");
    let mut cmdline = argv.join("\0");
    cmdline.push('\0');
    fs::write(dir.join("cmdline"), cmdline).expect("failed to write cmdline");
    fs::write(dir.join("environ"), b"MODE=fake\0").expect("failed to write environ");
}
