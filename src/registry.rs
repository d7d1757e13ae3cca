//! Registry of managed processes and their lifecycle.
//!
//! Every key owns a [`Slot`]. Operations on one key are serialized by the slot's
//! operation lock while distinct keys proceed concurrently. Locks are always
//! taken in the order membership, slot operation, slot state.
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    process::ExitStatus,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::{
    constants::{
        DEFAULT_DISCOVERY_NAMESPACE, DEFAULT_PROC_ROOT, DEFAULT_RESTART_BACKOFF,
        DEFAULT_RESTORE_DELAY, DEFAULT_SCRIPT_TIMEOUT, DEFAULT_TERMINATION_GRACE,
        FORCE_KILL_WAIT, SCHEDULER_TICK, TERMINATION_POLL_INTERVAL,
    },
    error::RegistryError,
    process::{
        ManagedProcess, Phase, ProcessKey, ProcessSpec, ResourceStats, TerminationInfo,
    },
    procfs::ProcFs,
    scanner::{ConsumeHandler, MatchHandler, Scanner},
    signal::{self, Signal},
    snapshot, spawn,
};

/// Timing and discovery settings injected at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySettings {
    /// Delay before a policy-driven restart.
    pub restart_backoff: Duration,
    /// Delay before restarting a process restored from a snapshot or adopted by a scan.
    pub restore_delay: Duration,
    /// Time between SIGTERM and SIGKILL.
    pub termination_grace: Duration,
    pub script_timeout: Duration,
    pub proc_root: PathBuf,
    pub discovery_namespace: String,
    /// Captured stdout/stderr location. Output is discarded when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            restart_backoff: DEFAULT_RESTART_BACKOFF,
            restore_delay: DEFAULT_RESTORE_DELAY,
            termination_grace: DEFAULT_TERMINATION_GRACE,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            discovery_namespace: DEFAULT_DISCOVERY_NAMESPACE.to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DesiredState {
    Running,
    Stopped,
}

#[derive(Debug)]
struct SlotState {
    process: ManagedProcess,
    desired: DesiredState,
    /// Incremented on every spawn; exit and restart events of older
    /// generations are discarded.
    generation: u64,
    /// Whether a supervisor thread owns the running child.
    supervised: bool,
}

impl SlotState {
    fn is_running(&self) -> bool {
        self.process.status.phase == Phase::Running && self.process.status.pid != 0
    }
}

#[derive(Debug)]
struct Slot {
    key: ProcessKey,
    op: Mutex<()>,
    state: Mutex<SlotState>,
    exited: Condvar,
    removed: AtomicBool,
}

impl Slot {
    fn new(process: ManagedProcess) -> Self {
        let desired = if process.status.phase == Phase::Running {
            DesiredState::Running
        } else {
            DesiredState::Stopped
        };
        Self {
            key: process.metadata.clone(),
            op: Mutex::new(()),
            state: Mutex::new(SlotState {
                process,
                desired,
                generation: 0,
                supervised: false,
            }),
            exited: Condvar::new(),
            removed: AtomicBool::new(false),
        }
    }

    /// State access from background threads, which cannot propagate poisoning.
    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Inner {
    settings: RegistrySettings,
    entries: Mutex<HashMap<ProcessKey, Arc<Slot>>>,
    shutting_down: AtomicBool,
    tasks: Mutex<Vec<thread::JoinHandle<()>>>,
}

/// Handle to the process registry. Clones share the same state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                entries: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.inner.settings
    }

    fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    fn slot(&self, key: &ProcessKey) -> Result<Arc<Slot>, RegistryError> {
        self.inner
            .entries
            .lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(key.clone()))
    }

    /// Locks the operation mutex of a slot that is still a member of the registry.
    fn lock_op<'a>(&self, slot: &'a Slot) -> Result<MutexGuard<'a, ()>, RegistryError> {
        let guard = slot.op.lock()?;
        if slot.removed.load(Ordering::SeqCst) {
            return Err(RegistryError::NotFound(slot.key.clone()));
        }
        Ok(guard)
    }

    /// Adds `spec` under `key` in the `Pending` phase, or replaces the spec of an
    /// existing entry.
    ///
    /// A re-registered entry whose supervised child is running keeps its live
    /// status; any other entry is reset to `Pending` but keeps its last
    /// termination and any restart already scheduled for it.
    pub fn register(&self, key: ProcessKey, spec: ProcessSpec) -> Result<ProcessKey, RegistryError> {
        key.validate()?;
        spec.validate()?;
        self.upsert(ManagedProcess::new(key.clone(), spec))?;
        info!("Registered process '{key}'");
        Ok(key)
    }

    /// Inserts or overwrites the entry for `record.metadata`. Returns the slot and
    /// its generation after the write.
    fn upsert(&self, record: ManagedProcess) -> Result<(Arc<Slot>, u64), RegistryError> {
        let key = record.metadata.clone();
        loop {
            let slot = {
                let mut entries = self.inner.entries.lock()?;
                match entries.get(&key) {
                    Some(slot) => slot.clone(),
                    None => {
                        let slot = Arc::new(Slot::new(record));
                        entries.insert(key, slot.clone());
                        return Ok((slot, 0));
                    }
                }
            };

            let op = slot.op.lock()?;
            if slot.removed.load(Ordering::SeqCst) {
                // Deregistered concurrently; drop the stale slot and retry.
                drop(op);
                let mut entries = self.inner.entries.lock()?;
                if entries.get(&key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                    entries.remove(&key);
                }
                continue;
            }

            let mut state = slot.state.lock()?;
            if state.supervised && state.is_running() {
                debug!("'{key}' is running; replacing its spec only");
                state.process.spec = record.spec;
            } else if record.status.phase == Phase::Pending {
                // Re-registration keeps the desired state, and with it any armed
                // restart, along with the exit that restart was armed for.
                let last = state.process.status.last_termination_info.take();
                state.process = record;
                state.process.status.last_termination_info = last;
                state.supervised = false;
            } else {
                state.desired = if record.status.phase == Phase::Running {
                    DesiredState::Running
                } else {
                    DesiredState::Stopped
                };
                state.process = record;
                state.supervised = false;
            }
            let generation = state.generation;
            drop(state);
            drop(op);
            return Ok((slot, generation));
        }
    }

    /// Upserts a record that did not come from [`Registry::register`] and arms
    /// its restart policy.
    fn adopt(&self, record: ManagedProcess) -> Result<ManagedProcess, RegistryError> {
        let candidate = record.is_restart_candidate() && record.status.phase != Phase::Running;
        let (slot, generation) = self.upsert(record)?;

        if candidate {
            {
                let mut state = slot.state.lock()?;
                state.desired = DesiredState::Running;
            }
            info!(
                "'{}' is a restart candidate; starting in {:?}",
                slot.key, self.inner.settings.restore_delay
            );
            self.schedule_start(slot.clone(), self.inner.settings.restore_delay, generation);
        }

        let copy = slot.state.lock()?.process.clone();
        Ok(copy)
    }

    /// Spawns the process registered under `namespace/name`.
    ///
    /// Starting an entry that is already running is a no-op.
    pub fn start_process(&self, namespace: &str, name: &str) -> Result<(), RegistryError> {
        let slot = self.slot(&ProcessKey::new(namespace, name))?;
        let _op = self.lock_op(&slot)?;
        self.start_locked(&slot)
    }

    fn start_locked(&self, slot: &Arc<Slot>) -> Result<(), RegistryError> {
        let key = slot.key.clone();
        let (spec, generation) = {
            let mut state = slot.state.lock()?;
            state.desired = DesiredState::Running;
            if state.is_running() {
                debug!("'{key}' is already running (PID {})", state.process.status.pid);
                return Ok(());
            }
            state.generation += 1;
            (state.process.spec.clone(), state.generation)
        };

        let (tx, rx) = mpsc::channel();
        let registry = self.clone();
        let supervised_slot = slot.clone();
        let log_dir = self.inner.settings.log_dir.clone();

        let handle = thread::Builder::new()
            .name(format!("supervise-{}", key.name))
            .spawn(move || {
                registry.supervise(&supervised_slot, generation, &spec, log_dir.as_deref(), tx)
            })
            .map_err(|source| RegistryError::SpawnFailure {
                key: key.clone(),
                source,
            })?;
        self.track(handle);

        match rx.recv() {
            Ok(Ok(pid)) => {
                info!("Started '{key}' with PID {pid}");
                Ok(())
            }
            Ok(Err(source)) => {
                error!("Failed to start '{key}': {source}");
                Err(RegistryError::SpawnFailure { key, source })
            }
            Err(_) => Err(RegistryError::SpawnFailure {
                key,
                source: io::Error::other("supervisor thread exited before reporting"),
            }),
        }
    }

    /// Body of the per-process supervisor thread. The running state is recorded
    /// here, before the PID is reported, so an immediate exit cannot overtake it.
    fn supervise(
        &self,
        slot: &Arc<Slot>,
        generation: u64,
        spec: &ProcessSpec,
        log_dir: Option<&Path>,
        report: mpsc::Sender<io::Result<u32>>,
    ) {
        let mut child = match spawn::spawn_process(&slot.key, spec, log_dir) {
            Ok(child) => child,
            Err(err) => {
                {
                    let mut state = slot.state();
                    state.desired = DesiredState::Stopped;
                    let status = &mut state.process.status;
                    status.phase = Phase::Failed;
                    status.pid = 0;
                    status.start_time = None;
                    status.resource_stats = None;
                    status.message = Some(err.to_string());
                }
                let _ = report.send(Err(err));
                return;
            }
        };

        let pid = child.id();
        {
            let mut state = slot.state();
            state.supervised = true;
            let status = &mut state.process.status;
            status.phase = Phase::Running;
            status.pid = pid;
            status.start_time = Some(Utc::now());
            status.resource_stats = None;
            status.message = None;
        }
        let _ = report.send(Ok(pid));

        let exit = child.wait();
        self.on_exit(slot, generation, exit);
    }

    fn on_exit(&self, slot: &Arc<Slot>, generation: u64, exit: io::Result<ExitStatus>) {
        let key = &slot.key;
        let termination = match exit {
            Ok(status) => TerminationInfo::from_exit_status(status),
            Err(err) => {
                warn!("Failed to wait for '{key}': {err}");
                TerminationInfo {
                    exit_code: -1,
                    signal: None,
                    finished_at: Utc::now(),
                }
            }
        };

        let restart = {
            let mut state = slot.state();
            if state.generation != generation {
                debug!("Ignoring exit of stale generation {generation} for '{key}'");
                return;
            }

            let requested_stop = state.desired == DesiredState::Stopped;
            let code = termination.exit_code;
            let status = &mut state.process.status;
            if requested_stop || code == 0 {
                info!("'{key}' exited with code {code}");
                status.phase = Phase::Stopped;
                status.message = None;
            } else {
                warn!("'{key}' failed with exit code {code}");
                status.phase = Phase::Failed;
                status.message = Some(format!("exited with code {code}"));
            }
            status.pid = 0;
            status.start_time = None;
            status.resource_stats = None;
            status.last_termination_info = Some(termination);
            state.supervised = false;
            slot.exited.notify_all();

            !requested_stop
                && !slot.removed.load(Ordering::SeqCst)
                && !self.is_shutting_down()
                && state.process.is_restart_candidate()
        };

        if restart {
            let backoff = self.inner.settings.restart_backoff;
            info!("Restarting '{key}' in {backoff:?} per its restart policy");
            self.schedule_start(slot.clone(), backoff, generation);
        }
    }

    /// Starts `slot` after `delay` unless it is cancelled in the meantime.
    fn schedule_start(&self, slot: Arc<Slot>, delay: Duration, generation: u64) {
        let registry = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("restart-{}", slot.key.name))
            .spawn(move || registry.run_scheduled_start(&slot, delay, generation));

        match spawned {
            Ok(handle) => self.track(handle),
            Err(err) => error!("Failed to schedule restart: {err}"),
        }
    }

    fn run_scheduled_start(&self, slot: &Arc<Slot>, delay: Duration, generation: u64) {
        let key = &slot.key;
        if !self.sleep_unless_cancelled(slot, delay) {
            debug!("Pending restart of '{key}' cancelled");
            return;
        }

        let Ok(_op) = self.lock_op(slot) else {
            debug!("'{key}' was deregistered before its restart");
            return;
        };
        if self.is_shutting_down() {
            return;
        }
        {
            let state = slot.state();
            if state.desired != DesiredState::Running
                || state.generation != generation
                || state.is_running()
            {
                debug!("Skipping outdated restart of '{key}'");
                return;
            }
        }

        if let Err(err) = self.start_locked(slot) {
            error!("Scheduled start of '{key}' failed: {err}");
        }
    }

    /// Returns `false` if the registry shuts down or the slot is removed first.
    fn sleep_unless_cancelled(&self, slot: &Slot, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.is_shutting_down() || slot.removed.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SCHEDULER_TICK.min(deadline - now));
        }
    }

    fn track(&self, handle: thread::JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Terminates the process under `namespace/name`: SIGTERM to the process (and
    /// to its group when we spawned it), then SIGKILL once the grace period runs
    /// out.
    ///
    /// Stopping an entry that is not running is a no-op.
    pub fn stop_process(&self, namespace: &str, name: &str) -> Result<(), RegistryError> {
        let slot = self.slot(&ProcessKey::new(namespace, name))?;
        let _op = self.lock_op(&slot)?;
        self.stop_locked(&slot)
    }

    fn stop_locked(&self, slot: &Slot) -> Result<(), RegistryError> {
        let key = &slot.key;
        let (pid, supervised) = {
            let mut state = slot.state.lock()?;
            state.desired = DesiredState::Stopped;
            if !state.is_running() {
                debug!("'{key}' is not running; nothing to stop");
                return Ok(());
            }
            (state.process.status.pid, state.supervised)
        };

        let failure = |source: io::Error| RegistryError::TerminationFailure {
            key: key.clone(),
            source,
        };

        // Only children we spawned lead a group of their own; an adopted PID
        // may share its group with processes we do not own.
        info!("Stopping '{key}' (PID {pid})");
        if supervised {
            signal::signal_group(pid, Signal::SIGTERM).map_err(failure)?;
        }
        let delivered = signal::signal_pid(pid, Signal::SIGTERM).map_err(failure)?;

        let mut final_signal = Signal::SIGTERM;
        let grace = self.inner.settings.termination_grace;
        if !self.wait_for_exit(slot, pid, supervised, grace)? {
            warn!("'{key}' did not exit within {grace:?} after SIGTERM; sending SIGKILL");
            final_signal = Signal::SIGKILL;
            if supervised {
                signal::signal_group(pid, Signal::SIGKILL).map_err(failure)?;
            }
            signal::signal_pid(pid, Signal::SIGKILL).map_err(failure)?;

            if !self.wait_for_exit(slot, pid, supervised, FORCE_KILL_WAIT)? {
                return Err(failure(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("PID {pid} still running after SIGKILL"),
                )));
            }
        }

        if !supervised {
            let mut state = slot.state.lock()?;
            if state.process.status.pid == pid {
                let status = &mut state.process.status;
                status.phase = Phase::Stopped;
                status.pid = 0;
                status.start_time = None;
                status.resource_stats = None;
                status.last_termination_info = Some(if delivered {
                    TerminationInfo::from_signal(final_signal as i32)
                } else {
                    // Gone before the signal arrived; its exit status is unknowable.
                    TerminationInfo {
                        exit_code: -1,
                        signal: None,
                        finished_at: Utc::now(),
                    }
                });
            }
        }

        info!("Stopped '{key}'");
        Ok(())
    }

    /// Waits up to `timeout` for `pid` to go away.
    fn wait_for_exit(
        &self,
        slot: &Slot,
        pid: u32,
        supervised: bool,
        timeout: Duration,
    ) -> Result<bool, RegistryError> {
        if supervised {
            let state = slot.state.lock()?;
            let (state, _) = slot.exited.wait_timeout_while(state, timeout, |state| {
                state.process.status.pid == pid && state.is_running()
            })?;
            return Ok(!(state.process.status.pid == pid && state.is_running()));
        }

        let deadline = Instant::now() + timeout;
        loop {
            if !self.pid_exists(pid) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(TERMINATION_POLL_INTERVAL);
        }
    }

    /// Liveness of a process we did not spawn. Zombies awaiting their parent
    /// count as gone.
    fn pid_exists(&self, pid: u32) -> bool {
        if !signal::is_alive(pid) {
            return false;
        }
        let procfs = ProcFs::new(&self.inner.settings.proc_root);
        !matches!(procfs.stat(pid), Ok(stat) if stat.state == 'Z')
    }

    /// Stops and starts the entry under a single operation lock.
    pub fn restart_process(&self, namespace: &str, name: &str) -> Result<(), RegistryError> {
        let slot = self.slot(&ProcessKey::new(namespace, name))?;
        let _op = self.lock_op(&slot)?;
        self.stop_locked(&slot)?;
        self.start_locked(&slot)
    }

    /// Stops the entry if running, cancels its pending restarts and removes it.
    pub fn deregister(&self, namespace: &str, name: &str) -> Result<ManagedProcess, RegistryError> {
        let key = ProcessKey::new(namespace, name);
        let slot = self.slot(&key)?;
        let last = {
            let _op = self.lock_op(&slot)?;
            slot.removed.store(true, Ordering::SeqCst);
            if let Err(err) = self.stop_locked(&slot) {
                slot.removed.store(false, Ordering::SeqCst);
                return Err(err);
            }
            slot.state.lock()?.process.clone()
        };

        let mut entries = self.inner.entries.lock()?;
        if entries.get(&key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            entries.remove(&key);
        }
        info!("Deregistered '{key}'");
        Ok(last)
    }

    fn slots(&self) -> Result<Vec<Arc<Slot>>, RegistryError> {
        Ok(self.inner.entries.lock()?.values().cloned().collect())
    }

    /// Copies of every entry, ordered by key.
    pub fn list(&self) -> Result<Vec<ManagedProcess>, RegistryError> {
        let mut processes = self
            .slots()?
            .iter()
            .map(|slot| Ok(slot.state.lock()?.process.clone()))
            .collect::<Result<Vec<_>, RegistryError>>()?;
        processes.sort_by(|a, b| a.metadata.cmp(&b.metadata));
        Ok(processes)
    }

    pub fn get(&self, namespace: &str, name: &str) -> Result<ManagedProcess, RegistryError> {
        let slot = self.slot(&ProcessKey::new(namespace, name))?;
        let process = slot.state.lock()?.process.clone();
        Ok(process)
    }

    fn scanner(&self) -> Scanner {
        let settings = &self.inner.settings;
        Scanner::new(
            settings.proc_root.clone(),
            settings.discovery_namespace.clone(),
            settings.script_timeout,
        )
    }

    /// Adopts every process whose command line matches `query`.
    pub fn scan_by_pattern(
        &self,
        query: &str,
        handler: &mut impl MatchHandler,
    ) -> Result<Vec<ManagedProcess>, RegistryError> {
        let found = self.scanner().scan_by_pattern(query, handler)?;
        self.adopt_all(found)
    }

    /// Adopts every process whose PID is printed by `script`.
    ///
    /// The script is executed by `sh` with the supervisor's privileges and must
    /// come from a trusted source.
    pub fn scan_by_script(
        &self,
        script: &str,
        handler: &mut impl ConsumeHandler,
    ) -> Result<Vec<ManagedProcess>, RegistryError> {
        let found = self.scanner().scan_by_script(script, handler)?;
        self.adopt_all(found)
    }

    fn adopt_all(&self, found: Vec<ManagedProcess>) -> Result<Vec<ManagedProcess>, RegistryError> {
        let mut adopted = Vec::with_capacity(found.len());
        for record in found {
            debug!("Adopting '{}' (PID {})", record.metadata, record.status.pid);
            adopted.push(self.adopt(record)?);
        }
        Ok(adopted)
    }

    /// Writes a sanitized copy of every entry to `path`.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), RegistryError> {
        let processes = self.list()?;
        snapshot::write_snapshot(path, &processes)?;
        info!("Saved {} process(es) to {path:?}", processes.len());
        Ok(())
    }

    /// Restores entries from `path` and schedules restart candidates.
    ///
    /// A missing file restores nothing. Returns the number of restored entries.
    pub fn load_snapshot(&self, path: &Path) -> Result<usize, RegistryError> {
        let Some(records) = snapshot::read_snapshot(path)? else {
            info!("No snapshot at {path:?}; starting empty");
            return Ok(0);
        };

        let mut count = 0;
        for record in records {
            let key = record.metadata.clone();
            let restored = key
                .validate()
                .and_then(|_| record.spec.validate())
                .and_then(|_| self.adopt(record));
            match restored {
                Ok(_) => count += 1,
                Err(err) => warn!("Skipping snapshot entry '{key}': {err}"),
            }
        }
        info!("Restored {count} process(es) from {path:?}");
        Ok(count)
    }

    /// Marks adopted processes that no longer exist as `Unknown`.
    pub fn reconcile_liveness(&self) -> Result<Vec<ProcessKey>, RegistryError> {
        let mut vanished = Vec::new();
        for slot in self.slots()? {
            let mut state = slot.state.lock()?;
            if state.supervised || !state.is_running() {
                continue;
            }
            let pid = state.process.status.pid;
            if self.pid_exists(pid) {
                continue;
            }
            warn!("Adopted process '{}' (PID {pid}) is gone", slot.key);
            let status = &mut state.process.status;
            status.phase = Phase::Unknown;
            status.pid = 0;
            status.start_time = None;
            status.resource_stats = None;
            status.message = Some(format!("PID {pid} vanished"));
            vanished.push(slot.key.clone());
        }
        Ok(vanished)
    }

    /// PIDs of every running entry.
    pub fn running(&self) -> Result<Vec<(ProcessKey, u32)>, RegistryError> {
        let mut running = Vec::new();
        for slot in self.slots()? {
            let state = slot.state.lock()?;
            if state.is_running() {
                running.push((slot.key.clone(), state.process.status.pid));
            }
        }
        Ok(running)
    }

    /// Stores `stats` if `key` is still running as `pid`.
    pub fn record_resource_stats(
        &self,
        key: &ProcessKey,
        pid: u32,
        stats: ResourceStats,
    ) -> Result<bool, RegistryError> {
        let slot = self.slot(key)?;
        let mut state = slot.state.lock()?;
        if !state.is_running() || state.process.status.pid != pid {
            return Ok(false);
        }
        state.process.status.resource_stats = Some(stats);
        Ok(true)
    }

    /// Cancels pending restarts, stops every running entry and joins background
    /// threads.
    pub fn shutdown(&self) -> Result<(), RegistryError> {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down registry");

        for slot in self.slots()? {
            let Ok(_op) = self.lock_op(&slot) else {
                continue;
            };
            if let Err(err) = self.stop_locked(&slot) {
                error!("Failed to stop '{}' during shutdown: {err}", slot.key);
            }
        }

        loop {
            let tasks = std::mem::take(&mut *self.inner.tasks.lock()?);
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if task.join().is_err() {
                    warn!("A registry thread panicked");
                }
            }
        }
        Ok(())
    }
}
