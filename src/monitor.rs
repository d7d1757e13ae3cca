//! Periodic liveness and resource sampling of managed processes.
use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, error};

use crate::{
    error::RegistryError, procfs::ProcFs, process::ResourceStats, registry::Registry,
};

/// Collects resource usage for one PID. `None` when the process is not visible.
pub trait ResourceSampler {
    fn sample(&mut self, pid: u32) -> Option<ResourceStats>;
}

/// CPU and memory from `sysinfo`, listening ports from the process table.
pub struct SysinfoSampler {
    system: System,
    procfs: ProcFs,
}

impl SysinfoSampler {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            system: System::new(),
            procfs: ProcFs::new(proc_root),
        }
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&mut self, pid: u32) -> Option<ResourceStats> {
        let pid_sys = Pid::from_u32(pid);
        let processes = [pid_sys];
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&processes),
            true,
            ProcessRefreshKind::everything(),
        );

        let process = self.system.process(pid_sys)?;
        let listening_ports = self.procfs.listening_ports(pid).unwrap_or_else(|err| {
            debug!("No listening ports for PID {pid}: {err}");
            Vec::new()
        });

        Some(ResourceStats {
            cpu_percent: process.cpu_usage(),
            memory_bytes: process.memory(),
            listening_ports,
        })
    }
}

/// Runs one monitor pass: reconciles adopted processes, then samples every
/// running entry. Returns the number of entries updated.
pub fn sample_once(
    registry: &Registry,
    sampler: &mut dyn ResourceSampler,
) -> Result<usize, RegistryError> {
    registry.reconcile_liveness()?;

    let mut updated = 0;
    for (key, pid) in registry.running()? {
        let Some(stats) = sampler.sample(pid) else {
            continue;
        };
        // The entry may have stopped or restarted with a new PID meanwhile.
        match registry.record_resource_stats(&key, pid, stats) {
            Ok(true) => updated += 1,
            Ok(false) | Err(RegistryError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(updated)
}

/// Background thread calling [`sample_once`] every interval.
pub struct Monitor {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Monitor {
    pub fn spawn<S>(registry: Registry, mut sampler: S, interval: Duration) -> Self
    where
        S: ResourceSampler + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let interval = interval.max(Duration::from_millis(100));

        let handle = thread::spawn(move || {
            while !stop_clone.load(Ordering::SeqCst) {
                match sample_once(&registry, &mut sampler) {
                    Ok(updated) => debug!("Monitor sampled {updated} process(es)"),
                    Err(err) => error!("Monitor pass failed: {err}"),
                }

                let mut slept = Duration::ZERO;
                while slept < interval {
                    if stop_clone.load(Ordering::SeqCst) {
                        return;
                    }
                    let step = interval.saturating_sub(slept).min(Duration::from_millis(100));
                    thread::sleep(step);
                    slept += step;
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
