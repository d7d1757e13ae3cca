//! Turns a bare PID into a full [`ManagedProcess`] record.
use std::{collections::BTreeMap, io, path::PathBuf};

use chrono::{DateTime, Utc};
use nix::unistd::{Uid, User};
use tracing::{debug, warn};

use crate::{
    error::RegistryError,
    process::{
        DiscoveryQuery, ManagedProcess, Phase, ProcessKey, ProcessSpec, ProcessStatus,
        ResourceStats, RestartPolicy,
    },
    procfs::ProcFs,
};

/// Identity of a live process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    /// Short executable name (`comm`).
    pub comm: String,
    pub start_time: Option<DateTime<Utc>>,
}

/// OS introspection used by the enrichment pipeline, one call per step.
pub trait Introspector {
    /// Fails with [`io::ErrorKind::NotFound`] when the PID does not exist.
    fn attach(&self, pid: u32) -> io::Result<()>;
    fn identity(&self, pid: u32) -> io::Result<ProcessIdentity>;
    fn command_line(&self, pid: u32) -> io::Result<Vec<String>>;
    fn environment(&self, pid: u32) -> io::Result<BTreeMap<String, String>>;
    fn working_dir(&self, pid: u32) -> io::Result<PathBuf>;
    /// Owning user name, or the numeric uid when it has no passwd entry.
    fn owner(&self, pid: u32) -> io::Result<String>;
    /// CPU percent and resident memory in bytes.
    fn resource_usage(&self, pid: u32) -> io::Result<(f32, u64)>;
    fn listening_ports(&self, pid: u32) -> io::Result<Vec<u16>>;
}

/// [`Introspector`] over a `/proc`-style root.
#[derive(Debug, Clone)]
pub struct ProcIntrospector {
    procfs: ProcFs,
}

impl ProcIntrospector {
    pub fn new(procfs: ProcFs) -> Self {
        Self { procfs }
    }

    pub fn procfs(&self) -> &ProcFs {
        &self.procfs
    }
}

impl Introspector for ProcIntrospector {
    fn attach(&self, pid: u32) -> io::Result<()> {
        if self.procfs.exists(pid) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no entry for {pid} under {:?}", self.procfs.root()),
            ))
        }
    }

    fn identity(&self, pid: u32) -> io::Result<ProcessIdentity> {
        let stat = self.procfs.stat(pid)?;
        let start_time = self.procfs.start_time(&stat).ok();
        Ok(ProcessIdentity {
            comm: stat.comm,
            start_time,
        })
    }

    fn command_line(&self, pid: u32) -> io::Result<Vec<String>> {
        self.procfs.cmdline(pid)
    }

    fn environment(&self, pid: u32) -> io::Result<BTreeMap<String, String>> {
        self.procfs.environ(pid)
    }

    fn working_dir(&self, pid: u32) -> io::Result<PathBuf> {
        self.procfs.cwd(pid)
    }

    fn owner(&self, pid: u32) -> io::Result<String> {
        let owner = self.procfs.owner(pid)?;
        match User::from_uid(Uid::from_raw(owner.uid)) {
            Ok(Some(user)) => Ok(user.name),
            Ok(None) => Ok(owner.uid.to_string()),
            Err(err) => Err(io::Error::from(err)),
        }
    }

    fn resource_usage(&self, pid: u32) -> io::Result<(f32, u64)> {
        let stat = self.procfs.stat(pid)?;
        let owner = self.procfs.owner(pid)?;
        Ok((self.procfs.lifetime_cpu_percent(&stat)?, owner.rss_bytes))
    }

    fn listening_ports(&self, pid: u32) -> io::Result<Vec<u16>> {
        self.procfs.listening_ports(pid)
    }
}

/// Builds discovery records for a namespace.
#[derive(Debug, Clone)]
pub struct Enricher<I> {
    introspector: I,
    namespace: String,
}

impl<I: Introspector> Enricher<I> {
    pub fn new(introspector: I, namespace: impl Into<String>) -> Self {
        Self {
            introspector,
            namespace: namespace.into(),
        }
    }

    pub fn introspector(&self) -> &I {
        &self.introspector
    }

    /// Runs the pipeline for one PID.
    ///
    /// Attach, identity and command line failures abort with
    /// [`RegistryError::ProcessGone`] or [`RegistryError::IntrospectionFailed`].
    /// Environment, working directory, owner, resource usage and ports are best
    /// effort: failures are logged and the field stays absent.
    pub fn enrich(&self, pid: u32, query: &DiscoveryQuery) -> Result<ManagedProcess, RegistryError> {
        self.introspector
            .attach(pid)
            .map_err(|err| fatal(pid, "handle", err))?;
        let identity = self
            .introspector
            .identity(pid)
            .map_err(|err| fatal(pid, "identity", err))?;
        let mut argv = self
            .introspector
            .command_line(pid)
            .map_err(|err| fatal(pid, "command line", err))?;
        if argv.is_empty() {
            argv.push(identity.comm.clone());
        }

        let env = soft(pid, "environment", self.introspector.environment(pid)).unwrap_or_default();
        let working_dir = soft(pid, "working directory", self.introspector.working_dir(pid))
            .map(|dir| dir.to_string_lossy().into_owned());
        let user = soft(pid, "owner", self.introspector.owner(pid));
        let usage = soft(pid, "resource usage", self.introspector.resource_usage(pid));
        let ports = soft(pid, "listening ports", self.introspector.listening_ports(pid));

        let resource_stats = match (usage, ports) {
            (None, None) => None,
            (usage, ports) => {
                let (cpu_percent, memory_bytes) = usage.unwrap_or_default();
                Some(ResourceStats {
                    cpu_percent,
                    memory_bytes,
                    listening_ports: ports.unwrap_or_default(),
                })
            }
        };

        let command = argv.remove(0);
        let key = ProcessKey::new(&self.namespace, discovered_name(&identity.comm, pid));
        debug!("Enriched PID {pid} as '{key}'");

        Ok(ManagedProcess {
            metadata: key,
            spec: ProcessSpec {
                command,
                args: argv,
                env,
                working_dir,
                restart: RestartPolicy::Never,
                user,
                discovery: Some(query.clone()),
            },
            status: ProcessStatus {
                phase: Phase::Running,
                pid,
                start_time: identity.start_time,
                last_termination_info: None,
                resource_stats,
                message: None,
            },
        })
    }
}

fn fatal(pid: u32, stage: &'static str, source: io::Error) -> RegistryError {
    if source.kind() == io::ErrorKind::NotFound {
        RegistryError::ProcessGone(pid)
    } else {
        RegistryError::IntrospectionFailed { pid, stage, source }
    }
}

fn soft<T>(pid: u32, stage: &str, result: io::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("Unable to read {stage} for PID {pid}: {err}");
            None
        }
    }
}

/// `<comm>-<pid>` with characters that are not valid in a key replaced by `-`.
pub fn discovered_name(comm: &str, pid: u32) -> String {
    let base: String = comm
        .trim()
        .chars()
        .map(|c| if c == '/' || c.is_whitespace() { '-' } else { c })
        .collect();
    if base.is_empty() {
        format!("process-{pid}")
    } else {
        format!("{base}-{pid}")
    }
}
