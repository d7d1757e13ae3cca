//! Discovery of processes the registry did not spawn.
//!
//! Script discovery runs arbitrary shell text with the privileges of the
//! supervisor. Only pass trusted scripts.
use std::{
    io::{self, Read},
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use regex::Regex;
use tracing::{debug, warn};

use crate::{
    constants::{DEFAULT_SHELL, SHELL_COMMAND_FLAG},
    enrich::{Enricher, Introspector, ProcIntrospector},
    error::RegistryError,
    process::{DiscoveryQuery, ManagedProcess},
    procfs::ProcFs,
    signal,
};

/// Receives every enriched pattern-scan match.
pub trait MatchHandler {
    fn on_match(&mut self, process: &ManagedProcess);
}

impl<F: FnMut(&ManagedProcess)> MatchHandler for F {
    fn on_match(&mut self, process: &ManagedProcess) {
        self(process)
    }
}

/// Receives every script output line together with the PID parsed from it.
pub trait ConsumeHandler {
    fn on_line(&mut self, line: &str, pid: Option<u32>);
}

impl<F: FnMut(&str, Option<u32>)> ConsumeHandler for F {
    fn on_line(&mut self, line: &str, pid: Option<u32>) {
        self(line, pid)
    }
}

pub struct Scanner<I = ProcIntrospector> {
    procfs: ProcFs,
    enricher: Enricher<I>,
    script_timeout: Duration,
    self_pid: u32,
}

impl Scanner<ProcIntrospector> {
    pub fn new(
        proc_root: impl Into<PathBuf>,
        namespace: impl Into<String>,
        script_timeout: Duration,
    ) -> Self {
        let procfs = ProcFs::new(proc_root);
        let introspector = ProcIntrospector::new(procfs.clone());
        Self::with_introspector(procfs, introspector, namespace, script_timeout)
    }
}

impl<I: Introspector> Scanner<I> {
    pub fn with_introspector(
        procfs: ProcFs,
        introspector: I,
        namespace: impl Into<String>,
        script_timeout: Duration,
    ) -> Self {
        Self {
            procfs,
            enricher: Enricher::new(introspector, namespace),
            script_timeout,
            self_pid: std::process::id(),
        }
    }

    pub fn enricher(&self) -> &Enricher<I> {
        &self.enricher
    }

    /// Enriches every process whose command line matches `query`.
    ///
    /// `query` is compiled as a regular expression, or matched literally when it
    /// is not a valid one. Only an unreadable root aborts the scan.
    pub fn scan_by_pattern(
        &self,
        query: &str,
        handler: &mut impl MatchHandler,
    ) -> Result<Vec<ManagedProcess>, RegistryError> {
        let pattern = compile_pattern(query)
            .map_err(|err| RegistryError::InvalidSpec(format!("query '{query}': {err}")))?;
        let pids = self
            .procfs
            .pids()
            .map_err(|source| RegistryError::DiscoveryRootUnavailable {
                root: self.procfs.root().to_path_buf(),
                source,
            })?;
        let discovery = DiscoveryQuery::Pattern(query.to_string());

        let mut matches = Vec::new();
        for pid in pids {
            if pid == self.self_pid {
                continue;
            }
            let cmdline = match self.procfs.cmdline(pid) {
                Ok(argv) if !argv.is_empty() => argv.join(" "),
                Ok(_) => continue,
                Err(err) => {
                    debug!("Skipping PID {pid}: {err}");
                    continue;
                }
            };
            if !pattern.is_match(&cmdline) {
                continue;
            }
            if let Some(process) = self.resolve(pid, &discovery) {
                handler.on_match(&process);
                matches.push(process);
            }
        }

        debug!("Pattern '{query}' matched {} process(es)", matches.len());
        Ok(matches)
    }

    /// Runs `script` through `sh -c` and enriches every PID it prints, one per line.
    ///
    /// Lines that are not exactly a decimal PID are skipped. A non-zero exit or
    /// exceeding the script timeout aborts the scan.
    pub fn scan_by_script(
        &self,
        script: &str,
        handler: &mut impl ConsumeHandler,
    ) -> Result<Vec<ManagedProcess>, RegistryError> {
        let stdout = run_script(script, self.script_timeout)?;
        let discovery = DiscoveryQuery::Script(script.to_string());

        let mut found = Vec::new();
        for line in stdout.lines() {
            let pid = parse_pid_line(line);
            handler.on_line(line, pid);
            if let Some(pid) = pid
                && let Some(process) = self.resolve(pid, &discovery)
            {
                found.push(process);
            }
        }
        Ok(found)
    }

    fn resolve(&self, pid: u32, query: &DiscoveryQuery) -> Option<ManagedProcess> {
        match self.enricher.enrich(pid, query) {
            Ok(process) => Some(process),
            Err(RegistryError::ProcessGone(pid)) => {
                debug!("PID {pid} exited before it could be enriched");
                None
            }
            Err(err) => {
                warn!("Skipping PID {pid}: {err}");
                None
            }
        }
    }
}

/// Regex for a scan query, falling back to a literal match.
pub fn compile_pattern(query: &str) -> Result<Regex, regex::Error> {
    Regex::new(query).or_else(|err| {
        debug!("Query '{query}' is not a valid regex ({err}); matching literally");
        Regex::new(&regex::escape(query))
    })
}

/// A trimmed line consisting only of ASCII digits.
pub fn parse_pid_line(line: &str) -> Option<u32> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Executes a discovery script and returns its standard output.
fn run_script(script: &str, timeout: Duration) -> Result<String, RegistryError> {
    let mut cmd = Command::new(DEFAULT_SHELL);
    cmd.arg(SHELL_COMMAND_FLAG)
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group so a timeout also takes down anything the script forked.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|err| RegistryError::ScriptExecutionFailed {
            status: "spawn failed".into(),
            output: err.to_string(),
        })?;
    let pid = child.id();

    let deadline = Instant::now() + timeout;
    let (tx, rx) = mpsc::channel();
    let mut pending = 0;
    if let Some(out) = child.stdout.take() {
        spawn_reader(out, ScriptStream::Stdout, tx.clone());
        pending += 1;
    }
    if let Some(err) = child.stderr.take() {
        spawn_reader(err, ScriptStream::Stderr, tx.clone());
        pending += 1;
    }
    drop(tx);

    let status = wait_with_timeout(&mut child, timeout).map_err(|err| {
        RegistryError::ScriptExecutionFailed {
            status: "wait failed".into(),
            output: err.to_string(),
        }
    })?;

    let Some(status) = status else {
        warn!("Discovery script (PID {pid}) exceeded {timeout:?}; killing it");
        kill_script(pid, &mut child);
        return Err(RegistryError::ScriptTimedOut { timeout });
    };

    // Anything the script left in the background may still hold the pipes open.
    let mut stdout = String::new();
    let mut stderr = String::new();
    while pending > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((ScriptStream::Stdout, text)) => stdout = text,
            Ok((ScriptStream::Stderr, text)) => stderr = text,
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                warn!("Output of discovery script (PID {pid}) still open after {timeout:?}; killing its group");
                kill_script(pid, &mut child);
                return Err(RegistryError::ScriptTimedOut { timeout });
            }
        }
        pending -= 1;
    }

    if !status.success() {
        let mut output = stdout;
        output.push_str(&stderr);
        return Err(RegistryError::ScriptExecutionFailed {
            status: status.to_string(),
            output,
        });
    }

    if !stderr.trim().is_empty() {
        debug!("Discovery script stderr: {}", stderr.trim());
    }
    Ok(stdout)
}

#[derive(Debug, Clone, Copy)]
enum ScriptStream {
    Stdout,
    Stderr,
}

/// Kills the script's process group, which outlives the script itself while
/// any of its background jobs run.
fn kill_script(pgid: u32, child: &mut Child) {
    if let Err(err) = signal::kill_group(pgid, signal::Signal::SIGKILL) {
        debug!("Failed to kill discovery script group {pgid}: {err}");
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn spawn_reader<R: Read + Send + 'static>(
    mut stream: R,
    kind: ScriptStream,
    output: mpsc::Sender<(ScriptStream, String)>,
) {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(err) = stream.read_to_end(&mut buffer) {
            debug!("Failed to read discovery script output: {err}");
        }
        let _ = output.send((kind, String::from_utf8_lossy(&buffer).into_owned()));
    });
}

/// Waits for the child to exit. `Ok(None)` when the timeout elapsed first.
pub(crate) fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(50));
    }
}
