//! Managed process records shared by the registry, the scanner and the snapshot file.
use std::{collections::BTreeMap, fmt, process::ExitStatus};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

use crate::error::RegistryError;

/// Registry key of a managed process. Serialized as the record's `metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessKey {
    pub namespace: String,
    pub name: String,
}

impl ProcessKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Rejects keys that cannot round-trip through `namespace/name`.
    pub fn validate(&self) -> Result<(), RegistryError> {
        for (label, value) in [("namespace", &self.namespace), ("name", &self.name)] {
            if value.trim().is_empty() {
                return Err(RegistryError::InvalidSpec(format!("{label} must not be empty")));
            }
            if value.contains('/') || value.chars().any(char::is_whitespace) {
                return Err(RegistryError::InvalidSpec(format!(
                    "{label} '{value}' must not contain '/' or whitespace"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ProcessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Rule applied after a process exits, and whenever a record is (re)loaded.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum RestartPolicy {
    #[default]
    Never,
    #[serde(alias = "on-failure", alias = "on_failure")]
    OnFailure,
    Always,
}

impl RestartPolicy {
    /// Evaluates the policy against the last recorded termination.
    ///
    /// `OnFailure` only restarts when a termination was recorded with a non-zero code.
    pub fn should_restart(&self, last: Option<&TerminationInfo>) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::Always => true,
            RestartPolicy::OnFailure => last.is_some_and(|info| info.exit_code != 0),
        }
    }
}

/// Observed lifecycle phase of a managed process.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr,
)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Stopped,
    Failed,
    Unknown,
}

/// How the registry found out about a process it did not spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "query", rename_all = "camelCase")]
pub enum DiscoveryQuery {
    /// Command-line pattern used by a pattern scan.
    Pattern(String),
    /// Shell text executed by a script scan.
    Script(String),
}

/// Declarative, persisted description of how to run a process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSpec {
    /// Executable, or a shell command line when `args` is empty.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Overrides layered on top of the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryQuery>,
}

impl ProcessSpec {
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.command.trim().is_empty() {
            return Err(RegistryError::InvalidSpec("command must not be empty".into()));
        }
        Ok(())
    }
}

/// Exit metadata recorded when a process terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationInfo {
    /// Exit code, or `128 + signal` when the process was killed by a signal.
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    pub finished_at: DateTime<Utc>,
}

impl TerminationInfo {
    pub fn from_exit_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = status.signal();
        #[cfg(not(unix))]
        let signal = None;

        let exit_code = match (status.code(), signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => -1,
        };

        Self {
            exit_code,
            signal,
            finished_at: Utc::now(),
        }
    }

    /// Termination of a process we could signal but not reap.
    pub fn from_signal(signal: i32) -> Self {
        Self {
            exit_code: 128 + signal,
            signal: Some(signal),
            finished_at: Utc::now(),
        }
    }
}

/// Point-in-time resource usage of a running process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStats {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    #[serde(default)]
    pub listening_ports: Vec<u16>,
}

/// Live state. Never trusted across daemon restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub pid: u32,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_termination_info: Option<TerminationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_stats: Option<ResourceStats>,
    /// Last failure reported for this process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The unit of supervision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedProcess {
    pub metadata: ProcessKey,
    pub spec: ProcessSpec,
    #[serde(default)]
    pub status: ProcessStatus,
}

impl ManagedProcess {
    /// Creates a freshly registered, not yet started, record.
    pub fn new(metadata: ProcessKey, spec: ProcessSpec) -> Self {
        Self {
            metadata,
            spec,
            status: ProcessStatus::default(),
        }
    }

    pub fn key(&self) -> &ProcessKey {
        &self.metadata
    }

    /// Copy suitable for the snapshot file: live fields are reset so the next boot
    /// re-evaluates the process instead of trusting stale state. The last termination
    /// is kept because restart policy evaluation depends on it.
    pub fn sanitized(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            spec: self.spec.clone(),
            status: ProcessStatus {
                phase: Phase::Failed,
                pid: 0,
                start_time: None,
                last_termination_info: self.status.last_termination_info.clone(),
                resource_stats: None,
                message: None,
            },
        }
    }

    pub fn is_restart_candidate(&self) -> bool {
        self.spec
            .restart
            .should_restart(self.status.last_termination_info.as_ref())
    }
}
