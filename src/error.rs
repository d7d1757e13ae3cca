//! Error handling for procward.
use std::path::PathBuf;

use thiserror::Error;

use crate::process::ProcessKey;

/// Defines all possible errors that can occur in the process registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// The configuration parsed but is not usable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A registration was rejected before any OS interaction took place.
    #[error("Invalid process spec: {0}")]
    InvalidSpec(String),

    /// The requested `namespace/name` is not in the registry.
    #[error("Process '{0}' not found")]
    NotFound(ProcessKey),

    /// Error spawning a managed process.
    #[error("Failed to start process '{key}': {source}")]
    SpawnFailure {
        /// The process that failed to start.
        key: ProcessKey,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error delivering termination signals or waiting for the process to exit.
    #[error("Failed to stop process '{key}': {source}")]
    TerminationFailure {
        /// The process that failed to stop.
        key: ProcessKey,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The PID disappeared before enrichment could run.
    #[error("Process {0} no longer exists")]
    ProcessGone(u32),

    /// A load-bearing identity field could not be read for a PID.
    #[error("Failed to read {stage} for PID {pid}: {source}")]
    IntrospectionFailed {
        /// PID being enriched.
        pid: u32,
        /// Pipeline stage that failed.
        stage: &'static str,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The process table root could not be enumerated.
    #[error("Discovery root {root:?} is unavailable: {source}")]
    DiscoveryRootUnavailable {
        /// Root directory that was scanned.
        root: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The discovery script could not be run or exited unsuccessfully.
    #[error("Discovery script failed ({status}): {output}")]
    ScriptExecutionFailed {
        /// Human-readable exit status.
        status: String,
        /// Combined stdout and stderr of the script.
        output: String,
    },

    /// The discovery script exceeded its time budget and was killed.
    #[error("Discovery script timed out after {timeout:?}")]
    ScriptTimedOut {
        /// The configured timeout.
        timeout: std::time::Duration,
    },

    /// Error for the snapshot file.
    #[error("Snapshot error: {0}")]
    PersistenceFailure(#[from] SnapshotError),

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `RegistryError`.
impl<T> From<std::sync::PoisonError<T>> for RegistryError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        RegistryError::MutexPoisonError(err.to_string())
    }
}

/// Error type for snapshot file operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Error reading the snapshot from disk.
    #[error("Failed to read snapshot {path:?}: {source}")]
    ReadError {
        /// Snapshot location.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error writing or renaming the snapshot.
    #[error("Failed to write snapshot {path:?}: {source}")]
    WriteError {
        /// Snapshot location.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The snapshot contents are not a valid record sequence.
    #[error("Failed to parse snapshot {path:?}: {source}")]
    ParseError {
        /// Snapshot location.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: serde_yaml::Error,
    },

    /// The registry could not be encoded.
    #[error("Failed to serialize snapshot: {0}")]
    SerializeError(#[source] serde_yaml::Error),
}
