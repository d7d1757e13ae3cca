//! procward is a local process supervisor. It keeps a registry of managed
//! processes, starts, stops and restarts them according to their restart policy,
//! discovers already-running processes by command-line pattern or by script, and
//! persists process specs to a snapshot file so they are re-adopted after the
//! supervisor itself restarts.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Constants and defaults.
pub mod constants;

/// PID to managed process enrichment.
pub mod enrich;

/// Error handling.
pub mod error;

/// Output capture for spawned processes.
pub mod logs;

/// Resource sampling.
pub mod monitor;

/// Run-as user handling.
pub mod privilege;

/// Managed process records.
pub mod process;

/// `/proc`-style process table reader.
pub mod procfs;

/// Lifecycle manager.
pub mod registry;

/// State directory resolution.
pub mod runtime;

/// Process discovery.
pub mod scanner;

/// Signal helpers.
pub mod signal;

/// Snapshot persistence.
pub mod snapshot;

/// Child process construction.
pub mod spawn;

#[doc(hidden)]
pub mod test_utils;

pub use error::{RegistryError, SnapshotError};
pub use process::{
    DiscoveryQuery, ManagedProcess, Phase, ProcessKey, ProcessSpec, ProcessStatus,
    ResourceStats, RestartPolicy, TerminationInfo,
};
pub use registry::{Registry, RegistrySettings};
