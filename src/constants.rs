//! Constants and default configuration values for procward.
//!
//! Timing defaults here are used when the config file leaves a value out.

use std::time::Duration;

// ============================================================================
// File System Constants
// ============================================================================

/// Name of the snapshot file stored in the state directory.
pub const SNAPSHOT_FILE_NAME: &str = "snapshot.yaml";

/// Default process table root used by discovery.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

// ============================================================================
// Shell Execution Constants
// ============================================================================

/// Shell used for command lines without explicit arguments and for discovery scripts.
pub const DEFAULT_SHELL: &str = "sh";

/// Shell argument flag for executing command strings.
pub const SHELL_COMMAND_FLAG: &str = "-c";

// ============================================================================
// Naming
// ============================================================================

/// Namespace used for configured processes that do not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Namespace assigned to processes adopted by a scan.
pub const DEFAULT_DISCOVERY_NAMESPACE: &str = "discovered";

// ============================================================================
// Process Management Timing
// ============================================================================

/// Fixed delay before a policy-driven restart after an unexpected exit.
pub const DEFAULT_RESTART_BACKOFF: Duration = Duration::from_secs(2);

/// Delay before restarting processes restored from a snapshot.
pub const DEFAULT_RESTORE_DELAY: Duration = Duration::from_secs(1);

/// Time a process gets to exit after SIGTERM before SIGKILL is sent.
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

/// Time to wait for the kernel to reap a process after SIGKILL.
pub const FORCE_KILL_WAIT: Duration = Duration::from_secs(2);

/// Interval between liveness checks while waiting for a process to exit.
pub const TERMINATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Granularity at which pending restarts notice cancellation.
pub const SCHEDULER_TICK: Duration = Duration::from_millis(100);

/// Upper bound for a discovery script run.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between two monitor samples.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Interval between periodic snapshot writes in daemon mode.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60);
