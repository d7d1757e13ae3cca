//! Runtime paths.
use std::{env, path::PathBuf};

use nix::unistd::geteuid;

use crate::constants::SNAPSHOT_FILE_NAME;

/// Where to store state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    /// User home dir (~/.local/share/procward).
    User,
    /// System dirs (/var/lib/procward).
    System,
}

impl RuntimeMode {
    /// System mode when running as root, user mode otherwise.
    pub fn detect() -> Self {
        if geteuid().is_root() {
            RuntimeMode::System
        } else {
            RuntimeMode::User
        }
    }
}

/// State dir (snapshots).
pub fn state_dir(mode: RuntimeMode) -> PathBuf {
    match mode {
        RuntimeMode::User => env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"))
            .join(".local/share/procward"),
        RuntimeMode::System => PathBuf::from("/var/lib/procward"),
    }
}

/// Snapshot location used when the config does not set one.
pub fn default_snapshot_path(mode: RuntimeMode) -> PathBuf {
    state_dir(mode).join(SNAPSHOT_FILE_NAME)
}
