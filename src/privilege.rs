//! Run-as user resolution for spawned processes.
use std::{collections::HashMap, io, os::unix::process::CommandExt, path::PathBuf, process::Command};

use nix::unistd::{User, geteuid};

/// Captures the target user, group, and home metadata that a process should
/// inherit when it is spawned on behalf of another account.
#[derive(Debug, Clone)]
pub struct UserContext {
    uid: libc::uid_t,
    gid: libc::gid_t,
    home: PathBuf,
    shell: PathBuf,
    username: String,
    switch: bool,
}

impl UserContext {
    /// Looks `user` up in the system user database.
    ///
    /// Switching to an account other than the current one requires root.
    pub fn resolve(user: &str) -> io::Result<Self> {
        let record = User::from_name(user)
            .map_err(|err| io::Error::other(err.to_string()))?
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("user '{user}' not found"))
            })?;

        let euid = geteuid();
        let switch = record.uid != euid;
        if switch && !euid.is_root() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("running as '{user}' requires procward to run as root"),
            ));
        }

        Ok(Self {
            uid: record.uid.as_raw(),
            gid: record.gid.as_raw(),
            home: record.dir,
            shell: record.shell,
            username: record.name,
            switch,
        })
    }

    pub fn uid(&self) -> libc::uid_t {
        self.uid
    }

    pub fn gid(&self) -> libc::gid_t {
        self.gid
    }

    /// Builds the environment-variable defaults that align with the target
    /// account (`HOME`, `USER`, `LOGNAME`, `SHELL`).
    pub fn env_overrides(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("HOME".to_string(), self.home.display().to_string());
        env.insert("USER".to_string(), self.username.clone());
        env.insert("LOGNAME".to_string(), self.username.clone());
        if !self.shell.as_os_str().is_empty() {
            env.insert("SHELL".to_string(), self.shell.display().to_string());
        }
        env
    }

    /// Sets the child's uid/gid when a switch is needed.
    pub fn apply(&self, cmd: &mut Command) {
        if self.switch {
            cmd.gid(self.gid).uid(self.uid);
        }
    }
}
