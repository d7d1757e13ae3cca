//! Turning a [`ProcessSpec`] into a running child.
use std::{
    io,
    os::unix::process::CommandExt,
    path::Path,
    process::{Child, Command, Stdio},
};

use tracing::{debug, warn};

use crate::{
    constants::{DEFAULT_SHELL, SHELL_COMMAND_FLAG},
    logs::spawn_log_writer,
    privilege::UserContext,
    process::{ProcessKey, ProcessSpec},
};

/// Builds the command for `spec`.
///
/// A spec without arguments runs its command line through `sh -c`; otherwise
/// the command is executed directly with the arguments.
pub fn build_command(spec: &ProcessSpec, log_dir: Option<&Path>) -> io::Result<Command> {
    let mut cmd = if spec.args.is_empty() {
        let mut cmd = Command::new(DEFAULT_SHELL);
        cmd.arg(SHELL_COMMAND_FLAG).arg(&spec.command);
        cmd
    } else {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);
        cmd
    };

    if let Some(user) = spec.user.as_deref() {
        let context = UserContext::resolve(user)?;
        context.apply(&mut cmd);
        for (key, value) in context.env_overrides() {
            if !spec.env.contains_key(&key) {
                cmd.env(key, value);
            }
        }
    }
    cmd.envs(&spec.env);

    if let Some(dir) = spec.working_dir.as_deref() {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::null());
    if log_dir.is_some() {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }

    unsafe {
        cmd.pre_exec(|| {
            // Own process group so stop signals reach the whole tree without
            // touching the supervisor's group.
            if libc::setpgid(0, 0) < 0 {
                return Err(io::Error::last_os_error());
            }

            // Dies with the supervising thread (Linux only).
            #[cfg(target_os = "linux")]
            {
                use libc::{PR_SET_PDEATHSIG, SIGTERM, prctl};
                if prctl(PR_SET_PDEATHSIG, SIGTERM, 0, 0, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
            }

            Ok(())
        });
    }

    Ok(cmd)
}

/// Spawns `spec` and wires its output to the log directory, if any.
pub fn spawn_process(
    key: &ProcessKey,
    spec: &ProcessSpec,
    log_dir: Option<&Path>,
) -> io::Result<Child> {
    let mut cmd = build_command(spec, log_dir)?;
    debug!("Executing command for '{key}': {cmd:?}");

    let mut child = cmd.spawn()?;

    if let Some(dir) = log_dir {
        if let Some(out) = child.stdout.take()
            && let Err(err) = spawn_log_writer(dir, key, out, "stdout")
        {
            warn!("Failed to capture stdout of '{key}': {err}");
        }
        if let Some(err_stream) = child.stderr.take()
            && let Err(err) = spawn_log_writer(dir, key, err_stream, "stderr")
        {
            warn!("Failed to capture stderr of '{key}': {err}");
        }
    }

    Ok(child)
}
